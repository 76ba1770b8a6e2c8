//! Declarative container requests and the options that customise them.
//!
//! A request is plain data: nothing here talks to the runtime and nothing can
//! fail. Malformed values (an empty image, an unparsable port, a startup
//! command producing no argv) are rejected when the request is submitted to
//! [`ContainerManager::provision`](super::ContainerManager::provision).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::types::{CreateSpec, ExecOptions, PortSpec};
use crate::error_handling::types::ContainerError;
use crate::wait::WaitStrategy;

/// Anything that can be run inside a container as a command line.
///
/// Startup commands are stored as `Arc<dyn Executable>`; the manager only ever
/// asks for the argv, so callers can register literal vectors or their own
/// structured command types.
pub trait Executable: Send + Sync {
    fn as_command(&self) -> Vec<String>;

    fn options(&self) -> ExecOptions {
        ExecOptions::default()
    }
}

impl Executable for Vec<String> {
    fn as_command(&self) -> Vec<String> {
        self.clone()
    }
}

/// A literal argv with optional exec options.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCommand {
    argv: Vec<String>,
    options: ExecOptions,
}

impl RawCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawCommand {
            argv: argv.into_iter().map(Into::into).collect(),
            options: ExecOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }
}

impl Executable for RawCommand {
    fn as_command(&self) -> Vec<String> {
        self.argv.clone()
    }

    fn options(&self) -> ExecOptions {
        self.options.clone()
    }
}

/// Description of the desired container.
#[derive(Clone, Default)]
pub struct ContainerRequest {
    /// Image reference, e.g. `alpine:3.20`. Required.
    pub image: String,
    /// Ports to publish on random host ports: `"80"`, `"80/tcp"`, `"53/udp"`.
    pub exposed_ports: Vec<String>,
    /// Entrypoint override; empty keeps the image's entrypoint.
    pub entrypoint: Vec<String>,
    /// Arguments following the entrypoint; empty keeps the image's command.
    pub cmd: Vec<String>,
    /// Container name; empty means anonymous.
    pub name: String,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    /// Readiness condition checked after start.
    pub waiting_for: Option<Arc<dyn WaitStrategy>>,
    /// Run in order after readiness on freshly created containers only.
    pub startup_commands: Vec<Arc<dyn Executable>>,
    /// Attach to an existing container with the same name instead of failing.
    pub reuse: bool,
}

impl ContainerRequest {
    pub fn new(image: impl Into<String>) -> Self {
        ContainerRequest {
            image: image.into(),
            ..Default::default()
        }
    }

    /// The name, or `None` for an anonymous request.
    pub fn name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(self.name.as_str())
        }
    }
}

impl fmt::Debug for ContainerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let startup: Vec<Vec<String>> =
            self.startup_commands.iter().map(|c| c.as_command()).collect();
        f.debug_struct("ContainerRequest")
            .field("image", &self.image)
            .field("exposed_ports", &self.exposed_ports)
            .field("entrypoint", &self.entrypoint)
            .field("cmd", &self.cmd)
            .field("name", &self.name)
            .field("env", &self.env)
            .field("labels", &self.labels)
            .field("waiting_for", &self.waiting_for)
            .field("startup_commands", &startup)
            .field("reuse", &self.reuse)
            .finish()
    }
}

/// A [`ContainerRequest`] plus orchestration flags.
#[derive(Debug, Clone, Default)]
pub struct GenericContainerRequest {
    pub request: ContainerRequest,
    /// Start the container right after creating it.
    pub started: bool,
}

impl GenericContainerRequest {
    pub fn new(request: ContainerRequest) -> Self {
        GenericContainerRequest {
            request,
            started: true,
        }
    }

    pub fn started(mut self, started: bool) -> Self {
        self.started = started;
        self
    }

    /// Applies a customisation option in place.
    pub fn apply(&mut self, option: CustomizeRequest) {
        option(self)
    }

    /// Checks everything that can be checked without the runtime and builds
    /// the driver-facing [`CreateSpec`].
    pub(crate) fn validate(
        &self,
        extra_labels: &BTreeMap<String, String>,
    ) -> Result<ValidatedRequest, ContainerError> {
        let req = &self.request;

        if req.reuse && req.name.is_empty() {
            return Err(ContainerError::ReuseEmptyName);
        }
        if req.image.trim().is_empty() {
            return Err(ContainerError::InvalidRequest(
                "image reference must not be empty".to_string(),
            ));
        }

        let exposed_ports = req
            .exposed_ports
            .iter()
            .map(|p| p.parse::<PortSpec>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ContainerError::InvalidRequest)?;

        let mut startup_commands = Vec::with_capacity(req.startup_commands.len());
        for (idx, exec) in req.startup_commands.iter().enumerate() {
            let argv = exec.as_command();
            if argv.is_empty() || argv[0].is_empty() {
                return Err(ContainerError::InvalidRequest(format!(
                    "startup command #{} produced an empty command line",
                    idx
                )));
            }
            startup_commands.push((argv, exec.options()));
        }

        let mut labels = extra_labels.clone();
        labels.extend(req.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        let spec = CreateSpec {
            image: req.image.clone(),
            name: req.name().map(str::to_string),
            entrypoint: req.entrypoint.clone(),
            cmd: req.cmd.clone(),
            exposed_ports,
            env: req.env.clone(),
            labels,
        };

        Ok(ValidatedRequest {
            spec,
            startup_commands,
        })
    }
}

pub(crate) struct ValidatedRequest {
    pub spec: CreateSpec,
    pub startup_commands: Vec<(Vec<String>, ExecOptions)>,
}

/// A customisation step applied to a request before submission.
pub type CustomizeRequest = Box<dyn FnOnce(&mut GenericContainerRequest) + Send>;

/// Applies `options` to `base` in order.
pub fn customize<I>(mut base: GenericContainerRequest, options: I) -> GenericContainerRequest
where
    I: IntoIterator<Item = CustomizeRequest>,
{
    for option in options {
        option(&mut base);
    }
    base
}

/// Appends a command to run after the container is started and ready.
pub fn with_startup_command<E>(exec: E) -> CustomizeRequest
where
    E: Executable + 'static,
{
    Box::new(move |req: &mut GenericContainerRequest| {
        req.request.startup_commands.push(Arc::new(exec));
    })
}

pub fn with_entrypoint<I, S>(entrypoint: I) -> CustomizeRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let entrypoint: Vec<String> = entrypoint.into_iter().map(Into::into).collect();
    Box::new(move |req: &mut GenericContainerRequest| req.request.entrypoint = entrypoint)
}

pub fn with_cmd<I, S>(cmd: I) -> CustomizeRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cmd: Vec<String> = cmd.into_iter().map(Into::into).collect();
    Box::new(move |req: &mut GenericContainerRequest| req.request.cmd = cmd)
}

/// Adds ports to publish; existing entries are kept.
pub fn with_exposed_ports<I, S>(ports: I) -> CustomizeRequest
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let ports: Vec<String> = ports.into_iter().map(Into::into).collect();
    Box::new(move |req: &mut GenericContainerRequest| req.request.exposed_ports.extend(ports))
}

pub fn with_name(name: impl Into<String>) -> CustomizeRequest {
    let name = name.into();
    Box::new(move |req: &mut GenericContainerRequest| req.request.name = name)
}

pub fn with_reuse(reuse: bool) -> CustomizeRequest {
    Box::new(move |req: &mut GenericContainerRequest| req.request.reuse = reuse)
}

pub fn with_env(key: impl Into<String>, value: impl Into<String>) -> CustomizeRequest {
    let pair = (key.into(), value.into());
    Box::new(move |req: &mut GenericContainerRequest| req.request.env.push(pair))
}

pub fn with_label(key: impl Into<String>, value: impl Into<String>) -> CustomizeRequest {
    let (key, value) = (key.into(), value.into());
    Box::new(move |req: &mut GenericContainerRequest| {
        req.request.labels.insert(key, value);
    })
}

pub fn with_wait_strategy<W>(strategy: W) -> CustomizeRequest
where
    W: WaitStrategy + 'static,
{
    Box::new(move |req: &mut GenericContainerRequest| {
        req.request.waiting_for = Some(Arc::new(strategy));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Touch {
        path: &'static str,
    }

    impl Executable for Touch {
        fn as_command(&self) -> Vec<String> {
            vec!["touch".to_string(), self.path.to_string()]
        }
    }

    fn alpine() -> GenericContainerRequest {
        GenericContainerRequest::new(ContainerRequest::new("alpine"))
    }

    #[test]
    fn startup_commands_keep_registration_order() {
        let req = customize(
            alpine(),
            [
                with_startup_command(Touch { path: "/tmp/a" }),
                with_startup_command(RawCommand::new(["touch", "/tmp/b"])),
                with_startup_command(vec!["touch".to_string(), "/tmp/c".to_string()]),
            ],
        );
        let argvs: Vec<Vec<String>> = req
            .request
            .startup_commands
            .iter()
            .map(|c| c.as_command())
            .collect();
        assert_eq!(
            argvs,
            vec![
                vec!["touch", "/tmp/a"],
                vec!["touch", "/tmp/b"],
                vec!["touch", "/tmp/c"],
            ]
        );
    }

    #[test]
    fn customize_options_apply_in_order() {
        let mut req = customize(
            alpine(),
            [
                with_name("first"),
                with_entrypoint(["tail", "-f", "/dev/null"]),
                with_exposed_ports(["80/tcp"]),
                with_exposed_ports(["53/udp"]),
                with_env("A", "1"),
                with_label("suite", "lifecycle"),
                with_name("second"),
            ],
        );
        req.apply(with_reuse(true));

        assert_eq!(req.request.name, "second");
        assert_eq!(req.request.entrypoint, vec!["tail", "-f", "/dev/null"]);
        assert_eq!(req.request.exposed_ports, vec!["80/tcp", "53/udp"]);
        assert_eq!(req.request.env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(
            req.request.labels.get("suite").map(String::as_str),
            Some("lifecycle")
        );
        assert!(req.request.reuse);
        assert!(req.started);
    }

    #[test]
    fn validate_rejects_reuse_without_name_first() {
        let mut req = GenericContainerRequest::new(ContainerRequest::default());
        req.request.reuse = true;
        let err = req.validate(&BTreeMap::new()).err().unwrap();
        assert!(matches!(err, ContainerError::ReuseEmptyName));
    }

    #[test]
    fn validate_rejects_malformed_input() {
        let empty_image = GenericContainerRequest::new(ContainerRequest::new("  "));
        assert!(matches!(
            empty_image.validate(&BTreeMap::new()),
            Err(ContainerError::InvalidRequest(_))
        ));

        let bad_port = customize(alpine(), [with_exposed_ports(["eighty"])]);
        assert!(matches!(
            bad_port.validate(&BTreeMap::new()),
            Err(ContainerError::InvalidRequest(_))
        ));

        let empty_cmd = customize(alpine(), [with_startup_command(Vec::<String>::new())]);
        assert!(matches!(
            empty_cmd.validate(&BTreeMap::new()),
            Err(ContainerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_merges_labels_with_request_winning() {
        let req = customize(alpine(), [with_label("owner", "request"), with_name("db")]);
        let defaults: BTreeMap<String, String> = [
            ("owner".to_string(), "config".to_string()),
            ("managed".to_string(), "true".to_string()),
        ]
        .into_iter()
        .collect();

        let validated = req.validate(&defaults).ok().unwrap();
        assert_eq!(validated.spec.name.as_deref(), Some("db"));
        assert_eq!(validated.spec.labels["owner"], "request");
        assert_eq!(validated.spec.labels["managed"], "true");
    }
}
