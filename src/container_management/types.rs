//! Core types used by the container management subsystem.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Lifecycle state of a container instance as last observed by a handle.
///
/// `created -> starting -> running -> terminating -> terminated`.
/// A handle first exists once the engine has created the instance, so the
/// create call itself has no state of its own. `Stopped` covers instances the
/// engine reports as exited, paused or dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Starting,
    Running,
    Stopped,
    Terminating,
    Terminated,
}

impl ContainerState {
    /// Maps an engine status string (`docker inspect` `.State.Status`).
    pub fn from_status(status: &str) -> Self {
        match status {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "removing" => ContainerState::Terminating,
            // exited, paused, restarting, dead and anything unknown
            _ => ContainerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Starting => "starting",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Terminating => "terminating",
            ContainerState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Protocol {
    TCP,
    UDP,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TCP => f.write_str("tcp"),
            Protocol::UDP => f.write_str("udp"),
        }
    }
}

/// A container-side port, written `80`, `80/tcp` or `53/udp`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub fn tcp(port: u16) -> Self {
        PortSpec {
            port,
            protocol: Protocol::TCP,
        }
    }

    pub fn udp(port: u16) -> Self {
        PortSpec {
            port,
            protocol: Protocol::UDP,
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl FromStr for PortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (port, proto) = match s.split_once('/') {
            Some((p, proto)) => (p, proto),
            None => (s, "tcp"),
        };
        let protocol = match proto.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::TCP,
            "udp" => Protocol::UDP,
            other => return Err(format!("unsupported protocol '{}' in port '{}'", other, s)),
        };
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port number in '{}'", s))?;
        if port == 0 {
            return Err(format!("port must be non-zero in '{}'", s));
        }
        Ok(PortSpec { port, protocol })
    }
}

/// A container port published on the host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PortBinding {
    pub container: PortSpec,
    pub host_port: u16,
}

/// What the runtime knows about one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub id: String,
    /// Name without the engine's leading `/`; empty for anonymous instances.
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub exit_code: Option<i32>,
    pub ports: Vec<PortBinding>,
    pub labels: BTreeMap<String, String>,
}

impl InstanceInfo {
    pub fn host_port(&self, port: &PortSpec) -> Option<u16> {
        self.ports
            .iter()
            .find(|b| &b.container == port)
            .map(|b| b.host_port)
    }
}

/// Fully validated creation request handed to the runtime driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSpec {
    pub image: String,
    pub name: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub exposed_ports: Vec<PortSpec>,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
}

/// How exec output is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// stdout and stderr interleaved in arrival order.
    #[default]
    Combined,
    /// stdout and stderr kept apart.
    Demultiplexed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOptions {
    pub framing: Framing,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
}

impl ExecOptions {
    pub fn multiplexed() -> Self {
        ExecOptions::default()
    }

    pub fn demultiplexed() -> Self {
        ExecOptions {
            framing: Framing::Demultiplexed,
            ..Default::default()
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Captured output of an exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutput {
    Combined(Vec<u8>),
    Demultiplexed { stdout: Vec<u8>, stderr: Vec<u8> },
}

impl ExecOutput {
    /// Everything the command wrote; for demultiplexed output, stdout then stderr.
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            ExecOutput::Combined(b) => b.clone(),
            ExecOutput::Demultiplexed { stdout, stderr } => {
                let mut all = stdout.clone();
                all.extend_from_slice(stderr);
                all
            }
        }
    }

    pub fn stdout(&self) -> Option<&[u8]> {
        match self {
            ExecOutput::Combined(_) => None,
            ExecOutput::Demultiplexed { stdout, .. } => Some(stdout),
        }
    }

    pub fn stderr(&self) -> Option<&[u8]> {
        match self {
            ExecOutput::Combined(_) => None,
            ExecOutput::Demultiplexed { stderr, .. } => Some(stderr),
        }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }

    /// The output as a reader (`std::io::Read` and `tokio::io::AsyncRead`).
    pub fn into_reader(self) -> Cursor<Vec<u8>> {
        match self {
            ExecOutput::Combined(b) => Cursor::new(b),
            other => Cursor::new(other.bytes()),
        }
    }
}

/// Exit code plus output of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    pub output: ExecOutput,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Aggregate counters kept by a [`ContainerManager`](super::ContainerManager).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// Containers created by this manager.
    pub total_created: u64,
    /// Provisions satisfied by attaching to an existing named container.
    pub total_reused: u64,
    /// Provisions that returned an error.
    pub failed_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_parsing() {
        assert_eq!("80".parse::<PortSpec>(), Ok(PortSpec::tcp(80)));
        assert_eq!("8080/tcp".parse::<PortSpec>(), Ok(PortSpec::tcp(8080)));
        assert_eq!(" 53/UDP ".parse::<PortSpec>(), Ok(PortSpec::udp(53)));
        assert!("http".parse::<PortSpec>().is_err());
        assert!("0/tcp".parse::<PortSpec>().is_err());
        assert!("80/sctp".parse::<PortSpec>().is_err());
        assert!("70000".parse::<PortSpec>().is_err());
        assert_eq!(PortSpec::udp(53).to_string(), "53/udp");
    }

    #[test]
    fn engine_status_mapping() {
        assert_eq!(ContainerState::from_status("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_status("created"), ContainerState::Created);
        assert_eq!(ContainerState::from_status("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_status("paused"), ContainerState::Stopped);
        assert_eq!(ContainerState::from_status("removing"), ContainerState::Terminating);
    }

    #[test]
    fn demultiplexed_output_concatenates_stdout_first() {
        let out = ExecOutput::Demultiplexed {
            stdout: b"out\n".to_vec(),
            stderr: b"err\n".to_vec(),
        };
        assert_eq!(out.bytes(), b"out\nerr\n");
        assert_eq!(out.stdout(), Some(&b"out\n"[..]));
        assert_eq!(ExecOutput::Combined(b"x".to_vec()).stdout(), None);
    }

    #[test]
    fn output_reader_yields_all_bytes() {
        use std::io::Read;
        let mut reader = ExecOutput::Combined(b"/tmp/marker\n".to_vec()).into_reader();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "/tmp/marker\n");
    }
}
