use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::types::{ContainerState, ExecOptions, ExecResult, InstanceInfo, PortBinding, PortSpec};
use crate::context::Context;
use crate::error_handling::types::{ContainerError, DriverError, Phase, WaitError};
use crate::runtime::RuntimeDriver;
use crate::wait::{WaitStrategy, WaitTarget};

/// A live container returned by [`ContainerManager::provision`].
///
/// The handle owns its reference to the underlying instance but not the
/// instance's lifetime: dropping a handle leaves the container running.
/// Call [`terminate`](Self::terminate) to remove it.
///
/// `is_running` reports the last state this handle observed; use
/// [`refresh`](Self::refresh) to re-query the runtime.
///
/// [`ContainerManager::provision`]: super::ContainerManager::provision
pub struct ContainerHandle {
    driver: Arc<dyn RuntimeDriver>,
    id: String,
    name: String,
    image: String,
    created_at: DateTime<Utc>,
    state: ContainerState,
    ports: Vec<PortBinding>,
    reused: bool,
    waiting_for: Option<Arc<dyn WaitStrategy>>,
    stop_timeout: Duration,
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("runtime", &self.driver.name())
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.image)
            .field("state", &self.state)
            .field("reused", &self.reused)
            .finish()
    }
}

impl ContainerHandle {
    pub(crate) fn new(
        driver: Arc<dyn RuntimeDriver>,
        info: InstanceInfo,
        reused: bool,
        waiting_for: Option<Arc<dyn WaitStrategy>>,
        stop_timeout: Duration,
    ) -> Self {
        ContainerHandle {
            driver,
            id: info.id,
            name: info.name,
            image: info.image,
            created_at: Utc::now(),
            state: info.state,
            ports: info.ports,
            reused,
            waiting_for,
            stop_timeout,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.id
    }

    /// Container name, empty when the runtime assigned none.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    /// When this handle was created, not when the container was.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// True if the handle was attached to an existing container.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Host under which mapped ports are reachable.
    pub fn host(&self) -> String {
        self.driver.host()
    }

    fn ensure_open(&self) -> Result<(), ContainerError> {
        match self.state {
            ContainerState::Terminating | ContainerState::Terminated => {
                Err(ContainerError::Closed {
                    id: self.id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn ensure_running(&self) -> Result<(), ContainerError> {
        self.ensure_open()?;
        if !self.state.is_running() {
            return Err(ContainerError::NotRunning {
                id: self.id.clone(),
                state: self.state,
            });
        }
        Ok(())
    }

    /// Re-reads state and port bindings from the runtime.
    pub async fn refresh(&mut self, ctx: &Context) -> Result<ContainerState, ContainerError> {
        self.ensure_open()?;
        let info = self
            .driver
            .inspect(ctx, &self.id)
            .await
            .map_err(|e| ContainerError::runtime(Phase::Inspect, e))?;
        self.state = info.state;
        self.ports = info.ports;
        Ok(self.state)
    }

    /// Host port bound to `port` (`"80"`, `"80/tcp"`, `"53/udp"`).
    pub async fn mapped_port(&self, ctx: &Context, port: &str) -> Result<u16, ContainerError> {
        self.ensure_open()?;
        let spec: PortSpec = port.parse().map_err(ContainerError::InvalidRequest)?;
        if let Some(host_port) = self.cached_port(&spec) {
            return Ok(host_port);
        }
        let info = self
            .driver
            .inspect(ctx, &self.id)
            .await
            .map_err(|e| ContainerError::runtime(Phase::Inspect, e))?;
        info.host_port(&spec).filter(|p| *p != 0).ok_or_else(|| {
            ContainerError::InvalidRequest(format!(
                "port {} is not published by container {}",
                spec, self.id
            ))
        })
    }

    /// `host:port` for the given exposed port.
    pub async fn endpoint(&self, ctx: &Context, port: &str) -> Result<String, ContainerError> {
        let host_port = self.mapped_port(ctx, port).await?;
        Ok(format!("{}:{}", self.driver.host(), host_port))
    }

    fn cached_port(&self, port: &PortSpec) -> Option<u16> {
        self.ports
            .iter()
            .find(|b| b.container == *port && b.host_port != 0)
            .map(|b| b.host_port)
    }

    /// Runs `argv` in the container and returns its exit code and output.
    ///
    /// The exit code is the command's own; a non-zero code is not an error.
    pub async fn exec<S>(
        &self,
        ctx: &Context,
        argv: &[S],
        options: ExecOptions,
    ) -> Result<ExecResult, ContainerError>
    where
        S: AsRef<str>,
    {
        self.ensure_running()?;
        let argv: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        if argv.is_empty() {
            return Err(ContainerError::InvalidRequest(
                "exec requires a command".to_string(),
            ));
        }
        debug!("Exec in container {}: {:?}", self.id, argv);
        self.driver
            .exec(ctx, &self.id, &argv, &options)
            .await
            .map_err(|e| ContainerError::runtime(Phase::Exec, e))
    }

    /// Copies a local file to `remote` with permission bits `mode`.
    pub async fn copy_file_to_container(
        &self,
        ctx: &Context,
        local: impl AsRef<Path>,
        remote: &str,
        mode: u32,
    ) -> Result<(), ContainerError> {
        self.ensure_running()?;
        let local = local.as_ref();
        debug!(
            "Copying {} to {}:{} (mode {:o})",
            local.display(),
            self.id,
            remote,
            mode
        );
        self.driver
            .copy_file(ctx, &self.id, local, remote, mode)
            .await
            .map_err(|e| ContainerError::runtime(Phase::Copy, e))
    }

    /// Writes `content` to `remote` through a temporary local file.
    pub async fn copy_to_container(
        &self,
        ctx: &Context,
        content: &[u8],
        remote: &str,
        mode: u32,
    ) -> Result<(), ContainerError> {
        self.ensure_running()?;
        let mut staged = tempfile::NamedTempFile::new()
            .map_err(|e| ContainerError::runtime(Phase::Copy, e.into()))?;
        staged
            .write_all(content)
            .and_then(|_| staged.flush())
            .map_err(|e| ContainerError::runtime(Phase::Copy, e.into()))?;
        self.copy_file_to_container(ctx, staged.path(), remote, mode)
            .await
    }

    /// Everything the container has logged so far.
    pub async fn logs(&self, ctx: &Context) -> Result<Vec<u8>, ContainerError> {
        self.ensure_open()?;
        self.driver
            .logs(ctx, &self.id)
            .await
            .map_err(|e| ContainerError::runtime(Phase::Logs, e))
    }

    /// Starts a created or stopped container and waits for readiness.
    pub async fn start(&mut self, ctx: &Context) -> Result<(), ContainerError> {
        self.ensure_open()?;
        if self.state.is_running() {
            debug!("Container {} already running", self.id);
            return Ok(());
        }

        let previous = self.state;
        self.state = ContainerState::Starting;
        if let Err(e) = self.driver.start(ctx, &self.id).await {
            if let Err(refresh) = self.refresh(ctx).await {
                warn!(
                    "Could not inspect container {} after a failed start: {}",
                    self.id, refresh
                );
                self.state = previous;
            }
            return Err(ContainerError::runtime(Phase::Start, e));
        }
        if let Err(e) = self.refresh(ctx).await {
            self.state = previous;
            return Err(e);
        }
        info!("Started container {} ({})", self.id, self.image);

        self.wait_until_ready(ctx).await
    }

    /// Runs the request's readiness strategy, if any.
    pub async fn wait_until_ready(&self, ctx: &Context) -> Result<(), ContainerError> {
        let Some(strategy) = self.waiting_for.clone() else {
            return Ok(());
        };
        self.ensure_running()?;

        debug!("Waiting for container {} with {:?}", self.id, strategy);
        match strategy.wait_until_ready(ctx, self).await {
            Ok(()) => {
                debug!("Container {} is ready", self.id);
                Ok(())
            }
            Err(WaitError::Timeout(waited)) => {
                warn!(
                    "Container {} not ready after {:?}; leaving it running",
                    self.id, waited
                );
                Err(ContainerError::ReadinessTimeout {
                    id: self.id.clone(),
                    waited,
                })
            }
            Err(WaitError::Interrupted(i)) => Err(i.into()),
            Err(source) => Err(ContainerError::Readiness {
                id: self.id.clone(),
                source,
            }),
        }
    }

    /// Stops the container without removing it. `timeout` is the grace
    /// period before the runtime kills it; `None` uses the configured one.
    pub async fn stop(
        &mut self,
        ctx: &Context,
        timeout: Option<Duration>,
    ) -> Result<(), ContainerError> {
        self.ensure_open()?;
        self.driver
            .stop(ctx, &self.id, timeout.unwrap_or(self.stop_timeout))
            .await
            .map_err(|e| ContainerError::runtime(Phase::Stop, e))?;
        self.state = ContainerState::Stopped;
        info!("Stopped container {}", self.id);
        Ok(())
    }

    /// Stops and removes the container.
    ///
    /// Idempotent: once terminated, further calls return `Ok(())`. A container
    /// already removed by someone else also counts as terminated.
    pub async fn terminate(&mut self, ctx: &Context) -> Result<(), ContainerError> {
        if self.state == ContainerState::Terminated {
            debug!("Container {} already terminated", self.id);
            return Ok(());
        }

        let previous = self.state;
        self.state = ContainerState::Terminating;
        match self.driver.terminate(ctx, &self.id).await {
            Ok(()) => info!("Terminated container {}", self.id),
            Err(DriverError::NotFound(_)) => {
                debug!("Container {} was already removed", self.id)
            }
            Err(e) => {
                self.state = previous;
                return Err(ContainerError::runtime(Phase::Terminate, e));
            }
        }
        self.state = ContainerState::Terminated;
        Ok(())
    }
}

#[async_trait]
impl WaitTarget for ContainerHandle {
    fn host(&self) -> String {
        self.driver.host()
    }

    async fn mapped_port(&self, ctx: &Context, port: &PortSpec) -> Result<u16, DriverError> {
        if let Some(host_port) = self.cached_port(port) {
            return Ok(host_port);
        }
        let info = self.driver.inspect(ctx, &self.id).await?;
        info.host_port(port)
            .filter(|p| *p != 0)
            .ok_or_else(|| DriverError::NotFound(format!("{} on {}", port, self.id)))
    }

    async fn logs(&self, ctx: &Context) -> Result<Vec<u8>, DriverError> {
        self.driver.logs(ctx, &self.id).await
    }

    async fn exec(
        &self,
        ctx: &Context,
        argv: &[String],
        options: &ExecOptions,
    ) -> Result<ExecResult, DriverError> {
        self.driver.exec(ctx, &self.id, argv, options).await
    }

    async fn state(&self, ctx: &Context) -> Result<ContainerState, DriverError> {
        Ok(self.driver.inspect(ctx, &self.id).await?.state)
    }
}
