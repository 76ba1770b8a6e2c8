use std::fmt;
use std::time::Duration;

use crate::container_management::types::ContainerState;
use crate::container_management::ContainerHandle;
use crate::context::Interrupted;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures reported by a [`RuntimeDriver`](crate::runtime::RuntimeDriver).
#[derive(Debug)]
pub enum DriverError {
    RuntimeNotAvailable(String),
    NotFound(String),
    /// The engine refused a name that another instance already holds.
    NameConflict(String),
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    Parse(String),
    Io(std::io::Error),
    Interrupted(Interrupted),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::RuntimeNotAvailable(e) => write!(f, "Container runtime not available: {}", e),
            DriverError::NotFound(id) => write!(f, "No such container: {}", id),
            DriverError::NameConflict(name) => {
                write!(f, "Container name {} is already in use", name)
            }
            DriverError::CommandFailed {
                command,
                status,
                stderr,
            } => match status {
                Some(code) => write!(f, "`{}` exited with {}: {}", command, code, stderr),
                None => write!(f, "`{}` was terminated by a signal: {}", command, stderr),
            },
            DriverError::Parse(e) => write!(f, "Unable to parse runtime output: {}", e),
            DriverError::Io(e) => write!(f, "Runtime IO error: {}", e),
            DriverError::Interrupted(e) => write!(f, "Runtime call interrupted: {}", e),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Io(e) => Some(e),
            DriverError::Interrupted(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err)
    }
}

impl From<Interrupted> for DriverError {
    fn from(err: Interrupted) -> Self {
        DriverError::Interrupted(err)
    }
}

/// Failures reported by a [`WaitStrategy`](crate::wait::WaitStrategy).
#[derive(Debug)]
pub enum WaitError {
    /// The strategy's own startup timeout elapsed.
    Timeout(Duration),
    Interrupted(Interrupted),
    /// The instance stopped while we were waiting for it.
    ContainerExited(ContainerState),
    Driver(DriverError),
    InvalidCondition(String),
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout(d) => write!(f, "Readiness condition not met within {:?}", d),
            WaitError::Interrupted(e) => write!(f, "Readiness wait interrupted: {}", e),
            WaitError::ContainerExited(state) => {
                write!(f, "Container left the running state while waiting ({})", state)
            }
            WaitError::Driver(e) => write!(f, "Readiness probe failed: {}", e),
            WaitError::InvalidCondition(e) => write!(f, "Invalid readiness condition: {}", e),
        }
    }
}

impl std::error::Error for WaitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WaitError::Driver(e) => Some(e),
            WaitError::Interrupted(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for WaitError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Interrupted(i) => WaitError::Interrupted(i),
            other => WaitError::Driver(other),
        }
    }
}

impl From<Interrupted> for WaitError {
    fn from(err: Interrupted) -> Self {
        WaitError::Interrupted(err)
    }
}

/// Which runtime call produced a [`ContainerError::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FindByName,
    Create,
    Start,
    Inspect,
    Exec,
    Copy,
    Logs,
    Stop,
    Terminate,
    List,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::FindByName => "find-by-name",
            Phase::Create => "create",
            Phase::Start => "start",
            Phase::Inspect => "inspect",
            Phase::Exec => "exec",
            Phase::Copy => "copy",
            Phase::Logs => "logs",
            Phase::Stop => "stop",
            Phase::Terminate => "terminate",
            Phase::List => "list",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum ContainerError {
    InvalidRequest(String),
    /// `reuse` was requested without a container name.
    ReuseEmptyName,
    /// A container with this name exists and reuse was not requested.
    NameInUse {
        name: String,
        id: String,
    },
    Runtime {
        phase: Phase,
        source: DriverError,
    },
    ReadinessTimeout {
        id: String,
        waited: Duration,
    },
    Readiness {
        id: String,
        source: WaitError,
    },
    StartupCommandFailed {
        argv: Vec<String>,
        exit_code: i32,
        output: String,
    },
    NotRunning {
        id: String,
        state: ContainerState,
    },
    /// The handle was terminated; no further operations are possible.
    Closed {
        id: String,
    },
    Cancelled,
    DeadlineExceeded,
}

impl ContainerError {
    /// Wraps a driver failure with the phase that produced it. Interruptions
    /// are surfaced as `Cancelled`/`DeadlineExceeded` rather than as runtime
    /// failures.
    pub fn runtime(phase: Phase, source: DriverError) -> Self {
        match source {
            DriverError::Interrupted(i) => i.into(),
            source => ContainerError::Runtime { phase, source },
        }
    }

    /// True for both an existing-name refusal and a lost creation race.
    pub fn is_name_conflict(&self) -> bool {
        matches!(
            self,
            ContainerError::NameInUse { .. }
                | ContainerError::Runtime {
                    source: DriverError::NameConflict(_),
                    ..
                }
        )
    }

    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, ContainerError::ReadinessTimeout { .. })
    }

    /// Errors detected from the request alone, before any runtime call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ContainerError::InvalidRequest(_)
                | ContainerError::ReuseEmptyName
                | ContainerError::NameInUse { .. }
        )
    }
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::InvalidRequest(e) => write!(f, "Invalid container request: {}", e),
            ContainerError::ReuseEmptyName => {
                write!(f, "with reuse option a container name mustn't be empty")
            }
            ContainerError::NameInUse { name, id } => write!(
                f,
                "Container name {} is already in use by {} and reuse was not requested",
                name, id
            ),
            ContainerError::Runtime { phase, source } => {
                write!(f, "Container {} failed: {}", phase, source)
            }
            ContainerError::ReadinessTimeout { id, waited } => write!(
                f,
                "Container {} was not ready after {:?}; it is left running for inspection",
                id, waited
            ),
            ContainerError::Readiness { id, source } => {
                write!(f, "Container {} readiness check failed: {}", id, source)
            }
            ContainerError::StartupCommandFailed {
                argv,
                exit_code,
                output,
            } => write!(
                f,
                "Startup command {:?} exited with {}: {}",
                argv, exit_code, output
            ),
            ContainerError::NotRunning { id, state } => {
                write!(f, "Container {} is not running ({})", id, state)
            }
            ContainerError::Closed { id } => write!(f, "Container handle {} is closed", id),
            ContainerError::Cancelled => write!(f, "Container operation cancelled"),
            ContainerError::DeadlineExceeded => write!(f, "Container operation deadline exceeded"),
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContainerError::Runtime { source, .. } => Some(source),
            ContainerError::Readiness { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<Interrupted> for ContainerError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::Cancelled => ContainerError::Cancelled,
            Interrupted::DeadlineExceeded => ContainerError::DeadlineExceeded,
        }
    }
}

/// A failed provision, together with the container it left behind, if any.
///
/// Provisioning can fail after the container was created and started: a
/// readiness timeout or a failing startup command leaves a live container so
/// its logs can be inspected. The caller owns that container and is
/// responsible for terminating it; nothing removes it automatically.
#[derive(Debug)]
pub struct ProvisionError {
    error: ContainerError,
    container: Option<ContainerHandle>,
}

impl ProvisionError {
    pub fn new(error: ContainerError, container: Option<ContainerHandle>) -> Self {
        ProvisionError { error, container }
    }

    pub fn error(&self) -> &ContainerError {
        &self.error
    }

    pub fn into_error(self) -> ContainerError {
        self.error
    }

    /// The partially provisioned container, still present in the runtime.
    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn container_mut(&mut self) -> Option<&mut ContainerHandle> {
        self.container.as_mut()
    }

    pub fn into_container(self) -> Option<ContainerHandle> {
        self.container
    }
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Some(c) => write!(
                f,
                "{} (container {} was left in the runtime)",
                self.error,
                c.container_id()
            ),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<ContainerError> for ProvisionError {
    fn from(err: ContainerError) -> Self {
        ProvisionError::new(err, None)
    }
}
