//! Readiness strategies.
//!
//! A strategy is attached to a request through
//! [`ContainerRequest::waiting_for`](crate::container_management::ContainerRequest)
//! and is run by the manager once the container is started. Each strategy
//! carries its own startup timeout; when it elapses the provision fails with
//! a readiness timeout and the container is left running.

pub mod exec;
pub mod http;
pub mod listening_port;
pub mod log;
pub mod multi;
pub mod strategy;
#[cfg(test)]
mod tests;

pub use self::exec::{for_exec, ForExec};
pub use self::http::{for_http, ForHttp};
pub use self::listening_port::{for_listening_port, ForListeningPort};
pub use self::log::{for_log, ForLog};
pub use self::multi::{for_all, ForAll};
pub use self::strategy::{WaitStrategy, WaitTarget, DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT};
