//! Container lifecycle management.
//!
//! A [`GenericContainerRequest`] describes the container wanted; the
//! [`ContainerManager`] turns it into a running container and returns a
//! [`ContainerHandle`] to it.
//!
//! Re-exports:
//! - [`ContainerManager`]: provisions containers and keeps counters.
//! - [`ContainerHandle`]: exec, copy, stop and terminate one container.
//! - [`ContainerRequest`], [`GenericContainerRequest`] and the `with_*`
//!   customisation options.
//!
//! Example (non-running):
//! ```ignore
//! use testpod::container_management::{request::*, ContainerManager};
//! use testpod::{Context, ProviderConfig};
//!
//! let manager = ContainerManager::docker(ProviderConfig::default())?;
//! let req = customize(
//!     GenericContainerRequest::new(ContainerRequest::new("alpine")),
//!     [
//!         with_entrypoint(["tail", "-f", "/dev/null"]),
//!         with_startup_command(RawCommand::new(["touch", "/tmp/marker"])),
//!     ],
//! );
//! let mut container = manager.provision(&Context::background(), req).await?;
//! container.terminate(&Context::background()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod container_handle;
pub mod container_manager;
#[cfg(test)]
mod integration_tests;
pub mod request;
pub mod types;

pub use container_handle::ContainerHandle;
pub use container_manager::{ContainerManager, MANAGED_LABEL, SESSION_LABEL};
pub use request::{
    ContainerRequest, CustomizeRequest, Executable, GenericContainerRequest, RawCommand,
};
pub use types::{
    ContainerState, ContainerStats, ExecOptions, ExecOutput, ExecResult, Framing, PortSpec,
    Protocol,
};
