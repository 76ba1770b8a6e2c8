//! Container engine drivers.
//!
//! [`RuntimeDriver`] is the seam between the manager and an engine.
//! [`DockerCli`] drives the `docker`/`podman` CLI; [`MemoryRuntime`] keeps
//! everything in process and backs the test suite.

pub mod docker;
pub mod driver;
pub mod memory;

pub use docker::DockerCli;
pub use driver::RuntimeDriver;
pub use memory::MemoryRuntime;
