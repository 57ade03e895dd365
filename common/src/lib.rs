//! Shared container plumbing for the Interlab test harness.
//!
//! Everything a chain node needs from a container engine lives here: the
//! [`docker::ContainerRuntime`] capability trait, its bollard-backed
//! implementation, an in-memory mock for engine-free tests, and the
//! per-node [`docker::ContainerLifecycle`] state machine.

pub mod docker;

pub use docker::{ContainerLifecycle, ContainerRuntime, DockerError, DockerRuntime, JobRunner};
