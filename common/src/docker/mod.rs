//! Docker-backed container plumbing.
//!
//! The [`ContainerRuntime`] trait is the capability surface the rest of the
//! harness programs against. [`DockerRuntime`] implements it over the engine
//! API; [`MockRuntime`] implements it in memory so lifecycle and orchestration
//! logic can be tested without a daemon.

pub mod client;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod mock;
pub mod runtime;
pub mod volume;

pub use client::DockerRuntime;
pub use error::DockerError;
pub use job::JobRunner;
pub use lifecycle::{ContainerLifecycle, LifecycleState, LogStreamErrors};
pub use mock::MockRuntime;
pub use runtime::{BindMount, ContainerRuntime, ContainerSpec, ExecOutput, JobSpec, LogLine};
pub use volume::{create_owned_volume, set_volume_owner};

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;

/// Label attached to every resource the harness creates. The value is the
/// test name, so out-of-band garbage collection can find leaked volumes,
/// networks and containers belonging to a test run.
pub const CLEANUP_LABEL: &str = "interlab.test-name";

/// Label naming the node that owns a volume.
pub const NODE_OWNER_LABEL: &str = "interlab.node-owner";

/// Maximum length docker accepts for a container hostname.
const MAX_HOSTNAME_LEN: usize = 63;

/// Build the standard cleanup label set for a test run.
pub fn cleanup_labels(test_name: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(CLEANUP_LABEL.to_string(), test_name.to_string());
    labels
}

/// Sanitize a string into a valid docker container name.
///
/// Docker names must match `[a-zA-Z0-9][a-zA-Z0-9_.-]*`. Any other character
/// is replaced with `-`, and a leading non-alphanumeric is prefixed with `0`.
pub fn sanitize_container_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if !out.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        out.insert(0, '0');
    }
    out
}

/// Condense a container name into a valid hostname.
///
/// Hostnames are capped at 63 characters; longer names keep their head and
/// tail, which carry the chain id and sanitized test name.
pub fn condense_host_name(name: &str) -> String {
    let name = sanitize_container_name(name);
    if name.len() <= MAX_HOSTNAME_LEN {
        return name;
    }
    let head: String = name.chars().take(30).collect();
    let tail: String = name.chars().skip(name.len() - 32).collect();
    format!("{head}-{tail}")
}

/// Random lowercase alphanumeric suffix for unique resource names.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}
