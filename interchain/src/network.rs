//! Shared test network setup.

use interlab_chain::ChainError;
use interlab_common::docker::{cleanup_labels, random_suffix, ContainerRuntime};
use log::info;

/// Create the bridge network a test run's chains share. The network carries
/// the cleanup label so out-of-band garbage collection can find it, and a
/// random suffix so parallel test runs never collide.
pub async fn setup_network(
    runtime: &dyn ContainerRuntime,
    test_name: &str,
) -> Result<String, ChainError> {
    let name = format!("interlab-{}", random_suffix(8));
    info!("creating docker network {name} for {test_name}");
    let id = runtime
        .create_network(&name, &cleanup_labels(test_name))
        .await?;
    Ok(id)
}
