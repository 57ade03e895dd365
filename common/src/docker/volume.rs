//! Volume provisioning and ownership fix-up.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::DockerError;
use super::runtime::{ContainerRuntime, JobSpec};
use super::{random_suffix, sanitize_container_name, CLEANUP_LABEL, NODE_OWNER_LABEL};

/// Image used for throwaway chown containers.
const OWNERSHIP_IMAGE: &str = "busybox:stable";

/// Where the target volume is mounted inside the chown container.
const OWNERSHIP_MOUNT: &str = "/mnt/dockervolume";

/// Create a volume labeled for cleanup and tagged with its owning node.
pub async fn create_owned_volume(
    runtime: &Arc<dyn ContainerRuntime>,
    test_name: &str,
    owner: &str,
) -> Result<String, DockerError> {
    let mut labels = HashMap::new();
    labels.insert(CLEANUP_LABEL.to_string(), test_name.to_string());
    labels.insert(NODE_OWNER_LABEL.to_string(), owner.to_string());
    let name = format!("{}-{}", sanitize_container_name(owner), random_suffix(8));
    debug!("creating volume {name} for {owner}");
    runtime.create_volume(&name, &labels).await
}

/// Chown a volume's mount point to the image's declared `uid:gid` so a
/// non-root node process can write its home directory. No-op when the image
/// declares no uid:gid.
pub async fn set_volume_owner(
    runtime: &Arc<dyn ContainerRuntime>,
    volume: &str,
    uid_gid: Option<&str>,
    test_name: &str,
) -> Result<(), DockerError> {
    let Some(uid_gid) = uid_gid else {
        return Ok(());
    };
    if let Err(e) = runtime.pull_image(OWNERSHIP_IMAGE).await {
        warn!("failed to pull {OWNERSHIP_IMAGE}: {e}; assuming a local copy");
    }
    let mut labels = HashMap::new();
    labels.insert(CLEANUP_LABEL.to_string(), test_name.to_string());
    let spec = JobSpec {
        image: OWNERSHIP_IMAGE.to_string(),
        cmd: vec![
            "chown".to_string(),
            "-R".to_string(),
            uid_gid.to_string(),
            OWNERSHIP_MOUNT.to_string(),
        ],
        env: vec![],
        binds: vec![format!("{volume}:{OWNERSHIP_MOUNT}")],
        network_id: None,
        user: Some("0".to_string()),
        labels,
    };
    debug!("fixing ownership of volume {volume} to {uid_gid}");
    runtime.run_job(&spec).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::mock::MockRuntime;

    #[tokio::test]
    async fn owned_volume_uses_sanitized_owner_prefix() {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(MockRuntime::new());
        let name = create_owned_volume(&runtime, "volume_test", "anvil-31337/x")
            .await
            .unwrap();
        assert!(name.starts_with("anvil-31337-x-"));
    }

    #[tokio::test]
    async fn ownership_fixup_skips_images_without_uid_gid() {
        let mock = Arc::new(MockRuntime::new());
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        set_volume_owner(&runtime, "vol", None, "volume_test")
            .await
            .unwrap();
        assert_eq!(mock.jobs_run(), 0);
    }

    #[tokio::test]
    async fn ownership_fixup_runs_a_root_chown_job() {
        let mock = Arc::new(MockRuntime::new());
        mock.set_job_handler(|spec| {
            assert_eq!(spec.user.as_deref(), Some("0"));
            assert_eq!(spec.cmd[0], "chown");
            assert_eq!(spec.binds, vec![format!("vol:{OWNERSHIP_MOUNT}")]);
            Ok(Default::default())
        });
        let runtime: Arc<dyn ContainerRuntime> = mock.clone();
        set_volume_owner(&runtime, "vol", Some("1000:1000"), "volume_test")
            .await
            .unwrap();
        assert_eq!(mock.jobs_run(), 1);
    }
}
