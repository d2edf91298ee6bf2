use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::runtime::ContainerRuntime;

#[derive(Default)]
struct Tracked {
    containers: Vec<String>,
    volumes: Vec<String>,
    networks: Vec<String>,
    temp_dirs: Vec<TempDir>,
}

impl Tracked {
    fn is_empty(&self) -> bool {
        self.containers.is_empty()
            && self.volumes.is_empty()
            && self.networks.is_empty()
            && self.temp_dirs.is_empty()
    }
}

/// Tears down everything a run created: provider containers, the ephemeral
/// source volume, the network, and temp directories.
///
/// Resources are registered the moment they are created, so a failure at any
/// later stage still reclaims them. `run` drains the ledger, which makes it
/// idempotent; the persistent maven cache volume is never registered here.
pub struct CleanupCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    preserve: bool,
    resources: Mutex<Tracked>,
}

impl CleanupCoordinator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, preserve: bool) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            preserve,
            resources: Mutex::new(Tracked::default()),
        })
    }

    pub async fn track_container(&self, name: String) {
        self.resources.lock().await.containers.push(name);
    }

    pub async fn track_volume(&self, name: String) {
        self.resources.lock().await.volumes.push(name);
    }

    pub async fn track_network(&self, name: String) {
        self.resources.lock().await.networks.push(name);
    }

    pub async fn track_temp_dir(&self, dir: TempDir) {
        self.resources.lock().await.temp_dirs.push(dir);
    }

    /// Tear everything down, best effort. Errors are logged, never returned;
    /// the primary run result stands.
    pub async fn run(&self) {
        let tracked = {
            let mut guard = self.resources.lock().await;
            std::mem::take(&mut *guard)
        };
        if tracked.is_empty() {
            return;
        }

        if self.preserve {
            self.preserve_resources(tracked);
            return;
        }

        for container in &tracked.containers {
            if let Err(err) = self.runtime.stop(container).await {
                warn!(container = %container, error = %err, "failed to stop provider container");
            }
        }
        for volume in &tracked.volumes {
            if let Err(err) = self.runtime.volume_rm(volume).await {
                warn!(volume = %volume, error = %err, "failed to remove volume");
            }
        }
        for network in &tracked.networks {
            if let Err(err) = self.runtime.network_rm(network).await {
                warn!(network = %network, error = %err, "failed to remove network");
            }
        }
        drop(tracked.temp_dirs);
    }

    fn preserve_resources(&self, tracked: Tracked) {
        info!(
            containers = ?tracked.containers,
            volumes = ?tracked.volumes,
            networks = ?tracked.networks,
            "cleanup disabled; leaving resources in place"
        );
        for dir in tracked.temp_dirs {
            let kept = dir.keep();
            info!(path = %kept.display(), "preserving temp directory");
        }
    }
}
