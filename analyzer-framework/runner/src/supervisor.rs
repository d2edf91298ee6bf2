use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use analyzer_framework_core::{
    constants::{
        BINARY_INPUT_EXTENSIONS, CONTAINER_CONFIG_MOUNT, CONTAINER_M2_MOUNT,
        CONTAINER_SOURCE_MOUNT, MAVEN_CACHE_VOLUME, skip_maven_cache,
    },
    provider::{ProviderKind, Proxy},
};
use analyzer_framework_providers::{paths::runtime_device_path, registry::ProviderDescriptor};
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    cleanup::CleanupCoordinator,
    runtime::{ContainerRuntime, RunSpec, RuntimeError},
};

/// How the analyzed source reaches the containers and the builtin provider.
#[derive(Clone, Debug)]
pub struct SourceMount {
    /// Host directory bind-mounted into provider containers. For archive
    /// inputs this is the staging temp dir holding a copy of the archive.
    pub host_root: PathBuf,
    /// Container-side location providers analyze; carries the archive
    /// basename for binary inputs.
    pub container_location: String,
    pub is_binary: bool,
}

/// Creates and tracks the run's container resources.
///
/// Every created resource is registered with the cleanup coordinator before
/// the create call returns to the caller, so later failures can always
/// unwind.
pub struct ContainerSupervisor {
    runtime: Arc<dyn ContainerRuntime>,
    cleanup: Arc<CleanupCoordinator>,
    run_id: String,
}

impl ContainerSupervisor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cleanup: Arc<CleanupCoordinator>) -> Self {
        let run_id = Uuid::new_v4().simple().to_string()[..8].to_owned();
        Self {
            runtime,
            cleanup,
            run_id,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Resolve the mount layout for the input. Archive inputs are copied into
    /// a tracked temp dir so the bind source is always a directory.
    pub async fn stage_input(&self, input: &Path) -> io::Result<SourceMount> {
        let is_binary = input.is_file()
            && input
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    BINARY_INPUT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                });

        if !is_binary {
            return Ok(SourceMount {
                host_root: input.to_path_buf(),
                container_location: CONTAINER_SOURCE_MOUNT.to_owned(),
                is_binary: false,
            });
        }

        let staging = tempfile::Builder::new()
            .prefix("analyzer-input-")
            .tempdir()?;
        let basename = input
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "input has no file name"))?
            .to_string_lossy()
            .into_owned();
        fs::copy(input, staging.path().join(&basename))?;
        let host_root = staging.path().to_path_buf();
        self.cleanup.track_temp_dir(staging).await;

        info!(
            archive = %basename,
            staging = %host_root.display(),
            "staged binary input for mounting"
        );
        Ok(SourceMount {
            host_root,
            container_location: format!("{CONTAINER_SOURCE_MOUNT}/{basename}"),
            is_binary: true,
        })
    }

    /// Copy the maven settings file into a tracked config dir and return the
    /// host dir plus the container-side settings path.
    pub async fn stage_maven_settings(
        &self,
        settings_file: &Path,
    ) -> io::Result<(PathBuf, String)> {
        let config_dir = tempfile::Builder::new()
            .prefix("analyzer-config-")
            .tempdir()?;
        fs::copy(settings_file, config_dir.path().join("settings.xml"))?;
        let host_dir = config_dir.path().to_path_buf();
        self.cleanup.track_temp_dir(config_dir).await;
        Ok((host_dir, format!("{CONTAINER_CONFIG_MOUNT}/settings.xml")))
    }

    pub async fn create_network(&self) -> Result<String, RuntimeError> {
        let name = format!("analyzer-net-{}", self.run_id);
        self.runtime.network_create(&name).await?;
        self.cleanup.track_network(name.clone()).await;
        debug!(network = %name, "created provider network");
        Ok(name)
    }

    /// Create the ephemeral bind volume exposing the source to containers.
    pub async fn create_source_volume(&self, host_root: &Path) -> Result<String, RuntimeError> {
        let name = format!("analyzer-src-{}", self.run_id);
        let device = runtime_device_path(host_root);
        self.runtime.volume_create_bind(&name, &device).await?;
        self.cleanup.track_volume(name.clone()).await;
        debug!(volume = %name, device = %device, "created source volume");
        Ok(name)
    }

    /// Idempotently create the persistent maven cache volume, unless disabled
    /// by env. The volume is shared across runs and never tracked for
    /// cleanup.
    pub async fn ensure_maven_cache(&self) -> Result<Option<String>, RuntimeError> {
        if skip_maven_cache() {
            debug!("maven cache volume disabled by environment");
            return Ok(None);
        }
        let Some(repo) = maven_local_repository() else {
            warn!("could not locate a home directory; skipping maven cache volume");
            return Ok(None);
        };
        if let Err(err) = fs::create_dir_all(&repo) {
            warn!(path = %repo.display(), error = %err, "cannot prepare maven repository dir; skipping cache volume");
            return Ok(None);
        }
        let device = runtime_device_path(&repo);
        match self
            .runtime
            .volume_create_bind(MAVEN_CACHE_VOLUME, &device)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {
                debug!(volume = MAVEN_CACHE_VOLUME, "maven cache volume already present");
            }
            Err(err) => return Err(err),
        }
        Ok(Some(MAVEN_CACHE_VOLUME.to_owned()))
    }

    /// Launch one provider container, detached and auto-removing.
    pub async fn launch_provider(
        &self,
        descriptor: &ProviderDescriptor,
        network: &str,
        source_volume: &str,
        maven_cache: Option<&str>,
        config_dir: Option<&Path>,
        proxy: Option<&Proxy>,
    ) -> Result<String, RuntimeError> {
        let name = format!("analyzer-{}-{}", descriptor.kind, self.run_id);
        let mut spec = RunSpec::new(descriptor.image.clone());
        spec.name = Some(name.clone());
        spec.network = Some(network.to_owned());
        spec.ports.push((descriptor.port, descriptor.port));
        spec.volumes.push((
            source_volume.to_owned(),
            descriptor.input_mount_path.display().to_string(),
        ));
        if descriptor.kind == ProviderKind::Java {
            if let Some(cache) = maven_cache {
                spec.volumes
                    .push((cache.to_owned(), CONTAINER_M2_MOUNT.to_owned()));
            }
            if let Some(config_dir) = config_dir {
                spec.volumes.push((
                    runtime_device_path(config_dir),
                    CONTAINER_CONFIG_MOUNT.to_owned(),
                ));
            }
        }
        if let Some(proxy) = proxy {
            for (key, value) in [
                ("HTTP_PROXY", proxy.http_proxy.as_deref()),
                ("HTTPS_PROXY", proxy.https_proxy.as_deref()),
                ("NO_PROXY", proxy.no_proxy.as_deref()),
            ] {
                if let Some(value) = value {
                    spec.env.push((key.to_owned(), value.to_owned()));
                }
            }
        }
        spec.command = vec!["--port".to_owned(), descriptor.port.to_string()];

        self.runtime.run_detached(&spec).await?;
        self.cleanup.track_container(name.clone()).await;
        info!(
            provider = %descriptor.kind,
            container = %name,
            port = descriptor.port,
            "provider container started"
        );
        Ok(name)
    }

    /// Append every container's output to the provider log. Best effort.
    pub async fn capture_logs(&self, containers: &[String], log_path: &Path) {
        let mut file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
        {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %log_path.display(), error = %err, "cannot open provider log");
                return;
            }
        };
        for container in containers {
            let logs = match self.runtime.logs(container).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(container = %container, error = %err, "failed to collect container logs");
                    continue;
                }
            };
            let banner = format!("==== {container} ====\n");
            if file.write_all(banner.as_bytes()).await.is_err()
                || file.write_all(logs.as_bytes()).await.is_err()
            {
                warn!(path = %log_path.display(), "failed to append provider logs");
                return;
            }
        }
    }
}

/// Host-side maven local repository backing the cache volume.
fn maven_local_repository() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".m2").join("repository"))
}
