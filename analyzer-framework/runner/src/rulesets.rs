use std::{fs, path::{Path, PathBuf}};

use analyzer_framework_providers::paths::runtime_device_path;
use anyhow::{Context as _, bail};
use tracing::{debug, info};

use crate::runtime::{ContainerRuntime, RunSpec};

/// Container-side directory the runner image keeps its rulesets in.
const RUNNER_RULESET_DIR: &str = "/opt/rulesets";

/// Container-side mount target rulesets are exported to.
const EXPORT_MOUNT: &str = "/exported";

/// Cache directory for a runner image's default rulesets, keyed by image
/// version so upgrades re-extract.
pub fn cache_dir_for(runner_image: &str, output: &Path) -> PathBuf {
    let version = runner_image
        .rsplit(':')
        .next()
        .filter(|tag| !tag.contains('/'))
        .unwrap_or("latest");
    output.join(format!(".rulesets-{version}"))
}

fn is_populated(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Extract the default rulesets from the runner image into the cache dir,
/// skipping extraction when a previous run already populated it.
pub async fn ensure_default_rulesets(
    runtime: &dyn ContainerRuntime,
    runner_image: &str,
    output: &Path,
) -> anyhow::Result<PathBuf> {
    let cache = cache_dir_for(runner_image, output);
    if is_populated(&cache) {
        debug!(cache = %cache.display(), "default rulesets already extracted");
        return Ok(cache);
    }

    fs::create_dir_all(&cache)
        .with_context(|| format!("creating ruleset cache dir {}", cache.display()))?;

    info!(image = %runner_image, cache = %cache.display(), "extracting default rulesets");
    let mut spec = RunSpec::new(runner_image);
    spec.volumes
        .push((runtime_device_path(&cache), EXPORT_MOUNT.to_owned()));
    spec.command = vec![
        "sh".into(),
        "-c".into(),
        format!("cp -r {RUNNER_RULESET_DIR}/. {EXPORT_MOUNT}/"),
    ];
    runtime
        .run_oneshot(&spec)
        .await
        .context("running ruleset extraction container")?;

    if !is_populated(&cache) {
        bail!(
            "runner image {runner_image} produced no rulesets in {}",
            cache.display()
        );
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::runtime::{RuntimeError, VolumeRecord};

    #[derive(Default)]
    struct CountingRuntime {
        oneshots: AtomicUsize,
    }

    #[async_trait]
    impl ContainerRuntime for CountingRuntime {
        async fn network_create(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn network_rm(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn volume_create_bind(&self, _: &str, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn volume_inspect(&self, _: &str) -> Result<VolumeRecord, RuntimeError> {
            Ok(VolumeRecord::default())
        }
        async fn volume_rm(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn run_detached(&self, _: &RunSpec) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn run_oneshot(&self, _: &RunSpec) -> Result<String, RuntimeError> {
            self.oneshots.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        }
        async fn stop(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn logs(&self, _: &str) -> Result<String, RuntimeError> {
            Ok(String::new())
        }
        async fn image_inspect(&self, _: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[test]
    fn cache_dir_is_keyed_by_image_version() {
        let output = Path::new("/out");
        assert_eq!(
            cache_dir_for("quay.io/analyzer-framework/runner:v1.2.0", output),
            Path::new("/out/.rulesets-v1.2.0")
        );
        assert_eq!(
            cache_dir_for("quay.io/analyzer-framework/runner", output),
            Path::new("/out/.rulesets-latest")
        );
    }

    #[tokio::test]
    async fn populated_cache_skips_extraction() {
        let output = tempfile::tempdir().unwrap();
        let cache = cache_dir_for("runner:v9", output.path());
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("ruleset.yaml"), "name: defaults").unwrap();

        let runtime = CountingRuntime::default();
        let result = ensure_default_rulesets(&runtime, "runner:v9", output.path())
            .await
            .unwrap();
        assert_eq!(result, cache);
        assert_eq!(runtime.oneshots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_extraction_is_an_error() {
        let output = tempfile::tempdir().unwrap();
        let runtime = CountingRuntime::default();
        // The fake extracts nothing, so the populated check must fail.
        let err = ensure_default_rulesets(&runtime, "runner:v9", output.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no rulesets"));
        assert_eq!(runtime.oneshots.load(Ordering::SeqCst), 1);
    }
}
