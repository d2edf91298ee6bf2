use std::{env, time::Duration};

/// Default per-provider readiness timeout.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Initial backoff between readiness dial attempts.
pub const READINESS_BACKOFF_START: Duration = Duration::from_millis(100);

/// Upper bound for the readiness dial backoff.
pub const READINESS_BACKOFF_CAP: Duration = Duration::from_secs(1);

/// Per-attempt TCP dial timeout, separate from the overall readiness budget.
pub const READINESS_DIAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Default worker count inside the rule engine.
pub const DEFAULT_ENGINE_WORKERS: usize = 10;

/// Default number of context lines attached to incidents.
pub const DEFAULT_CONTEXT_LINES: usize = 10;

/// Container-side mount point for the analyzed source tree.
pub const CONTAINER_SOURCE_MOUNT: &str = "/opt/input/source";

/// Container-side mount point for generated provider config files.
pub const CONTAINER_CONFIG_MOUNT: &str = "/opt/input/config";

/// Name of the persistent maven cache volume shared across runs.
pub const MAVEN_CACHE_VOLUME: &str = "analyzer-maven-cache";

/// Container-side maven repository path backed by the cache volume.
pub const CONTAINER_M2_MOUNT: &str = "/root/.m2/repository";

/// Env var that disables the persistent maven cache volume when set to true.
pub const SKIP_MAVEN_CACHE_ENV: &str = "ANALYZER_SKIP_MAVEN_CACHE";

/// Env var forcing a specific container runtime binary (podman or docker).
pub const CONTAINER_RUNTIME_ENV: &str = "ANALYZER_CONTAINER_RUNTIME";

/// Env var selecting the runner image that carries the default rulesets.
pub const RUNNER_IMG_ENV: &str = "RUNNER_IMG";

/// Env var selecting the java provider image.
pub const JAVA_PROVIDER_IMG_ENV: &str = "JAVA_PROVIDER_IMG";

/// Env var selecting the generic (go/python) provider image.
pub const GENERIC_PROVIDER_IMG_ENV: &str = "GENERIC_PROVIDER_IMG";

/// Older alias for the csharp provider image selection.
pub const DOTNET_PROVIDER_IMG_ENV: &str = "DOTNET_PROVIDER_IMG";

/// Env var selecting the csharp provider image.
pub const CSHARP_PROVIDER_IMG_ENV: &str = "CSHARP_PROVIDER_IMG";

/// Default runner image reference.
pub const DEFAULT_RUNNER_IMAGE: &str = "quay.io/analyzer-framework/runner:latest";

/// Default java provider image reference.
pub const DEFAULT_JAVA_PROVIDER_IMAGE: &str = "quay.io/analyzer-framework/java-provider:latest";

/// Default generic provider image reference (go and python).
pub const DEFAULT_GENERIC_PROVIDER_IMAGE: &str =
    "quay.io/analyzer-framework/generic-provider:latest";

/// Default csharp provider image reference.
pub const DEFAULT_CSHARP_PROVIDER_IMAGE: &str = "quay.io/analyzer-framework/csharp-provider:latest";

/// Directories excluded from language detection and builtin file rules.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "dist",
    "build",
    "target",
    ".git",
    ".venv",
    "venv",
];

/// Archive extensions treated as binary inputs.
pub const BINARY_INPUT_EXTENSIONS: &[&str] = &["jar", "war", "ear", "class"];

/// Returns true when the persistent maven cache volume is disabled.
pub fn skip_maven_cache() -> bool {
    env::var(SKIP_MAVEN_CACHE_ENV)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Resolve the forced container runtime binary, if any.
pub fn container_runtime_override() -> Option<String> {
    env::var(CONTAINER_RUNTIME_ENV)
        .ok()
        .filter(|value| !value.is_empty())
}

/// Resolve an image reference from its env var, falling back to the default.
pub fn image_from_env(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_owned())
}
