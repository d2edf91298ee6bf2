use std::{env, path::PathBuf};

use analyzer_framework_core::{
    constants::{
        CSHARP_PROVIDER_IMG_ENV, DEFAULT_CONTEXT_LINES, DEFAULT_CSHARP_PROVIDER_IMAGE,
        DEFAULT_GENERIC_PROVIDER_IMAGE, DEFAULT_JAVA_PROVIDER_IMAGE, DEFAULT_RUNNER_IMAGE,
        DOTNET_PROVIDER_IMG_ENV, GENERIC_PROVIDER_IMG_ENV, JAVA_PROVIDER_IMG_ENV, RUNNER_IMG_ENV,
        image_from_env,
    },
    provider::{AnalysisMode, ProviderKind, Proxy},
};

/// Container-side path of the jdtls launcher in the java provider image.
pub const JDTLS_BIN: &str = "/jdtls/bin/jdtls";

/// Container-side path of the analyzer bundle jar consumed by jdtls.
pub const JAVA_BUNDLE_JAR: &str = "/jdtls/java-analyzer-bundle/java-analyzer-bundle.core.jar";

/// Container-side path of the open-source maven label index.
pub const MAVEN_INDEX: &str = "/usr/local/etc/maven.default.index";

/// Container-side gopls path in the generic provider image.
pub const GOPLS_BIN: &str = "/usr/local/bin/gopls";

/// Container-side golang dependency provider path.
pub const GO_DEP_PROVIDER_BIN: &str = "/usr/local/bin/golang-dependency-provider";

/// Container-side pylsp path in the generic provider image.
pub const PYLSP_BIN: &str = "/usr/local/bin/pylsp";

/// Container-side typescript-language-server path in the nodejs image.
pub const NODEJS_LSP_BIN: &str = "/usr/local/bin/typescript-language-server";

/// Container-side ilspy decompiler path in the csharp image.
pub const ILSPY_BIN: &str = "/usr/local/bin/ilspycmd";

/// Container-side paket path in the csharp image.
pub const PAKET_BIN: &str = "/usr/local/bin/paket";

/// Everything the composer and supervisor need to know about provider images
/// and per-run knobs. Built once at startup and read-only afterwards.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub runner_image: String,
    pub java_image: String,
    pub generic_image: String,
    pub csharp_image: String,
    pub mode: AnalysisMode,
    pub context_lines: usize,
    pub maven_settings: Option<PathBuf>,
    pub disable_maven_search: bool,
    pub jvm_max_mem: Option<String>,
    pub proxy: Option<Proxy>,
}

impl ProviderSettings {
    /// Resolve image references from the environment; everything else takes
    /// its default and is overridden from CLI flags by the caller.
    pub fn from_env() -> Self {
        Self {
            runner_image: image_from_env(RUNNER_IMG_ENV, DEFAULT_RUNNER_IMAGE),
            java_image: image_from_env(JAVA_PROVIDER_IMG_ENV, DEFAULT_JAVA_PROVIDER_IMAGE),
            generic_image: image_from_env(GENERIC_PROVIDER_IMG_ENV, DEFAULT_GENERIC_PROVIDER_IMAGE),
            csharp_image: csharp_image_from_env(),
            mode: AnalysisMode::Full,
            context_lines: DEFAULT_CONTEXT_LINES,
            maven_settings: None,
            disable_maven_search: false,
            jvm_max_mem: None,
            proxy: None,
        }
    }

    /// Image serving the given provider; builtin runs in-process.
    pub fn image_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Java => Some(&self.java_image),
            ProviderKind::Go | ProviderKind::Python | ProviderKind::NodeJs => {
                Some(&self.generic_image)
            }
            ProviderKind::CSharp => Some(&self.csharp_image),
            ProviderKind::Builtin => None,
        }
    }
}

/// `CSHARP_PROVIDER_IMG` wins over the older `DOTNET_PROVIDER_IMG` alias.
fn csharp_image_from_env() -> String {
    env::var(CSHARP_PROVIDER_IMG_ENV)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| image_from_env(DOTNET_PROVIDER_IMG_ENV, DEFAULT_CSHARP_PROVIDER_IMAGE))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn env_overrides_image_selection() {
        unsafe { std::env::set_var(JAVA_PROVIDER_IMG_ENV, "example.com/java-provider:pinned") };
        let settings = ProviderSettings::from_env();
        unsafe { std::env::remove_var(JAVA_PROVIDER_IMG_ENV) };

        assert_eq!(
            settings.image_for(ProviderKind::Java),
            Some("example.com/java-provider:pinned")
        );
        assert_eq!(
            settings.image_for(ProviderKind::Go),
            Some(DEFAULT_GENERIC_PROVIDER_IMAGE)
        );
    }

    #[test]
    #[serial]
    fn builtin_has_no_image() {
        let settings = ProviderSettings::from_env();
        assert_eq!(settings.image_for(ProviderKind::Builtin), None);
    }

    #[test]
    #[serial]
    fn go_and_python_share_the_generic_image() {
        let settings = ProviderSettings::from_env();
        assert_eq!(
            settings.image_for(ProviderKind::Go),
            settings.image_for(ProviderKind::Python)
        );
    }
}
