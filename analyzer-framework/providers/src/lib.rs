pub mod composer;
pub mod detect;
pub mod paths;
pub mod registry;
pub mod settings;

pub use composer::{
    ComposeInputs, ComposerError, InitOverride, ProviderOverride, apply_overrides,
    builtin_config, compose_configs, load_override_file,
};
pub use detect::{detect_providers, language_census};
pub use paths::{PathTranslator, runtime_device_path};
pub use registry::{PortReservation, ProviderDescriptor, ProviderRegistry, RegistryError};
pub use settings::ProviderSettings;
