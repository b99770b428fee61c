// Configuration management module
// TOML settings for the document and blob backends

pub mod settings;

pub use settings::{BlobStoreConfig, Config, ConfigError, DocumentBackendKind, DocumentStoreConfig};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_dir()
}
