//! Mapper configuration via `docmapper.toml`
//!
//! A handful of global defaults that change how atomic scopes, reloads and
//! identities behave. The file is optional; [`MapperConfig::default`] matches
//! the defaults written by [`MapperConfig::write_default_if_missing`].

use docmapper_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name looked up by applications embedding the mapper.
pub const CONFIG_FILE_NAME: &str = "docmapper.toml";

/// Mapper configuration loaded from `docmapper.toml`.
///
/// # Example
///
/// ```toml
/// # Nested atomic scopes join their enclosing scope unless told otherwise
/// join_contexts = false
/// raise_not_found_error = true
/// client_generated_ids = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Default join mode for `begin_atomic(None)`.
    #[serde(default)]
    pub join_contexts: bool,
    /// Whether reloading a vanished document fails with `DocumentNotFound`.
    /// When false the attributes are reset to just the identity.
    #[serde(default = "default_true")]
    pub raise_not_found_error: bool,
    /// Whether new entities get a UUID identity before their first insert.
    /// When false the store assigns one on insert.
    #[serde(default = "default_true")]
    pub client_generated_ids: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            join_contexts: false,
            raise_not_found_error: true,
            client_generated_ids: true,
        }
    }
}

impl MapperConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# docmapper configuration
#
# Nested atomic scopes opened without an explicit join flag join their
# enclosing scope when this is true (default: false).
join_contexts = false

# Reloading a document that no longer exists fails when true (default).
# When false the entity is reset to just its identity.
raise_not_found_error = true

# New entities get a UUID identity before their first insert (default: true).
# When false the store assigns the identity on insert.
client_generated_ids = true
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid config TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = MapperConfig::default();
        assert!(!config.join_contexts);
        assert!(config.raise_not_found_error);
        assert!(config.client_generated_ids);
    }

    #[test]
    fn default_toml_parses_to_default() {
        let config = MapperConfig::from_toml_str(MapperConfig::default_toml()).unwrap();
        assert_eq!(config, MapperConfig::default());
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = MapperConfig::from_toml_str("join_contexts = true").unwrap();
        assert!(config.join_contexts);
        assert!(config.raise_not_found_error);
        assert!(config.client_generated_ids);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = MapperConfig::from_toml_str("join_contexts = \"maybe\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        MapperConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = MapperConfig::from_file(&path).unwrap();
        assert_eq!(config, MapperConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "join_contexts = true\n").unwrap();

        MapperConfig::write_default_if_missing(&path).unwrap();
        let config = MapperConfig::from_file(&path).unwrap();
        assert!(config.join_contexts);
    }

    #[test]
    fn write_to_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = MapperConfig {
            join_contexts: true,
            raise_not_found_error: false,
            client_generated_ids: false,
        };
        config.write_to_file(&path).unwrap();
        assert_eq!(MapperConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn from_file_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let err = MapperConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
