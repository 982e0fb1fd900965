use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::utils::has_placeholder;
use super::{ConfigError, CONNECTION_STRING_ENV};

/// Where the weights bundle lives remotely and where it is unpacked.
#[derive(Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Storage account connection string. Usually `${AZURE_STORAGE_CONNECTION_STRING}`.
    #[serde(default)]
    pub connection_string: Option<String>,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    #[serde(default = "default_blob_name")]
    pub blob_name: String,

    #[serde(default = "default_extract_path")]
    pub extract_path: PathBuf,
}

fn default_container_name() -> String {
    "translationapp".to_string()
}

fn default_blob_name() -> String {
    "Fine_Tune_Weight.zip".to_string()
}

fn default_extract_path() -> PathBuf {
    PathBuf::from("./Weight")
}

impl AssetsConfig {
    /// Connection string from the config file, or from the environment when
    /// the file leaves it out or its placeholder was not substituted.
    pub fn resolve_connection_string(&self) -> Result<String, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub(crate) fn resolve_with<F>(&self, lookup: F) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let configured = self
            .connection_string
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty() && !has_placeholder(value));

        if let Some(value) = configured {
            return Ok(value.to_string());
        }

        lookup(CONNECTION_STRING_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingConnectionString)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container_name.trim().is_empty() {
            return Err(ConfigError::Invalid("assets.container_name is empty".to_string()));
        }
        if self.blob_name.trim().is_empty() {
            return Err(ConfigError::Invalid("assets.blob_name is empty".to_string()));
        }
        Ok(())
    }
}

// Keeps the account key out of logs.
impl std::fmt::Debug for AssetsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetsConfig")
            .field("connection_string", &self.connection_string.as_ref().map(|_| "<redacted>"))
            .field("container_name", &self.container_name)
            .field("blob_name", &self.blob_name)
            .field("extract_path", &self.extract_path)
            .finish()
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            container_name: default_container_name(),
            blob_name: default_blob_name(),
            extract_path: default_extract_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_connection_string(value: Option<&str>) -> AssetsConfig {
        AssetsConfig {
            connection_string: value.map(str::to_string),
            ..AssetsConfig::default()
        }
    }

    #[test]
    fn configured_value_wins_over_environment() {
        let config = with_connection_string(Some("AccountName=a;AccountKey=b"));
        let resolved = config.resolve_with(|_| Some("from-env".to_string())).unwrap();
        assert_eq!(resolved, "AccountName=a;AccountKey=b");
    }

    #[test]
    fn unresolved_placeholder_falls_back_to_environment() {
        let config = with_connection_string(Some("${AZURE_STORAGE_CONNECTION_STRING}"));
        let resolved = config
            .resolve_with(|name| (name == CONNECTION_STRING_ENV).then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(resolved, "from-env");
    }

    #[test]
    fn missing_everywhere_is_an_error() {
        let config = with_connection_string(None);
        let err = config.resolve_with(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingConnectionString));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let config = with_connection_string(Some("AccountKey=secret"));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }
}
