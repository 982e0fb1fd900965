use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::utils::{load_text_file_with_guess_encoding, substitute_env_vars};
use super::{AssetsConfig, ConfigError, ModelsConfig, ServerConfig};

/// Main configuration for the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub assets: AssetsConfig,

    #[serde(default)]
    pub models: ModelsConfig,
}

impl Config {
    /// Load configuration from a YAML or JSON file, substituting `${VAR}`
    /// placeholders from the environment first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = load_text_file_with_guess_encoding(path)?;
        let content = substitute_env_vars(&content);
        let config = Self::parse(path, &content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.assets.validate()?;
        self.models.validate()
    }

    /// Candidate config locations, most specific first.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        let mut paths: Vec<PathBuf> = std::env::var_os("CONFIG_PATH")
            .map(PathBuf::from)
            .into_iter()
            .collect();
        paths.push(PathBuf::from("conf.yaml"));
        paths.push(PathBuf::from("conf.json"));
        if let Some(dir) = exe_dir {
            paths.push(dir.join("conf.yaml"));
            paths.push(dir.join("conf.json"));
        }
        paths
    }

    /// Load the first config file that exists. Returns defaults and `None`
    /// when no file is found; a file that exists but fails to load is an
    /// error.
    pub fn discover() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::candidate_paths() {
            if !path.is_file() {
                debug!("No config at {}", path.display());
                continue;
            }
            let config = Self::load(&path)?;
            return Ok((config, Some(path)));
        }
        Ok((Self::default(), None))
    }
}
