pub mod assets;
pub mod main;
pub mod models;
pub mod server;
pub mod utils;

use std::path::PathBuf;

pub use assets::AssetsConfig;
pub use main::Config;
pub use models::ModelsConfig;
pub use server::ServerConfig;

/// Environment variable consulted when the config file carries no
/// connection string.
pub const CONNECTION_STRING_ENV: &str = "AZURE_STORAGE_CONNECTION_STRING";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as YAML")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse {path} as JSON")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("no storage connection string configured (set assets.connection_string or {CONNECTION_STRING_ENV})")]
    MissingConnectionString,
}
