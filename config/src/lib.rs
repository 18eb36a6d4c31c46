use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub use crate::reader_config::ReaderConfig;

mod reader_config;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file '{}': {}", path, source))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse config: {}", source))]
    Parse { source: toml::de::Error },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub reader: ReaderConfig,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).context(ParseSnafu)
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).with_context(|_| ReadFileSnafu {
        path: path.display().to_string(),
    })?;
    Config::from_toml_str(&content)
}
