use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

/// Largest chunk a file may be split into (5 MiB)
pub const MAX_CHUNK_SIZE: usize = 5 * 1024 * 1024;
/// Retries a structural mutation gets after its first CAS conflict
pub const DEFAULT_CAS_RETRIES: usize = 2;
/// How many `name[n]` suffixes an upload may try before giving up
pub const DEFAULT_MAX_COLLISION_SUFFIXES: usize = 1000;

/// Tunables for the file system core.
///
/// Carried by [`Network`](crate::store::Network) so every handle sees the
/// same values. All fields are optional in TOML and fall back to defaults.
///
/// ```toml
/// chunk_size = 1048576
/// cas_retries = 2
/// max_collision_suffixes = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfig {
    /// Chunk size used for new uploads
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_cas_retries")]
    pub cas_retries: usize,
    #[serde(default = "default_max_collision_suffixes")]
    pub max_collision_suffixes: usize,
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_cas_retries() -> usize {
    DEFAULT_CAS_RETRIES
}

fn default_max_collision_suffixes() -> usize {
    DEFAULT_MAX_COLLISION_SUFFIXES
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            cas_retries: default_cas_retries(),
            max_collision_suffixes: default_max_collision_suffixes(),
        }
    }
}

impl FsConfig {
    /// Parse and validate a config from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FsConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_toml = fs::read_to_string(path)?;
        Self::from_toml_str(&config_toml)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.max_collision_suffixes == 0 {
            return Err(ConfigError::Invalid(
                "max_collision_suffixes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Same config with a different chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, ConfigError> {
        self.chunk_size = chunk_size;
        self.validate()?;
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size {0} out of range 1..={MAX_CHUNK_SIZE}")]
    InvalidChunkSize(usize),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
