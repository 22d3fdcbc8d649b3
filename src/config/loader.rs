use crate::config::schema::{LiveEditConfig, ValidationError};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "live-edit.toml";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Io { .. } => self,
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }

    fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Io { path, .. } => Some(path.as_path()),
            ConfigError::Toml { path, .. } | ConfigError::Validation { path, .. } => {
                path.as_deref()
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = self.path() {
            write!(f, "{}: ", path.display())?;
        }
        match self {
            ConfigError::Io { source, .. } => write!(f, "cannot read live-edit settings: {source}"),
            ConfigError::Toml { source, .. } => write!(f, "malformed live-edit settings: {source}"),
            ConfigError::Validation { source, .. } => write!(f, "invalid live-edit settings: {source}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<LiveEditConfig, ConfigError> {
    let config: LiveEditConfig = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    config
        .validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(config)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<LiveEditConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load `live-edit.toml` from `dir`, falling back to the user's home
/// directory. Defaults apply when neither exists.
pub fn discover(dir: impl AsRef<Path>) -> Result<LiveEditConfig, ConfigError> {
    let candidates = std::iter::once(dir.as_ref().join(CONFIG_FILE_NAME))
        .chain(home::home_dir().map(|home| home.join(CONFIG_FILE_NAME)));
    for candidate in candidates {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "loading config");
            return load_from_path(&candidate);
        }
    }
    Ok(LiveEditConfig::default())
}
