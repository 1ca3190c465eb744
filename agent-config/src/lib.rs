//! Configuration management for agents.
//!
//! Settings are flat string key/value pairs. Defaults are installed by the
//! components that read them; values loaded from a TOML file take precedence.
//! Nested TOML tables are flattened into dotted keys.

#![warn(missing_docs, clippy::pedantic)]

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use toml::{Table, Value};
use tracing::debug;

/// Name of the configuration file inside the agent directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the configuration file failed.
    #[error("configuration file {path} could not be accessed: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid TOML.
    #[error("configuration is not valid toml: {source}")]
    Parse {
        /// Underlying parse error.
        #[from]
        source: toml::de::Error,
    },

    /// The defaults could not be rendered as TOML.
    #[error("configuration could not be serialized: {source}")]
    Serialize {
        /// Underlying serialization error.
        #[from]
        source: toml::ser::Error,
    },

    /// A configuration file exists and overwriting was not requested.
    #[error("configuration file {path} already exists")]
    AlreadyExists {
        /// Existing file.
        path: PathBuf,
    },

    /// The home directory of the current user could not be determined.
    #[error("home directory could not be determined")]
    HomeNotFound,
}

/// Read access to string settings, with defaults installed by consumers.
pub trait ConfigProvider: Send + Sync + Debug {
    /// Returns the effective value of `key`.
    fn get_string(&self, key: &str) -> Option<String>;

    /// Installs the value used when `key` is not explicitly configured.
    fn set_default(&self, key: &str, value: String);
}

#[derive(Debug, Default)]
struct Settings {
    defaults: BTreeMap<String, String>,
    values: BTreeMap<String, String>,
}

/// File-backed [`ConfigProvider`].
#[derive(Debug, Default)]
pub struct AgentConfig {
    path: Option<PathBuf>,
    inner: RwLock<Settings>,
}

impl AgentConfig {
    /// Creates an empty configuration that is not bound to a file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `$HOME/.<agent>/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HomeNotFound`] when no home directory is known.
    pub fn default_path(agent: &str) -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(format!(".{agent}")).join(CONFIG_FILE_NAME))
    }

    /// Loads settings from `path`. A missing file yields an empty configuration
    /// still bound to that path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file exists but cannot be read and
    /// [`ConfigError::Parse`] when it is not valid TOML.
    pub fn load(path: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => parse(&content)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "configuration file not found, using defaults");
                BTreeMap::new()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        debug!(path = %path.display(), keys = values.len(), "loaded configuration");

        Ok(Self {
            path: Some(path),
            inner: RwLock::new(Settings {
                defaults: BTreeMap::new(),
                values,
            }),
        })
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid TOML.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(Self {
            path: None,
            inner: RwLock::new(Settings {
                defaults: BTreeMap::new(),
                values: parse(content)?,
            }),
        })
    }

    /// Returns the file this configuration was loaded from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Sets an explicit value, overriding any default.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut guard = self.inner.write().expect("config poisoned");
        guard.values.insert(key.into(), value.into());
    }

    /// Returns every effective setting, defaults overlaid by explicit values.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn settings(&self) -> BTreeMap<String, String> {
        let guard = self.inner.read().expect("config poisoned");
        let mut settings = guard.defaults.clone();
        settings.extend(guard.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        settings
    }

    /// Writes every effective setting as a `key=value` line.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `out`.
    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        for (key, value) in self.settings() {
            writeln!(out, "{key}={value}")?;
        }
        Ok(())
    }

    /// Writes the installed defaults to `path` as a TOML file, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyExists`] when the file exists and
    /// `overwrite` is `false`, or [`ConfigError::Io`] when writing fails.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn create_default(&self, path: &Path, overwrite: bool) -> ConfigResult<()> {
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }

        let content = {
            let guard = self.inner.read().expect("config poisoned");
            toml::to_string(&guard.defaults)?
        };
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(path, content).map_err(io_error)?;
        debug!(path = %path.display(), "wrote default configuration");
        Ok(())
    }
}

impl ConfigProvider for AgentConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.inner.read().expect("config poisoned");
        guard
            .values
            .get(key)
            .or_else(|| guard.defaults.get(key))
            .cloned()
    }

    fn set_default(&self, key: &str, value: String) {
        let mut guard = self.inner.write().expect("config poisoned");
        guard.defaults.insert(key.to_owned(), value);
    }
}

fn parse(content: &str) -> ConfigResult<BTreeMap<String, String>> {
    let table: Table = toml::from_str(content)?;
    let mut values = BTreeMap::new();
    flatten("", &table, &mut values);
    Ok(values)
}

fn flatten(prefix: &str, table: &Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Table(nested) => flatten(&key, nested, out),
            Value::String(text) => {
                out.insert(key, text.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}
