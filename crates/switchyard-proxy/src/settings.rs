//! The TOML configuration file.
//!
//! ```toml
//! [proxy]
//! bind = "0.0.0.0:25565"
//! motd = "My network"
//! max_players = 200
//! authenticate = true
//!
//! [backends]
//! lobby = "10.0.0.2:25565"
//! survival = "10.0.0.3:25565"
//!
//! [routes]
//! "survival.example.net" = ["survival", "lobby"]
//! "*" = ["lobby"]
//!
//! [locale]
//! serverFull = "Come back later!"
//!
//! [logging]
//! level = "info"
//! json_format = false
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use switchyard::{Backend, BackendDirectory, ProxyConfig, StaticLocalizer, StaticRouter};

use crate::cli::Args;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write default config to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize default config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Everything in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub proxy: ProxyConfig,
    /// Backend name → `host:port`.
    pub backends: BTreeMap<String, String>,
    /// Client-facing host → candidate backends. `"*"` is the catch-all.
    pub routes: BTreeMap<String, Vec<String>>,
    /// Message key → text, overriding the built-in English.
    pub locale: BTreeMap<String, String>,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            backends: BTreeMap::from([("lobby".to_string(), "127.0.0.1:25566".to_string())]),
            routes: BTreeMap::from([(
                switchyard::DEFAULT_ROUTE.to_string(),
                vec!["lobby".to_string()],
            )]),
            locale: BTreeMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Settings {
    /// Reads `path`, or writes the defaults there if it does not exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            let settings = Self::default();
            std::fs::write(path, toml::to_string_pretty(&settings)?).map_err(|source| {
                SettingsError::Write {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            return Ok(settings);
        }

        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies command-line overrides.
    pub fn apply(&mut self, args: &Args) {
        if let Some(bind) = &args.bind {
            self.proxy.bind = bind.clone();
        }
        if let Some(plugins) = &args.plugins {
            self.proxy.extension_dir = plugins.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    pub fn directory(&self) -> BackendDirectory {
        let directory = BackendDirectory::new();
        for (name, addr) in &self.backends {
            directory.insert(Backend::new(name, addr));
        }
        directory
    }

    pub fn router(&self) -> StaticRouter {
        self.routes
            .iter()
            .fold(StaticRouter::new(), |router, (host, backends)| {
                router.route_host(host, backends.iter().cloned())
            })
    }

    pub fn localizer(&self) -> StaticLocalizer {
        let mut localizer = StaticLocalizer::default();
        localizer.extend(self.locale.clone());
        localizer
    }
}
