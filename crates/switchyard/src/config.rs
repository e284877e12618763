//! Proxy configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProxyError;

/// Directory scanned for extension modules when none is configured.
pub const DEFAULT_EXTENSION_DIR: &str = "./plugins/";

/// Kick reasons matching this pattern send the player to another backend
/// instead of disconnecting them.
pub const DEFAULT_KICK_PATTERN: &str = "(?i)(restart|shutting down)";

/// Everything the proxy reads at construction time.
///
/// Fields missing from a deserialized document fall back to
/// [`ProxyConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the listener binds to.
    pub bind: String,
    /// Message shown in the client's server list.
    pub motd: String,
    /// Player cap reported in status pings and enforced at login.
    pub max_players: u16,
    /// Report and enforce the connectivity collaborator's cap instead of
    /// [`max_players`](Self::max_players) when it has one.
    pub sync_max_players: bool,
    /// Run the encryption exchange and the [`Authenticator`] at login.
    ///
    /// [`Authenticator`]: switchyard_session::Authenticator
    pub authenticate: bool,
    /// Regular expression matched against backend kick reasons.
    pub kick_pattern: String,
    /// Directory scanned for extension modules.
    pub extension_dir: PathBuf,
    pub handshake_timeout_secs: u64,
    pub backend_connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:25565".to_string(),
            motd: "A Switchyard proxy".to_string(),
            max_players: 100,
            sync_max_players: false,
            authenticate: true,
            kick_pattern: DEFAULT_KICK_PATTERN.to_string(),
            extension_dir: PathBuf::from(DEFAULT_EXTENSION_DIR),
            handshake_timeout_secs: 5,
            backend_connect_timeout_secs: 5,
        }
    }
}

impl ProxyConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn backend_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_connect_timeout_secs)
    }

    /// Rejects values the server cannot run with.
    pub(crate) fn validate(&self) -> Result<(), ProxyError> {
        if self.bind.trim().is_empty() {
            return Err(ProxyError::InvalidConfig("bind address is empty".into()));
        }
        if self.handshake_timeout_secs == 0 {
            return Err(ProxyError::InvalidConfig(
                "handshake_timeout_secs must be at least 1".into(),
            ));
        }
        if self.backend_connect_timeout_secs == 0 {
            return Err(ProxyError::InvalidConfig(
                "backend_connect_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extension_dir, PathBuf::from("./plugins/"));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_empty_bind() {
        let config = ProxyConfig {
            bind: "  ".into(),
            ..ProxyConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProxyError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let handshake = ProxyConfig {
            handshake_timeout_secs: 0,
            ..ProxyConfig::default()
        };
        let backend = ProxyConfig {
            backend_connect_timeout_secs: 0,
            ..ProxyConfig::default()
        };
        assert!(handshake.validate().is_err());
        assert!(backend.validate().is_err());
    }

    #[test]
    fn test_default_kick_pattern_matches_restart_notices() {
        let pattern = regex::Regex::new(DEFAULT_KICK_PATTERN).unwrap();
        assert!(pattern.is_match("Server is RESTARTING"));
        assert!(pattern.is_match("lobby shutting down"));
        assert!(!pattern.is_match("You have been banned"));
    }
}
