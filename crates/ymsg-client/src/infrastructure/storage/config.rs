//! TOML configuration for the `ymsg-client` binary.
//!
//! Example file:
//!
//! ```toml
//! log_level = "debug"
//! output = "json"
//!
//! [server]
//! host = "scs.msg.yahoo.com"
//! port = 5050
//!
//! [session]
//! login_timeout_secs = 60
//! keepalive_interval_secs = 60
//! ping_interval_secs = 3600
//!
//! [conference]
//! buffer_declines = false
//! ```
//!
//! Every field has a serde default, so an empty file (or no file at all)
//! yields a working configuration, and files written by older versions keep
//! loading when fields are added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::conference::BufferPolicy;
use crate::application::session::SessionConfig;
use crate::infrastructure::network::TcpConnectorConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field parsed but holds a value the client cannot run with.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub conference: ConferenceSettings,
    /// `tracing` filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How the binary prints events.
    #[serde(default)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Login and keepalive tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    #[serde(default = "default_login_timeout_secs")]
    pub login_timeout_secs: u64,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Presence status announced at login (0 = available).
    #[serde(default)]
    pub initial_status: u32,
    #[serde(default = "default_client_version")]
    pub client_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConferenceSettings {
    /// Also hold CONFDECLINE packets that arrive before their invite.
    #[serde(default)]
    pub buffer_declines: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_host() -> String {
    "scs.msg.yahoo.com".to_string()
}
fn default_port() -> u16 {
    5050
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_login_timeout_secs() -> u64 {
    60
}
fn default_keepalive_interval_secs() -> u64 {
    60
}
fn default_ping_interval_secs() -> u64 {
    3600
}
fn default_client_version() -> String {
    "6,0,0,1710".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionSettings::default(),
            conference: ConferenceSettings::default(),
            log_level: default_log_level(),
            output: OutputFormat::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            login_timeout_secs: default_login_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            initial_status: 0,
            client_version: default_client_version(),
        }
    }
}

// ── Conversions into runtime types ────────────────────────────────────────────

impl ClientConfig {
    /// Rejects values that parse but cannot work: zero timeouts and
    /// periods, and port 0.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("server.connect_timeout_secs", self.server.connect_timeout_secs),
            ("session.login_timeout_secs", self.session.login_timeout_secs),
            ("session.keepalive_interval_secs", self.session.keepalive_interval_secs),
            ("session.ping_interval_secs", self.session.ping_interval_secs),
        ];
        if let Some(&(field, _)) = non_zero.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be at least 1 second",
            });
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                field: "server.port",
                reason: "must not be 0",
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            login_timeout: Duration::from_secs(self.session.login_timeout_secs),
            keepalive_interval: Duration::from_secs(self.session.keepalive_interval_secs),
            ping_interval: Duration::from_secs(self.session.ping_interval_secs),
            initial_status: self.session.initial_status,
            client_version: self.session.client_version.clone(),
        }
    }

    pub fn connector_config(&self) -> TcpConnectorConfig {
        TcpConnectorConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            connect_timeout: Duration::from_secs(self.server.connect_timeout_secs),
        }
    }

    pub fn buffer_policy(&self) -> BufferPolicy {
        BufferPolicy::new(self.conference.buffer_declines)
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Loads `ClientConfig` from `path`, returning the default if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value fails [`ClientConfig::validate`].
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: ClientConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("ymsg-config-{}", Uuid::new_v4()))
            .join("client.toml")
    }

    #[test]
    fn test_default_config_matches_protocol_defaults() {
        // Arrange / Act
        let cfg = ClientConfig::default();

        // Assert
        assert_eq!(cfg.server.port, 5050);
        assert_eq!(cfg.session.keepalive_interval_secs, 60);
        assert_eq!(cfg.session.ping_interval_secs, 3600);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.output, OutputFormat::Text);
        assert!(!cfg.conference.buffer_declines);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: ClientConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let text = r#"
            output = "json"

            [server]
            host = "127.0.0.1"

            [conference]
            buffer_declines = true
        "#;

        // Act
        let cfg: ClientConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 5050);
        assert_eq!(cfg.output, OutputFormat::Json);
        assert!(cfg.buffer_policy().buffers(ymsg_core::ServiceType::ConfDecline));
    }

    #[test]
    fn test_session_config_converts_seconds() {
        let mut cfg = ClientConfig::default();
        cfg.session.login_timeout_secs = 5;

        let session = cfg.session_config();

        assert_eq!(session.login_timeout, Duration::from_secs(5));
        assert_eq!(session.ping_interval, Duration::from_secs(3600));
        assert_eq!(session.client_version, "6,0,0,1710");
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let cfg = load_config(&temp_path()).expect("missing file is not an error");
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips() {
        // Arrange
        let path = temp_path();
        let mut cfg = ClientConfig::default();
        cfg.server.port = 6060;
        cfg.session.initial_status = 2;

        // Act
        save_config(&path, &cfg).expect("save");
        let restored = load_config(&path).expect("load");

        // Assert
        assert_eq!(restored, cfg);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_rejects_zero_intervals() {
        // Arrange
        let cases = [
            ("[session]\nkeepalive_interval_secs = 0", "session.keepalive_interval_secs"),
            ("[session]\nping_interval_secs = 0", "session.ping_interval_secs"),
            ("[session]\nlogin_timeout_secs = 0", "session.login_timeout_secs"),
            ("[server]\nport = 0", "server.port"),
        ];

        for (text, expected) in cases {
            let path = temp_path();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, text).unwrap();

            // Act
            let result = load_config(&path);

            // Assert
            match result {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected Invalid for {expected}, got {other:?}"),
            }
            let _ = std::fs::remove_dir_all(path.parent().unwrap());
        }
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result: Result<ClientConfig, _> = toml::from_str("[server\nport = ");
        assert!(result.is_err());
    }
}
