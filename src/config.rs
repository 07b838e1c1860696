use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// -----------------------------------------------------------------------------
// Config (root)
// -----------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path);
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        serde_saphyr::from_str(&contents).map_err(ConfigError::Yaml)
    }
}

// -----------------------------------------------------------------------------
// ServerConfig
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

// -----------------------------------------------------------------------------
// ManagerConfig
// -----------------------------------------------------------------------------

/// Tuning for the device session manager.
///
/// The QR retry cap and the spurious-disconnect window came out of production
/// incidents; both are configuration rather than constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Directory holding per-device credential stores.
    #[serde(default = "default_sessions_path")]
    pub sessions_path: PathBuf,
    /// Command spawned per device to run the WhatsApp Web bridge.
    #[serde(default = "default_bridge_command")]
    pub bridge_command: String,
    /// QR rotations tolerated before the pairing attempt is abandoned.
    #[serde(default = "default_max_qr_retries")]
    pub max_qr_retries: u32,
    /// Disconnect events arriving within this window after a successful
    /// connection are treated as noise and dropped.
    #[serde(default = "default_spurious_disconnect")]
    pub spurious_disconnect_seconds: u64,
    /// Attempts at removing a device's credential directory on teardown.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_max_attempts: u32,
    /// Back-off between cleanup attempts.
    #[serde(default = "default_cleanup_backoff")]
    pub cleanup_backoff_seconds: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sessions_path: default_sessions_path(),
            bridge_command: default_bridge_command(),
            max_qr_retries: default_max_qr_retries(),
            spurious_disconnect_seconds: default_spurious_disconnect(),
            cleanup_max_attempts: default_cleanup_attempts(),
            cleanup_backoff_seconds: default_cleanup_backoff(),
        }
    }
}

fn default_sessions_path() -> PathBuf {
    PathBuf::from(".wagate/sessions")
}

fn default_bridge_command() -> String {
    "wagate-bridge".to_string()
}

fn default_max_qr_retries() -> u32 {
    5
}

fn default_spurious_disconnect() -> u64 {
    10
}

fn default_cleanup_attempts() -> u32 {
    5
}

fn default_cleanup_backoff() -> u64 {
    3
}

// -----------------------------------------------------------------------------
// ConfigError
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_saphyr::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Yaml(e) => write!(f, "failed to parse config file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_seconds, 60);
        assert_eq!(
            config.manager.sessions_path,
            PathBuf::from(".wagate/sessions")
        );
        assert_eq!(config.manager.max_qr_retries, 5);
        assert_eq!(config.manager.spurious_disconnect_seconds, 10);
        assert_eq!(config.manager.cleanup_max_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let missing_path = tmp_dir.path().join("missing-config.yaml");
        let config = Config::load(missing_path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
  request_timeout_seconds: 30
manager:
  sessions_path: "/var/lib/wagate/sessions"
  max_qr_retries: 8
  spurious_disconnect_seconds: 5
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(
            config.manager.sessions_path,
            PathBuf::from("/var/lib/wagate/sessions")
        );
        assert_eq!(config.manager.max_qr_retries, 8);
        assert_eq!(config.manager.spurious_disconnect_seconds, 5);
        assert_eq!(config.manager.cleanup_max_attempts, 5); // default
    }

    #[test]
    fn test_load_partial_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9000
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0"); // default
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.manager.max_qr_retries, 5); // default
    }

    #[test]
    fn test_load_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display() {
        let io_error = ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "test",
        ));
        assert!(io_error.to_string().contains("failed to read config file"));
    }
}
