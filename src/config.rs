//! Typed configuration (§6, §10.2).
//!
//! Loaded once at startup from a JSON file and frozen into [`crate::context::ServerContext`].
//! Secrets (HSM PIN, database DSN credentials) may be overridden by
//! environment variables so they never need to sit in a config file on
//! disk alongside the service.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Read { path: String, source: std::io::Error },
    Parse { path: String, source: serde_json::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => write!(f, "cannot read config file {}: {}", path, source),
            ConfigError::Parse { path, source } => write!(f, "cannot parse config file {}: {}", path, source),
        }
    }
}

impl std::error::Error for ConfigError {}

/// TLS material for the mTLS listener (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: String,
}

/// HSM connection parameters (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HsmConfig {
    pub module_path: String,
    pub slot: u64,
    pub master_key_label: String,
    /// Overridden by `CM_HSM_PIN` if set, so the PIN need not live on disk.
    #[serde(default)]
    pub pin: String,
}

/// Relational database connection parameters (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Overridden by `CM_DB_PASSWORD` if set.
    #[serde(default)]
    pub password: String,
}

impl DbConfig {
    pub fn dsn(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tls: TlsConfig,
    pub hsm: HsmConfig,
    pub db: DbConfig,
    /// Path to the append-only audit log, when file auditing is enabled.
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        let mut config: ServerConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(pin) = std::env::var("CM_HSM_PIN") {
            self.hsm.pin = pin;
        }
        if let Ok(password) = std::env::var("CM_DB_PASSWORD") {
            self.db.password = password;
        }
        if let Ok(addr) = std::env::var("CM_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "bind_addr": "0.0.0.0:8443",
            "tls": {"cert_path": "server.crt", "key_path": "server.key", "ca_path": "ca.crt"},
            "hsm": {"module_path": "/usr/lib/softhsm2.so", "slot": 0, "master_key_label": "cm-master"},
            "db": {"host": "127.0.0.1", "port": 3306, "database": "cm", "user": "cm_svc"}
        }"#
    }

    #[test]
    fn loads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.json");
        std::fs::write(&path, sample_json()).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8443");
        assert_eq!(config.hsm.master_key_label, "cm-master");
        assert_eq!(config.db.dsn(), "mysql://cm_svc:@127.0.0.1:3306/cm");
    }

    #[test]
    fn env_override_replaces_password_and_pin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.json");
        std::fs::write(&path, sample_json()).unwrap();

        std::env::set_var("CM_DB_PASSWORD", "s3cr3t");
        std::env::set_var("CM_HSM_PIN", "1234");
        let config = ServerConfig::load(&path).unwrap();
        std::env::remove_var("CM_DB_PASSWORD");
        std::env::remove_var("CM_HSM_PIN");

        assert_eq!(config.db.password, "s3cr3t");
        assert_eq!(config.hsm.pin, "1234");
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = ServerConfig::load("/nonexistent/cm.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
