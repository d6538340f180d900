//! Configuration for the back-office service

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Back-office configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fee engine and price feed
    pub settlement: settlement::Config,

    /// Log output
    pub logging: LoggingConfig,

    /// Audit trail
    pub audit: AuditConfig,
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Default level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

/// Audit trail configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines file; records stay in memory when unset
    pub log_path: Option<PathBuf>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.settlement.fees.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `SETTLEMENT_*` variables are read by [`settlement::Config::from_env`].
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            settlement: settlement::Config::from_env()?,
            ..Default::default()
        };

        if let Ok(json) = std::env::var("BACKOFFICE_LOG_JSON") {
            config.logging.json = matches!(json.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Ok(level) = std::env::var("BACKOFFICE_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(path) = std::env::var("BACKOFFICE_AUDIT_LOG") {
            config.audit.log_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [settlement.fees]
            platform_fee_percent = "2.5"

            [logging]
            json = true

            [audit]
            log_path = "/var/log/backoffice/audit.jsonl"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.settlement.fees.platform_fee_percent, dec!(2.5));
        assert_eq!(config.settlement.fees.spread_percent, dec!(2.5));
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.audit.log_path,
            Some(PathBuf::from("/var/log/backoffice/audit.jsonl"))
        );
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[logging]\njson = \"maybe\"").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(crate::Error::Config(_))
        ));
    }
}
