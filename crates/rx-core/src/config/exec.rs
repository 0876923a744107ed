//! Execution configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use rx_protocol::TerminalSize;

/// Configuration for command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Read buffer size for each stream forwarder, in bytes
    pub buffer_size: usize,

    /// Environment entries applied to pseudo-terminal sessions before the
    /// command's own entries
    pub default_env: Vec<(String, String)>,

    /// Terminal size used when a pseudo-terminal is requested and the
    /// local terminal size is unknown
    pub terminal_size: TerminalSize,

    /// Log level for the CLI (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            terminal_size: TerminalSize::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl ExecConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.terminal_size.rows == 0 || self.terminal_size.cols == 0 {
            return Err(ConfigError::Invalid(
                "terminal_size must have non-zero rows and cols".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ExecConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_size, 8192);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = ExecConfig {
            buffer_size: 0,
            ..ExecConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            buffer_size = 4096
            default_env = [["TERM", "vt100"], ["LANG", "C.UTF-8"]]
            log_level = "debug"

            [terminal_size]
            rows = 50
            cols = 132
        "#;

        let config: ExecConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.default_env.len(), 2);
        assert_eq!(config.default_env[1].0, "LANG");
        assert_eq!(config.terminal_size, TerminalSize::new(50, 132));
        assert_eq!(config.log_level, "debug");
    }
}
