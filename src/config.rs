//! Player configuration
//!
//! Priority: environment > file > defaults.
//!
//! ```toml
//! log_level = "debug"
//! optimize_updates = true
//! strict_views = true
//! max_template_depth = 16
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, Result};
use crate::view::ViewControllerOptions;

pub const ENV_LOG: &str = "PLAYER_LOG";
pub const ENV_OPTIMIZE_UPDATES: &str = "PLAYER_OPTIMIZE_UPDATES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayerConfig {
    /// `tracing` filter directive used by the binary
    pub log_level: String,
    /// Batch data notifications into one resolve pass per flush
    pub optimize_updates: bool,
    /// Fail the flow when a VIEW ref matches no view
    pub strict_views: bool,
    /// Deepest template nesting that is still expanded
    pub max_template_depth: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            optimize_updates: true,
            strict_views: true,
            max_template_depth: 16,
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|e| PlayerError::ConfigError {
            reason: e.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|e| PlayerError::ConfigError {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&src)
    }

    /// Apply `PLAYER_LOG` / `PLAYER_OPTIMIZE_UPDATES` overrides
    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|name| std::env::var(name).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(level) = var(ENV_LOG) {
            self.log_level = level;
        }
        if let Some(flag) = var(ENV_OPTIMIZE_UPDATES) {
            self.optimize_updates = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(PlayerError::ConfigError {
                        reason: format!("{ENV_OPTIMIZE_UPDATES} must be a boolean, got '{other}'"),
                    })
                }
            };
        }
        Ok(self)
    }

    pub fn view_options(&self) -> ViewControllerOptions {
        ViewControllerOptions {
            optimize_updates: self.optimize_updates,
            strict_views: self.strict_views,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_keys_take_defaults() {
        let config = PlayerConfig::from_toml_str("strict_views = false").unwrap();
        assert!(!config.strict_views);
        assert!(config.optimize_updates);
        assert_eq!(config.max_template_depth, 16);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PlayerConfig::from_toml_str("colour = true").unwrap_err();
        assert!(matches!(err, PlayerError::ConfigError { .. }));
    }

    #[test]
    fn environment_overrides_file() {
        let config = PlayerConfig::default()
            .with_vars(|name| match name {
                ENV_LOG => Some("debug".into()),
                ENV_OPTIMIZE_UPDATES => Some("off".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(!config.optimize_updates);
    }

    #[test]
    fn bad_boolean_is_an_error() {
        let err = PlayerConfig::default()
            .with_vars(|name| (name == ENV_OPTIMIZE_UPDATES).then(|| "maybe".into()))
            .unwrap_err();
        assert!(err.to_string().contains("PLAYER-050"));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_template_depth = 4\noptimize_updates = false").unwrap();
        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_template_depth, 4);
        assert_eq!(config.view_options().optimize_updates, false);
    }
}
