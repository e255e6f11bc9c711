//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated
//! configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Security configuration
    pub security: SecurityConfig,
    /// Game rule knobs
    pub game: GameConfig,
    /// Avatar upload configuration
    pub upload: UploadConfig,
    /// Socket heartbeat and cleanup timing
    pub realtime: RealtimeConfig,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Probability threshold for the chaos-mode drink multiplier, in [0, 1]
    pub chaos_mode: f64,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory uploaded avatars are written to
    pub dir: PathBuf,
    /// Per-file size cap in bytes
    pub max_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Seconds between heartbeat pings; two misses terminate the socket
    pub heartbeat_secs: u64,
    /// Grace period before an abandoned socket triggers a leave
    pub cleanup_grace_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid
    pub fn from_env(bind_override: Option<SocketAddr>) -> Result<Self, ConfigError> {
        let bind = bind_override
            .or_else(|| {
                std::env::var("SERVER_BIND")
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or_else(|| {
                "127.0.0.1:6969"
                    .parse()
                    .expect("Default bind address is valid")
            });

        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;
        if jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        let config = ServerConfig {
            bind,
            security: SecurityConfig { jwt_secret },
            game: GameConfig {
                chaos_mode: parse_env_or("CHAOS_MODE", 0.5),
            },
            upload: UploadConfig {
                dir: PathBuf::from(
                    std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
                ),
                max_bytes: parse_env_or("UPLOAD_MAX_BYTES", 2 * 1024 * 1024),
            },
            realtime: RealtimeConfig {
                heartbeat_secs: parse_env_or("HEARTBEAT_SECS", 30),
                cleanup_grace_secs: parse_env_or("CLEANUP_GRACE_SECS", 15),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.game.chaos_mode) {
            return Err(ConfigError::Invalid {
                var: "CHAOS_MODE".to_string(),
                reason: "Must be a probability between 0 and 1".to_string(),
            });
        }
        if self.upload.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                var: "UPLOAD_MAX_BYTES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        if self.realtime.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "HEARTBEAT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
            },
            game: GameConfig { chaos_mode: 0.5 },
            upload: UploadConfig {
                dir: PathBuf::from("uploads"),
                max_bytes: 1024,
            },
            realtime: RealtimeConfig {
                heartbeat_secs: 30,
                cleanup_grace_secs: 15,
            },
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_chaos_mode_out_of_range() {
        let mut config = base_config();
        config.game.chaos_mode = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let mut config = base_config();
        config.realtime.heartbeat_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }
}
