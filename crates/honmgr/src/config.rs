//! Configuration management for the fleet manager daemon.
//!
//! Loads the TOML configuration file, writes a default one on first run,
//! applies CLI overrides, and validates everything before the daemon
//! touches a socket or spawns a process.

use crate::cli::CliArgs;
use fleet_manager::{FleetConfig, HealthConfig, ScalingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use upstream_session::MasterConfig;

/// Application configuration loaded from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Fleet lifecycle settings
    #[serde(default)]
    pub manager: FleetConfig,
    /// Master server account and endpoint
    #[serde(default)]
    pub master: MasterConfig,
    /// Chat session timing
    #[serde(default)]
    pub chat: ChatSettings,
    /// Health monitor settings
    #[serde(default)]
    pub health: HealthConfig,
    /// Auto-scaling settings
    #[serde(default)]
    pub scaling: ScalingConfig,
    /// Resource sampler settings
    #[serde(default)]
    pub sampler: SamplerSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Chat-server session timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Seconds between heartbeats.
    pub heartbeat_secs: u64,
    /// Seconds between fleet status reports.
    pub server_info_interval_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            server_info_interval_secs: 60,
        }
    }
}

impl ChatSettings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn server_info_interval(&self) -> Duration {
        Duration::from_secs(self.server_info_interval_secs)
    }
}

/// CPU/memory sampler timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Seconds between resource refreshes.
    pub interval_secs: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self { interval_secs: 15 }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter ("trace", "debug", "info", "warn", "error")
    pub level: String,
    /// JSON formatting
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

impl AppConfig {
    /// Loads configuration from a file, creating a default one if missing.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies CLI overrides on top of the file contents.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(install_path) = &args.install_path {
            self.manager.install_path = install_path.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates every section; returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.manager.validate()?;
        self.health.validate()?;
        self.scaling.validate()?;

        if self.chat.heartbeat_secs == 0 {
            return Err("chat.heartbeat_secs must be at least 1".to_string());
        }
        if self.sampler.interval_secs == 0 {
            return Err("sampler.interval_secs must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.manager.max_servers, config.manager.max_servers);
        assert_eq!(reparsed.logging.level, config.logging.level);
        assert_eq!(reparsed.chat.heartbeat_secs, config.chat.heartbeat_secs);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [manager]
            install_path = "/srv/hon"
            executable = "hon_server"
            host_address = "203.0.113.9"
            max_servers = 4
            min_servers = 1
            game_port_base = 10001
            voice_port_base = 11001
            public_port_base = 12001
            port_stride = 1
            startup_timeout_secs = 180
            stop_grace_secs = 30
            idle_after_lobby_close = false
            "#,
        )
        .unwrap();
        assert_eq!(config.manager.max_servers, 4);
        assert_eq!(config.health.max_consecutive_failures, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn cli_overrides_apply() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            config_path: PathBuf::from("honmgr.toml"),
            install_path: Some(PathBuf::from("/srv/hon")),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };
        config.apply_cli(&args);
        assert_eq!(config.manager.install_path, PathBuf::from("/srv/hon"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("honmgr.toml");
        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.manager.max_servers, 10);

        // Loading again parses the file we just wrote.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.manager.max_servers, 10);
    }
}
