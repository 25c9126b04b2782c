//! Configuration for the fleet manager and its background loops.
//!
//! These structures are embedded in the binary's TOML configuration file and
//! carry `Default` impls suitable for a single-host fleet of a few dozen
//! instances.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fleet lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Directory containing the game server installation.
    pub install_path: PathBuf,

    /// Executable name inside `install_path`.
    pub executable: String,

    /// Address the instances bind and announce (usually the host's public IP).
    pub host_address: String,

    /// Hard ceiling on fleet size for this host.
    pub max_servers: usize,

    /// Floor the scaler will never shrink below.
    pub min_servers: usize,

    /// First game port; instance N uses `game_port_base + N * port_stride`.
    pub game_port_base: u16,
    /// First voice port.
    pub voice_port_base: u16,
    /// First public (manager/control) port.
    pub public_port_base: u16,
    /// Port step between instance slots.
    pub port_stride: u16,

    /// How long a `Starting` instance may take to announce before it is
    /// declared crashed. Defaults to minutes - HoN loads slowly.
    pub startup_timeout_secs: u64,

    /// Grace window for a requested shutdown before the process is killed.
    pub stop_grace_secs: u64,

    /// Whether an instance whose lobby closed goes to `Idle` instead of
    /// straight back to `Ready`. The upstream behavior here is
    /// deployment-specific, so it is an explicit policy knob.
    pub idle_after_lobby_close: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            install_path: PathBuf::from("/opt/hon"),
            executable: "hon_server".to_string(),
            host_address: "127.0.0.1".to_string(),
            max_servers: 10,
            min_servers: 1,
            game_port_base: 10001,
            voice_port_base: 11001,
            public_port_base: 12001,
            port_stride: 1,
            startup_timeout_secs: 180,
            stop_grace_secs: 30,
            idle_after_lobby_close: false,
        }
    }
}

impl FleetConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Sanity-checks the port layout and fleet bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_servers == 0 {
            return Err("max_servers must be at least 1".to_string());
        }
        if self.min_servers > self.max_servers {
            return Err(format!(
                "min_servers ({}) exceeds max_servers ({})",
                self.min_servers, self.max_servers
            ));
        }
        if self.port_stride == 0 {
            return Err("port_stride must be at least 1".to_string());
        }
        let span = self.max_servers as u32 * self.port_stride as u32;
        for (name, base) in [
            ("game_port_base", self.game_port_base),
            ("voice_port_base", self.voice_port_base),
            ("public_port_base", self.public_port_base),
        ] {
            if base as u32 + span > u16::MAX as u32 {
                return Err(format!("{name} + max_servers * port_stride overflows a port"));
            }
        }
        if self.executable.is_empty() {
            return Err("executable cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between probe sweeps.
    pub check_interval_secs: u64,
    /// Per-probe timeout in seconds.
    pub probe_timeout_secs: u64,
    /// Failures before an instance is considered unhealthy.
    pub max_consecutive_failures: u32,
    /// Failures before a restart is recommended to the lifecycle layer.
    pub restart_watermark: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            probe_timeout_secs: 5,
            max_consecutive_failures: 3,
            restart_watermark: 5,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be at least 1".to_string());
        }
        if self.restart_watermark < self.max_consecutive_failures {
            return Err(format!(
                "restart_watermark ({}) must be >= max_consecutive_failures ({})",
                self.restart_watermark, self.max_consecutive_failures
            ));
        }
        Ok(())
    }
}

/// Auto-scaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Master switch; when false, the scaler loop never acts.
    pub enabled: bool,
    /// Seconds between scaling checks.
    pub check_interval_secs: u64,
    /// Minimum seconds between two scale actions.
    pub cooldown_secs: u64,
    /// Occupancy rate at or above which a scale-up qualifies.
    pub scale_up_threshold: f64,
    /// Occupancy rate at or below which a scale-down qualifies.
    pub scale_down_threshold: f64,
    /// Ready-instance floor maintained both as a scale-up trigger and a
    /// scale-down guard.
    pub min_ready_servers: usize,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 60,
            cooldown_secs: 300,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            min_ready_servers: 1,
        }
    }
}

impl ScalingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.scale_up_threshold) {
            return Err("scale_up_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.scale_down_threshold) {
            return Err("scale_down_threshold must be between 0 and 1".to_string());
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FleetConfig::default().validate().is_ok());
        assert!(HealthConfig::default().validate().is_ok());
        assert!(ScalingConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_fleet_bounds() {
        let mut cfg = FleetConfig::default();
        cfg.min_servers = 20;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_port_overflow() {
        let mut cfg = FleetConfig::default();
        cfg.game_port_base = 65_000;
        cfg.max_servers = 600;
        cfg.port_stride = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut cfg = ScalingConfig::default();
        cfg.scale_down_threshold = 0.9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_watermark_below_failure_threshold() {
        let mut cfg = HealthConfig::default();
        cfg.restart_watermark = 1;
        assert!(cfg.validate().is_err());
    }
}
