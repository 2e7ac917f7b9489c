//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub scheduler: SchedulerConfig,
    pub alarms: AlarmConfig,
    pub recording: RecordingConfig,
    pub preferences: PreferenceConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Polling scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_floor_ms")]
    pub interval_floor_ms: u64,

    #[serde(default = "default_interval_ceiling_ms")]
    pub interval_ceiling_ms: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_follow_interval_ms")]
    pub follow_interval_ms: u64,
}

/// Voice alarm configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AlarmConfig {
    #[serde(default = "default_alarms_enabled")]
    pub enabled: bool,

    #[serde(default = "default_repeat_interval_s")]
    pub repeat_interval_s: u64,

    #[serde(default = "default_min_satellites")]
    pub min_satellites: u32,
}

/// Flight log recording configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecordingConfig {
    #[serde(default = "default_recording_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_continue_in_background")]
    pub continue_in_background: bool,
}

/// Operator preferences
#[derive(Debug, Deserialize, Clone)]
pub struct PreferenceConfig {
    #[serde(default = "default_disable_idle_timer")]
    pub disable_idle_timer: bool,

    #[serde(default = "default_unit_system")]
    pub unit_system: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }

fn default_interval_floor_ms() -> u64 { 100 }
fn default_interval_ceiling_ms() -> u64 { 1000 }
fn default_command_timeout_ms() -> u64 { 3000 }
fn default_follow_interval_ms() -> u64 { 2000 }

fn default_alarms_enabled() -> bool { true }
fn default_repeat_interval_s() -> u64 { 10 }
fn default_min_satellites() -> u32 { 5 }

fn default_recording_enabled() -> bool { true }
fn default_log_dir() -> String { "./flights".to_string() }
fn default_continue_in_background() -> bool { false }

fn default_disable_idle_timer() -> bool { true }
fn default_unit_system() -> String { "metric".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("serial port cannot be empty")
            ));
        }

        if ![9600, 19200, 38400, 57600, 115200, 230400].contains(&self.serial.baud_rate) {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400")
            ));
        }

        if self.scheduler.interval_floor_ms == 0 {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("interval_floor_ms must be greater than 0")
            ));
        }

        if self.scheduler.interval_ceiling_ms < self.scheduler.interval_floor_ms {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("interval_ceiling_ms must be at least interval_floor_ms")
            ));
        }

        if self.scheduler.command_timeout_ms == 0 || self.scheduler.command_timeout_ms > 60000 {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("command_timeout_ms must be between 1 and 60000")
            ));
        }

        // Waypoint pushes faster than 2 s would flood the command link
        if self.scheduler.follow_interval_ms < 2000 || self.scheduler.follow_interval_ms > 60000 {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("follow_interval_ms must be between 2000 and 60000")
            ));
        }

        if self.alarms.repeat_interval_s == 0 || self.alarms.repeat_interval_s > 600 {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("repeat_interval_s must be between 1 and 600")
            ));
        }

        if self.alarms.min_satellites == 0 {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("min_satellites must be greater than 0")
            ));
        }

        if self.recording.enabled && self.recording.log_dir.is_empty() {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("recording log_dir cannot be empty when enabled")
            ));
        }

        if !["metric", "imperial"].contains(&self.preferences.unit_system.as_str()) {
            return Err(crate::error::MspLinkError::Config(
                toml::de::Error::custom("unit_system must be 'metric' or 'imperial'")
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig {
                port: default_serial_port(),
                baud_rate: default_baud_rate(),
            },
            scheduler: SchedulerConfig {
                interval_floor_ms: default_interval_floor_ms(),
                interval_ceiling_ms: default_interval_ceiling_ms(),
                command_timeout_ms: default_command_timeout_ms(),
                follow_interval_ms: default_follow_interval_ms(),
            },
            alarms: AlarmConfig {
                enabled: default_alarms_enabled(),
                repeat_interval_s: default_repeat_interval_s(),
                min_satellites: default_min_satellites(),
            },
            recording: RecordingConfig {
                enabled: default_recording_enabled(),
                log_dir: default_log_dir(),
                continue_in_background: default_continue_in_background(),
            },
            preferences: PreferenceConfig {
                disable_idle_timer: default_disable_idle_timer(),
                unit_system: default_unit_system(),
            },
        }
    }
}
