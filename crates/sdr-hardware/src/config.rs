//! Session configuration using Figment.
//!
//! A session is described by a TOML file, optionally overridden by
//! environment variables prefixed with `SDR_` (nested keys separated by a
//! double underscore, e.g. `SDR_SAMPLE_RATE=2.4e6`, `SDR_LOG_LEVEL=debug`).
//!
//! ```toml
//! args = "uhd,serial=30A1F9B,nchan=2 uhd,serial=30A1FA0"
//! nchan = 3
//! direction = "source"
//! sync = "pc_clock"
//! sample_rate = 1e6
//!
//! [[boards]]
//! clock_source = "external"
//! time_source = "external"
//!
//! [[channels]]
//! center_freq = 100e6
//! gains = { PGA = 30.0 }
//! antenna = "RX2"
//! ```

use crate::registry::BackendRegistry;
use crate::session::Session;
use crate::sync::{BoardSettings, ChannelSettings, StartSettings};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use sdr_core::args::DeviceArgs;
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::types::{Direction, SyncPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Everything needed to open and start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device argument string.
    #[serde(default)]
    pub args: String,
    /// Total logical channels; derived from the arguments when absent.
    #[serde(default)]
    pub nchan: Option<usize>,
    /// Stream direction.
    #[serde(default)]
    pub direction: Direction,
    /// Time alignment at start.
    #[serde(default)]
    pub sync: SyncPolicy,
    /// Sample rate for every board.
    #[serde(default)]
    pub sample_rate: Option<f64>,
    /// Per-board clock/time overrides.
    #[serde(default)]
    pub boards: Vec<BoardSettings>,
    /// Per-channel initial settings.
    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Simulated device inventory; the built-in bench when absent.
    #[serde(default)]
    pub inventory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            args: String::new(),
            nchan: None,
            direction: Direction::default(),
            sync: SyncPolicy::default(),
            sample_rate: None,
            boards: Vec::new(),
            channels: Vec::new(),
            log_level: default_log_level(),
            inventory: None,
        }
    }
}

impl SessionConfig {
    /// Load from a TOML file plus `SDR_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SdrResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SDR_").split("__"))
            .extract()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded session config");
        Ok(config)
    }

    /// Parse a TOML document (no environment overrides).
    pub fn from_toml_str(toml: &str) -> SdrResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Check values that deserialization cannot.
    pub fn validate(&self) -> SdrResult<()> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SdrError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        DeviceArgs::parse(&self.args)?;

        if self.nchan == Some(0) {
            return Err(SdrError::Configuration("nchan must be at least 1".into()));
        }
        if let Some(nchan) = self.nchan {
            if self.channels.len() > nchan {
                return Err(SdrError::Configuration(format!(
                    "{} channel sections for {} channel(s)",
                    self.channels.len(),
                    nchan
                )));
            }
        }

        if let Some(rate) = self.sample_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(SdrError::Configuration(format!(
                    "Invalid sample_rate {}. Must be a positive number",
                    rate
                )));
            }
        }

        for (chan, channel) in self.channels.iter().enumerate() {
            let numbers = [
                ("center_freq", channel.center_freq),
                ("freq_corr", channel.freq_corr),
                ("gain", channel.gain),
                ("bandwidth", channel.bandwidth),
            ];
            for (name, value) in numbers {
                if value.is_some_and(|v| !v.is_finite()) {
                    return Err(SdrError::Configuration(format!(
                        "channels[{}].{} must be finite",
                        chan, name
                    )));
                }
            }
            if let Some((stage, _)) = channel.gains.iter().find(|(_, g)| !g.is_finite()) {
                return Err(SdrError::Configuration(format!(
                    "channels[{}].gains.{} must be finite",
                    chan, stage
                )));
            }
        }
        Ok(())
    }

    /// Settings applied by [`Session::start`].
    pub fn start_settings(&self) -> StartSettings {
        StartSettings {
            sync: self.sync,
            sample_rate: self.sample_rate,
            boards: self.boards.clone(),
            channels: self.channels.clone(),
        }
    }

    /// Validate, then open the session described by this config.
    pub fn open(&self, registry: &BackendRegistry) -> SdrResult<Session> {
        self.validate()?;
        Session::open(&self.args, self.nchan, self.direction, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdr_core::types::{ClockSource, TimeSource};
    use std::io::Write;

    const EXAMPLE: &str = r#"
        args = "uhd,serial=30A1F9B,nchan=2 uhd,serial=30A1FA0"
        nchan = 3
        sync = "pc_clock"
        sample_rate = 1e6

        [[boards]]
        clock_source = "external"
        time_source = "external"

        [[channels]]
        center_freq = 100e6
        gains = { PGA = 30.0 }
        antenna = "RX2"
    "#;

    #[test]
    fn parses_example() {
        let config = SessionConfig::from_toml_str(EXAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.nchan, Some(3));
        assert_eq!(config.direction, Direction::Source);
        assert_eq!(config.sync, SyncPolicy::PcClock);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.boards[0].clock_source, ClockSource::External);
        assert_eq!(config.boards[0].time_source, TimeSource::External);
        assert_eq!(config.channels[0].gains.get("PGA"), Some(&30.0));
        assert_eq!(config.start_settings().channels.len(), 1);
    }

    #[test]
    fn invalid_log_level() {
        let config = SessionConfig {
            log_level: "verbose".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SdrError::Configuration(_))));
    }

    #[test]
    fn malformed_args_fail_validation() {
        let config = SessionConfig {
            args: "rtl='0".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SdrError::MalformedArgument { .. })
        ));
    }

    #[test]
    fn too_many_channel_sections() {
        let config = SessionConfig {
            nchan: Some(1),
            channels: vec![ChannelSettings::default(), ChannelSettings::default()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_clock_source_is_a_config_error() {
        let err = SessionConfig::from_toml_str("[[boards]]\nclock_source = \"rubidium\"\n")
            .unwrap_err();
        assert!(matches!(err, SdrError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"args = \"rtl=0\"\nlog_level = \"debug\"\n").unwrap();
        let config = SessionConfig::load_from(file.path()).unwrap();
        assert_eq!(config.args, "rtl=0");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn opens_session() {
        let registry = BackendRegistry::simulated().unwrap();
        let config = SessionConfig::from_toml_str(EXAMPLE).unwrap();
        let session = config.open(&registry).unwrap();
        assert_eq!(session.nchan(), 3);
        assert_eq!(session.channel_map(), &[(0, 0), (0, 1), (1, 0)]);
    }
}
