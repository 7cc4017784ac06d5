//! Shared vocabulary types: stream direction, clock and time sources, the
//! session sync policy, gain stages and per-channel/per-board snapshots.

use crate::error::SdrError;
use crate::ranges::GainRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stream direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Receive samples from the device.
    #[default]
    Source,
    /// Transmit samples to the device.
    Sink,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Source => "source",
            Direction::Sink => "sink",
        })
    }
}

impl FromStr for Direction {
    type Err = SdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" | "rx" => Ok(Direction::Source),
            "sink" | "tx" => Ok(Direction::Sink),
            other => Err(SdrError::out_of_range("direction", other, "source, sink")),
        }
    }
}

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $param:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical lowercase name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SdrError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        let allowed = $name::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        SdrError::out_of_range($param, s, allowed)
                    })
            }
        }
    };
}

named_enum! {
    /// Reference clock selection for one board.
    ClockSource, "clock_source" {
        /// No override: leave the board's clock as it is.
        #[default]
        Default => "default",
        /// On-board oscillator.
        Internal => "internal",
        /// External 10 MHz reference.
        External => "external",
        /// External reference plus PPS on the same connector.
        External1pps => "external_1pps",
        /// MIMO cable from a neighbouring board.
        Mimo => "mimo",
        /// GPS disciplined oscillator.
        Gpsdo => "gpsdo",
    }
}

named_enum! {
    /// Time (PPS) source selection for one board.
    TimeSource, "time_source" {
        /// No override.
        #[default]
        Default => "default",
        /// External PPS input.
        External => "external",
        /// PPS over MIMO cable.
        Mimo => "mimo",
        /// GPSDO PPS.
        Gpsdo => "gpsdo",
    }
}

named_enum! {
    /// How device time registers are aligned at session start.
    SyncPolicy, "sync" {
        /// Leave device time alone.
        #[default]
        None => "none",
        /// Set time zero on the next (unknown) PPS edge of every board.
        UnknownPps => "unknown_pps",
        /// Set every board to the host wall clock, sampled once.
        PcClock => "pc_clock",
    }
}

named_enum! {
    /// Gain control mode of a channel.
    GainMode, "gain_mode" {
        /// Gains are set by the caller.
        #[default]
        Manual => "manual",
        /// Hardware AGC.
        Automatic => "automatic",
    }
}

impl GainMode {
    /// Map the boolean form used by the capability interface.
    pub fn from_automatic(automatic: bool) -> Self {
        if automatic {
            GainMode::Automatic
        } else {
            GainMode::Manual
        }
    }

    /// Whether AGC is on.
    pub fn is_automatic(&self) -> bool {
        matches!(self, GainMode::Automatic)
    }
}

/// A named gain stage and its range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainStage {
    /// Stage name (`LNA`, `IF`, `BB`, `PGA`, ...).
    pub name: String,
    /// Settable range in dB.
    pub range: GainRange,
}

impl GainStage {
    /// Create a stage.
    pub fn new(name: impl Into<String>, range: GainRange) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    /// Stages whose range holds a single value are not adjustable and are
    /// hidden from every enumeration surface.
    pub fn is_configurable(&self) -> bool {
        self.range.is_configurable()
    }
}

/// Current value of one gain stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainSetting {
    /// Stage and range.
    #[serde(flatten)]
    pub stage: GainStage,
    /// Applied gain in dB.
    pub current: f64,
}

/// Snapshot of one logical channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Board the channel lives on.
    pub board: usize,
    /// Channel index within that board.
    pub local: usize,
    /// Center frequency in Hz.
    pub center_freq: f64,
    /// Frequency correction in ppm.
    pub freq_corr: f64,
    /// Gain mode.
    pub gain_mode: GainMode,
    /// Configurable gain stages with their current values.
    pub gains: Vec<GainSetting>,
    /// Selected antenna, if the backend has any.
    pub antenna: Option<String>,
    /// Analog bandwidth in Hz, 0 for automatic.
    pub bandwidth: f64,
}

/// Snapshot of one board's synchronization settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSpec {
    /// Active clock source.
    pub clock_source: ClockSource,
    /// Active time source.
    pub time_source: TimeSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranges::MetaRange;

    #[test]
    fn clock_source_names_round_trip() {
        for source in ClockSource::ALL {
            assert_eq!(source.as_str().parse::<ClockSource>().unwrap(), *source);
        }
        assert_eq!("GPSDO".parse::<ClockSource>().unwrap(), ClockSource::Gpsdo);
    }

    #[test]
    fn unknown_names_are_out_of_range() {
        let err = "rubidium".parse::<ClockSource>().unwrap_err();
        assert!(matches!(err, SdrError::ParameterOutOfRange { .. }));
        assert!("later".parse::<SyncPolicy>().is_err());
        assert!("both".parse::<Direction>().is_err());
    }

    #[test]
    fn sync_policy_parses_config_names() {
        assert_eq!("pc_clock".parse::<SyncPolicy>().unwrap(), SyncPolicy::PcClock);
        assert_eq!("unknown_pps".parse::<SyncPolicy>().unwrap(), SyncPolicy::UnknownPps);
        assert_eq!(SyncPolicy::default(), SyncPolicy::None);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ClockSource::External1pps).unwrap();
        assert_eq!(json, "\"external_1pps\"");
        let policy: SyncPolicy = serde_json::from_str("\"pc_clock\"").unwrap();
        assert_eq!(policy, SyncPolicy::PcClock);
    }

    #[test]
    fn gain_stage_configurability() {
        assert!(GainStage::new("IF", MetaRange::single(0.0, 40.0, 8.0)).is_configurable());
        assert!(!GainStage::new("BB", MetaRange::single(0.0, 0.0, 0.0)).is_configurable());
    }
}
