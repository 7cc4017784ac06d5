//! Register model shared by the simulated backends.
//!
//! A backend keeps one [`ChannelRegisters`] per channel behind a lock and
//! uses the helpers here for the checks every real driver performs: channel
//! bounds, finite numbers, stage lookup, antenna and clock/time source
//! selection.

use sdr_core::error::{SdrError, SdrResult};
use sdr_core::types::GainStage;
use sdr_core::GainRange;
use std::fmt::Display;

/// Per-channel register state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRegisters {
    /// Tuned center frequency in Hz.
    pub center_freq: f64,
    /// Frequency correction in ppm.
    pub freq_corr: f64,
    /// One value per stage, parallel to the backend's stage list.
    pub gains: Vec<f64>,
    /// AGC on.
    pub automatic_gain: bool,
    /// Selected antenna.
    pub antenna: Option<String>,
    /// Requested analog bandwidth; 0 for automatic.
    pub bandwidth: f64,
}

impl ChannelRegisters {
    /// Power-on state: every stage at its minimum.
    pub fn new(center_freq: f64, stages: &[GainStage], antenna: Option<String>) -> Self {
        Self {
            center_freq,
            freq_corr: 0.0,
            gains: stages.iter().map(|s| s.range.start()).collect(),
            automatic_gain: false,
            antenna,
            bandwidth: 0.0,
        }
    }
}

/// Reject NaN and infinities.
pub fn require_finite(parameter: &str, value: f64) -> SdrResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SdrError::out_of_range(parameter, value, "a finite number"))
    }
}

/// Warn when a numeric request was clamped into range or snapped to the
/// hardware grid.
pub fn note_clamped(backend: &str, parameter: &str, requested: f64, applied: f64) {
    if requested != applied {
        tracing::warn!(backend, parameter, requested, applied, "request clamped");
    }
}

/// Bounds check for a backend-local channel index.
pub fn check_channel(chan: usize, nchan: usize) -> SdrResult<()> {
    if chan < nchan {
        Ok(())
    } else {
        Err(SdrError::ChannelOutOfRange {
            channel: chan,
            nchan,
        })
    }
}

/// Bounds check for a motherboard index.
pub fn check_mboard(mboard: usize, mboards: usize) -> SdrResult<()> {
    if mboard < mboards {
        Ok(())
    } else {
        Err(SdrError::BoardOutOfRange {
            board: mboard,
            boards: mboards,
        })
    }
}

/// Index of `name` in `stages`.
pub fn stage_index(stages: &[GainStage], name: &str) -> SdrResult<usize> {
    stages.iter().position(|s| s.name == name).ok_or_else(|| {
        SdrError::out_of_range(
            format!("gain:{}", name),
            name,
            format!("one of [{}]", join(stages.iter().map(|s| s.name.as_str()))),
        )
    })
}

/// Names of the stages that can actually be adjusted.
pub fn configurable_names(stages: &[GainStage]) -> Vec<String> {
    stages
        .iter()
        .filter(|s| s.is_configurable())
        .map(|s| s.name.clone())
        .collect()
}

/// Range of `name` in `stages`.
pub fn stage_range(stages: &[GainStage], name: &str) -> SdrResult<GainRange> {
    Ok(stages[stage_index(stages, name)?].range.clone())
}

/// Choose `wanted` from `available`.
pub fn select_antenna(available: &[&str], wanted: &str) -> SdrResult<String> {
    available
        .iter()
        .find(|a| **a == wanted)
        .map(|a| a.to_string())
        .ok_or_else(|| {
            SdrError::out_of_range(
                "antenna",
                wanted,
                format!("one of [{}]", join(available.iter().copied())),
            )
        })
}

/// Choose `wanted` from a list of supported clock or time sources.
pub fn select_source<T>(parameter: &str, available: &[T], wanted: T) -> SdrResult<T>
where
    T: Copy + PartialEq + Display,
{
    if available.contains(&wanted) {
        Ok(wanted)
    } else {
        let names: Vec<String> = available.iter().map(|s| s.to_string()).collect();
        Err(SdrError::out_of_range(
            parameter,
            wanted,
            format!("one of [{}]", names.join(", ")),
        ))
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(", ")
}
