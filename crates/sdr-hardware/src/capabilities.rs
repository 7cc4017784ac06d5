//! The uniform capability interface every board backend implements.
//!
//! A board object controls one physical device (one motherboard). Channel
//! indices passed here are board-local; the session maps logical channels
//! onto `(board, local)` before calling in.
//!
//! All setters return the value actually applied after clamping or
//! rounding, so callers must read back instead of assuming their request
//! took effect. Operations a backend does not have at all return
//! [`SdrError::NotSupported`].
//!
//! Backends are synchronous and take `&self`; they keep their register state
//! behind `parking_lot` locks so a board can be shared across threads.

use enum_dispatch::enum_dispatch;
use sdr_core::args::DeviceArgs;
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange, Range};
use sdr_core::time_spec::TimeSpec;
use sdr_core::types::{ClockSource, Direction, TimeSource};

/// Capability interface of one board.
#[enum_dispatch]
pub trait RadioBackend: Send + Sync {
    /// Registry tag of the backend (`rtl`, `hackrf`, `uhd`, `file`).
    fn tag(&self) -> &'static str;

    /// Direction the board was opened for.
    fn direction(&self) -> Direction;

    /// Arguments the board was opened with.
    fn args(&self) -> &DeviceArgs;

    /// Motherboards behind this object. Simulated backends drive one each.
    fn num_mboards(&self) -> usize {
        1
    }

    /// Channels opened on this board.
    fn num_channels(&self) -> usize;

    // ---------------------------------------------------------------------
    // Sample rate
    // ---------------------------------------------------------------------

    /// Supported sample rates.
    fn get_sample_rates(&self) -> MetaRange;

    /// Set the sample rate of every channel on the board.
    fn set_sample_rate(&self, rate: f64) -> SdrResult<f64>;

    /// Current sample rate.
    fn get_sample_rate(&self) -> SdrResult<f64>;

    // ---------------------------------------------------------------------
    // Tuning
    // ---------------------------------------------------------------------

    /// Tunable range of `chan`.
    fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange>;

    /// Tune `chan`; returns the actual center frequency.
    fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64>;

    /// Current center frequency.
    fn get_center_freq(&self, chan: usize) -> SdrResult<f64>;

    /// Apply a frequency correction in ppm.
    fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64>;

    /// Current frequency correction.
    fn get_freq_corr(&self, chan: usize) -> SdrResult<f64>;

    // ---------------------------------------------------------------------
    // Gain
    // ---------------------------------------------------------------------

    /// Names of the adjustable stages. Stages whose range holds a single
    /// value are never listed.
    fn get_gain_names(&self, chan: usize) -> SdrResult<Vec<String>>;

    /// Range of one stage.
    fn get_gain_range(&self, name: &str, chan: usize) -> SdrResult<GainRange>;

    /// Set one stage; returns the applied gain.
    fn set_gain(&self, gain: f64, name: &str, chan: usize) -> SdrResult<f64>;

    /// Current gain of one stage.
    fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64>;

    /// Enable or disable AGC; returns the applied mode.
    fn set_gain_mode(&self, automatic: bool, chan: usize) -> SdrResult<bool> {
        if automatic {
            Err(SdrError::not_supported(self.tag(), "set_gain_mode"))
        } else {
            self.get_gain_mode(chan)
        }
    }

    /// Whether AGC is on.
    fn get_gain_mode(&self, _chan: usize) -> SdrResult<bool> {
        Ok(false)
    }

    /// Sum of all adjustable stage ranges.
    fn get_overall_gain_range(&self, chan: usize) -> SdrResult<GainRange> {
        let mut start = 0.0;
        let mut stop = 0.0;
        for name in self.get_gain_names(chan)? {
            let range = self.get_gain_range(&name, chan)?;
            start += range.start();
            stop += range.stop();
        }
        Ok(MetaRange::from(Range::continuous(start, stop)))
    }

    /// Distribute `gain` across the adjustable stages in declaration order,
    /// filling each stage before moving to the next. Returns the total
    /// applied gain.
    fn set_overall_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        let names = self.get_gain_names(chan)?;
        let mut ranges = Vec::with_capacity(names.len());
        for name in &names {
            ranges.push(self.get_gain_range(name, chan)?);
        }
        let floor: f64 = ranges.iter().map(|r| r.start()).sum();
        let mut remaining = (gain - floor).max(0.0);
        let mut applied = 0.0;
        for (name, range) in names.iter().zip(&ranges) {
            let want = (range.start() + remaining).min(range.stop());
            let got = self.set_gain(want, name, chan)?;
            remaining = (remaining - (got - range.start())).max(0.0);
            applied += got;
        }
        Ok(applied)
    }

    /// Sum of the current stage gains.
    fn get_overall_gain(&self, chan: usize) -> SdrResult<f64> {
        let mut total = 0.0;
        for name in self.get_gain_names(chan)? {
            total += self.get_gain(&name, chan)?;
        }
        Ok(total)
    }

    /// Shorthand for the `IF` stage.
    fn set_if_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        if self.get_gain_names(chan)?.iter().any(|n| n == "IF") {
            self.set_gain(gain, "IF", chan)
        } else {
            Err(SdrError::not_supported(self.tag(), "set_if_gain"))
        }
    }

    /// Shorthand for the `BB` stage.
    fn set_bb_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        if self.get_gain_names(chan)?.iter().any(|n| n == "BB") {
            self.set_gain(gain, "BB", chan)
        } else {
            Err(SdrError::not_supported(self.tag(), "set_bb_gain"))
        }
    }

    // ---------------------------------------------------------------------
    // Antenna & bandwidth
    // ---------------------------------------------------------------------

    /// Selectable antennas; empty when the board has no switch.
    fn get_antennas(&self, chan: usize) -> SdrResult<Vec<String>>;

    /// Select an antenna; returns the applied name.
    fn set_antenna(&self, name: &str, chan: usize) -> SdrResult<String>;

    /// Selected antenna.
    fn get_antenna(&self, chan: usize) -> SdrResult<Option<String>>;

    /// Supported analog bandwidths.
    fn get_bandwidth_range(&self, _chan: usize) -> SdrResult<FreqRange> {
        Ok(MetaRange::new())
    }

    /// Set the analog bandwidth; 0 selects automatically.
    fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64>;

    /// Current analog bandwidth.
    fn get_bandwidth(&self, chan: usize) -> SdrResult<f64>;

    // ---------------------------------------------------------------------
    // Clock & time
    // ---------------------------------------------------------------------

    /// Clock sources of one motherboard.
    fn get_clock_sources(&self, mboard: usize) -> SdrResult<Vec<ClockSource>>;

    /// Select the reference clock.
    fn set_clock_source(&self, source: ClockSource, mboard: usize) -> SdrResult<ClockSource>;

    /// Active reference clock.
    fn get_clock_source(&self, mboard: usize) -> SdrResult<ClockSource>;

    /// Time sources of one motherboard.
    fn get_time_sources(&self, mboard: usize) -> SdrResult<Vec<TimeSource>>;

    /// Select the PPS source.
    fn set_time_source(&self, source: TimeSource, mboard: usize) -> SdrResult<TimeSource>;

    /// Active PPS source.
    fn get_time_source(&self, mboard: usize) -> SdrResult<TimeSource>;

    /// Current device time.
    fn get_time_now(&self, _mboard: usize) -> SdrResult<TimeSpec> {
        Err(SdrError::not_supported(self.tag(), "get_time_now"))
    }

    /// Device time latched at the last PPS edge.
    fn get_time_last_pps(&self, _mboard: usize) -> SdrResult<TimeSpec> {
        Err(SdrError::not_supported(self.tag(), "get_time_last_pps"))
    }

    /// Set device time immediately.
    fn set_time_now(&self, _time: TimeSpec, _mboard: usize) -> SdrResult<()> {
        Err(SdrError::not_supported(self.tag(), "set_time_now"))
    }

    /// Set device time at the next PPS edge on every motherboard.
    fn set_time_next_pps(&self, _time: TimeSpec) -> SdrResult<()> {
        Err(SdrError::not_supported(self.tag(), "set_time_next_pps"))
    }

    /// Wait for a PPS edge, then set time at the following one.
    fn set_time_unknown_pps(&self, _time: TimeSpec) -> SdrResult<()> {
        Err(SdrError::not_supported(self.tag(), "set_time_unknown_pps"))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Give the device back. Further calls fail.
    fn release(&self) -> SdrResult<()>;
}
