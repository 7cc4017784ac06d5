//! Simulated RTL2832U dongle.
//!
//! Receive-only, one channel. Tuner gain is a discrete table (the value
//! applied is the nearest table entry); the E4000 tuner adds an `IF` stage.
//! Frequency correction is applied in whole ppm like the real chip.

use crate::capabilities::RadioBackend;
use crate::drivers::common::registers::{
    check_channel, check_mboard, configurable_names, note_clamped, require_finite,
    select_antenna, select_source, stage_index, stage_range,
};
use crate::drivers::common::{ChannelRegisters, DeviceClaims, DeviceHandle, FaultConfig};
use crate::drivers::inventory::{RtlTuner, SimulatedInventory};
use crate::registry::{BackendFactory, BoardBackend};
use parking_lot::RwLock;
use sdr_core::args::DeviceArgs;
use sdr_core::error::{DriverError, DriverErrorKind, SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange, Range};
use sdr_core::types::{ClockSource, Direction, GainStage, TimeSource};
use std::sync::Arc;

const TAG: &str = "rtl";

/// R820T tuner gain table in dB.
const R820T_GAINS: &[f64] = &[
    0.0, 0.9, 1.4, 2.7, 3.7, 7.7, 8.7, 12.5, 14.4, 15.7, 16.6, 19.7, 20.7, 22.9, 25.4, 28.0, 29.7,
    32.8, 33.8, 36.4, 37.2, 38.6, 40.2, 42.1, 43.4, 43.9, 44.5, 48.0, 49.6,
];

/// E4000 LNA gain table in dB.
const E4000_GAINS: &[f64] = &[
    -1.0, 1.5, 4.0, 6.5, 9.0, 11.5, 14.0, 16.5, 19.0, 21.5, 24.0, 29.0, 34.0, 42.0, 43.0, 45.0,
    47.0, 49.0,
];

const SAMPLE_RATES: &[f64] = &[
    250e3, 1.0e6, 1.024e6, 1.8e6, 1.92e6, 2.048e6, 2.4e6, 2.6e6, 2.8e6, 3.0e6, 3.2e6,
];

const DEFAULT_RATE: f64 = 2.048e6;
const DEFAULT_FREQ: f64 = 100e6;
const ANTENNAS: &[&str] = &["RX"];

// =============================================================================
// RtlFactory
// =============================================================================

/// Factory for [`RtlSdr`] boards.
pub struct RtlFactory {
    inventory: Arc<SimulatedInventory>,
    claims: DeviceClaims,
    faults: FaultConfig,
}

impl RtlFactory {
    /// Factory over the dongles in `inventory`.
    pub fn new(inventory: Arc<SimulatedInventory>, claims: DeviceClaims) -> Self {
        Self {
            inventory,
            claims,
            faults: FaultConfig::none(),
        }
    }

    /// Inject faults into every board this factory builds.
    pub fn with_faults(mut self, faults: FaultConfig) -> Self {
        self.faults = faults;
        self
    }

    fn resolve(&self, selector: &str) -> Result<(usize, RtlTuner, String), DriverError> {
        let dongles = &self.inventory.rtl;
        // Serial match wins over index: serials are often all digits.
        let found = if selector.is_empty() {
            dongles.first().map(|d| (0, d))
        } else {
            dongles
                .iter()
                .enumerate()
                .find(|(_, d)| d.serial == selector)
                .or_else(|| {
                    let index = selector.parse::<usize>().ok()?;
                    dongles.get(index).map(|d| (index, d))
                })
        };
        found
            .map(|(i, d)| (i, d.tuner, d.serial.clone()))
            .ok_or_else(|| {
                DriverError::new(
                    TAG,
                    DriverErrorKind::Initialization,
                    format!("no RTL-SDR device matches '{}'", selector),
                )
            })
    }
}

impl BackendFactory for RtlFactory {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn name(&self) -> &'static str {
        "RTL2832U DVB-T dongle"
    }

    fn directions(&self) -> &'static [Direction] {
        &[Direction::Source]
    }

    fn discover(&self, _hint: &DeviceArgs) -> Vec<DeviceArgs> {
        self.inventory
            .rtl
            .iter()
            .enumerate()
            .map(|(i, d)| {
                DeviceArgs::new()
                    .with(TAG, i.to_string())
                    .with("label", format!("Generic RTL2832U OEM :: {}", d.serial))
            })
            .collect()
    }

    fn build(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend> {
        if direction != Direction::Source {
            return Err(SdrError::not_supported(TAG, "sink"));
        }
        let selector = args.get(TAG).unwrap_or("");
        let (index, tuner, serial) = self.resolve(selector)?;
        let guard = self.claims.claim(TAG, &serial)?;
        let board = RtlSdr::open(args.clone(), index, tuner, serial, guard, self.faults.fork())?;
        Ok(BoardBackend::Rtl(board))
    }
}

// =============================================================================
// RtlSdr
// =============================================================================

#[derive(Debug)]
struct RtlState {
    regs: ChannelRegisters,
    sample_rate: f64,
}

/// One simulated RTL-SDR dongle.
#[derive(Debug)]
pub struct RtlSdr {
    args: DeviceArgs,
    index: usize,
    serial: String,
    tuner: RtlTuner,
    stages: Vec<GainStage>,
    freq_range: FreqRange,
    handle: DeviceHandle,
    faults: FaultConfig,
    state: RwLock<RtlState>,
}

impl RtlSdr {
    fn open(
        args: DeviceArgs,
        index: usize,
        tuner: RtlTuner,
        serial: String,
        guard: crate::drivers::common::ClaimGuard,
        faults: FaultConfig,
    ) -> SdrResult<Self> {
        let stages = match tuner {
            RtlTuner::R820t => vec![GainStage::new("LNA", MetaRange::discrete(R820T_GAINS))],
            RtlTuner::E4000 => vec![
                GainStage::new("LNA", MetaRange::discrete(E4000_GAINS)),
                GainStage::new("IF", MetaRange::single(3.0, 56.0, 1.0)),
            ],
        };
        let freq_range = match tuner {
            RtlTuner::R820t => MetaRange::from(Range::new(24e6, 1766e6, 1.0)),
            RtlTuner::E4000 => MetaRange::from(Range::new(52e6, 2200e6, 1.0)),
        };
        let freq = args.get_parsed::<f64>("freq")?.unwrap_or(DEFAULT_FREQ);
        let regs = ChannelRegisters::new(
            freq_range.clip(freq, false),
            &stages,
            Some(ANTENNAS[0].to_string()),
        );
        let board = Self {
            args,
            index,
            serial,
            tuner,
            stages,
            freq_range,
            handle: DeviceHandle::new(TAG, Some(guard)),
            faults,
            state: RwLock::new(RtlState {
                regs,
                sample_rate: DEFAULT_RATE,
            }),
        };
        if let Some(ppm) = board.args.get_parsed::<f64>("ppm")? {
            board.set_freq_corr(ppm, 0)?;
        }
        tracing::info!(
            index = board.index,
            serial = %board.serial,
            tuner = ?board.tuner,
            "opened RTL-SDR"
        );
        Ok(board)
    }

    /// USB serial of the dongle.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Tuner chip.
    pub fn tuner(&self) -> RtlTuner {
        self.tuner
    }

    fn check(&self, operation: &'static str, chan: usize) -> SdrResult<()> {
        self.handle.ensure_open()?;
        check_channel(chan, 1)?;
        self.faults.check_operation(TAG, operation)?;
        Ok(())
    }
}

impl RadioBackend for RtlSdr {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn direction(&self) -> Direction {
        Direction::Source
    }

    fn args(&self) -> &DeviceArgs {
        &self.args
    }

    fn num_channels(&self) -> usize {
        1
    }

    fn get_sample_rates(&self) -> MetaRange {
        MetaRange::discrete(SAMPLE_RATES)
    }

    fn set_sample_rate(&self, rate: f64) -> SdrResult<f64> {
        self.check("set_sample_rate", 0)?;
        let rate = require_finite("sample_rate", rate)?;
        let applied = self.get_sample_rates().clip(rate, false);
        self.state.write().sample_rate = applied;
        tracing::debug!(requested = rate, applied, "rtl sample rate");
        Ok(applied)
    }

    fn get_sample_rate(&self) -> SdrResult<f64> {
        self.handle.ensure_open()?;
        Ok(self.state.read().sample_rate)
    }

    fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, 1)?;
        Ok(self.freq_range.clone())
    }

    fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_center_freq", chan)?;
        let freq = require_finite("center_freq", freq)?;
        let applied = self.freq_range.clip(freq.round(), false);
        self.state.write().regs.center_freq = applied;
        note_clamped(TAG, "center_freq", freq.round(), applied);
        tracing::debug!(requested = freq, applied, "rtl center frequency");
        Ok(applied)
    }

    fn get_center_freq(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_center_freq", chan)?;
        Ok(self.state.read().regs.center_freq)
    }

    fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_freq_corr", chan)?;
        let applied = require_finite("freq_corr", ppm)?.round();
        self.state.write().regs.freq_corr = applied;
        Ok(applied)
    }

    fn get_freq_corr(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_freq_corr", chan)?;
        Ok(self.state.read().regs.freq_corr)
    }

    fn get_gain_names(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, 1)?;
        Ok(configurable_names(&self.stages))
    }

    fn get_gain_range(&self, name: &str, chan: usize) -> SdrResult<GainRange> {
        check_channel(chan, 1)?;
        stage_range(&self.stages, name)
    }

    fn set_gain(&self, gain: f64, name: &str, chan: usize) -> SdrResult<f64> {
        self.check("set_gain", chan)?;
        let idx = stage_index(&self.stages, name)?;
        let gain = require_finite(&format!("gain:{}", name), gain)?;
        let applied = self.stages[idx].range.clip(gain, true);
        self.state.write().regs.gains[idx] = applied;
        note_clamped(TAG, &format!("gain:{}", name), gain, applied);
        Ok(applied)
    }

    fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64> {
        self.check("get_gain", chan)?;
        let idx = stage_index(&self.stages, name)?;
        Ok(self.state.read().regs.gains[idx])
    }

    fn set_gain_mode(&self, automatic: bool, chan: usize) -> SdrResult<bool> {
        self.check("set_gain_mode", chan)?;
        self.state.write().regs.automatic_gain = automatic;
        Ok(automatic)
    }

    fn get_gain_mode(&self, chan: usize) -> SdrResult<bool> {
        self.check("get_gain_mode", chan)?;
        Ok(self.state.read().regs.automatic_gain)
    }

    fn get_antennas(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, 1)?;
        Ok(ANTENNAS.iter().map(|a| a.to_string()).collect())
    }

    fn set_antenna(&self, name: &str, chan: usize) -> SdrResult<String> {
        self.check("set_antenna", chan)?;
        let applied = select_antenna(ANTENNAS, name)?;
        self.state.write().regs.antenna = Some(applied.clone());
        Ok(applied)
    }

    fn get_antenna(&self, chan: usize) -> SdrResult<Option<String>> {
        self.check("get_antenna", chan)?;
        Ok(self.state.read().regs.antenna.clone())
    }

    fn get_bandwidth_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, 1)?;
        Ok(MetaRange::single(350e3, 8e6, 0.0))
    }

    fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_bandwidth", chan)?;
        let bandwidth = require_finite("bandwidth", bandwidth)?;
        let applied = if bandwidth <= 0.0 {
            0.0
        } else {
            self.get_bandwidth_range(chan)?.clip(bandwidth, false)
        };
        self.state.write().regs.bandwidth = applied;
        Ok(applied)
    }

    fn get_bandwidth(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_bandwidth", chan)?;
        Ok(self.state.read().regs.bandwidth)
    }

    fn get_clock_sources(&self, mboard: usize) -> SdrResult<Vec<ClockSource>> {
        check_mboard(mboard, 1)?;
        Ok(vec![ClockSource::Internal])
    }

    fn set_clock_source(&self, source: ClockSource, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        select_source("clock_source", &[ClockSource::Internal], source)
    }

    fn get_clock_source(&self, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        Ok(ClockSource::Internal)
    }

    fn get_time_sources(&self, mboard: usize) -> SdrResult<Vec<TimeSource>> {
        check_mboard(mboard, 1)?;
        Ok(Vec::new())
    }

    fn set_time_source(&self, source: TimeSource, mboard: usize) -> SdrResult<TimeSource> {
        check_mboard(mboard, 1)?;
        select_source("time_source", &[], source)
    }

    fn get_time_source(&self, mboard: usize) -> SdrResult<TimeSource> {
        check_mboard(mboard, 1)?;
        Ok(TimeSource::Default)
    }

    fn release(&self) -> SdrResult<()> {
        if self.handle.is_open() {
            tracing::info!(index = self.index, serial = %self.serial, "releasing RTL-SDR");
        }
        self.handle.release();
        Ok(())
    }
}
