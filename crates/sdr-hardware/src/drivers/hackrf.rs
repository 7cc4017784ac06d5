//! Simulated HackRF One.
//!
//! Half-duplex, one channel in either direction. Gains snap to the
//! hardware step of each stage. The baseband filter is chosen from a fixed
//! list; a bandwidth of 0 selects the widest filter at or below 75 % of the
//! sample rate and follows later sample rate changes.

use crate::capabilities::RadioBackend;
use crate::drivers::common::registers::{
    check_channel, check_mboard, configurable_names, note_clamped, require_finite,
    select_antenna, select_source, stage_index, stage_range,
};
use crate::drivers::common::{ChannelRegisters, ClaimGuard, DeviceClaims, DeviceHandle, FaultConfig};
use crate::drivers::inventory::SimulatedInventory;
use crate::registry::{BackendFactory, BoardBackend};
use parking_lot::RwLock;
use sdr_core::args::DeviceArgs;
use sdr_core::error::{DriverError, DriverErrorKind, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange, Range};
use sdr_core::types::{ClockSource, Direction, GainStage, TimeSource};
use std::sync::Arc;

const TAG: &str = "hackrf";

const SAMPLE_RATES: &[f64] = &[8e6, 10e6, 12.5e6, 16e6, 20e6];

const FILTER_BANDWIDTHS: &[f64] = &[
    1.75e6, 2.5e6, 3.5e6, 5e6, 5.5e6, 6e6, 7e6, 8e6, 9e6, 10e6, 12e6, 14e6, 15e6, 20e6, 24e6,
    28e6,
];

const CLOCK_SOURCES: &[ClockSource] = &[ClockSource::Internal, ClockSource::External];
const ANTENNAS: &[&str] = &["TX/RX"];
const DEFAULT_RATE: f64 = 10e6;
const DEFAULT_FREQ: f64 = 100e6;
const MAX_FREQ: f64 = 7250e6;

/// Widest filter not above `bandwidth`; the narrowest one below the list.
fn baseband_filter(bandwidth: f64) -> f64 {
    FILTER_BANDWIDTHS
        .iter()
        .rev()
        .copied()
        .find(|bw| *bw <= bandwidth)
        .unwrap_or(FILTER_BANDWIDTHS[0])
}

fn stages(direction: Direction) -> Vec<GainStage> {
    match direction {
        Direction::Source => vec![
            GainStage::new("RF", MetaRange::single(0.0, 14.0, 14.0)),
            GainStage::new("IF", MetaRange::single(0.0, 40.0, 8.0)),
            GainStage::new("BB", MetaRange::single(0.0, 62.0, 2.0)),
        ],
        Direction::Sink => vec![
            GainStage::new("RF", MetaRange::single(0.0, 14.0, 14.0)),
            GainStage::new("IF", MetaRange::single(0.0, 47.0, 1.0)),
            // TX has no baseband VGA.
            GainStage::new("BB", MetaRange::single(0.0, 0.0, 0.0)),
        ],
    }
}

// =============================================================================
// HackRfFactory
// =============================================================================

/// Factory for [`HackRf`] boards.
pub struct HackRfFactory {
    inventory: Arc<SimulatedInventory>,
    claims: DeviceClaims,
    faults: FaultConfig,
}

impl HackRfFactory {
    /// Factory over the boards in `inventory`.
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

    fn resolve(&self, selector: &str) -> Result<String, DriverError> {
        let boards = &self.inventory.hackrf;
        let found = if selector.is_empty() {
            boards.first()
        } else {
            boards
                .iter()
                .find(|b| b.serial.ends_with(selector))
                .or_else(|| selector.parse::<usize>().ok().and_then(|i| boards.get(i)))
        };
        found.map(|b| b.serial.clone()).ok_or_else(|| {
            DriverError::new(
                TAG,
                DriverErrorKind::Initialization,
                format!("no HackRF matches '{}'", selector),
            )
        })
    }
}

fn short_serial(serial: &str) -> &str {
    let start = serial.len().saturating_sub(6);
    serial.get(start..).unwrap_or(serial)
}

impl BackendFactory for HackRfFactory {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn name(&self) -> &'static str {
        "HackRF One"
    }

    fn directions(&self) -> &'static [Direction] {
        &[Direction::Source, Direction::Sink]
    }

    fn discover(&self, _hint: &DeviceArgs) -> Vec<DeviceArgs> {
        self.inventory
            .hackrf
            .iter()
            .map(|b| {
                let serial = short_serial(&b.serial);
                DeviceArgs::new()
                    .with(TAG, serial)
                    .with("label", format!("HackRF One {}", serial))
            })
            .collect()
    }

    fn build(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend> {
        let serial = self.resolve(args.get(TAG).unwrap_or(""))?;
        let guard = self.claims.claim(TAG, &serial)?;
        let board = HackRf::open(args.clone(), direction, serial, guard, self.faults.fork())?;
        Ok(BoardBackend::HackRf(board))
    }
}

// =============================================================================
// HackRf
// =============================================================================

#[derive(Debug)]
struct HackRfState {
    regs: ChannelRegisters,
    sample_rate: f64,
    filter: f64,
    clock_source: ClockSource,
}

/// One simulated HackRF.
#[derive(Debug)]
pub struct HackRf {
    args: DeviceArgs,
    direction: Direction,
    serial: String,
    bias_tee: bool,
    stages: Vec<GainStage>,
    handle: DeviceHandle,
    faults: FaultConfig,
    state: RwLock<HackRfState>,
}

impl HackRf {
    fn open(
        args: DeviceArgs,
        direction: Direction,
        serial: String,
        guard: ClaimGuard,
        faults: FaultConfig,
    ) -> SdrResult<Self> {
        let stages = stages(direction);
        let bias_tee = args.get_bool("bias").unwrap_or(false);
        let freq = args.get_parsed::<f64>("freq")?.unwrap_or(DEFAULT_FREQ);
        let freq = require_finite("freq", freq)?.round();
        let freq = Self::freq_range_at(DEFAULT_RATE).clip(freq, false);
        let regs = ChannelRegisters::new(freq, &stages, Some(ANTENNAS[0].to_string()));
        let board = Self {
            args,
            direction,
            serial,
            bias_tee,
            stages,
            handle: DeviceHandle::new(TAG, Some(guard)),
            faults,
            state: RwLock::new(HackRfState {
                regs,
                sample_rate: DEFAULT_RATE,
                filter: baseband_filter(DEFAULT_RATE * 0.75),
                clock_source: ClockSource::Internal,
            }),
        };
        tracing::info!(
            serial = %short_serial(&board.serial),
            direction = %board.direction,
            bias_tee = board.bias_tee,
            "opened HackRF"
        );
        Ok(board)
    }

    /// Whether the antenna bias tee was requested.
    pub fn bias_tee(&self) -> bool {
        self.bias_tee
    }

    fn check(&self, operation: &'static str, chan: usize) -> SdrResult<()> {
        self.handle.ensure_open()?;
        check_channel(chan, 1)?;
        self.faults.check_operation(TAG, operation)?;
        Ok(())
    }

    fn freq_range_at(rate: f64) -> FreqRange {
        MetaRange::from(Range::new(rate / 2.0, MAX_FREQ - rate / 2.0, 1.0))
    }
}

impl RadioBackend for HackRf {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn direction(&self) -> Direction {
        self.direction
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
        let mut state = self.state.write();
        state.sample_rate = applied;
        if state.regs.bandwidth == 0.0 {
            state.filter = baseband_filter(applied * 0.75);
        }
        tracing::debug!(requested = rate, applied, filter = state.filter, "hackrf sample rate");
        Ok(applied)
    }

    fn get_sample_rate(&self) -> SdrResult<f64> {
        self.handle.ensure_open()?;
        Ok(self.state.read().sample_rate)
    }

    fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, 1)?;
        Ok(Self::freq_range_at(self.state.read().sample_rate))
    }

    fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_center_freq", chan)?;
        let freq = require_finite("center_freq", freq)?;
        let mut state = self.state.write();
        let applied = Self::freq_range_at(state.sample_rate).clip(freq.round(), false);
        state.regs.center_freq = applied;
        note_clamped(TAG, "center_freq", freq.round(), applied);
        tracing::debug!(requested = freq, applied, "hackrf center frequency");
        Ok(applied)
    }

    fn get_center_freq(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_center_freq", chan)?;
        Ok(self.state.read().regs.center_freq)
    }

    fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_freq_corr", chan)?;
        let ppm = require_finite("freq_corr", ppm)?;
        self.state.write().regs.freq_corr = ppm;
        Ok(ppm)
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
        tracing::debug!(stage = name, requested = gain, applied, "hackrf gain");
        Ok(applied)
    }

    fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64> {
        self.check("get_gain", chan)?;
        let idx = stage_index(&self.stages, name)?;
        Ok(self.state.read().regs.gains[idx])
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
        Ok(MetaRange::discrete(FILTER_BANDWIDTHS))
    }

    fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_bandwidth", chan)?;
        let bandwidth = require_finite("bandwidth", bandwidth)?.max(0.0);
        let mut state = self.state.write();
        state.regs.bandwidth = bandwidth;
        state.filter = if bandwidth == 0.0 {
            baseband_filter(state.sample_rate * 0.75)
        } else {
            baseband_filter(bandwidth)
        };
        tracing::debug!(requested = bandwidth, filter = state.filter, "hackrf baseband filter");
        Ok(state.filter)
    }

    fn get_bandwidth(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_bandwidth", chan)?;
        Ok(self.state.read().filter)
    }

    fn get_clock_sources(&self, mboard: usize) -> SdrResult<Vec<ClockSource>> {
        check_mboard(mboard, 1)?;
        Ok(CLOCK_SOURCES.to_vec())
    }

    fn set_clock_source(&self, source: ClockSource, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        self.handle.ensure_open()?;
        self.faults.check_operation(TAG, "set_clock_source")?;
        let applied = select_source("clock_source", CLOCK_SOURCES, source)?;
        self.state.write().clock_source = applied;
        Ok(applied)
    }

    fn get_clock_source(&self, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        Ok(self.state.read().clock_source)
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
            tracing::info!(serial = %short_serial(&self.serial), "releasing HackRF");
        }
        self.handle.release();
        Ok(())
    }
}
