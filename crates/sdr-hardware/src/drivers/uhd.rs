//! Simulated Ettus USRP motherboards.
//!
//! One board object drives one motherboard with `nchan=` channels (B210 and
//! X310 have two, N210 one). Sample rates are integer decimations of the
//! product's master clock. The board keeps a device time register that
//! advances with the host monotonic clock, so time commands can be checked
//! after the fact through [`Usrp::last_time_command`].
//!
//! Frequency correction is not available on USRPs: `set_freq_corr` always
//! applies 0 ppm.

use crate::capabilities::RadioBackend;
use crate::drivers::common::registers::{
    check_channel, check_mboard, configurable_names, note_clamped, require_finite,
    select_antenna, select_source, stage_index, stage_range,
};
use crate::drivers::common::{ChannelRegisters, ClaimGuard, DeviceClaims, DeviceHandle, FaultConfig};
use crate::drivers::inventory::{SimulatedInventory, UsrpBoard, UsrpProduct};
use crate::registry::{BackendFactory, BoardBackend};
use parking_lot::RwLock;
use sdr_core::args::DeviceArgs;
use sdr_core::error::{DriverError, DriverErrorKind, SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange, Range};
use sdr_core::time_spec::TimeSpec;
use sdr_core::types::{ClockSource, Direction, GainStage, TimeSource};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

const TAG: &str = "uhd";
const MAX_DECIMATION: f64 = 512.0;
const DEFAULT_FREQ: f64 = 100e6;

impl UsrpProduct {
    /// Channels per direction on one motherboard.
    pub fn channels(self) -> usize {
        match self {
            UsrpProduct::B210 | UsrpProduct::X310 => 2,
            UsrpProduct::N210 => 1,
        }
    }

    /// Master clock rate in Hz.
    pub fn master_clock_rate(self) -> f64 {
        match self {
            UsrpProduct::B210 => 32e6,
            UsrpProduct::N210 => 100e6,
            UsrpProduct::X310 => 200e6,
        }
    }

    /// Value of the `type=` device argument.
    pub fn type_name(self) -> &'static str {
        match self {
            UsrpProduct::B210 => "b200",
            UsrpProduct::N210 => "usrp2",
            UsrpProduct::X310 => "x300",
        }
    }

    fn model(self) -> &'static str {
        match self {
            UsrpProduct::B210 => "B210",
            UsrpProduct::N210 => "N210r4",
            UsrpProduct::X310 => "X310",
        }
    }

    fn clock_sources(self) -> &'static [ClockSource] {
        match self {
            UsrpProduct::B210 => &[ClockSource::Internal, ClockSource::External, ClockSource::Gpsdo],
            UsrpProduct::N210 => &[
                ClockSource::Internal,
                ClockSource::External,
                ClockSource::Mimo,
                ClockSource::Gpsdo,
            ],
            UsrpProduct::X310 => &[
                ClockSource::Internal,
                ClockSource::External,
                ClockSource::External1pps,
                ClockSource::Gpsdo,
            ],
        }
    }

    fn time_sources(self) -> &'static [TimeSource] {
        match self {
            UsrpProduct::N210 => &[TimeSource::External, TimeSource::Mimo, TimeSource::Gpsdo],
            UsrpProduct::B210 | UsrpProduct::X310 => &[TimeSource::External, TimeSource::Gpsdo],
        }
    }

    fn freq_range(self) -> FreqRange {
        match self {
            // AD9361
            UsrpProduct::B210 => MetaRange::from(Range::new(70e6, 6e9, 1.0)),
            // UBX daughterboard
            UsrpProduct::N210 | UsrpProduct::X310 => MetaRange::from(Range::new(10e6, 6e9, 1.0)),
        }
    }

    fn gain_range(self, direction: Direction) -> GainRange {
        match (self, direction) {
            (UsrpProduct::B210, Direction::Source) => MetaRange::single(0.0, 76.0, 1.0),
            (UsrpProduct::B210, Direction::Sink) => MetaRange::single(0.0, 89.75, 0.25),
            (_, _) => MetaRange::single(0.0, 31.5, 0.5),
        }
    }

    fn bandwidth_range(self) -> FreqRange {
        match self {
            UsrpProduct::B210 => MetaRange::single(200e3, 56e6, 0.0),
            UsrpProduct::N210 | UsrpProduct::X310 => MetaRange::single(40e6, 40e6, 0.0),
        }
    }

    fn supports_agc(self, direction: Direction) -> bool {
        self == UsrpProduct::B210 && direction == Direction::Source
    }
}

fn antennas(direction: Direction) -> &'static [&'static str] {
    match direction {
        Direction::Source => &["TX/RX", "RX2"],
        Direction::Sink => &["TX/RX"],
    }
}

// =============================================================================
// UsrpFactory
// =============================================================================

/// Factory for [`Usrp`] motherboards.
pub struct UsrpFactory {
    inventory: Arc<SimulatedInventory>,
    claims: DeviceClaims,
    faults: FaultConfig,
}

impl UsrpFactory {
    /// Factory over the motherboards in `inventory`.
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

    /// `serial=` (or a non-empty `uhd=`) selects a board; otherwise the first
    /// board not already in use.
    fn resolve(&self, args: &DeviceArgs) -> Option<&UsrpBoard> {
        let wanted = args
            .get("serial")
            .or_else(|| args.get(TAG).filter(|v| !v.is_empty()));
        match wanted {
            Some(serial) => self.inventory.uhd.iter().find(|b| b.serial == serial),
            None => self
                .inventory
                .uhd
                .iter()
                .find(|b| !self.claims.is_claimed(TAG, &b.serial)),
        }
    }
}

impl BackendFactory for UsrpFactory {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn name(&self) -> &'static str {
        "Ettus USRP"
    }

    fn directions(&self) -> &'static [Direction] {
        &[Direction::Source, Direction::Sink]
    }

    fn max_channels(&self, args: &DeviceArgs) -> usize {
        self.resolve(args)
            .map(|b| b.product.channels())
            .unwrap_or(2)
    }

    fn discover(&self, _hint: &DeviceArgs) -> Vec<DeviceArgs> {
        self.inventory
            .uhd
            .iter()
            .map(|b| {
                let kind = b.product.type_name();
                DeviceArgs::new()
                    .with(TAG, "")
                    .with("type", kind)
                    .with("serial", b.serial.as_str())
                    .with(
                        "label",
                        format!("Ettus {} {}", kind.to_uppercase(), b.serial),
                    )
            })
            .collect()
    }

    fn build(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend> {
        let board = self.resolve(args).ok_or_else(|| {
            DriverError::new(
                TAG,
                DriverErrorKind::Initialization,
                format!("no USRP found for '{}'", args),
            )
        })?;
        let nchan = args.get_parsed::<usize>("nchan")?.unwrap_or(1);
        if nchan == 0 || nchan > board.product.channels() {
            return Err(SdrError::InvalidTopology(format!(
                "{} {} has {} channel(s), {} requested",
                board.product.model(),
                board.serial,
                board.product.channels(),
                nchan
            )));
        }
        let guard = self.claims.claim(TAG, &board.serial)?;
        let usrp = Usrp::open(
            args.clone(),
            direction,
            board.clone(),
            nchan,
            guard,
            self.faults.fork(),
        )?;
        Ok(BoardBackend::Uhd(usrp))
    }
}

// =============================================================================
// Usrp
// =============================================================================

/// Kind of the last time command a board received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeCommand {
    /// `set_time_now`.
    Now,
    /// `set_time_next_pps`.
    NextPps,
    /// `set_time_unknown_pps`.
    UnknownPps,
}

/// Device time register: `base` at host instant `anchor`.
#[derive(Debug, Clone, Copy)]
struct TimeRegister {
    base: TimeSpec,
    anchor: Instant,
}

impl TimeRegister {
    fn now(&self) -> TimeSpec {
        self.base + TimeSpec::from_real_secs(self.anchor.elapsed().as_secs_f64())
    }
}

#[derive(Debug)]
struct UsrpState {
    channels: Vec<ChannelRegisters>,
    sample_rate: f64,
    clock_source: ClockSource,
    time_source: TimeSource,
    time: TimeRegister,
    last_time_command: Option<(TimeCommand, TimeSpec)>,
}

/// One simulated USRP motherboard.
#[derive(Debug)]
pub struct Usrp {
    args: DeviceArgs,
    direction: Direction,
    board: UsrpBoard,
    nchan: usize,
    lo_offset: f64,
    stages: Vec<GainStage>,
    handle: DeviceHandle,
    faults: FaultConfig,
    state: RwLock<UsrpState>,
}

impl Usrp {
    fn open(
        args: DeviceArgs,
        direction: Direction,
        board: UsrpBoard,
        nchan: usize,
        guard: ClaimGuard,
        faults: FaultConfig,
    ) -> SdrResult<Self> {
        let product = board.product;
        let stages = vec![GainStage::new("PGA", product.gain_range(direction))];
        let lo_offset = args.get_parsed::<f64>("lo_offset")?.unwrap_or(0.0);
        let default_antenna = antennas(direction).last().map(|a| a.to_string());
        let channels = (0..nchan)
            .map(|_| ChannelRegisters::new(DEFAULT_FREQ, &stages, default_antenna.clone()))
            .collect();
        let usrp = Self {
            args,
            direction,
            board,
            nchan,
            lo_offset,
            stages,
            handle: DeviceHandle::new(TAG, Some(guard)),
            faults,
            state: RwLock::new(UsrpState {
                channels,
                sample_rate: product.master_clock_rate() / 32.0,
                clock_source: ClockSource::Internal,
                time_source: TimeSource::Default,
                time: TimeRegister {
                    base: TimeSpec::ZERO,
                    anchor: Instant::now(),
                },
                last_time_command: None,
            }),
        };
        tracing::info!(
            serial = %usrp.board.serial,
            product = usrp.board.product.model(),
            direction = %usrp.direction,
            nchan,
            "opened USRP"
        );
        if lo_offset != 0.0 {
            tracing::info!(lo_offset, "using LO offset");
        }
        Ok(usrp)
    }

    /// Motherboard serial.
    pub fn serial(&self) -> &str {
        &self.board.serial
    }

    /// Product family.
    pub fn product(&self) -> UsrpProduct {
        self.board.product
    }

    /// LO offset from the `lo_offset=` argument.
    pub fn lo_offset(&self) -> f64 {
        self.lo_offset
    }

    /// Last time command and the time it carried.
    pub fn last_time_command(&self) -> Option<(TimeCommand, TimeSpec)> {
        self.state.read().last_time_command
    }

    fn check(&self, operation: &'static str, chan: usize) -> SdrResult<()> {
        self.handle.ensure_open()?;
        check_channel(chan, self.nchan)?;
        self.faults.check_operation(TAG, operation)?;
        Ok(())
    }

    fn check_board(&self, operation: &'static str, mboard: usize) -> SdrResult<()> {
        self.handle.ensure_open()?;
        check_mboard(mboard, 1)?;
        self.faults.check_operation(TAG, operation)?;
        Ok(())
    }

    /// Program the time register so it reads `time` after `delay` seconds.
    fn latch_time(&self, command: TimeCommand, time: TimeSpec, delay: f64) {
        let mut state = self.state.write();
        state.time = TimeRegister {
            base: time - TimeSpec::from_real_secs(delay),
            anchor: Instant::now(),
        };
        state.last_time_command = Some((command, time));
        tracing::debug!(serial = %self.board.serial, ?command, %time, "usrp time command");
    }

    fn until_next_pps(&self) -> f64 {
        1.0 - self.state.read().time.now().frac_secs()
    }
}

impl RadioBackend for Usrp {
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
        self.nchan
    }

    fn get_sample_rates(&self) -> MetaRange {
        let mcr = self.board.product.master_clock_rate();
        MetaRange::single(mcr / MAX_DECIMATION, mcr, 0.0)
    }

    fn set_sample_rate(&self, rate: f64) -> SdrResult<f64> {
        self.check("set_sample_rate", 0)?;
        let rate = require_finite("sample_rate", rate)?;
        if rate <= 0.0 {
            return Err(SdrError::out_of_range("sample_rate", rate, "a positive rate"));
        }
        let mcr = self.board.product.master_clock_rate();
        let decimation = (mcr / rate).round().clamp(1.0, MAX_DECIMATION);
        let applied = mcr / decimation;
        self.state.write().sample_rate = applied;
        tracing::debug!(requested = rate, applied, decimation, "usrp sample rate");
        Ok(applied)
    }

    fn get_sample_rate(&self) -> SdrResult<f64> {
        self.handle.ensure_open()?;
        Ok(self.state.read().sample_rate)
    }

    fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, self.nchan)?;
        Ok(self.board.product.freq_range())
    }

    fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_center_freq", chan)?;
        let freq = require_finite("center_freq", freq)?;
        let applied = self.board.product.freq_range().clip(freq, false);
        self.state.write().channels[chan].center_freq = applied;
        note_clamped(TAG, "center_freq", freq, applied);
        tracing::debug!(chan, requested = freq, applied, lo_offset = self.lo_offset, "usrp tune");
        Ok(applied)
    }

    fn get_center_freq(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_center_freq", chan)?;
        Ok(self.state.read().channels[chan].center_freq)
    }

    fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_freq_corr", chan)?;
        require_finite("freq_corr", ppm)?;
        if ppm != 0.0 {
            tracing::debug!(ppm, "frequency correction is not available on USRPs");
        }
        Ok(0.0)
    }

    fn get_freq_corr(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_freq_corr", chan)?;
        Ok(0.0)
    }

    fn get_gain_names(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, self.nchan)?;
        Ok(configurable_names(&self.stages))
    }

    fn get_gain_range(&self, name: &str, chan: usize) -> SdrResult<GainRange> {
        check_channel(chan, self.nchan)?;
        stage_range(&self.stages, name)
    }

    fn set_gain(&self, gain: f64, name: &str, chan: usize) -> SdrResult<f64> {
        self.check("set_gain", chan)?;
        let idx = stage_index(&self.stages, name)?;
        let gain = require_finite(&format!("gain:{}", name), gain)?;
        let applied = self.stages[idx].range.clip(gain, false);
        self.state.write().channels[chan].gains[idx] = applied;
        note_clamped(TAG, &format!("gain:{}", name), gain, applied);
        tracing::debug!(chan, stage = name, requested = gain, applied, "usrp gain");
        Ok(applied)
    }

    fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64> {
        self.check("get_gain", chan)?;
        let idx = stage_index(&self.stages, name)?;
        Ok(self.state.read().channels[chan].gains[idx])
    }

    fn set_gain_mode(&self, automatic: bool, chan: usize) -> SdrResult<bool> {
        self.check("set_gain_mode", chan)?;
        if automatic && !self.board.product.supports_agc(self.direction) {
            return Err(SdrError::not_supported(TAG, "set_gain_mode"));
        }
        self.state.write().channels[chan].automatic_gain = automatic;
        Ok(automatic)
    }

    fn get_gain_mode(&self, chan: usize) -> SdrResult<bool> {
        self.check("get_gain_mode", chan)?;
        Ok(self.state.read().channels[chan].automatic_gain)
    }

    fn get_antennas(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, self.nchan)?;
        Ok(antennas(self.direction).iter().map(|a| a.to_string()).collect())
    }

    fn set_antenna(&self, name: &str, chan: usize) -> SdrResult<String> {
        self.check("set_antenna", chan)?;
        let applied = select_antenna(antennas(self.direction), name)?;
        self.state.write().channels[chan].antenna = Some(applied.clone());
        Ok(applied)
    }

    fn get_antenna(&self, chan: usize) -> SdrResult<Option<String>> {
        self.check("get_antenna", chan)?;
        Ok(self.state.read().channels[chan].antenna.clone())
    }

    fn get_bandwidth_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, self.nchan)?;
        Ok(self.board.product.bandwidth_range())
    }

    fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64> {
        self.check("set_bandwidth", chan)?;
        let bandwidth = require_finite("bandwidth", bandwidth)?;
        let range = self.board.product.bandwidth_range();
        // 0 lets the board follow the sample rate.
        let wanted = if bandwidth <= 0.0 {
            self.state.read().sample_rate
        } else {
            bandwidth
        };
        let applied = range.clip(wanted, false);
        self.state.write().channels[chan].bandwidth = applied;
        Ok(applied)
    }

    fn get_bandwidth(&self, chan: usize) -> SdrResult<f64> {
        self.check("get_bandwidth", chan)?;
        let state = self.state.read();
        let bandwidth = state.channels[chan].bandwidth;
        if bandwidth > 0.0 {
            Ok(bandwidth)
        } else {
            Ok(self.board.product.bandwidth_range().clip(state.sample_rate, false))
        }
    }

    fn get_clock_sources(&self, mboard: usize) -> SdrResult<Vec<ClockSource>> {
        check_mboard(mboard, 1)?;
        Ok(self.board.product.clock_sources().to_vec())
    }

    fn set_clock_source(&self, source: ClockSource, mboard: usize) -> SdrResult<ClockSource> {
        self.check_board("set_clock_source", mboard)?;
        let applied = select_source("clock_source", self.board.product.clock_sources(), source)?;
        self.state.write().clock_source = applied;
        tracing::debug!(serial = %self.board.serial, clock_source = %applied, "usrp clock source");
        Ok(applied)
    }

    fn get_clock_source(&self, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        Ok(self.state.read().clock_source)
    }

    fn get_time_sources(&self, mboard: usize) -> SdrResult<Vec<TimeSource>> {
        check_mboard(mboard, 1)?;
        Ok(self.board.product.time_sources().to_vec())
    }

    fn set_time_source(&self, source: TimeSource, mboard: usize) -> SdrResult<TimeSource> {
        self.check_board("set_time_source", mboard)?;
        let applied = select_source("time_source", self.board.product.time_sources(), source)?;
        self.state.write().time_source = applied;
        tracing::debug!(serial = %self.board.serial, time_source = %applied, "usrp time source");
        Ok(applied)
    }

    fn get_time_source(&self, mboard: usize) -> SdrResult<TimeSource> {
        check_mboard(mboard, 1)?;
        Ok(self.state.read().time_source)
    }

    fn get_time_now(&self, mboard: usize) -> SdrResult<TimeSpec> {
        self.check_board("get_time_now", mboard)?;
        Ok(self.state.read().time.now())
    }

    fn get_time_last_pps(&self, mboard: usize) -> SdrResult<TimeSpec> {
        self.check_board("get_time_last_pps", mboard)?;
        let now = self.state.read().time.now();
        Ok(TimeSpec::new(now.full_secs(), 0.0))
    }

    fn set_time_now(&self, time: TimeSpec, mboard: usize) -> SdrResult<()> {
        self.check_board("set_time_now", mboard)?;
        self.latch_time(TimeCommand::Now, time, 0.0);
        Ok(())
    }

    fn set_time_next_pps(&self, time: TimeSpec) -> SdrResult<()> {
        self.check_board("set_time_next_pps", 0)?;
        let delay = self.until_next_pps();
        self.latch_time(TimeCommand::NextPps, time, delay);
        Ok(())
    }

    fn set_time_unknown_pps(&self, time: TimeSpec) -> SdrResult<()> {
        self.check_board("set_time_unknown_pps", 0)?;
        // Wait for one edge, then latch on the following one.
        let delay = self.until_next_pps() + 1.0;
        self.latch_time(TimeCommand::UnknownPps, time, delay);
        Ok(())
    }

    fn release(&self) -> SdrResult<()> {
        if self.handle.is_open() {
            tracing::info!(serial = %self.board.serial, "releasing USRP");
        }
        self.handle.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> UsrpFactory {
        UsrpFactory::new(Arc::new(SimulatedInventory::default()), DeviceClaims::new())
    }

    fn open(args: &str, direction: Direction) -> Usrp {
        match factory().build(&args.parse().unwrap(), direction).unwrap() {
            BoardBackend::Uhd(usrp) => usrp,
            other => panic!("expected a USRP, got {:?}", other),
        }
    }

    #[test]
    fn nchan_is_bounded_by_product() {
        let b210 = open("uhd,serial=30A1F9B,nchan=2", Direction::Source);
        assert_eq!(b210.num_channels(), 2);
        let err = factory()
            .build(&"uhd,serial=F4A5C1,nchan=2".parse().unwrap(), Direction::Source)
            .unwrap_err();
        assert!(matches!(err, SdrError::InvalidTopology(_)));
        assert_eq!(factory().max_channels(&"uhd,serial=F4A5C1".parse().unwrap()), 1);
    }

    #[test]
    fn first_free_board_is_chosen() {
        let factory = factory();
        let first = factory.build(&"uhd".parse().unwrap(), Direction::Source).unwrap();
        let second = factory.build(&"uhd".parse().unwrap(), Direction::Source).unwrap();
        match (&first, &second) {
            (BoardBackend::Uhd(a), BoardBackend::Uhd(b)) => {
                assert_eq!(a.serial(), "30A1F9B");
                assert_eq!(b.serial(), "30A1FA0");
            }
            _ => panic!("expected USRPs"),
        }
    }

    #[test]
    fn sample_rate_is_integer_decimation() {
        let usrp = open("uhd", Direction::Source);
        assert_eq!(usrp.set_sample_rate(1e6).unwrap(), 1e6);
        assert_eq!(usrp.set_sample_rate(2.5e6).unwrap(), 32e6 / 13.0);
        assert_eq!(usrp.set_sample_rate(1.0).unwrap(), 32e6 / 512.0);
        assert_eq!(usrp.set_sample_rate(1e9).unwrap(), 32e6);
    }

    #[test]
    fn gain_clamps_continuously() {
        let usrp = open("uhd", Direction::Source);
        assert_eq!(usrp.set_gain(38.0, "PGA", 0).unwrap(), 38.0);
        assert_eq!(usrp.set_gain(120.0, "PGA", 0).unwrap(), 76.0);
        assert_eq!(usrp.set_gain(-3.0, "PGA", 0).unwrap(), 0.0);
        let tx = open("uhd", Direction::Sink);
        assert_eq!(tx.get_gain_range("PGA", 0).unwrap().stop(), 89.75);
    }

    #[test]
    fn antennas_depend_on_direction() {
        let rx = open("uhd", Direction::Source);
        assert_eq!(rx.get_antenna(0).unwrap().as_deref(), Some("RX2"));
        assert_eq!(rx.set_antenna("TX/RX", 0).unwrap(), "TX/RX");
        let tx = open("uhd", Direction::Sink);
        assert!(tx.set_antenna("RX2", 0).is_err());
    }

    #[test]
    fn freq_corr_is_always_zero() {
        let usrp = open("uhd", Direction::Source);
        assert_eq!(usrp.set_freq_corr(12.0, 0).unwrap(), 0.0);
        assert_eq!(usrp.get_freq_corr(0).unwrap(), 0.0);
    }

    #[test]
    fn clock_and_time_sources_per_product() {
        let n210 = open("uhd,serial=F4A5C1", Direction::Source);
        assert_eq!(n210.set_clock_source(ClockSource::Mimo, 0).unwrap(), ClockSource::Mimo);
        assert_eq!(n210.set_time_source(TimeSource::Mimo, 0).unwrap(), TimeSource::Mimo);
        let b210 = open("uhd,serial=30A1F9B", Direction::Source);
        assert!(b210.set_clock_source(ClockSource::Mimo, 0).is_err());
        assert!(b210.set_time_source(TimeSource::Gpsdo, 1).is_err());
    }

    #[test]
    fn time_commands_are_recorded() {
        let usrp = open("uhd", Direction::Source);
        assert!(usrp.last_time_command().is_none());
        let stamp = TimeSpec::new(1_700_000_000, 0.25);
        usrp.set_time_now(stamp, 0).unwrap();
        assert_eq!(usrp.last_time_command(), Some((TimeCommand::Now, stamp)));
        assert!(usrp.get_time_now(0).unwrap() >= stamp);
        usrp.set_time_unknown_pps(TimeSpec::ZERO).unwrap();
        assert_eq!(
            usrp.last_time_command(),
            Some((TimeCommand::UnknownPps, TimeSpec::ZERO))
        );
        // Device time is still before the latch point.
        assert!(usrp.get_time_now(0).unwrap() < TimeSpec::ZERO);
    }

    #[test]
    fn agc_only_on_b210_receive() {
        let rx = open("uhd,serial=30A1F9B", Direction::Source);
        assert!(rx.set_gain_mode(true, 0).unwrap());
        let n210 = open("uhd,serial=F4A5C1", Direction::Source);
        assert!(matches!(
            n210.set_gain_mode(true, 0),
            Err(SdrError::NotSupported { .. })
        ));
    }
}
