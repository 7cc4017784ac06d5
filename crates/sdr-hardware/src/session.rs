//! Multi-board session.
//!
//! A [`Session`] owns the boards named by one device argument string and
//! presents their channels as one logical sequence `0..nchan`, boards in
//! argument order and each board's channels in local order. Every logical
//! operation is routed to `(board, local)` and forwarded to that board's
//! backend.
//!
//! Construction validates the topology before touching any hardware:
//!
//! 1. `nchan` must be at least the number of boards ([`SdrError::InvalidTopology`]);
//! 2. the per-board `nchan=` declarations (default 1) must add up to `nchan`
//!    ([`SdrError::ChannelCountMismatch`]);
//! 3. no board may declare more channels than its backend provides
//!    ([`SdrError::InvalidTopology`]).

use crate::capabilities::RadioBackend;
use crate::registry::{BackendRegistry, BoardBackend};
use crate::sync::SyncReport;
use parking_lot::Mutex;
use sdr_core::args::{format_boards, DeviceArgs};
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange};
use sdr_core::time_spec::TimeSpec;
use sdr_core::types::{
    BoardSpec, ChannelSpec, ClockSource, Direction, GainMode, GainSetting, GainStage, TimeSource,
};
use std::collections::HashMap;

/// Requested value remembered by the setter cache.
#[derive(Debug, Clone, PartialEq)]
enum Requested {
    Number(f64),
    Flag(bool),
    Name(String),
}

/// Last requested value per `(logical channel, setting)`.
#[derive(Debug, Default)]
struct SetterCache {
    entries: HashMap<(usize, String), Requested>,
}

impl SetterCache {
    fn is_current(&self, chan: usize, setting: &str, requested: &Requested) -> bool {
        self.entries
            .get(&(chan, setting.to_string()))
            .is_some_and(|last| last == requested)
    }

    fn remember(&mut self, chan: usize, setting: &str, requested: Requested) {
        self.entries.insert((chan, setting.to_string()), requested);
    }

    fn forget_channel(&mut self, chan: usize) {
        self.entries.retain(|(c, _), _| *c != chan);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An open set of boards presented as logical channels.
#[derive(Debug)]
pub struct Session {
    direction: Direction,
    boards: Vec<BoardBackend>,
    channel_map: Vec<(usize, usize)>,
    cache: Mutex<SetterCache>,
    pub(crate) sync: Mutex<Option<SyncReport>>,
}

impl Session {
    /// Parse `args`, validate the topology and open every board.
    ///
    /// `nchan` is the total channel count. When `None`, a leading segment of
    /// the form `nchan=N` supplies it, and failing that the sum of the
    /// per-board declarations. An empty argument string opens the first
    /// device the registry discovers.
    pub fn open(
        args: &str,
        nchan: Option<usize>,
        direction: Direction,
        registry: &BackendRegistry,
    ) -> SdrResult<Self> {
        let mut boards = DeviceArgs::parse(args)?;
        let leading = take_leading_nchan(&mut boards)?;
        let nchan = match (nchan, leading) {
            (Some(explicit), Some(leading)) if explicit != leading => {
                tracing::warn!(explicit, leading, "ignoring leading nchan= segment");
                Some(explicit)
            }
            (explicit, leading) => explicit.or(leading),
        };

        if boards.is_empty() {
            let first = registry
                .find_devices(&DeviceArgs::new())
                .into_iter()
                .next()
                .ok_or(SdrError::NoDevicesFound)?;
            tracing::info!(args = %first, "no device arguments given, using first device found");
            boards.push(first);
        }

        let counts = boards
            .iter()
            .map(|b| b.get_parsed::<usize>("nchan").map(|n| n.unwrap_or(1)))
            .collect::<SdrResult<Vec<usize>>>()?;
        let declared: usize = counts.iter().sum();
        let nchan = nchan.unwrap_or(declared);

        if nchan < boards.len() {
            return Err(SdrError::InvalidTopology(format!(
                "{} channel(s) cannot be spread over {} boards",
                nchan,
                boards.len()
            )));
        }
        if declared != nchan {
            return Err(SdrError::ChannelCountMismatch {
                declared: nchan,
                actual: declared,
            });
        }
        for (index, (board, &count)) in boards.iter().zip(&counts).enumerate() {
            let factory = registry.factory_for(board)?;
            let capacity = factory.max_channels(board);
            if count == 0 || count > capacity {
                return Err(SdrError::InvalidTopology(format!(
                    "board {} ({}) declares {} channel(s), backend provides 1..={}",
                    index,
                    factory.tag(),
                    count,
                    capacity
                )));
            }
        }

        // Boards opened so far are released on early return.
        let mut opened = Vec::with_capacity(boards.len());
        for board in &boards {
            opened.push(registry.open_board(board, direction)?);
        }

        let channel_map = counts
            .iter()
            .enumerate()
            .flat_map(|(board, &count)| (0..count).map(move |local| (board, local)))
            .collect::<Vec<_>>();

        tracing::info!(
            args = %format_boards(&boards),
            boards = opened.len(),
            nchan,
            %direction,
            "session opened"
        );

        Ok(Self {
            direction,
            boards: opened,
            channel_map,
            cache: Mutex::new(SetterCache::default()),
            sync: Mutex::new(None),
        })
    }

    // ---------------------------------------------------------------------
    // Topology
    // ---------------------------------------------------------------------

    /// Stream direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Total logical channels.
    pub fn nchan(&self) -> usize {
        self.channel_map.len()
    }

    /// Number of boards.
    pub fn num_boards(&self) -> usize {
        self.boards.len()
    }

    /// `(board, local)` of every logical channel, in logical order.
    pub fn channel_map(&self) -> &[(usize, usize)] {
        &self.channel_map
    }

    /// Map a logical channel to `(board, local)`.
    pub fn route(&self, chan: usize) -> SdrResult<(usize, usize)> {
        self.channel_map
            .get(chan)
            .copied()
            .ok_or(SdrError::ChannelOutOfRange {
                channel: chan,
                nchan: self.nchan(),
            })
    }

    /// Backend of one board.
    pub fn backend(&self, board: usize) -> SdrResult<&BoardBackend> {
        self.boards.get(board).ok_or(SdrError::BoardOutOfRange {
            board,
            boards: self.boards.len(),
        })
    }

    /// Backends in board order.
    pub fn backends(&self) -> &[BoardBackend] {
        &self.boards
    }

    /// Arguments of every board, in board order.
    pub fn board_args(&self) -> Vec<DeviceArgs> {
        self.boards.iter().map(|b| b.args().clone()).collect()
    }

    /// Whether [`start`](Self::start) has completed.
    pub fn is_started(&self) -> bool {
        self.sync.lock().is_some()
    }

    /// Report of the completed start, if any.
    pub fn sync_report(&self) -> Option<SyncReport> {
        self.sync.lock().clone()
    }

    fn channel(&self, chan: usize) -> SdrResult<(&BoardBackend, usize)> {
        let (board, local) = self.route(chan)?;
        Ok((&self.boards[board], local))
    }

    /// Skip the write when `requested` repeats the last request for this
    /// channel and setting; report the read-back value instead.
    fn cached<T>(
        &self,
        chan: usize,
        setting: &str,
        requested: Requested,
        write: impl FnOnce() -> SdrResult<T>,
        read: impl FnOnce() -> SdrResult<T>,
    ) -> SdrResult<T> {
        if self.cache.lock().is_current(chan, setting, &requested) {
            tracing::trace!(chan, setting, "unchanged request, skipping write");
            return read();
        }
        let applied = write()?;
        self.cache.lock().remember(chan, setting, requested);
        Ok(applied)
    }

    // ---------------------------------------------------------------------
    // Sample rate
    // ---------------------------------------------------------------------

    /// Sample rates of the first board.
    pub fn get_sample_rates(&self) -> MetaRange {
        self.boards
            .first()
            .map(|b| b.get_sample_rates())
            .unwrap_or_default()
    }

    /// Set the same sample rate on every board; returns the rate applied by
    /// the first board.
    ///
    /// After [`start`](Self::start) this still reaches every board, but
    /// frequency and gain may need to be issued again.
    pub fn set_sample_rate(&self, rate: f64) -> SdrResult<f64> {
        if self.is_started() {
            tracing::warn!(
                rate,
                "sample rate changed after start; re-issue frequency and gain settings"
            );
        }
        self.apply_sample_rate(rate)
    }

    pub(crate) fn apply_sample_rate(&self, rate: f64) -> SdrResult<f64> {
        // Tuning ranges and automatic filters may move on any board that
        // accepts the rate, even if a later board fails.
        self.cache.lock().clear();
        let mut first = None;
        for (index, board) in self.boards.iter().enumerate() {
            let applied = board.set_sample_rate(rate)?;
            match first {
                None => first = Some(applied),
                Some(rate0) if rate0 != applied => {
                    tracing::warn!(board = index, applied, first = rate0, "boards disagree on sample rate");
                }
                Some(_) => {}
            }
        }
        Ok(first.unwrap_or(rate))
    }

    /// Sample rate of the first board.
    pub fn get_sample_rate(&self) -> SdrResult<f64> {
        self.backend(0)?.get_sample_rate()
    }

    // ---------------------------------------------------------------------
    // Tuning
    // ---------------------------------------------------------------------

    /// Tunable range of a logical channel.
    pub fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange> {
        let (board, local) = self.channel(chan)?;
        board.get_freq_range(local)
    }

    /// Tune a logical channel; returns the actual frequency.
    pub fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            "center_freq",
            Requested::Number(freq),
            || board.set_center_freq(freq, local),
            || board.get_center_freq(local),
        )
    }

    /// Center frequency of a logical channel.
    pub fn get_center_freq(&self, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        board.get_center_freq(local)
    }

    /// Apply a frequency correction in ppm.
    pub fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            "freq_corr",
            Requested::Number(ppm),
            || board.set_freq_corr(ppm, local),
            || board.get_freq_corr(local),
        )
    }

    /// Frequency correction of a logical channel.
    pub fn get_freq_corr(&self, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        board.get_freq_corr(local)
    }

    // ---------------------------------------------------------------------
    // Gain
    // ---------------------------------------------------------------------

    /// Adjustable gain stages of a logical channel.
    pub fn get_gain_names(&self, chan: usize) -> SdrResult<Vec<String>> {
        let (board, local) = self.channel(chan)?;
        board.get_gain_names(local)
    }

    /// Range of one stage.
    pub fn get_gain_range(&self, name: &str, chan: usize) -> SdrResult<GainRange> {
        let (board, local) = self.channel(chan)?;
        board.get_gain_range(name, local)
    }

    /// Adjustable stages with their ranges, in declaration order.
    pub fn gain_stages(&self, chan: usize) -> SdrResult<Vec<GainStage>> {
        self.get_gain_names(chan)?
            .into_iter()
            .map(|name| -> SdrResult<GainStage> {
                let range = self.get_gain_range(&name, chan)?;
                Ok(GainStage::new(name, range))
            })
            .collect()
    }

    /// Set one stage; returns the applied gain.
    pub fn set_gain(&self, gain: f64, name: &str, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            &format!("gain:{}", name),
            Requested::Number(gain),
            || board.set_gain(gain, name, local),
            || board.get_gain(name, local),
        )
    }

    /// Gain of one stage.
    pub fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        board.get_gain(name, local)
    }

    /// Enable or disable AGC.
    pub fn set_gain_mode(&self, automatic: bool, chan: usize) -> SdrResult<bool> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            "gain_mode",
            Requested::Flag(automatic),
            || board.set_gain_mode(automatic, local),
            || board.get_gain_mode(local),
        )
    }

    /// Whether AGC is on.
    pub fn get_gain_mode(&self, chan: usize) -> SdrResult<bool> {
        let (board, local) = self.channel(chan)?;
        board.get_gain_mode(local)
    }

    /// Sum of the stage ranges.
    pub fn get_overall_gain_range(&self, chan: usize) -> SdrResult<GainRange> {
        let (board, local) = self.channel(chan)?;
        board.get_overall_gain_range(local)
    }

    /// Distribute `gain` over the stages in declaration order.
    pub fn set_overall_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        let applied = board.set_overall_gain(gain, local)?;
        // Every stage may have moved.
        self.cache.lock().forget_channel(chan);
        Ok(applied)
    }

    /// Sum of the stage gains.
    pub fn get_overall_gain(&self, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        board.get_overall_gain(local)
    }

    /// Set the `IF` stage.
    pub fn set_if_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        let applied = board.set_if_gain(gain, local)?;
        self.cache.lock().remember(chan, "gain:IF", Requested::Number(gain));
        Ok(applied)
    }

    /// Set the `BB` stage.
    pub fn set_bb_gain(&self, gain: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        let applied = board.set_bb_gain(gain, local)?;
        self.cache.lock().remember(chan, "gain:BB", Requested::Number(gain));
        Ok(applied)
    }

    // ---------------------------------------------------------------------
    // Antenna & bandwidth
    // ---------------------------------------------------------------------

    /// Selectable antennas.
    pub fn get_antennas(&self, chan: usize) -> SdrResult<Vec<String>> {
        let (board, local) = self.channel(chan)?;
        board.get_antennas(local)
    }

    /// Select an antenna.
    pub fn set_antenna(&self, name: &str, chan: usize) -> SdrResult<String> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            "antenna",
            Requested::Name(name.to_string()),
            || board.set_antenna(name, local),
            || Ok(board.get_antenna(local)?.unwrap_or_default()),
        )
    }

    /// Selected antenna.
    pub fn get_antenna(&self, chan: usize) -> SdrResult<Option<String>> {
        let (board, local) = self.channel(chan)?;
        board.get_antenna(local)
    }

    /// Supported analog bandwidths.
    pub fn get_bandwidth_range(&self, chan: usize) -> SdrResult<FreqRange> {
        let (board, local) = self.channel(chan)?;
        board.get_bandwidth_range(local)
    }

    /// Set the analog bandwidth; 0 selects automatically.
    pub fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        self.cached(
            chan,
            "bandwidth",
            Requested::Number(bandwidth),
            || board.set_bandwidth(bandwidth, local),
            || board.get_bandwidth(local),
        )
    }

    /// Analog bandwidth.
    pub fn get_bandwidth(&self, chan: usize) -> SdrResult<f64> {
        let (board, local) = self.channel(chan)?;
        board.get_bandwidth(local)
    }

    // ---------------------------------------------------------------------
    // Clock & time, per board
    // ---------------------------------------------------------------------

    /// Clock sources of one board.
    pub fn get_clock_sources(&self, board: usize) -> SdrResult<Vec<ClockSource>> {
        self.backend(board)?.get_clock_sources(0)
    }

    /// Select the reference clock of one board.
    pub fn set_clock_source(&self, source: ClockSource, board: usize) -> SdrResult<ClockSource> {
        self.backend(board)?.set_clock_source(source, 0)
    }

    /// Reference clock of one board.
    pub fn get_clock_source(&self, board: usize) -> SdrResult<ClockSource> {
        self.backend(board)?.get_clock_source(0)
    }

    /// Time sources of one board.
    pub fn get_time_sources(&self, board: usize) -> SdrResult<Vec<TimeSource>> {
        self.backend(board)?.get_time_sources(0)
    }

    /// Select the PPS source of one board.
    pub fn set_time_source(&self, source: TimeSource, board: usize) -> SdrResult<TimeSource> {
        self.backend(board)?.set_time_source(source, 0)
    }

    /// PPS source of one board.
    pub fn get_time_source(&self, board: usize) -> SdrResult<TimeSource> {
        self.backend(board)?.get_time_source(0)
    }

    /// Device time of one board.
    pub fn get_time_now(&self, board: usize) -> SdrResult<TimeSpec> {
        self.backend(board)?.get_time_now(0)
    }

    /// Device time at the last PPS edge of one board.
    pub fn get_time_last_pps(&self, board: usize) -> SdrResult<TimeSpec> {
        self.backend(board)?.get_time_last_pps(0)
    }

    /// Set device time immediately on one board.
    pub fn set_time_now(&self, time: TimeSpec, board: usize) -> SdrResult<()> {
        self.backend(board)?.set_time_now(time, 0)
    }

    /// Set device time at the next PPS edge on one board.
    pub fn set_time_next_pps(&self, time: TimeSpec, board: usize) -> SdrResult<()> {
        self.backend(board)?.set_time_next_pps(time)
    }

    /// Set device time at an unknown PPS edge on one board.
    pub fn set_time_unknown_pps(&self, time: TimeSpec, board: usize) -> SdrResult<()> {
        self.backend(board)?.set_time_unknown_pps(time)
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    /// Current settings of one logical channel.
    pub fn channel_spec(&self, chan: usize) -> SdrResult<ChannelSpec> {
        let (board_index, local) = self.route(chan)?;
        let board = &self.boards[board_index];
        let gains = self
            .gain_stages(chan)?
            .into_iter()
            .map(|stage| -> SdrResult<GainSetting> {
                let current = board.get_gain(&stage.name, local)?;
                Ok(GainSetting { stage, current })
            })
            .collect::<SdrResult<Vec<_>>>()?;
        Ok(ChannelSpec {
            board: board_index,
            local,
            center_freq: board.get_center_freq(local)?,
            freq_corr: board.get_freq_corr(local)?,
            gain_mode: GainMode::from_automatic(board.get_gain_mode(local)?),
            gains,
            antenna: board.get_antenna(local)?,
            bandwidth: board.get_bandwidth(local)?,
        })
    }

    /// Current clock and time source of one board.
    pub fn board_spec(&self, board: usize) -> SdrResult<BoardSpec> {
        let backend = self.backend(board)?;
        Ok(BoardSpec {
            clock_source: backend.get_clock_source(0)?,
            time_source: backend.get_time_source(0)?,
        })
    }

    /// Release every board. Further operations fail.
    pub fn release(&self) -> SdrResult<()> {
        for board in &self.boards {
            board.release()?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for (index, board) in self.boards.iter().enumerate() {
            if let Err(e) = board.release() {
                tracing::warn!(board = index, error = %e, "failed to release board");
            }
        }
    }
}

/// Remove a leading `nchan=N`-only segment and return `N`.
fn take_leading_nchan(boards: &mut Vec<DeviceArgs>) -> SdrResult<Option<usize>> {
    let is_leading = boards
        .first()
        .is_some_and(|b| b.len() == 1 && b.contains_key("nchan"));
    if !is_leading {
        return Ok(None);
    }
    let segment = boards.remove(0);
    segment.get_parsed::<usize>("nchan")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BackendRegistry {
        BackendRegistry::simulated().unwrap()
    }

    #[test]
    fn leading_nchan_segment_supplies_total() {
        let session =
            Session::open("nchan=2 rtl=0 rtl=1", None, Direction::Source, &registry()).unwrap();
        assert_eq!(session.nchan(), 2);
        assert_eq!(session.num_boards(), 2);
    }

    #[test]
    fn empty_args_open_first_device() {
        let session = Session::open("", None, Direction::Source, &registry()).unwrap();
        assert_eq!(session.nchan(), 1);
        assert_eq!(session.backend(0).unwrap().tag(), "rtl");
    }

    #[test]
    fn empty_registry_finds_nothing() {
        let err = Session::open("", None, Direction::Source, &BackendRegistry::new()).unwrap_err();
        assert!(matches!(err, SdrError::NoDevicesFound));
    }

    #[test]
    fn per_board_capacity_is_checked() {
        let err = Session::open("rtl=0,nchan=2", Some(2), Direction::Source, &registry())
            .unwrap_err();
        assert!(matches!(err, SdrError::InvalidTopology(_)));
    }

    #[test]
    fn unknown_backend_is_reported() {
        let err = Session::open("airspy=0", None, Direction::Source, &registry()).unwrap_err();
        assert!(matches!(err, SdrError::UnsupportedBackend(_)));
    }

    #[test]
    fn failed_open_releases_earlier_boards() {
        let registry = registry();
        // The second segment asks for the same dongle again.
        let err = Session::open("rtl=0 rtl=0", None, Direction::Source, &registry).unwrap_err();
        assert!(matches!(err, SdrError::BackendCommunication(_)));
        assert!(Session::open("rtl=0", None, Direction::Source, &registry).is_ok());
    }

    #[test]
    fn setter_cache_skips_repeated_requests() {
        let session = Session::open("hackrf", None, Direction::Source, &registry()).unwrap();
        assert_eq!(session.set_gain(21.0, "IF", 0).unwrap(), 24.0);
        // Moved behind the session's back.
        session.backend(0).unwrap().set_gain(8.0, "IF", 0).unwrap();
        assert_eq!(session.set_gain(21.0, "IF", 0).unwrap(), 8.0);
        assert_eq!(session.set_gain(30.0, "IF", 0).unwrap(), 32.0);
    }

    #[test]
    fn sample_rate_change_clears_cache() {
        let session = Session::open("hackrf", None, Direction::Source, &registry()).unwrap();
        session.set_center_freq(1e6, 0).unwrap();
        session.set_sample_rate(20e6).unwrap();
        assert_eq!(session.set_center_freq(1e6, 0).unwrap(), 10e6);
    }

    #[test]
    fn channel_spec_reflects_backend() {
        let session = Session::open("rtl=1", None, Direction::Source, &registry()).unwrap();
        session.set_center_freq(433.92e6, 0).unwrap();
        session.set_gain(20.0, "IF", 0).unwrap();
        let spec = session.channel_spec(0).unwrap();
        assert_eq!(spec.board, 0);
        assert_eq!(spec.center_freq, 433.92e6);
        assert_eq!(spec.gains.len(), 2);
        assert_eq!(spec.gains[1].current, 20.0);
        assert_eq!(spec.antenna.as_deref(), Some("RX"));
        assert!(session.channel_spec(1).is_err());
        assert_eq!(
            session.board_spec(0).unwrap().clock_source,
            ClockSource::Internal
        );
    }

    #[test]
    fn release_and_drop_free_devices() {
        let registry = registry();
        let session = Session::open("rtl=0", None, Direction::Source, &registry).unwrap();
        session.release().unwrap();
        assert!(session.get_center_freq(0).is_err());
        drop(session);
        let again = Session::open("rtl=0", None, Direction::Source, &registry).unwrap();
        drop(again);
        assert!(Session::open("rtl=0", None, Direction::Source, &registry).is_ok());
    }
}
