//! Session start: clock, time and initial settings.
//!
//! [`Session::start`] runs once, before streaming, in a fixed order:
//!
//! 1. per board, the clock source override and then the time source override;
//! 2. the sync policy across all boards (`unknown_pps` arms time zero on the
//!    next PPS of every board, `pc_clock` samples the host clock once and
//!    writes that one stamp to every board);
//! 3. the aggregate sample rate;
//! 4. the per-channel initial settings.
//!
//! Boards whose backend has no time registers are skipped in step 2 and
//! listed in [`SyncReport::skipped`].

use crate::capabilities::RadioBackend;
use crate::session::Session;
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::time_spec::TimeSpec;
use sdr_core::types::{BoardSpec, ClockSource, GainMode, SyncPolicy, TimeSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clock and time overrides for one board. `default` leaves the board alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Reference clock.
    pub clock_source: ClockSource,
    /// PPS source.
    pub time_source: TimeSource,
}

/// Initial settings of one logical channel. Unset fields are not written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Center frequency in Hz.
    pub center_freq: Option<f64>,
    /// Frequency correction in ppm.
    pub freq_corr: Option<f64>,
    /// Manual or automatic gain.
    pub gain_mode: Option<GainMode>,
    /// Overall gain, distributed over the stages before `gains` apply.
    pub gain: Option<f64>,
    /// Per-stage gains in dB.
    pub gains: BTreeMap<String, f64>,
    /// Antenna name.
    pub antenna: Option<String>,
    /// Analog bandwidth in Hz, 0 for automatic.
    pub bandwidth: Option<f64>,
}

/// Everything applied by [`Session::start`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartSettings {
    /// Time alignment policy.
    pub sync: SyncPolicy,
    /// Sample rate requested from every board.
    pub sample_rate: Option<f64>,
    /// Overrides per board, in board order.
    pub boards: Vec<BoardSettings>,
    /// Settings per logical channel, in channel order.
    pub channels: Vec<ChannelSettings>,
}

/// Outcome of [`Session::start`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Policy that was applied.
    pub policy: SyncPolicy,
    /// The single host time stamp written to every board under `pc_clock`.
    pub stamp: Option<TimeSpec>,
    /// Clock and time source of every board after step 1.
    pub boards: Vec<BoardSpec>,
    /// Boards without time registers, skipped by the policy.
    pub skipped: Vec<usize>,
    /// Sample rate applied by the first board.
    pub sample_rate: Option<f64>,
}

impl Session {
    /// Synchronize the boards and apply the initial settings. Runs once;
    /// a second call fails with [`SdrError::AlreadyStarted`].
    pub fn start(&self, settings: &StartSettings) -> SdrResult<SyncReport> {
        let mut started = self.sync.lock();
        if started.is_some() {
            return Err(SdrError::AlreadyStarted);
        }
        if settings.boards.len() > self.num_boards() {
            return Err(SdrError::BoardOutOfRange {
                board: settings.boards.len() - 1,
                boards: self.num_boards(),
            });
        }
        if settings.channels.len() > self.nchan() {
            return Err(SdrError::ChannelOutOfRange {
                channel: settings.channels.len() - 1,
                nchan: self.nchan(),
            });
        }

        let _span = tracing::info_span!("session_start", policy = %settings.sync).entered();

        // 1. Clock, then time source, board by board.
        let mut boards = Vec::with_capacity(self.num_boards());
        for (index, backend) in self.backends().iter().enumerate() {
            let overrides = settings.boards.get(index).copied().unwrap_or_default();
            if overrides.clock_source != ClockSource::Default {
                let applied = backend.set_clock_source(overrides.clock_source, 0)?;
                tracing::info!(board = index, clock_source = %applied, "clock source");
            }
            if overrides.time_source != TimeSource::Default {
                let applied = backend.set_time_source(overrides.time_source, 0)?;
                tracing::info!(board = index, time_source = %applied, "time source");
            }
            boards.push(BoardSpec {
                clock_source: backend.get_clock_source(0)?,
                time_source: backend.get_time_source(0)?,
            });
        }

        // 2. Time alignment across all boards.
        let mut skipped = Vec::new();
        let stamp = match settings.sync {
            SyncPolicy::None => None,
            SyncPolicy::UnknownPps => {
                for (index, backend) in self.backends().iter().enumerate() {
                    skip_unsupported(
                        index,
                        backend.set_time_unknown_pps(TimeSpec::ZERO),
                        &mut skipped,
                    )?;
                }
                None
            }
            SyncPolicy::PcClock => {
                let stamp = TimeSpec::now();
                for (index, backend) in self.backends().iter().enumerate() {
                    skip_unsupported(index, backend.set_time_now(stamp, 0), &mut skipped)?;
                }
                tracing::info!(%stamp, boards = self.num_boards(), "device time set from host clock");
                Some(stamp)
            }
        };

        // 3. One rate for the whole aggregate.
        let sample_rate = match settings.sample_rate {
            Some(rate) => Some(self.apply_sample_rate(rate)?),
            None => None,
        };

        // 4. Per-channel settings.
        for (chan, channel) in settings.channels.iter().enumerate() {
            self.apply_channel(chan, channel)?;
        }

        let report = SyncReport {
            policy: settings.sync,
            stamp,
            boards,
            skipped,
            sample_rate,
        };
        tracing::info!(
            boards = self.num_boards(),
            nchan = self.nchan(),
            sample_rate = ?report.sample_rate,
            "session started"
        );
        *started = Some(report.clone());
        Ok(report)
    }

    fn apply_channel(&self, chan: usize, settings: &ChannelSettings) -> SdrResult<()> {
        if let Some(freq) = settings.center_freq {
            self.set_center_freq(freq, chan)?;
        }
        if let Some(ppm) = settings.freq_corr {
            self.set_freq_corr(ppm, chan)?;
        }
        if let Some(mode) = settings.gain_mode {
            self.set_gain_mode(mode.is_automatic(), chan)?;
        }
        if let Some(gain) = settings.gain {
            self.set_overall_gain(gain, chan)?;
        }
        for (stage, gain) in &settings.gains {
            self.set_gain(*gain, stage, chan)?;
        }
        if let Some(antenna) = &settings.antenna {
            self.set_antenna(antenna, chan)?;
        }
        if let Some(bandwidth) = settings.bandwidth {
            self.set_bandwidth(bandwidth, chan)?;
        }
        Ok(())
    }
}

fn skip_unsupported(index: usize, result: SdrResult<()>, skipped: &mut Vec<usize>) -> SdrResult<()> {
    match result {
        Err(SdrError::NotSupported { backend, operation }) => {
            tracing::warn!(board = index, %backend, %operation, "board has no time registers, not synchronized");
            skipped.push(index);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::uhd::TimeCommand;
    use crate::registry::{BackendRegistry, BoardBackend};
    use sdr_core::types::Direction;
    use tracing_test::traced_test;

    fn open(args: &str) -> Session {
        Session::open(args, None, Direction::Source, &BackendRegistry::simulated().unwrap()).unwrap()
    }

    fn usrp(session: &Session, board: usize) -> &crate::drivers::uhd::Usrp {
        match session.backend(board).unwrap() {
            BoardBackend::Uhd(usrp) => usrp,
            other => panic!("expected a USRP, got {:?}", other),
        }
    }

    #[test]
    fn starting_twice_fails() {
        let session = open("rtl=0");
        session.start(&StartSettings::default()).unwrap();
        assert!(session.is_started());
        assert!(matches!(
            session.start(&StartSettings::default()),
            Err(SdrError::AlreadyStarted)
        ));
    }

    #[test]
    fn overrides_apply_per_board() {
        let session = open("uhd,serial=30A1F9B uhd,serial=F4A5C1");
        let settings = StartSettings {
            boards: vec![
                BoardSettings::default(),
                BoardSettings {
                    clock_source: ClockSource::Mimo,
                    time_source: TimeSource::Mimo,
                },
            ],
            ..Default::default()
        };
        let report = session.start(&settings).unwrap();
        assert_eq!(report.boards[0].clock_source, ClockSource::Internal);
        assert_eq!(report.boards[0].time_source, TimeSource::Default);
        assert_eq!(report.boards[1].clock_source, ClockSource::Mimo);
        assert_eq!(report.boards[1].time_source, TimeSource::Mimo);
    }

    #[test]
    fn unsupported_override_aborts_start() {
        let session = open("rtl=0");
        let settings = StartSettings {
            boards: vec![BoardSettings {
                clock_source: ClockSource::Gpsdo,
                time_source: TimeSource::Default,
            }],
            ..Default::default()
        };
        assert!(matches!(
            session.start(&settings),
            Err(SdrError::ParameterOutOfRange { .. })
        ));
        assert!(!session.is_started());
    }

    #[test]
    fn unknown_pps_arms_every_board() {
        let session = open("uhd,serial=30A1F9B uhd,serial=30A1FA0 rtl=0");
        let report = session
            .start(&StartSettings {
                sync: SyncPolicy::UnknownPps,
                ..Default::default()
            })
            .unwrap();
        for board in 0..2 {
            assert_eq!(
                usrp(&session, board).last_time_command(),
                Some((TimeCommand::UnknownPps, TimeSpec::ZERO))
            );
        }
        assert_eq!(report.skipped, vec![2]);
        assert!(report.stamp.is_none());
    }

    #[test]
    fn initial_channel_settings_follow_sample_rate() {
        let session = open("hackrf");
        let mut gains = BTreeMap::new();
        gains.insert("IF".to_string(), 16.0);
        let report = session
            .start(&StartSettings {
                sample_rate: Some(20e6),
                channels: vec![ChannelSettings {
                    center_freq: Some(1e6),
                    gains,
                    bandwidth: Some(0.0),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.sample_rate, Some(20e6));
        // Range is computed at the new rate.
        assert_eq!(session.get_center_freq(0).unwrap(), 10e6);
        assert_eq!(session.get_gain("IF", 0).unwrap(), 16.0);
        assert_eq!(session.get_bandwidth(0).unwrap(), 15e6);
    }

    #[test]
    fn too_many_channel_settings_are_rejected() {
        let session = open("rtl=0");
        let settings = StartSettings {
            channels: vec![ChannelSettings::default(), ChannelSettings::default()],
            ..Default::default()
        };
        assert!(matches!(
            session.start(&settings),
            Err(SdrError::ChannelOutOfRange { channel: 1, nchan: 1 })
        ));
    }

    #[test]
    #[traced_test]
    fn rate_change_after_start_warns() {
        let session = open("rtl=0");
        session.start(&StartSettings::default()).unwrap();
        assert_eq!(session.set_sample_rate(2.4e6).unwrap(), 2.4e6);
        assert!(logs_contain("sample rate changed after start"));
    }
}
