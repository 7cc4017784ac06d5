//! Complex-sampled (IQ) file pseudo-device.
//!
//! Stands in for a radio when replaying or recording captures. The sample
//! rate and center frequency are fixed by the `rate=` and `freq=` arguments
//! and every setter reports them back unchanged. There are no gain stages,
//! antennas or reference clocks.

use crate::capabilities::RadioBackend;
use crate::drivers::common::registers::{
    check_channel, check_mboard, require_finite, select_antenna, select_source, stage_range,
};
use crate::drivers::common::DeviceHandle;
use crate::registry::{BackendFactory, BoardBackend};
use sdr_core::args::DeviceArgs;
use sdr_core::error::{DriverError, DriverErrorKind, SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange, Range};
use sdr_core::types::{ClockSource, Direction, TimeSource};
use std::fs::File;
use std::path::{Path, PathBuf};

const TAG: &str = "file";

/// Bytes per complex float32 sample.
const SAMPLE_SIZE: u64 = 8;

/// Factory for [`FileBackend`] devices.
#[derive(Debug, Default)]
pub struct FileFactory;

impl FileFactory {
    /// New factory.
    pub fn new() -> Self {
        Self
    }
}

impl BackendFactory for FileFactory {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn name(&self) -> &'static str {
        "Complex Sampled (IQ) File"
    }

    fn directions(&self) -> &'static [Direction] {
        &[Direction::Source, Direction::Sink]
    }

    fn software_only(&self) -> bool {
        true
    }

    /// Always offers one placeholder device so that user interfaces list it.
    fn discover(&self, _hint: &DeviceArgs) -> Vec<DeviceArgs> {
        vec![DeviceArgs::new()
            .with(TAG, "/path/to/your/file")
            .with("rate", "1e6")
            .with("freq", "100e6")
            .with("repeat", "true")
            .with("throttle", "true")
            .with("label", "Complex Sampled (IQ) File")]
    }

    fn validate(&self, args: &DeviceArgs) -> SdrResult<()> {
        match args.get(TAG) {
            Some(path) if !path.is_empty() => {}
            _ => {
                return Err(SdrError::out_of_range(TAG, "", "a file path"));
            }
        }
        match args.get_parsed::<f64>("rate")? {
            Some(rate) if rate > 0.0 && rate.is_finite() => {}
            Some(rate) => return Err(SdrError::out_of_range("rate", rate, "a positive rate")),
            None => return Err(SdrError::out_of_range("rate", "<missing>", "a positive rate")),
        }
        if let Some(freq) = args.get_parsed::<f64>("freq")? {
            if freq < 0.0 || !freq.is_finite() {
                return Err(SdrError::out_of_range("freq", freq, "a non-negative frequency"));
            }
        }
        Ok(())
    }

    fn build(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend> {
        self.validate(args)?;
        let path = PathBuf::from(args.get(TAG).unwrap_or_default());
        let rate = args.get_parsed::<f64>("rate")?.unwrap_or_default();
        let freq = args.get_parsed::<f64>("freq")?.unwrap_or(0.0);
        let samples = match direction {
            Direction::Source => {
                let meta = std::fs::metadata(&path).map_err(|e| {
                    DriverError::new(
                        TAG,
                        DriverErrorKind::Initialization,
                        format!("cannot open {}: {}", path.display(), e),
                    )
                })?;
                Some(meta.len() / SAMPLE_SIZE)
            }
            Direction::Sink => {
                File::create(&path)?;
                None
            }
        };
        let backend = FileBackend {
            args: args.clone(),
            direction,
            path,
            rate,
            freq,
            repeat: args.get_bool("repeat").unwrap_or(false),
            throttle: args.get_bool("throttle").unwrap_or(false),
            samples,
            handle: DeviceHandle::new(TAG, None),
        };
        tracing::info!(
            path = %backend.path.display(),
            direction = %direction,
            rate,
            freq,
            repeat = backend.repeat,
            throttle = backend.throttle,
            "opened IQ file"
        );
        Ok(BoardBackend::File(backend))
    }
}

/// An IQ file opened for replay or recording.
#[derive(Debug)]
pub struct FileBackend {
    args: DeviceArgs,
    direction: Direction,
    path: PathBuf,
    rate: f64,
    freq: f64,
    repeat: bool,
    throttle: bool,
    samples: Option<u64>,
    handle: DeviceHandle,
}

impl FileBackend {
    /// Capture file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether replay loops at end of file.
    pub fn repeat(&self) -> bool {
        self.repeat
    }

    /// Whether replay is paced at the nominal rate.
    pub fn throttle(&self) -> bool {
        self.throttle
    }

    /// Complex samples in a replayed file.
    pub fn samples(&self) -> Option<u64> {
        self.samples
    }

    fn check(&self, chan: usize) -> SdrResult<()> {
        self.handle.ensure_open()?;
        check_channel(chan, 1)
    }
}

impl RadioBackend for FileBackend {
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
        MetaRange::from(Range::point(self.rate))
    }

    fn set_sample_rate(&self, rate: f64) -> SdrResult<f64> {
        self.check(0)?;
        require_finite("sample_rate", rate)?;
        if rate != self.rate {
            tracing::debug!(requested = rate, fixed = self.rate, "file sample rate is fixed");
        }
        Ok(self.rate)
    }

    fn get_sample_rate(&self) -> SdrResult<f64> {
        self.check(0)?;
        Ok(self.rate)
    }

    fn get_freq_range(&self, chan: usize) -> SdrResult<FreqRange> {
        check_channel(chan, 1)?;
        Ok(MetaRange::from(Range::point(self.freq)))
    }

    fn set_center_freq(&self, freq: f64, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        require_finite("center_freq", freq)?;
        Ok(self.freq)
    }

    fn get_center_freq(&self, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        Ok(self.freq)
    }

    fn set_freq_corr(&self, ppm: f64, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        require_finite("freq_corr", ppm)?;
        Ok(0.0)
    }

    fn get_freq_corr(&self, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        Ok(0.0)
    }

    fn get_gain_names(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, 1)?;
        Ok(Vec::new())
    }

    fn get_gain_range(&self, name: &str, chan: usize) -> SdrResult<GainRange> {
        check_channel(chan, 1)?;
        stage_range(&[], name)
    }

    fn set_gain(&self, _gain: f64, name: &str, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        stage_range(&[], name).map(|r| r.start())
    }

    fn get_gain(&self, name: &str, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        stage_range(&[], name).map(|r| r.start())
    }

    fn get_antennas(&self, chan: usize) -> SdrResult<Vec<String>> {
        check_channel(chan, 1)?;
        Ok(Vec::new())
    }

    fn set_antenna(&self, name: &str, chan: usize) -> SdrResult<String> {
        self.check(chan)?;
        select_antenna(&[], name)
    }

    fn get_antenna(&self, chan: usize) -> SdrResult<Option<String>> {
        self.check(chan)?;
        Ok(None)
    }

    fn set_bandwidth(&self, bandwidth: f64, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        require_finite("bandwidth", bandwidth)?;
        Ok(0.0)
    }

    fn get_bandwidth(&self, chan: usize) -> SdrResult<f64> {
        self.check(chan)?;
        Ok(0.0)
    }

    fn get_clock_sources(&self, mboard: usize) -> SdrResult<Vec<ClockSource>> {
        check_mboard(mboard, 1)?;
        Ok(Vec::new())
    }

    fn set_clock_source(&self, source: ClockSource, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        select_source("clock_source", &[], source)
    }

    fn get_clock_source(&self, mboard: usize) -> SdrResult<ClockSource> {
        check_mboard(mboard, 1)?;
        Ok(ClockSource::Default)
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
            tracing::info!(path = %self.path.display(), "closing IQ file");
        }
        self.handle.release();
        Ok(())
    }
}
