//! Core types for the SDR capability registry.
//!
//! Everything here is backend-agnostic:
//!
//! - [`args`]: device argument string parser and the per-board [`DeviceArgs`] map
//! - [`error`]: the [`SdrError`] taxonomy and backend [`DriverError`]s
//! - [`ranges`]: gain/frequency/rate ranges with clipping
//! - [`time_spec`]: device time stamps
//! - [`types`]: direction, clock/time sources, sync policy and snapshots
//! - [`observable`]: watch-channel backed values for presentation layers

pub mod args;
pub mod error;
pub mod observable;
pub mod ranges;
pub mod time_spec;
pub mod types;

pub use args::DeviceArgs;
pub use error::{DriverError, DriverErrorKind, SdrError, SdrResult};
pub use observable::{Observable, ObservableMetadata, ObserverHandle};
pub use ranges::{FreqRange, GainRange, MetaRange, Range};
pub use time_spec::TimeSpec;
pub use types::{
    BoardSpec, ChannelSpec, ClockSource, Direction, GainMode, GainSetting, GainStage, SyncPolicy,
    TimeSource,
};
