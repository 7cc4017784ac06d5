//! Backend registry, simulated SDR backends, the multi-board [`Session`]
//! and the [`GainPanel`] presentation adapter.
//!
//! # Example
//!
//! ```rust,ignore
//! use sdr_hardware::{BackendRegistry, Session};
//! use sdr_core::Direction;
//!
//! let registry = BackendRegistry::simulated()?;
//! let session = Session::open("rtl=0 rtl=1", Some(2), Direction::Source, &registry)?;
//! session.set_center_freq(100e6, 0)?;
//! ```

// The trait must be declared before the enum that dispatches it.
pub mod capabilities;
pub mod config;
pub mod drivers;
pub mod gain_panel;
pub mod registry;
pub mod session;
pub mod sync;

pub use capabilities::RadioBackend;
pub use config::SessionConfig;
pub use drivers::common::{DeviceClaims, FaultConfig, FaultScenario};
pub use drivers::inventory::SimulatedInventory;
pub use gain_panel::{GainControl, GainPanel};
pub use registry::{register_all_backends, BackendFactory, BackendRegistry, BoardBackend};
pub use session::Session;
pub use sync::{BoardSettings, ChannelSettings, StartSettings, SyncReport};
