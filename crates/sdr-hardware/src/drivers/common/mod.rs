//! Building blocks shared by the simulated backends.

pub mod claims;
pub mod faults;
pub mod registers;
pub mod rng;

pub use claims::{ClaimGuard, DeviceClaims, DeviceHandle};
pub use faults::{FaultConfig, FaultScenario};
pub use registers::ChannelRegisters;
pub use rng::SimRng;
