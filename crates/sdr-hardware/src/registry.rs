//! Backend registry.
//!
//! Maps a backend tag to the factory that builds its board objects. The tag
//! of a board is the first key of its argument segment that names a
//! registered backend, so `rtl=0,buffers=32` opens an RTL-SDR and
//! `serial=30A1,uhd` a USRP.
//!
//! ```rust,ignore
//! let mut registry = BackendRegistry::new();
//! register_all_backends(&mut registry, Arc::new(SimulatedInventory::default()), DeviceClaims::new())?;
//!
//! for args in registry.find_devices(&DeviceArgs::new()) {
//!     println!("{}", args);
//! }
//! ```

use crate::capabilities::RadioBackend;
use crate::drivers::common::DeviceClaims;
use crate::drivers::file::{FileBackend, FileFactory};
use crate::drivers::hackrf::{HackRf, HackRfFactory};
use crate::drivers::inventory::SimulatedInventory;
use crate::drivers::rtl::{RtlFactory, RtlSdr};
use crate::drivers::uhd::{Usrp, UsrpFactory};
use enum_dispatch::enum_dispatch;
use sdr_core::args::DeviceArgs;
use sdr_core::error::{SdrError, SdrResult};
use sdr_core::ranges::{FreqRange, GainRange, MetaRange};
use sdr_core::time_spec::TimeSpec;
use sdr_core::types::{ClockSource, Direction, TimeSource};
use std::sync::Arc;

// =============================================================================
// BoardBackend
// =============================================================================

/// A concrete board object of any registered backend.
#[enum_dispatch(RadioBackend)]
#[derive(Debug)]
pub enum BoardBackend {
    /// RTL2832U dongle.
    Rtl(RtlSdr),
    /// HackRF One.
    HackRf(HackRf),
    /// Ettus USRP motherboard.
    Uhd(Usrp),
    /// IQ file.
    File(FileBackend),
}

// =============================================================================
// BackendFactory
// =============================================================================

/// Builds board objects for one backend tag.
///
/// Factories are registered once at startup. They must not hold mutable state
/// across builds except through internal synchronization (device claims).
pub trait BackendFactory: Send + Sync {
    /// Argument key that selects this backend (`rtl`, `uhd`, ...).
    fn tag(&self) -> &'static str;

    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Directions the backend can be opened in.
    fn directions(&self) -> &'static [Direction];

    /// Channels one board can provide for `args`.
    fn max_channels(&self, _args: &DeviceArgs) -> usize {
        1
    }

    /// Whether the backend needs no hardware. Software-only backends are
    /// listed after hardware during discovery and hidden by `nofake`.
    fn software_only(&self) -> bool {
        false
    }

    /// Devices this backend can currently see, as ready-to-use arguments.
    fn discover(&self, hint: &DeviceArgs) -> Vec<DeviceArgs>;

    /// Check arguments before building.
    fn validate(&self, _args: &DeviceArgs) -> SdrResult<()> {
        Ok(())
    }

    /// Open one board.
    fn build(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend>;
}

// =============================================================================
// BackendRegistry
// =============================================================================

/// Registered backend factories in registration order.
#[derive(Default)]
pub struct BackendRegistry {
    factories: Vec<Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every simulated backend over the default inventory.
    pub fn simulated() -> SdrResult<Self> {
        let mut registry = Self::new();
        register_all_backends(
            &mut registry,
            Arc::new(SimulatedInventory::default()),
            DeviceClaims::new(),
        )?;
        Ok(registry)
    }

    /// Add a factory. Tags must be unique.
    pub fn register(&mut self, factory: impl BackendFactory + 'static) -> SdrResult<()> {
        if self.get(factory.tag()).is_some() {
            return Err(SdrError::Configuration(format!(
                "backend '{}' is already registered",
                factory.tag()
            )));
        }
        tracing::debug!(tag = factory.tag(), name = factory.name(), "registered backend");
        self.factories.push(Arc::new(factory));
        Ok(())
    }

    /// Factory registered under `tag`.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories.iter().find(|f| f.tag() == tag).cloned()
    }

    /// Registered tags in registration order.
    pub fn tags(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.tag()).collect()
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no backend is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Factory for one board segment: the first key naming a registered
    /// backend wins.
    pub fn factory_for(&self, args: &DeviceArgs) -> SdrResult<Arc<dyn BackendFactory>> {
        args.keys()
            .find_map(|key| self.get(key))
            .ok_or_else(|| SdrError::UnsupportedBackend(args.to_string()))
    }

    /// Every device visible to the registered backends. Hardware backends
    /// come first, software-only ones last; `nofake` in the hint drops the
    /// software-only ones. A hint naming a backend restricts the search to it.
    pub fn find_devices(&self, hint: &DeviceArgs) -> Vec<DeviceArgs> {
        let nofake = hint.contains_key("nofake");
        let only = hint.keys().find(|k| self.get(k).is_some());
        let hardware = self.factories.iter().filter(|f| !f.software_only());
        let software = self
            .factories
            .iter()
            .filter(|f| f.software_only() && !nofake);

        let devices: Vec<DeviceArgs> = hardware
            .chain(software)
            .filter(|f| only.map_or(true, |tag| tag == f.tag()))
            .flat_map(|f| f.discover(hint))
            .collect();
        tracing::debug!(count = devices.len(), nofake, "device discovery");
        devices
    }

    /// Open one board in `direction`.
    pub fn open_board(&self, args: &DeviceArgs, direction: Direction) -> SdrResult<BoardBackend> {
        let factory = self.factory_for(args)?;
        if !factory.directions().contains(&direction) {
            return Err(SdrError::not_supported(factory.tag(), direction.to_string()));
        }
        factory.validate(args)?;
        let board = factory.build(args, direction)?;
        tracing::info!(backend = factory.tag(), args = %args, %direction, "opened board");
        Ok(board)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.tags())
            .finish()
    }
}

/// Register every built-in backend. Hardware backends share `inventory` and
/// `claims`.
pub fn register_all_backends(
    registry: &mut BackendRegistry,
    inventory: Arc<SimulatedInventory>,
    claims: DeviceClaims,
) -> SdrResult<()> {
    registry.register(RtlFactory::new(inventory.clone(), claims.clone()))?;
    registry.register(HackRfFactory::new(inventory.clone(), claims.clone()))?;
    registry.register(UsrpFactory::new(inventory, claims))?;
    registry.register(FileFactory::new())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> DeviceArgs {
        s.parse().unwrap()
    }

    #[test]
    fn first_registered_key_selects_backend() {
        let registry = BackendRegistry::simulated().unwrap();
        assert_eq!(registry.factory_for(&args("rtl=0,buffers=32")).unwrap().tag(), "rtl");
        assert_eq!(registry.factory_for(&args("serial=30A1F9B,uhd")).unwrap().tag(), "uhd");
        assert!(matches!(
            registry.factory_for(&args("airspy=0")),
            Err(SdrError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn duplicate_tag_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(FileFactory::new()).unwrap();
        assert!(matches!(
            registry.register(FileFactory::new()),
            Err(SdrError::Configuration(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn discovery_lists_hardware_before_software() {
        let registry = BackendRegistry::simulated().unwrap();
        let found = registry.find_devices(&DeviceArgs::new());
        assert_eq!(found.len(), 7);
        assert!(found[0].contains_key("rtl"));
        assert!(found.last().unwrap().contains_key("file"));

        let nofake = registry.find_devices(&args("nofake"));
        assert_eq!(nofake.len(), 6);
        assert!(nofake.iter().all(|d| !d.contains_key("file")));

        let only_uhd = registry.find_devices(&args("uhd"));
        assert_eq!(only_uhd.len(), 3);
    }

    #[test]
    fn open_board_checks_direction() {
        let registry = BackendRegistry::simulated().unwrap();
        assert!(matches!(
            registry.open_board(&args("rtl=0"), Direction::Sink),
            Err(SdrError::NotSupported { .. })
        ));
        let board = registry.open_board(&args("rtl=0"), Direction::Source).unwrap();
        assert_eq!(board.tag(), "rtl");
    }
}
