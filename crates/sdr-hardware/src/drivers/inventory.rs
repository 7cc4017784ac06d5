//! Simulated device inventory.
//!
//! Stands in for the USB/network enumeration a real driver library would do.
//! Factories list and open only the devices present here. The inventory can
//! be loaded from TOML:
//!
//! ```toml
//! [[rtl]]
//! serial = "00000001"
//! tuner = "r820t"
//!
//! [[uhd]]
//! serial = "30A1F9B"
//! product = "b210"
//! ```

use sdr_core::error::{SdrError, SdrResult};
use serde::Deserialize;
use std::path::Path;

/// RTL2832U tuner chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtlTuner {
    /// Rafael Micro R820T/R820T2.
    #[default]
    R820t,
    /// Elonics E4000.
    E4000,
}

/// One RTL-SDR dongle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RtlDongle {
    /// USB serial string.
    pub serial: String,
    /// Tuner chip.
    #[serde(default)]
    pub tuner: RtlTuner,
}

/// One HackRF board.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HackRfBoard {
    /// Full serial number; args use the last six digits.
    pub serial: String,
}

/// USRP product family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsrpProduct {
    /// B210: two channels, AD9361.
    #[default]
    B210,
    /// N210: one channel, MIMO cable capable.
    N210,
    /// X310: two channels, 200 MHz master clock.
    X310,
}

/// One USRP motherboard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsrpBoard {
    /// Motherboard serial.
    pub serial: String,
    /// Product family.
    #[serde(default)]
    pub product: UsrpProduct,
}

/// Devices visible to the simulated backends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulatedInventory {
    /// RTL-SDR dongles, in USB index order.
    #[serde(default)]
    pub rtl: Vec<RtlDongle>,
    /// HackRF boards.
    #[serde(default)]
    pub hackrf: Vec<HackRfBoard>,
    /// USRP motherboards.
    #[serde(default)]
    pub uhd: Vec<UsrpBoard>,
}

impl Default for SimulatedInventory {
    /// A small lab bench: two dongles, one HackRF, two B210s and an N210.
    fn default() -> Self {
        Self {
            rtl: vec![
                RtlDongle {
                    serial: "00000001".into(),
                    tuner: RtlTuner::R820t,
                },
                RtlDongle {
                    serial: "00000002".into(),
                    tuner: RtlTuner::E4000,
                },
            ],
            hackrf: vec![HackRfBoard {
                serial: "0000000000000000457863c82a5c3d5f".into(),
            }],
            uhd: vec![
                UsrpBoard {
                    serial: "30A1F9B".into(),
                    product: UsrpProduct::B210,
                },
                UsrpBoard {
                    serial: "30A1FA0".into(),
                    product: UsrpProduct::B210,
                },
                UsrpBoard {
                    serial: "F4A5C1".into(),
                    product: UsrpProduct::N210,
                },
            ],
        }
    }
}

impl SimulatedInventory {
    /// No devices at all.
    pub fn empty() -> Self {
        Self {
            rtl: Vec::new(),
            hackrf: Vec::new(),
            uhd: Vec::new(),
        }
    }

    /// Parse an inventory from TOML text.
    pub fn from_toml_str(text: &str) -> SdrResult<Self> {
        toml::from_str(text)
            .map_err(|e| SdrError::Configuration(format!("invalid device inventory: {}", e)))
    }

    /// Load an inventory file.
    pub fn load(path: &Path) -> SdrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
