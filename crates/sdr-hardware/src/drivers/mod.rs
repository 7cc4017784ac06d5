//! Simulated backends.
//!
//! Each backend module holds its factory and its board type side by side.
//! Hardware backends open devices from a [`inventory::SimulatedInventory`]
//! and claim them through [`common::DeviceClaims`] so a device is never
//! driven twice.

pub mod common;
pub mod file;
pub mod hackrf;
pub mod inventory;
pub mod rtl;
pub mod uhd;
