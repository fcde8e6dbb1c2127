//! [`DeviceDescriptor`] identifies a physical Stradus USB endpoint, as
//! produced by [`discover`].

pub mod discovery;

pub use discovery::{discover, parse_bus_and_address};

use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a device plays in the product family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// The controller ("manager") endpoint.  Not an instrument, so it is
    /// never opened by this crate
    Controller,
    /// A laser instrument
    Laser,
}

impl DeviceKind {
    /// The (vendor id, product id) pair scanned for devices of this kind
    pub const fn ids(&self) -> (u16, u16) {
        match self {
            DeviceKind::Controller => (CONTROLLER_VID, CONTROLLER_PID),
            DeviceKind::Laser => (LASER_VID, LASER_PID),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Controller => write!(f, "controller"),
            DeviceKind::Laser => write!(f, "laser"),
        }
    }
}

/// Identifies one USB endpoint.  Uniquely identified by (vendor id, product
/// id, bus, address), and only valid for the lifetime of one enumeration of
/// the bus - it is re-created on every discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus: u8,
    pub address: u8,
    pub is_controller: bool,
}

impl DeviceDescriptor {
    /// Create a descriptor for a device of the given kind at bus/address
    pub fn new(kind: DeviceKind, bus: u8, address: u8) -> Self {
        let (vendor_id, product_id) = kind.ids();
        Self {
            vendor_id,
            product_id,
            bus,
            address,
            is_controller: kind == DeviceKind::Controller,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        if self.is_controller {
            DeviceKind::Controller
        } else {
            DeviceKind::Laser
        }
    }

    /// The key used for this device in the map returned by [`discover`]
    pub fn unique_id(&self) -> String {
        format!(
            "{}_{:04x}_{:04x}_{}_{}",
            self.kind(),
            self.vendor_id,
            self.product_id,
            self.bus,
            self.address
        )
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{:03}-{:03}",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}
