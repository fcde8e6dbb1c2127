//! The platform USB boundary.  [`Transport`] and [`TransportHandle`] are the
//! only primitives the protocol is built on: list devices, open one, prepare
//! it, write a control transfer and read the IN endpoint.
//!
//! [`UsbTransport`] implements them on top of rusb.  The traits allow the
//! transport to be mocked out for testing.

#[cfg(test)]
pub(crate) mod mock;
pub mod usb;

pub use usb::{UsbHandle, UsbTransport};

use crate::{DeviceDescriptor, Error};
use std::time::Duration;

/// Locates laser endpoints on the host's USB bus
pub trait Transport: std::fmt::Debug {
    type Handle: TransportHandle;

    /// Returns a textual listing of every device matching the vendor and
    /// product IDs, one device per line, each line containing
    /// `Bus <bus> Address <address>, Spec <version>`.
    ///
    /// # Returns
    /// * `Ok(String)` - The listing, which may be empty
    /// * `Err(Error)` - If the bus couldn't be enumerated
    fn show_devices(&self, vendor_id: u16, product_id: u16) -> Result<String, Error>;

    /// Find and open the device described by `descriptor`.
    ///
    /// # Returns
    /// * `Ok(Some(Handle))` - The open (but not yet claimed) device
    /// * `Ok(None)` - No device matches the descriptor
    /// * `Err(Error)` - If the device was found but couldn't be opened
    fn find(&self, descriptor: &DeviceDescriptor) -> Result<Option<Self::Handle>, Error>;
}

/// An open laser endpoint
pub trait TransportHandle: std::fmt::Debug {
    /// USB reset of the device
    fn reset(&mut self) -> Result<(), Error>;

    /// Select the device's active configuration
    fn set_configuration(&mut self) -> Result<(), Error>;

    /// Claim an interface, detaching any kernel driver bound to it
    fn claim_interface(&mut self, interface: u8) -> Result<(), Error>;

    /// Release a previously claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<(), Error>;

    /// Send an OUT control transfer.
    ///
    /// # Returns
    /// * `Ok(usize)` - The number of bytes written
    /// * `Err(Error::Timeout)` - If the device didn't accept it in time
    /// * `Err(Error)` - On any other failure
    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, Error>;

    /// Read from an IN endpoint into `buffer`.
    ///
    /// # Returns
    /// * `Ok(usize)` - The number of bytes read
    /// * `Err(Error::Timeout)` - If no data arrived in time
    /// * `Err(Error)` - On any other failure
    fn read_endpoint(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error>;
}
