//! [`UsbTransport`] is the rusb implementation of [`Transport`]
use crate::constants::*;
use crate::transport::{Transport, TransportHandle};
use crate::{DeviceDescriptor, Error};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rusb::{Context, DeviceHandle, UsbContext};
use std::fmt::Write;
use std::time::Duration;

/// Accesses the host's USB bus through a [`rusb::Context`]
#[derive(Debug, Clone)]
pub struct UsbTransport {
    context: Context,
}

impl UsbTransport {
    /// Creates a transport using a new default [`rusb::Context`]
    ///
    /// Note that the created [`rusb::Context`] will not have rusb logging
    /// enabled.  Use [`UsbTransport::with_context`] to configure that.
    pub fn new() -> Result<Self, Error> {
        trace!("UsbTransport::new");
        Ok(Self::with_context(Context::new()?))
    }

    /// Creates a transport using the provided [`rusb::Context`]
    ///
    /// ```rust,no_run
    /// use rusb::{Context, UsbContext};
    /// use stradus::UsbTransport;
    ///
    /// let mut context = Context::new().unwrap();
    /// context.set_log_level(rusb::LogLevel::Info);
    /// let transport = UsbTransport::with_context(context);
    /// ```
    pub fn with_context(context: Context) -> Self {
        trace!("UsbTransport::with_context context {context:?}");
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl Transport for UsbTransport {
    type Handle = UsbHandle;

    fn show_devices(&self, vendor_id: u16, product_id: u16) -> Result<String, Error> {
        trace!("UsbTransport::show_devices {vendor_id:04x}:{product_id:04x}");

        let mut listing = String::new();
        let devices = self.context.devices()?;
        for (device, desc) in readable(devices.iter(), |device| device.device_descriptor()) {
            if desc.vendor_id() != vendor_id || desc.product_id() != product_id {
                continue;
            }

            let version = desc.usb_version();
            let _ = writeln!(
                listing,
                "DEVICE ID {:04x}:{:04x} on Bus {:03} Address {:03}, Spec {}.{}{}",
                vendor_id,
                product_id,
                device.bus_number(),
                device.address(),
                version.major(),
                version.minor(),
                version.sub_minor()
            );
        }

        debug!("Found {vendor_id:04x}:{product_id:04x} devices:\n{listing}");
        Ok(listing)
    }

    fn find(&self, descriptor: &DeviceDescriptor) -> Result<Option<UsbHandle>, Error> {
        trace!("UsbTransport::find {descriptor}");

        let devices = self.context.devices()?;
        for (device, desc) in readable(devices.iter(), |device| device.device_descriptor()) {
            if desc.vendor_id() == descriptor.vendor_id
                && desc.product_id() == descriptor.product_id
                && device.bus_number() == descriptor.bus
                && device.address() == descriptor.address
            {
                debug!("Found USB device {descriptor}");
                let handle = device.open()?;
                return Ok(Some(UsbHandle { handle }));
            }
        }

        debug!("USB device {descriptor} not present");
        Ok(None)
    }
}

// Pairs each device with its descriptor.  A device whose descriptor can't
// be read is logged and skipped, so one bad device doesn't hide the rest of
// the bus
fn readable<D, T>(
    devices: impl IntoIterator<Item = D>,
    read: impl Fn(&D) -> Result<T, rusb::Error>,
) -> impl Iterator<Item = (D, T)> {
    devices.into_iter().filter_map(move |device| match read(&device) {
        Ok(desc) => Some((device, desc)),
        Err(e) => {
            warn!("Skipping USB device whose descriptor can't be read: {e}");
            None
        }
    })
}

/// An open rusb device handle
#[derive(Debug)]
pub struct UsbHandle {
    handle: DeviceHandle<Context>,
}

impl UsbHandle {
    fn map_timeout(err: rusb::Error, dur: Duration) -> Error {
        match err {
            rusb::Error::Timeout => Error::Timeout { dur },
            err => err.into(),
        }
    }
}

impl TransportHandle for UsbHandle {
    fn reset(&mut self) -> Result<(), Error> {
        trace!("UsbHandle::reset");
        self.handle.reset()?;
        Ok(())
    }

    fn set_configuration(&mut self) -> Result<(), Error> {
        trace!("UsbHandle::set_configuration");
        let config = self.handle.active_configuration()?;
        debug!("Current configuration is {config}");
        if config != DEFAULT_CONFIGURATION {
            debug!("Set active configuration to {DEFAULT_CONFIGURATION}");
            self.handle.set_active_configuration(DEFAULT_CONFIGURATION)?;
        }
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), Error> {
        trace!("UsbHandle::claim_interface {interface}");

        // Only supported on Linux - elsewhere this returns NotSupported, and
        // there is nothing to detach
        if let Ok(true) = self.handle.kernel_driver_active(interface) {
            debug!("Detach kernel driver from interface {interface}");
            self.handle.detach_kernel_driver(interface)?;
        }

        self.handle.claim_interface(interface)?;
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), Error> {
        trace!("UsbHandle::release_interface {interface}");
        self.handle.release_interface(interface)?;
        Ok(())
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        trace!(
            "UsbHandle::write_control request_type 0x{request_type:02x} request 0x{request:02x} value 0x{value:04x} data.len() {}",
            data.len()
        );
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
            .map_err(|e| Self::map_timeout(e, timeout))
    }

    fn read_endpoint(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        trace!(
            "UsbHandle::read_endpoint 0x{endpoint:02x} buffer.len() {}",
            buffer.len()
        );
        // The laser is a HID class device, so its IN endpoint is an
        // interrupt endpoint
        self.handle
            .read_interrupt(endpoint, buffer, timeout)
            .map_err(|e| Self::map_timeout(e, timeout))
    }
}
