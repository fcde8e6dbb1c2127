//! [`Connection`] owns the open transport handle for one laser.  It opens the
//! device with a bounded number of retries, and exposes the raw frame
//! primitives the protocol engine is built on.
//!
//! The protocol engine itself ([`Connection::send_command`]) is implemented
//! in [`crate::protocol`], and the query policy ([`Connection::query`]) in
//! [`crate::response`].
use crate::constants::*;
use crate::frame::{self, Frame};
use crate::transport::{Transport, TransportHandle, UsbTransport};
use crate::{DeviceAccessKind, DeviceDescriptor, Error};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::thread::sleep;
use std::time::Duration;

pub mod builder;

pub use builder::ConnectionBuilder;

/// Per-connection timing and retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport timeout for each frame read
    pub read_timeout: Duration,
    /// Transport timeout for each frame write
    pub write_timeout: Duration,
    /// Number of extra open attempts after the first fails
    pub retries: u32,
    /// Wait between failed open attempts
    pub retry_backoff: Duration,
    /// Time allowed for the laser to accept a submitted command
    pub ack_window: Duration,
    /// Time allowed for the laser to produce its response
    pub response_window: Duration,
    /// Sleep between unsuccessful polls
    pub poll_interval: Duration,
    /// Transport timeout for the read which discards stale data before each
    /// command
    pub drain_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            ack_window: DEFAULT_ACK_WINDOW,
            response_window: DEFAULT_RESPONSE_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// One laser connection.
///
/// At most one command is in flight at a time - every operation takes
/// `&mut self`.  Opening the same device from two connections is not
/// supported; the transport's interface claim decides who wins.
///
/// Log records are emitted under this connection's log target, which
/// defaults to `stradus::<descriptor>` so that output from several lasers can
/// be told apart, and still be filtered with `RUST_LOG=stradus`.
#[derive(Debug)]
pub struct Connection<T: Transport = UsbTransport> {
    transport: T,
    descriptor: DeviceDescriptor,
    config: ConnectionConfig,
    handle: Option<T::Handle>,
    pub(crate) log_target: String,
}

/// Public Connection functions
impl<T: Transport> Connection<T> {
    /// Creates a new, unopened, connection.  Prefer [`ConnectionBuilder`].
    pub fn new(transport: T, descriptor: DeviceDescriptor, config: ConnectionConfig) -> Self {
        trace!("Connection::new {descriptor} {config:?}");
        Self {
            transport,
            descriptor,
            config,
            handle: None,
            log_target: format!("stradus::{descriptor}"),
        }
    }

    /// Open the laser: find it, reset it, select its configuration and claim
    /// its control interface.
    ///
    /// Makes `retries + 1` attempts, waiting `retry_backoff` between them.
    /// Does nothing if the connection is already open.
    ///
    /// # Returns
    /// * `Ok(())` - The connection is open
    /// * `Err(Error::DeviceAccess { kind: ConnectionFailed { .. } })` - If
    ///   every attempt failed
    pub fn open(&mut self) -> Result<(), Error> {
        let target = self.log_target.as_str();
        trace!(target: target, "Connection::open");
        if self.handle.is_some() {
            debug!(target: target, "Connection already open");
            return Ok(());
        }

        let attempts = self.config.retries.saturating_add(1);
        for attempt in 1..=attempts {
            match self.try_open() {
                Ok(handle) => {
                    self.handle = Some(handle);
                    info!(
                        target: self.log_target.as_str(),
                        "Connected to USB device {}", self.descriptor
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        target: self.log_target.as_str(),
                        "Attempt {attempt} of {attempts} to connect to {} failed: {e}",
                        self.descriptor
                    );
                    if attempt < attempts && !self.config.retry_backoff.is_zero() {
                        sleep(self.config.retry_backoff);
                    }
                }
            }
        }

        Err(DeviceAccessKind::ConnectionFailed {
            vid: self.descriptor.vendor_id,
            pid: self.descriptor.product_id,
            bus: self.descriptor.bus,
            address: self.descriptor.address,
            attempts,
        }
        .into())
    }

    /// Release the control interface and drop the handle.  Safe to call on
    /// a connection which isn't open.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            trace!(target: self.log_target.as_str(), "Connection::close");
            if let Err(e) = handle.release_interface(CONTROL_INTERFACE) {
                debug!(
                    target: self.log_target.as_str(),
                    "Failed to release interface: {e}"
                );
            }
            info!(
                target: self.log_target.as_str(),
                "Closed USB device {}", self.descriptor
            );
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Write one frame as a SET_REPORT control transfer
    ///
    /// # Errors
    /// [`DeviceAccessKind::NoDevice`] if the connection isn't open, otherwise
    /// any transport error, including [`Error::Timeout`]
    pub fn write_frame(&mut self, frame: &Frame, timeout: Duration) -> Result<(), Error> {
        trace!(target: self.log_target.as_str(), "Connection::write_frame {frame:?}");
        let handle = self.handle.as_mut().ok_or(Error::DeviceAccess {
            kind: DeviceAccessKind::NoDevice,
        })?;
        handle.write_control(
            REQUEST_TYPE,
            REQUEST,
            REQUEST_VALUE,
            REQUEST_INDEX,
            frame.as_bytes(),
            timeout,
        )?;
        Ok(())
    }

    /// Read one frame from the IN endpoint and decode it.
    ///
    /// # Returns
    /// * `Ok(Some(String))` - The decoded text
    /// * `Ok(None)` - If nothing remained after decoding
    /// * `Err(Error::Timeout)` - If the laser sent nothing within `timeout`
    /// * `Err(Error)` - On any other failure
    pub fn read_frame(
        &mut self,
        timeout: Duration,
        strip_first_byte: bool,
    ) -> Result<Option<String>, Error> {
        let handle = self.handle.as_mut().ok_or(Error::DeviceAccess {
            kind: DeviceAccessKind::NoDevice,
        })?;
        let mut buf = [0u8; FRAME_SIZE];
        let len = handle.read_endpoint(IN_ENDPOINT, &mut buf, timeout)?;
        let text = frame::decode(&buf[..len], strip_first_byte);
        trace!(
            target: self.log_target.as_str(),
            "Connection::read_frame read {len} bytes: {text:?}"
        );
        Ok(text)
    }
}

/// Private Connection functions
impl<T: Transport> Connection<T> {
    fn try_open(&mut self) -> Result<T::Handle, Error> {
        let mut handle = self
            .transport
            .find(&self.descriptor)?
            .ok_or(Error::DeviceAccess {
                kind: DeviceAccessKind::NotFound {
                    vid: self.descriptor.vendor_id,
                    pid: self.descriptor.product_id,
                    bus: self.descriptor.bus,
                    address: self.descriptor.address,
                },
            })?;

        debug!(target: self.log_target.as_str(), "Reset device");
        handle.reset()?;
        handle.set_configuration()?;
        debug!(target: self.log_target.as_str(), "Claim interface");
        handle.claim_interface(CONTROL_INTERFACE)?;
        Ok(handle)
    }

    /// Read a frame, treating a transport timeout as "no data yet"
    pub(crate) fn read_optional(
        &mut self,
        timeout: Duration,
        strip_first_byte: bool,
    ) -> Result<Option<String>, Error> {
        match self.read_frame(timeout, strip_first_byte) {
            Err(e) if e.is_timeout() => Ok(None),
            result => result,
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Opcode;
    use crate::transport::mock::{MockRead, MockTransport};
    use crate::DeviceKind;

    fn connection(transport: &MockTransport, retries: u32) -> Connection<MockTransport> {
        let config = ConnectionConfig {
            retries,
            ..Default::default()
        };
        Connection::new(
            transport.clone(),
            DeviceDescriptor::new(DeviceKind::Laser, 2, 3),
            config,
        )
    }

    #[test]
    fn test_open_exhausts_retries() {
        let transport = MockTransport::default();
        let mut conn = connection(&transport, 2);

        let result = conn.open();
        assert_eq!(
            result,
            Err(Error::DeviceAccess {
                kind: DeviceAccessKind::ConnectionFailed {
                    vid: LASER_VID,
                    pid: LASER_PID,
                    bus: 2,
                    address: 3,
                    attempts: 3,
                }
            })
        );
        assert_eq!(transport.state.borrow().find_calls, 3);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_open_retries_claim_failure() {
        let transport = MockTransport::present();
        transport.state.borrow_mut().fail_claim = true;
        let mut conn = connection(&transport, 0);

        assert!(conn.open().is_err());
        let state = transport.state.borrow();
        assert_eq!(state.find_calls, 1);
        assert_eq!(state.reset_calls, 1);
    }

    #[test]
    fn test_open_and_close() {
        let transport = MockTransport::present();
        let mut conn = connection(&transport, 1);

        conn.open().unwrap();
        assert!(conn.is_open());
        assert!(transport.state.borrow().claimed);

        // Opening again is a no-op
        conn.open().unwrap();
        assert_eq!(transport.state.borrow().find_calls, 1);

        conn.close();
        assert!(!conn.is_open());
        assert!(!transport.state.borrow().claimed);

        // Closing twice is harmless
        conn.close();
        assert_eq!(transport.state.borrow().released, 1);
    }

    #[test]
    fn test_drop_releases_interface() {
        let transport = MockTransport::present();
        {
            let mut conn = connection(&transport, 0);
            conn.open().unwrap();
        }
        assert_eq!(transport.state.borrow().released, 1);
    }

    #[test]
    fn test_frames_require_open_connection() {
        let transport = MockTransport::present();
        let mut conn = connection(&transport, 0);

        let result = conn.write_frame(&Frame::empty(Opcode::PollStatus), DEFAULT_WRITE_TIMEOUT);
        assert_eq!(
            result,
            Err(Error::DeviceAccess {
                kind: DeviceAccessKind::NoDevice
            })
        );
        assert!(conn.read_frame(DEFAULT_READ_TIMEOUT, true).is_err());
    }

    #[test]
    fn test_read_frame() {
        let transport = MockTransport::present();
        let mut conn = connection(&transport, 0);
        conn.open().unwrap();

        {
            let mut state = transport.state.borrow_mut();
            state.queue(None, MockRead::frame(0x02, "LP=50.0\n"));
            state.queue(None, MockRead::frame(0x02, ""));
        }

        assert_eq!(
            conn.read_frame(DEFAULT_READ_TIMEOUT, true).unwrap().as_deref(),
            Some("LP=50.0\n")
        );
        // Nothing left after stripping the status byte
        assert_eq!(conn.read_frame(DEFAULT_READ_TIMEOUT, true).unwrap(), None);
        // Nothing queued - the read times out
        assert!(conn
            .read_frame(DEFAULT_READ_TIMEOUT, true)
            .unwrap_err()
            .is_timeout());
        assert_eq!(conn.read_optional(DEFAULT_READ_TIMEOUT, true).unwrap(), None);
    }
}
