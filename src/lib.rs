//! # stradus
//!
//! This crate provides a Rust driver for Vortran Stradus lasers, controlled
//! over USB.  It finds the lasers attached to the host, opens them, and runs
//! the laser's polled command/response protocol, so that ASCII commands such
//! as `?LP` (query power) or `LE=1` (emission on) can be sent and their
//! answers read back.
//!
//! ## Overview
//!
//! The crate is structured in layers:
//!
//! - [`discover`] scans the bus for Stradus controllers and lasers
//! - [`Connection`] opens one laser and exchanges 64-byte [`Frame`]s with it
//! - The protocol engine, [`Connection::send_command`], runs the
//!   submit/poll/fetch/acknowledge handshake for one command
//! - The query policy, [`Connection::query`], verifies and retries responses,
//!   and parses them into values
//! - [`Laser`] reads and writes named parameters from a declarative table,
//!   and decodes the fault code into [`LaserStatus`]
//!
//! The USB access itself sits behind the [`Transport`] trait, implemented for
//! real hardware by [`UsbTransport`].
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use stradus::{lasers, Error, Value};
//!
//! fn main() -> Result<(), Error> {
//!     for mut laser in lasers()? {
//!         laser.open()?;
//!
//!         // Reads degrade to None if the laser's answer can't be verified
//!         if let Some(wavelength) = laser.get_value("wavelength")? {
//!             println!("{} is a {wavelength:?}nm laser", laser.descriptor());
//!         }
//!
//!         laser.set("power", Value::Float(12.5))?;
//!         laser.on()?;
//!
//!         // No need to close the laser, it is closed when dropped
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Or, to work with one laser at a known bus and address, and custom
//! timing:
//!
//! ```rust,no_run
//! use stradus::{ConnectionBuilder, DeviceDescriptor, DeviceKind};
//! use std::time::Duration;
//!
//! let descriptor = DeviceDescriptor::new(DeviceKind::Laser, 2, 3);
//! let mut connection = ConnectionBuilder::new(descriptor)
//!     .retries(2)
//!     .response_window(Duration::from_secs(2))
//!     .build()
//!     .unwrap();
//! connection.open().unwrap();
//!
//! let response = connection.send_command("?FV", false).unwrap();
//! println!("Firmware: {response:?}");
//! ```
//!
//! ## Error Handling
//!
//! The library uses a custom [`Error`] type that covers:
//!
//! - Device access errors (not found, permissions, open retries exhausted)
//! - USB errors and timeouts
//! - Responses which fail verification, or are malformed
//! - Invalid arguments (oversized commands, unknown parameters)
//!
//! A transport error aborts the command in flight, but the connection stays
//! open and the next command starts afresh.
//!
//! ## Thread Safety
//!
//! A [`Connection`] runs one command at a time, and every operation on it
//! takes `&mut self`.  To share a laser between threads, wrap its
//! [`Connection`] or [`Laser`] in a mutex.  Discovery doesn't touch open
//! connections, and can run at any time.
//!
//! ## Logging
//!
//! The library uses the `log` crate for diagnostic output, and never
//! installs a logger itself:
//!
//! - Warn: Dropped discovery records, failed open attempts, unverified
//!   responses
//! - Info: Connections opened and closed
//! - Debug: Protocol state transitions
//! - Trace: Function entry and frame contents
//!
//! Each connection logs under its own target, `stradus::<descriptor>`, so
//! output from several lasers can be told apart.  To enable logging, use
//! [`env_logger::init`](https://docs.rs/env_logger/latest/env_logger/index.html)
//! and set the `RUST_LOG` environment variable, for example
//! `RUST_LOG=stradus=debug`.
//!
//! ## Technical Details
//!
//! ### USB Protocol
//!
//! - Laser vendor/product ID: 0x201A/0x1001
//! - Controller vendor/product ID: 0x04D8/0x003F
//! - Frames: 64 bytes, opcode in byte 0, CRLF terminated ASCII or 0xFF
//!   padding in bytes 1-63
//! - OUT: HID SET_REPORT control transfers on interface 0
//! - IN: endpoint 0x81
//!
//! ## License
//!
//! This library is licensed under the GNU General Public License Version 3 (GPLv3).

pub mod connection;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod laser;
pub mod protocol;
pub mod response;
pub mod transport;

pub use crate::connection::{Connection, ConnectionBuilder, ConnectionConfig};
pub use crate::device::{discover, parse_bus_and_address, DeviceDescriptor, DeviceKind};
pub use crate::error::{CommunicationKind, DeviceAccessKind, Error};
pub use crate::frame::{Frame, Opcode};
pub use crate::laser::{lasers, lasers_on, Laser, LaserStatus, Parameter, Value, ValueType};
pub use crate::protocol::CommandState;
pub use crate::response::{parse_output, verify_result};
pub use crate::transport::{Transport, TransportHandle, UsbHandle, UsbTransport};
