//! Constants used in the Stradus USB implementation
use std::time::Duration;

/// Device identities

/// Stradus laser (instrument) USB vendor ID
pub const LASER_VID: u16 = 0x201a;
/// Stradus laser (instrument) USB product ID
pub const LASER_PID: u16 = 0x1001;
/// Controller ("manager") USB vendor ID.  This is the non-instrument device
/// of the product family, sharing the family's driver
pub const CONTROLLER_VID: u16 = 0x04d8;
/// Controller ("manager") USB product ID
pub const CONTROLLER_PID: u16 = 0x003f;

/// Frame layout

/// Every transfer, in either direction, is exactly this many bytes
pub const FRAME_SIZE: usize = 64;
/// Maximum payload following the opcode byte, including the line terminator
pub const MAX_PAYLOAD_SIZE: usize = FRAME_SIZE - 1;
/// Padding byte used to fill the unused part of an OUT frame
pub const FRAME_PADDING: u8 = 0xff;
/// Line terminator appended to every command
pub const CRLF: &str = "\r\n";

/// Opcodes, carried in byte 0 of an OUT frame

/// Submit an ASCII command to the laser
pub const OP_SUBMIT_COMMAND: u8 = 0xa0;
/// Ask the laser whether it has accepted the submitted command
pub const OP_POLL_STATUS: u8 = 0xa1;
/// Ask the laser for its textual response
pub const OP_FETCH_RESPONSE: u8 = 0xa2;
/// Tell the laser its response has been received
pub const OP_ACK_RECEIVED: u8 = 0xa3;

/// Leading two bytes of a POLL_STATUS reply once the command is accepted
pub const ACK_SENTINEL: [u8; 2] = [0x01, 0xff];

/// Control transfer setup (HID class SET_REPORT, output report 0)

/// Host to device, class request, interface recipient
pub const REQUEST_TYPE: u8 = 0x21;
/// SET_REPORT
pub const REQUEST: u8 = 0x09;
/// Report type output, report ID 0
pub const REQUEST_VALUE: u16 = 0x0200;
/// Interface 0
pub const REQUEST_INDEX: u16 = 0x0000;

/// The laser's IN endpoint, used to read every reply frame
pub const IN_ENDPOINT: u8 = 0x81;
/// The only interface the laser exposes
pub const CONTROL_INTERFACE: u8 = 0;
/// Configuration selected before claiming the interface
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Timeouts

/// Used to wait for the laser to provide a reply frame
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(40);
/// Used to wait for the laser to accept an OUT control transfer
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Used for the best-effort read that discards stale data before a command
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(30);
/// Time allowed for the laser to accept a submitted command
pub const DEFAULT_ACK_WINDOW: Duration = Duration::from_millis(50);
/// Time allowed for the laser to produce its response
pub const DEFAULT_RESPONSE_WINDOW: Duration = Duration::from_millis(1000);
/// Sleep between polls, to avoid saturating the bus
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Wait between failed open attempts.  Zero retries immediately
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::ZERO;
/// Number of additional open attempts after the first fails
pub const DEFAULT_RETRIES: u32 = 1;

/// Reply returned by a fire-and-forget command once the laser accepts it
pub const WRITE_ONLY_REPLY: &str = "OK";
