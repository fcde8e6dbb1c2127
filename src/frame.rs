//! Frame codec.  Builds the fixed 64 byte OUT frames sent to the laser, and
//! turns the 64 byte IN frames it returns back into text.
//!
//! Pure functions, no I/O.
use crate::constants::*;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::fmt;

/// The four opcodes understood by the laser, carried in byte 0 of every OUT
/// frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    SubmitCommand = OP_SUBMIT_COMMAND,
    PollStatus = OP_POLL_STATUS,
    FetchResponse = OP_FETCH_RESPONSE,
    AckReceived = OP_ACK_RECEIVED,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            OP_SUBMIT_COMMAND => Ok(Opcode::SubmitCommand),
            OP_POLL_STATUS => Ok(Opcode::PollStatus),
            OP_FETCH_RESPONSE => Ok(Opcode::FetchResponse),
            OP_ACK_RECEIVED => Ok(Opcode::AckReceived),
            other => Err(Error::Args {
                message: format!("Unknown opcode 0x{other:02x}"),
            }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::SubmitCommand => "SUBMIT_COMMAND",
            Opcode::PollStatus => "POLL_STATUS",
            Opcode::FetchResponse => "FETCH_RESPONSE",
            Opcode::AckReceived => "ACK_RECEIVED",
        };
        write!(f, "{name}")
    }
}

/// One 64 byte OUT frame: the opcode, then the ASCII payload left-justified
/// and padded with 0xFF
#[derive(Clone, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Builds a frame carrying `payload`.  A CRLF terminator is appended if
    /// the payload doesn't already end with one.
    ///
    /// # Errors
    /// Payloads which are not ASCII, or which exceed
    /// [`MAX_PAYLOAD_SIZE`] bytes once terminated, are rejected with
    /// [`Error::Args`] rather than truncated.
    pub fn encode(opcode: Opcode, payload: &str) -> Result<Self, Error> {
        let payload = normalize_command(payload);
        trace!("Frame::encode opcode {opcode} payload {payload:?}");

        if !payload.is_ascii() {
            return Err(Error::Args {
                message: format!("Command {payload:?} contains non-ASCII characters"),
            });
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::Args {
                message: format!(
                    "Command {payload:?} is {} bytes, more than the maximum of {MAX_PAYLOAD_SIZE}",
                    payload.len()
                ),
            });
        }

        let mut frame = Self::empty(opcode);
        frame.0[1..=payload.len()].copy_from_slice(payload.as_bytes());
        Ok(frame)
    }

    /// Builds a frame with no payload, as used for POLL_STATUS,
    /// FETCH_RESPONSE and ACK_RECEIVED
    pub fn empty(opcode: Opcode) -> Self {
        let mut buf = [FRAME_PADDING; FRAME_SIZE];
        buf[0] = opcode as u8;
        Self(buf)
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.0[0]).ok()
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// The payload bytes, with the 0xFF padding removed
    pub fn payload(&self) -> &[u8] {
        let end = self.0[1..]
            .iter()
            .position(|&b| b == FRAME_PADDING)
            .map_or(FRAME_SIZE, |pos| pos + 1);
        &self.0[1..end]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = String::from_utf8_lossy(self.payload());
        match self.opcode() {
            Some(op) => write!(f, "Frame({op}, {payload:?})"),
            None => write!(f, "Frame(0x{:02x}, {payload:?})", self.0[0]),
        }
    }
}

/// Ensure a command ends with the CRLF terminator
pub fn normalize_command(command: &str) -> String {
    if command.ends_with(CRLF) {
        command.to_string()
    } else {
        format!("{command}{CRLF}")
    }
}

/// Converts a raw IN frame to text.
///
/// Bytes map 1:1 onto characters (latin-1), as the laser's replies are not
/// guaranteed to be UTF-8.  The leading status byte is dropped if
/// `strip_first_byte` is set, and NUL padding is removed.
///
/// # Returns
/// * `Some(String)` - The remaining text
/// * `None` - If nothing remains
pub fn decode(raw: &[u8], strip_first_byte: bool) -> Option<String> {
    let raw = if strip_first_byte {
        raw.get(1..).unwrap_or_default()
    } else {
        raw
    };

    let text: String = raw
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Whether a POLL_STATUS reply (decoded with its status byte retained) shows
/// the laser has accepted the command
pub fn is_acknowledgement(reply: &str) -> bool {
    let mut chars = reply.chars();
    chars.next() == Some(char::from(ACK_SENTINEL[0]))
        && chars.next() == Some(char::from(ACK_SENTINEL[1]))
}
