//! Scripted in-memory transport used by the unit tests.
//!
//! Replies are queued per opcode: a read returns the next reply queued for
//! the opcode of the most recently written frame, or times out if there is
//! none.  Each written frame gets at most one reply.  Replies queued under
//! `None` are read before anything has been written.
use crate::constants::*;
use crate::error::SerializableUsbError;
use crate::frame::Opcode;
use crate::transport::{Transport, TransportHandle};
use crate::{DeviceDescriptor, Error};

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    Timeout,
    Fail,
}

impl MockRead {
    /// A reply frame whose first byte is the status byte
    pub fn frame(status: u8, text: &str) -> Self {
        let mut buf = vec![0u8; FRAME_SIZE];
        buf[0] = status;
        buf[1..=text.len()].copy_from_slice(text.as_bytes());
        MockRead::Data(buf)
    }

    /// A POLL_STATUS reply accepting the command
    pub fn ack() -> Self {
        let mut buf = vec![0u8; FRAME_SIZE];
        buf[..2].copy_from_slice(&ACK_SENTINEL);
        MockRead::Data(buf)
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub listings: HashMap<(u16, u16), String>,
    /// Scans for these (vendor id, product id) pairs fail
    pub fail_listing: Vec<(u16, u16)>,
    pub present: bool,
    pub find_calls: u32,
    pub fail_claim: bool,
    pub reset_calls: u32,
    pub claimed: bool,
    pub released: u32,
    pub written: Vec<[u8; FRAME_SIZE]>,
    pub fail_write: Option<Opcode>,
    pub replies: HashMap<Option<u8>, VecDeque<MockRead>>,
    pub last_opcode: Option<u8>,
    pub read_pending: bool,
}

impl MockState {
    pub fn queue(&mut self, opcode: Option<Opcode>, read: MockRead) {
        self.replies
            .entry(opcode.map(|op| op as u8))
            .or_default()
            .push_back(read);
    }

    pub fn written_opcodes(&self) -> Vec<u8> {
        self.written.iter().map(|f| f[0]).collect()
    }

    pub fn count_written(&self, opcode: Opcode) -> usize {
        self.written.iter().filter(|f| f[0] == opcode as u8).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    /// A transport on which the laser is present and answers nothing
    pub fn present() -> Self {
        let transport = Self::default();
        transport.state.borrow_mut().present = true;
        transport
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn show_devices(&self, vendor_id: u16, product_id: u16) -> Result<String, Error> {
        let state = self.state.borrow();
        if state.fail_listing.contains(&(vendor_id, product_id)) {
            return Err(usb_error("Input/Output Error"));
        }
        Ok(state
            .listings
            .get(&(vendor_id, product_id))
            .cloned()
            .unwrap_or_default())
    }

    fn find(&self, _descriptor: &DeviceDescriptor) -> Result<Option<MockHandle>, Error> {
        let mut state = self.state.borrow_mut();
        state.find_calls += 1;
        if state.present {
            Ok(Some(MockHandle {
                state: self.state.clone(),
            }))
        } else {
            Ok(None)
        }
    }
}

#[derive(Debug)]
pub struct MockHandle {
    state: Rc<RefCell<MockState>>,
}

fn usb_error(message: &str) -> Error {
    Error::Usb(SerializableUsbError::UsbError {
        message: message.to_string(),
    })
}

impl TransportHandle for MockHandle {
    fn reset(&mut self) -> Result<(), Error> {
        self.state.borrow_mut().reset_calls += 1;
        Ok(())
    }

    fn set_configuration(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        if state.fail_claim {
            return Err(usb_error("Resource busy"));
        }
        state.claimed = true;
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        state.claimed = false;
        state.released += 1;
        Ok(())
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, Error> {
        assert_eq!(
            (request_type, request, value, index),
            (REQUEST_TYPE, REQUEST, REQUEST_VALUE, REQUEST_INDEX)
        );
        let mut state = self.state.borrow_mut();
        if state.fail_write.map(|op| op as u8) == Some(data[0]) {
            return Err(usb_error("Pipe error"));
        }
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(data);
        state.written.push(frame);
        state.last_opcode = Some(data[0]);
        state.read_pending = true;
        Ok(data.len())
    }

    fn read_endpoint(
        &mut self,
        endpoint: u8,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        assert_eq!(endpoint, IN_ENDPOINT);
        let mut state = self.state.borrow_mut();
        let key = state.last_opcode;
        let read = if key.is_some() && !state.read_pending {
            MockRead::Timeout
        } else {
            state
                .replies
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(MockRead::Timeout)
        };
        state.read_pending = false;
        match read {
            MockRead::Data(data) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            MockRead::Timeout => Err(Error::Timeout { dur: timeout }),
            MockRead::Fail => Err(usb_error("No such device")),
        }
    }
}
