//! The protocol engine: the four-phase handshake which turns one ASCII
//! command into the laser's textual response.
//!
//! The laser has no event channel, only control transfers in and reads out,
//! so the host busy-polls twice:
//!
//! 1. SUBMIT_COMMAND carries the command text.
//! 2. POLL_STATUS is repeated until the reply starts 0x01 0xFF (accepted), or
//!    the acknowledgment window elapses.  Not being acknowledged is tolerated
//!    - the engine moves on to fetch the response regardless.
//! 3. FETCH_RESPONSE is repeated until a reply contains a line terminator or
//!    echoes the command, or the response window elapses.  That one reply is
//!    the response; earlier replies are discarded.
//! 4. ACK_RECEIVED tells the laser its response was consumed.
//!
//! Each window is measured from entry to its loop, not per transfer.
//! Commands are strictly sequential: one finishes before the next starts.
//! Transport errors abort the command but leave the connection usable.
use crate::connection::Connection;
use crate::constants::*;
use crate::frame::{self, Frame, Opcode};
use crate::transport::Transport;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::thread::sleep;
use std::time::Instant;

/// The state of one command as it passes through the handshake
#[derive(Debug)]
pub enum CommandState {
    /// Nothing sent yet
    Idle,
    /// Command submitted at the contained instant, waiting for acceptance
    AwaitingAck(Instant),
    /// Waiting for the response text
    AwaitingData,
    /// Finished.  `None` if no response arrived within the response window
    Done(Option<String>),
    /// A transport error aborted the command
    Failed(Error),
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandState::Idle => write!(f, "Idle"),
            CommandState::AwaitingAck(_) => write!(f, "AwaitingAck"),
            CommandState::AwaitingData => write!(f, "AwaitingData"),
            CommandState::Done(_) => write!(f, "Done"),
            CommandState::Failed(_) => write!(f, "Failed"),
        }
    }
}

// What the caller asked for, fixed for the lifetime of one command
struct Command {
    submit: Frame,
    // Lower-cased command without its terminator, looked for in responses
    needle: String,
    write_only: bool,
}

impl Command {
    fn new(command: &str, write_only: bool) -> Result<Self, Error> {
        let command = frame::normalize_command(command);
        let submit = Frame::encode(Opcode::SubmitCommand, &command)?;
        let needle = command.trim_end_matches(CRLF).to_lowercase();
        Ok(Self {
            submit,
            needle,
            write_only,
        })
    }

    // The response is complete once it holds a line terminator, or echoes
    // the command
    fn is_complete(&self, response: &str) -> bool {
        !response.is_empty()
            && (response.contains(['\n', '\r'])
                || (!self.needle.is_empty() && response.to_lowercase().contains(&self.needle)))
    }
}

/// Protocol engine functions
impl<T: Transport> Connection<T> {
    /// Send one command to the laser and collect its response.
    ///
    /// A CRLF terminator is appended to `command` if absent.
    ///
    /// # Arguments
    /// * `command` - ASCII command, at most 61 bytes before termination
    /// * `write_only` - If set, no response is fetched: the command is
    ///   complete as soon as the laser accepts it
    ///
    /// # Returns
    /// * `Ok(Some(String))` - The response text.  `"OK"` for an accepted
    ///   write-only command
    /// * `Ok(None)` - The laser produced no response in the response window
    /// * `Err(Error::Args)` - The command doesn't fit in a frame.  Nothing is
    ///   sent
    /// * `Err(Error)` - A transport error aborted the command
    ///
    /// # Example
    /// ```rust,no_run
    /// use stradus::{ConnectionBuilder, DeviceDescriptor, DeviceKind};
    ///
    /// let descriptor = DeviceDescriptor::new(DeviceKind::Laser, 2, 3);
    /// let mut connection = ConnectionBuilder::new(descriptor).build().unwrap();
    /// connection.open().unwrap();
    /// let response = connection.send_command("?LP", false).unwrap();
    /// println!("{response:?}");
    /// ```
    pub fn send_command(
        &mut self,
        command: &str,
        write_only: bool,
    ) -> Result<Option<String>, Error> {
        trace!(
            target: self.log_target.as_str(),
            "Connection::send_command {command:?} write_only {write_only}"
        );
        let command = Command::new(command, write_only)?;

        let mut state = CommandState::Idle;
        loop {
            debug!(target: self.log_target.as_str(), "Command state {state}");
            state = match state {
                CommandState::Done(response) => break Ok(response),
                CommandState::Failed(e) => {
                    warn!(target: self.log_target.as_str(), "Command failed: {e}");
                    break Err(e);
                }
                state => self.step(state, &command).unwrap_or_else(CommandState::Failed),
            };
        }
    }
}

/// Private protocol engine functions
impl<T: Transport> Connection<T> {
    fn step(&mut self, state: CommandState, command: &Command) -> Result<CommandState, Error> {
        match state {
            CommandState::Idle => {
                self.drain_stale();
                let timeout = self.config().write_timeout;
                self.write_frame(&command.submit, timeout)?;
                Ok(CommandState::AwaitingAck(Instant::now()))
            }
            CommandState::AwaitingAck(submitted) => {
                if self.await_acknowledgement(submitted)? {
                    if command.write_only {
                        Ok(CommandState::Done(Some(WRITE_ONLY_REPLY.to_string())))
                    } else {
                        Ok(CommandState::AwaitingData)
                    }
                } else {
                    debug!(
                        target: self.log_target.as_str(),
                        "Command not acknowledged within {:?}, fetching response anyway",
                        self.config().ack_window
                    );
                    Ok(CommandState::AwaitingData)
                }
            }
            CommandState::AwaitingData => Ok(CommandState::Done(self.fetch_response(command)?)),
            state @ (CommandState::Done(_) | CommandState::Failed(_)) => Ok(state),
        }
    }

    // Discard anything left in the IN buffer by an earlier command.  Best
    // effort - any failure here will resurface on the submit
    fn drain_stale(&mut self) {
        let timeout = self.config().drain_timeout;
        match self.read_frame(timeout, true) {
            Ok(Some(stale)) => debug!(
                target: self.log_target.as_str(),
                "Discarded stale data {stale:?}"
            ),
            Ok(None) => (),
            Err(e) => trace!(target: self.log_target.as_str(), "Drain read: {e}"),
        }
    }

    // Poll until the laser accepts the command, or the window elapses
    fn await_acknowledgement(&mut self, submitted: Instant) -> Result<bool, Error> {
        let config = self.config().clone();
        let poll = Frame::empty(Opcode::PollStatus);

        while submitted.elapsed() < config.ack_window {
            self.write_frame(&poll, config.write_timeout)?;
            if let Some(reply) = self.read_optional(config.read_timeout, false)? {
                if frame::is_acknowledgement(&reply) {
                    trace!(target: self.log_target.as_str(), "Command acknowledged");
                    return Ok(true);
                }
            }
            sleep(config.poll_interval);
        }

        Ok(false)
    }

    // Fetch until a read qualifies as the response, or the window elapses.
    // Reads which don't qualify are discarded
    fn fetch_response(&mut self, command: &Command) -> Result<Option<String>, Error> {
        let config = self.config().clone();
        let fetch = Frame::empty(Opcode::FetchResponse);
        let started = Instant::now();

        while started.elapsed() < config.response_window {
            self.write_frame(&fetch, config.write_timeout)?;
            match self.read_optional(config.read_timeout, true)? {
                Some(chunk) if command.is_complete(&chunk) => {
                    self.acknowledge_receipt();
                    return Ok(Some(chunk));
                }
                Some(chunk) => debug!(
                    target: self.log_target.as_str(),
                    "Discarding incomplete response {chunk:?}"
                ),
                None => sleep(config.poll_interval),
            }
        }

        debug!(
            target: self.log_target.as_str(),
            "No complete response within {:?}", config.response_window
        );
        Ok(None)
    }

    // Best effort, the result is not checked
    fn acknowledge_receipt(&mut self) {
        let timeout = self.config().write_timeout;
        if let Err(e) = self.write_frame(&Frame::empty(Opcode::AckReceived), timeout) {
            debug!(
                target: self.log_target.as_str(),
                "Failed to send ACK_RECEIVED: {e}"
            );
        }
    }
}
