//! Response validation, parsing and the query retry policy.
//!
//! A laser response looks like
//!
//! ```text
//! ?LP
//! LP=50.0
//! >
//! ```
//!
//! The first line is a header (the echoed command, or empty) and the last a
//! trailer, so both are discarded and the `key=value` lines between them
//! yield the values.
use crate::connection::Connection;
use crate::transport::Transport;
use crate::{CommunicationKind, Error};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// Number of times a query is sent before its response is given up on
pub const QUERY_ATTEMPTS: u32 = 2;

/// Whether `response` contains every one of `expected` as a substring.
///
/// An empty `expected` always verifies.
pub fn verify_result(response: &str, expected: &[&str]) -> bool {
    expected.iter().all(|token| response.contains(token))
}

/// Extract the values from a response.
///
/// The first and last lines are dropped, and every remaining line is split
/// at its first `=`, keeping the trimmed right hand side.  Line breaks may be
/// `\n`, `\r\n` or `\r`.
///
/// # Returns
/// * `Ok(None)` - If there was no response
/// * `Ok(Some(Vec<String>))` - The values, in line order.  Empty if the
///   response carried no data lines
/// * `Err(Error::Communication { kind: MalformedResponse { .. } })` - If a
///   data line has no `=`.  Such a response is never partially returned
pub fn parse_output(response: Option<&str>) -> Result<Option<Vec<String>>, Error> {
    let Some(response) = response else {
        return Ok(None);
    };

    let lines = split_lines(response);
    let data = match lines.len() {
        0..=2 => &[][..],
        len => &lines[1..len - 1],
    };

    data.iter()
        .map(|line| match line.split_once('=') {
            Some((_, value)) => Ok(value.trim().to_string()),
            None => Err(CommunicationKind::MalformedResponse {
                line: line.to_string(),
            }
            .into()),
        })
        .collect::<Result<Vec<_>, Error>>()
        .map(Some)
}

// Splits at any line break, with no trailing empty line for a terminated
// final line
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(pos) => {
                lines.push(&rest[..pos]);
                let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[pos + skip..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

/// Query functions
impl<T: Transport> Connection<T> {
    /// Send `command`, verify the response echoes every token of `expected`
    /// (`command` itself if `expected` is empty), and parse its values.
    ///
    /// A missing or unverifiable response is retried once.  Each attempt is
    /// verified on its own response.
    ///
    /// # Returns
    /// * `Ok(Vec<String>)` - The parsed values of the first verified response
    /// * `Err(Error::Communication { kind: VerificationFailed { .. } })` - If
    ///   neither attempt produced a verified response
    /// * `Err(Error::Communication { kind: MalformedResponse { .. } })` - If
    ///   the verified response had a data line without `=`
    /// * `Err(Error)` - Any transport error, which is not retried
    pub fn query_verified(
        &mut self,
        command: &str,
        expected: &[&str],
    ) -> Result<Vec<String>, Error> {
        trace!(
            target: self.log_target.as_str(),
            "Connection::query_verified {command:?} expected {expected:?}"
        );
        let default = [command];
        let expected = if expected.is_empty() {
            &default[..]
        } else {
            expected
        };

        for attempt in 1..=QUERY_ATTEMPTS {
            match self.send_command(command, false)? {
                Some(response) if verify_result(&response, expected) => {
                    return parse_output(Some(&response)).map(Option::unwrap_or_default);
                }
                response => warn!(
                    target: self.log_target.as_str(),
                    "Attempt {attempt} of {QUERY_ATTEMPTS}: unverified response to {command:?}: {response:?}"
                ),
            }
        }

        Err(CommunicationKind::VerificationFailed {
            command: command.to_string(),
        }
        .into())
    }

    /// As [`Connection::query_verified`], except that a response which can't
    /// be verified degrades to `Ok(None)` rather than an error.
    ///
    /// # Example
    /// ```rust,no_run
    /// use stradus::{ConnectionBuilder, DeviceDescriptor, DeviceKind};
    ///
    /// let descriptor = DeviceDescriptor::new(DeviceKind::Laser, 2, 3);
    /// let mut connection = ConnectionBuilder::new(descriptor).build().unwrap();
    /// connection.open().unwrap();
    /// if let Some(values) = connection.query("?LW", &[]).unwrap() {
    ///     println!("Wavelength {}nm", values[0]);
    /// }
    /// ```
    pub fn query(
        &mut self,
        command: &str,
        expected: &[&str],
    ) -> Result<Option<Vec<String>>, Error> {
        match self.query_verified(command, expected) {
            Ok(values) => Ok(Some(values)),
            Err(Error::Communication {
                kind: CommunicationKind::VerificationFailed { .. },
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::frame::Opcode;
    use crate::transport::mock::{MockRead, MockTransport};
    use crate::{DeviceDescriptor, DeviceKind};
    use std::time::Duration;

    fn open_connection(transport: &MockTransport) -> Connection<MockTransport> {
        let config = ConnectionConfig {
            ack_window: Duration::from_millis(10),
            response_window: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let mut conn = Connection::new(
            transport.clone(),
            DeviceDescriptor::new(DeviceKind::Laser, 2, 3),
            config,
        );
        conn.open().unwrap();
        conn
    }

    // Queue one complete exchange: acceptance then the response text
    fn queue_response(transport: &MockTransport, text: &str) {
        let mut state = transport.state.borrow_mut();
        state.queue(Some(Opcode::PollStatus), MockRead::ack());
        state.queue(Some(Opcode::FetchResponse), MockRead::frame(0x02, text));
    }

    #[test]
    fn test_verify_result() {
        assert!(verify_result("C=1\nLP=50.0\nLE=0", &["C", "LP", "LE"]));
        assert!(!verify_result("LP=50.0\nLE=0", &["C"]));
        assert!(verify_result("anything", &[]));
        assert!(verify_result("", &[]));
    }

    #[test]
    fn test_parse_output_none_and_empty() {
        assert_eq!(parse_output(None).unwrap(), None);
        assert_eq!(parse_output(Some("")).unwrap(), Some(vec![]));
        assert_eq!(parse_output(Some("?LP\r\n")).unwrap(), Some(vec![]));
    }

    #[test]
    fn test_parse_output_drops_header_and_trailer() {
        assert_eq!(
            parse_output(Some("\nC=1\nLP=50.0\nLE=0\n")).unwrap(),
            Some(vec!["1".to_string(), "50.0".to_string()])
        );
        assert_eq!(
            parse_output(Some("?LP\r\nLP= 50.0 \r\n>\r\n")).unwrap(),
            Some(vec!["50.0".to_string()])
        );
        assert_eq!(
            parse_output(Some("?FV\rFV=2.1=beta\r>")).unwrap(),
            Some(vec!["2.1=beta".to_string()])
        );
    }

    #[test]
    fn test_parse_output_malformed() {
        assert_eq!(
            parse_output(Some("\nC=1\ngarbage\nLE=0\n")),
            Err(Error::Communication {
                kind: CommunicationKind::MalformedResponse {
                    line: "garbage".to_string()
                }
            })
        );
    }

    #[test]
    fn test_query_first_attempt() {
        let transport = MockTransport::present();
        queue_response(&transport, "?LP\r\nLP=50.0\r\n>\r\n");
        let mut conn = open_connection(&transport);

        assert_eq!(conn.query("?LP", &[]).unwrap(), Some(vec!["50.0".to_string()]));
        assert_eq!(transport.state.borrow().count_written(Opcode::SubmitCommand), 1);
    }

    #[test]
    fn test_query_retries_unverified_response() {
        let transport = MockTransport::present();
        queue_response(&transport, "?LC\r\nLC=12.5\r\n>\r\n");
        queue_response(&transport, "?LP\r\nLP=42.0\r\n>\r\n");
        let mut conn = open_connection(&transport);

        assert_eq!(conn.query("?LP", &[]).unwrap(), Some(vec!["42.0".to_string()]));
        assert_eq!(transport.state.borrow().count_written(Opcode::SubmitCommand), 2);
    }

    #[test]
    fn test_query_retries_missing_response() {
        let transport = MockTransport::present();
        {
            let mut state = transport.state.borrow_mut();
            state.queue(Some(Opcode::PollStatus), MockRead::ack());
            // Both attempts are accepted, but every fetch times out
            state.queue(Some(Opcode::PollStatus), MockRead::ack());
        }
        let mut conn = open_connection(&transport);

        assert_eq!(conn.query("?LW", &[]).unwrap(), None);
        assert_eq!(transport.state.borrow().count_written(Opcode::SubmitCommand), 2);
    }

    #[test]
    fn test_query_verification_failed() {
        let transport = MockTransport::present();
        queue_response(&transport, "?XX\r\nXX=1\r\n>\r\n");
        queue_response(&transport, "?XX\r\nXX=1\r\n>\r\n");
        let mut conn = open_connection(&transport);

        assert_eq!(
            conn.query_verified("?LS", &["?C", "?LPS"]),
            Err(Error::Communication {
                kind: CommunicationKind::VerificationFailed {
                    command: "?LS".to_string()
                }
            })
        );
        assert_eq!(conn.query("?LS", &["?C", "?LPS"]).unwrap(), None);
    }

    #[test]
    fn test_query_alternative_tokens() {
        let transport = MockTransport::present();
        queue_response(&transport, "?C ?LPS\r\nC=0\r\nLPS=45.0\r\n>\r\n");
        let mut conn = open_connection(&transport);

        assert_eq!(
            conn.query("?LS", &["?C", "?LPS"]).unwrap(),
            Some(vec!["0".to_string(), "45.0".to_string()])
        );
    }

    #[test]
    fn test_query_malformed_response_is_an_error() {
        let transport = MockTransport::present();
        queue_response(&transport, "?LP\r\nLP 50.0\r\n>\r\n");
        let mut conn = open_connection(&transport);

        assert!(matches!(
            conn.query("?LP", &[]),
            Err(Error::Communication {
                kind: CommunicationKind::MalformedResponse { .. }
            })
        ));
    }

    #[test]
    fn test_query_transport_error_is_not_retried() {
        let transport = MockTransport::present();
        {
            let mut state = transport.state.borrow_mut();
            state.queue(Some(Opcode::PollStatus), MockRead::ack());
            state.queue(Some(Opcode::FetchResponse), MockRead::Fail);
        }
        let mut conn = open_connection(&transport);

        assert!(matches!(conn.query("?LP", &[]), Err(Error::Usb(_))));
        assert_eq!(transport.state.borrow().count_written(Opcode::SubmitCommand), 1);
    }
}
