//! Device discovery.  Scans the bus once for controllers and once for
//! lasers, and turns the textual listing of each scan into
//! [`DeviceDescriptor`]s.
use crate::device::{DeviceDescriptor, DeviceKind};
use crate::error::InternalError;
use crate::transport::Transport;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn bus_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Bus (\S+) Address").expect("valid bus pattern"))
}

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Address (\S+), Spec").expect("valid address pattern"))
}

/// Scans the bus for controllers and lasers.
///
/// Never fails: a scan which can't be performed, or a listing line which
/// can't be parsed, is logged and skipped.
///
/// # Returns
/// A map from [`DeviceDescriptor::unique_id`] to descriptor.  Empty if
/// nothing was found.
///
/// # Example
/// ```rust,no_run
/// use stradus::{discover, UsbTransport};
///
/// let transport = UsbTransport::new().unwrap();
/// for (id, device) in discover(&transport) {
///     println!("{id}: {device}");
/// }
/// ```
pub fn discover<T: Transport>(transport: &T) -> BTreeMap<String, DeviceDescriptor> {
    trace!("discover");
    let mut found = BTreeMap::new();

    for kind in [DeviceKind::Controller, DeviceKind::Laser] {
        let (vid, pid) = kind.ids();
        let listing = match transport.show_devices(vid, pid) {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to scan the bus for {kind} devices {vid:04x}:{pid:04x}: {e}");
                continue;
            }
        };

        for line in listing.lines() {
            if let Some(device) = parse_listing_line(kind, line) {
                debug!("Discovered {kind} {device}");
                // Repeats collapse, last one wins
                found.insert(device.unique_id(), device);
            }
        }
    }

    info!("Discovered {} device(s)", found.len());
    found
}

/// Get the bus and address from one line of a device listing.
///
/// Each is matched independently, so either may be `None` when the other is
/// present.  A field which is present but isn't a number is logged and
/// returned as `None`.
pub fn parse_bus_and_address(line: &str) -> (Option<u8>, Option<u8>) {
    let bus = parse_field(bus_pattern(), "bus", line);
    let address = parse_field(address_pattern(), "address", line);
    (bus, address)
}

fn parse_field(pattern: &Regex, field: &'static str, line: &str) -> Option<u8> {
    let captured = pattern.captures(line)?.get(1)?.as_str();
    match captured.parse::<u8>() {
        Ok(value) => Some(value),
        Err(_) => {
            let e = InternalError::DiscoveryParse {
                field,
                line: line.to_string(),
            };
            warn!("{e}");
            None
        }
    }
}

// A record is only accepted when both the bus and address are positive
fn parse_listing_line(kind: DeviceKind, line: &str) -> Option<DeviceDescriptor> {
    if line.trim().is_empty() {
        return None;
    }

    match parse_bus_and_address(line) {
        (Some(bus), Some(address)) if bus > 0 && address > 0 => {
            Some(DeviceDescriptor::new(kind, bus, address))
        }
        (bus, address) => {
            warn!("Dropping {kind} listing line {line:?}: bus {bus:?} address {address:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_parse_valid_line() {
        assert_eq!(
            parse_bus_and_address("Bus 002 Address 003, Spec 2.00"),
            (Some(2), Some(3))
        );
        assert_eq!(
            parse_bus_and_address("Bus 001 Address 015, Spec 1.10"),
            (Some(1), Some(15))
        );
    }

    #[test]
    fn test_parse_missing_fields() {
        assert_eq!(
            parse_bus_and_address("Address 003, Spec 2.00"),
            (None, Some(3))
        );
        assert_eq!(parse_bus_and_address("Bus 002, Spec 2.00"), (None, None));
        assert_eq!(parse_bus_and_address("Spec 2.00"), (None, None));
        assert_eq!(parse_bus_and_address(""), (None, None));
    }

    #[test]
    fn test_parse_non_numeric_fields() {
        assert_eq!(
            parse_bus_and_address("Bus ABC Address 003, Spec 2.00"),
            (None, Some(3))
        );
        assert_eq!(
            parse_bus_and_address("Bus 002 Address XYZ, Spec 2.00"),
            (Some(2), None)
        );
    }

    #[test]
    fn test_discover_nothing_found() {
        let transport = MockTransport::default();
        assert!(discover(&transport).is_empty());
    }

    #[test]
    fn test_discover_controllers_and_lasers() {
        let transport = MockTransport::default();
        {
            let mut state = transport.state.borrow_mut();
            state.listings.insert(
                (CONTROLLER_VID, CONTROLLER_PID),
                "DEVICE ID 04d8:003f on Bus 001 Address 005, Spec 2.00\n".to_string(),
            );
            state.listings.insert(
                (LASER_VID, LASER_PID),
                concat!(
                    "DEVICE ID 201a:1001 on Bus 002 Address 003, Spec 2.00\n",
                    "DEVICE ID 201a:1001 on Bus ABC Address 004, Spec 2.00\n",
                    "DEVICE ID 201a:1001 on Bus 002 Address 000, Spec 2.00\n",
                    "garbage\n",
                    "DEVICE ID 201a:1001 on Bus 003 Address 007, Spec 2.00\n",
                    "DEVICE ID 201a:1001 on Bus 002 Address 003, Spec 2.00\n",
                )
                .to_string(),
            );
        }

        let found = discover(&transport);
        assert_eq!(found.len(), 3);

        let controller = &found["controller_04d8_003f_1_5"];
        assert!(controller.is_controller);
        assert_eq!((controller.bus, controller.address), (1, 5));

        let laser = &found["laser_201a_1001_2_3"];
        assert!(!laser.is_controller);
        assert_eq!(laser.vendor_id, LASER_VID);
        assert!(found.contains_key("laser_201a_1001_3_7"));
    }

    #[test]
    fn test_discover_survives_failed_scan() {
        let transport = MockTransport::default();
        {
            let mut state = transport.state.borrow_mut();
            state.fail_listing.push((CONTROLLER_VID, CONTROLLER_PID));
            state.listings.insert(
                (CONTROLLER_VID, CONTROLLER_PID),
                "DEVICE ID 04d8:003f on Bus 001 Address 005, Spec 2.00\n".to_string(),
            );
            state.listings.insert(
                (LASER_VID, LASER_PID),
                "DEVICE ID 201a:1001 on Bus 002 Address 003, Spec 2.00\n".to_string(),
            );
        }

        let found = discover(&transport);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("laser_201a_1001_2_3"));

        // And the other way round
        {
            let mut state = transport.state.borrow_mut();
            state.fail_listing = vec![(LASER_VID, LASER_PID)];
        }
        let found = discover(&transport);
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("controller_04d8_003f_1_5"));
    }
}
