//! Instrument-control layer.
//!
//! Every laser parameter is described once in [`PARAMETERS`], and read or
//! written through the generic [`Laser::get`] and [`Laser::set`], rather
//! than through a method per parameter.  Queries go through the verified
//! query policy, so a parameter which can't be read is reported as `None`
//! ("unknown") rather than failing the control session.
use crate::connection::{Connection, ConnectionBuilder, ConnectionConfig};
use crate::device::discover;
use crate::transport::{Transport, UsbTransport};
use crate::{CommunicationKind, DeviceDescriptor, Error};

use bitflags::bitflags;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a parameter's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// 0 or 1 on the wire
    Flag,
    Integer,
    /// Written with one decimal place, zero padded to 5 characters
    Float,
    Text,
}

/// One laser parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// The name used by [`Laser::get`] and [`Laser::set`]
    pub name: &'static str,
    /// The laser's mnemonic.  Queried as `?<command>`, set as
    /// `<command>=<value>`
    pub command: &'static str,
    pub value_type: ValueType,
    pub settable: bool,
    /// Tokens a response must contain to be trusted.  Empty means the query
    /// itself
    pub verify: &'static [&'static str],
    pub description: &'static str,
}

impl Parameter {
    /// The query command, e.g. `?LP`
    pub fn query(&self) -> String {
        format!("?{}", self.command)
    }

    /// The setter command for `value`, e.g. `LP=012.5`
    pub fn setter(&self, value: &Value) -> String {
        format!("{}={value}", self.command)
    }
}

const fn param(
    name: &'static str,
    command: &'static str,
    value_type: ValueType,
    settable: bool,
    description: &'static str,
) -> Parameter {
    Parameter {
        name,
        command,
        value_type,
        settable,
        verify: &[],
        description,
    }
}

use ValueType::{Flag, Float, Integer, Text};

/// Every parameter the laser supports
pub const PARAMETERS: &[Parameter] = &[
    param("control_mode", "C", Integer, true, "Control mode, 0 power or 1 current"),
    param("delay", "DELAY", Flag, true, "Emission delay, 0 enabled or 1 disabled"),
    param("external_power_control", "EPC", Flag, true, "External power control"),
    param("current", "LC", Float, true, "Laser diode current (mA)"),
    param("emission", "LE", Flag, true, "Laser emission on or off"),
    param("power", "LP", Float, true, "Laser power (mW)"),
    param("pulse_power", "PP", Float, true, "Pulse power (mW)"),
    param("pulsed_power", "PUL", Flag, true, "Pulsed power mode"),
    param("base_plate_temperature", "BPT", Float, false, "Base plate temperature (C)"),
    param("computer_control", "CC", Flag, false, "Computer control"),
    param("fault_code", "FC", Integer, false, "Fault code bitmask"),
    param("fault_text", "FD", Text, false, "Fault description"),
    param("firmware_protocol", "FP", Text, false, "Firmware protocol"),
    param("firmware_version", "FV", Text, false, "Firmware version"),
    param("interlock", "IL", Flag, false, "Interlock status"),
    param("laser_hours", "LH", Float, false, "Laser operating hours"),
    param("laser_id", "LI", Text, false, "Laser identification"),
    param("laser_power_setting", "LPS", Float, false, "Laser power setting (mW)"),
    Parameter {
        verify: &["?C", "?LPS", "?LCS", "?EPC", "?DELAY"],
        ..param("laser_status", "LS", Text, false, "Laser status summary")
    },
    param("wavelength", "LW", Integer, false, "Laser wavelength (nm)"),
    param("max_power", "MAXP", Float, false, "Maximum laser power (mW)"),
    param("optical_block_temperature", "OBT", Float, false, "Optical block temperature (C)"),
    param("rated_power", "RP", Float, false, "Rated laser power (mW)"),
];

/// Look up a parameter by name
///
/// # Errors
/// [`Error::Args`] if there is no such parameter
pub fn parameter(name: &str) -> Result<&'static Parameter, Error> {
    PARAMETERS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| Error::Args {
            message: format!("Unknown laser parameter {name:?}"),
        })
}

/// A typed parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Parse a value of type `value_type` from a response field
    ///
    /// # Errors
    /// [`CommunicationKind::MalformedResponse`] if `raw` isn't a value of that
    /// type
    pub fn parse(value_type: ValueType, raw: &str) -> Result<Self, Error> {
        let malformed = || -> Error {
            CommunicationKind::MalformedResponse {
                line: raw.to_string(),
            }
            .into()
        };
        match value_type {
            ValueType::Flag => match raw {
                "0" => Ok(Value::Flag(false)),
                "1" => Ok(Value::Flag(true)),
                _ => Err(malformed()),
            },
            ValueType::Integer => raw.parse().map(Value::Integer).map_err(|_| malformed()),
            ValueType::Float => raw.parse().map(Value::Float).map_err(|_| malformed()),
            ValueType::Text => Ok(Value::Text(raw.to_string())),
        }
    }

    /// Parse a value supplied by a user, e.g. on the command line
    ///
    /// # Errors
    /// [`Error::Args`] if `raw` isn't a value of type `value_type`
    pub fn from_arg(value_type: ValueType, raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        let value = match (value_type, raw.to_ascii_lowercase().as_str()) {
            (ValueType::Flag, "on" | "true") => Ok(Value::Flag(true)),
            (ValueType::Flag, "off" | "false") => Ok(Value::Flag(false)),
            _ => Value::parse(value_type, raw),
        };
        value.map_err(|_| Error::Args {
            message: format!("{raw:?} is not a valid {value_type:?} value"),
        })
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Flag(_) => ValueType::Flag,
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::Text(_) => ValueType::Text,
        }
    }
}

/// Formats as the laser expects values in setter commands
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Flag(on) => write!(f, "{}", u8::from(*on)),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:05.1}"),
            Value::Text(value) => write!(f, "{value}"),
        }
    }
}

bitflags! {
    /// The laser's fault code.  No flags set means emission is active.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LaserStatus: u32 {
        const STANDBY = 1;
        const WARMUP = 2;
        const OUT_OF_RANGE = 4;
        const INVALID_COMMAND = 8;
        const INTERLOCK_OPEN = 16;
        const TEC_OFF = 32;
        const DIODE_OVER_CURRENT = 64;
        const DIODE_TEMPERATURE_FAULT = 128;
        const BASE_PLATE_TEMPERATURE_FAULT = 256;
        const BUFFER_OVERFLOW = 512;
        const EEPROM_ERROR = 1024;
        const WATCH_DOG_ERROR = 8192;
        const FATAL_ERROR = 16384;
        const DIODE_END_OF_LIFE = 32768;
    }
}

impl LaserStatus {
    /// Decode a raw fault code.  Undefined bits are retained
    pub fn from_code(code: u32) -> Self {
        Self::from_bits_retain(code)
    }

    pub fn is_emission_active(&self) -> bool {
        self.is_empty()
    }

    /// The names of the set flags, lowest bit first.  `EMISSION_ACTIVE` if
    /// there are none
    pub fn active_faults(&self) -> Vec<&'static str> {
        if self.is_emission_active() {
            return vec!["EMISSION_ACTIVE"];
        }
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// A Stradus laser
///
/// # Example
/// ```rust,no_run
/// use stradus::{lasers, Value};
///
/// for mut laser in lasers().unwrap() {
///     laser.open().unwrap();
///     println!("{:?}", laser.get_value("wavelength").unwrap());
///     laser.set("power", Value::Float(12.5)).unwrap();
///     laser.on().unwrap();
/// }
/// ```
#[derive(Debug)]
pub struct Laser<T: Transport = UsbTransport> {
    connection: Connection<T>,
}

impl Laser<UsbTransport> {
    /// Create an unopened laser with the default configuration
    pub fn from_descriptor(descriptor: DeviceDescriptor) -> Result<Self, Error> {
        Ok(Self::new(ConnectionBuilder::new(descriptor).build()?))
    }
}

/// Public Laser functions
impl<T: Transport> Laser<T> {
    pub fn new(connection: Connection<T>) -> Self {
        Self { connection }
    }

    pub fn open(&mut self) -> Result<(), Error> {
        self.connection.open()
    }

    pub fn close(&mut self) {
        self.connection.close()
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.connection.descriptor()
    }

    pub fn connection_mut(&mut self) -> &mut Connection<T> {
        &mut self.connection
    }

    /// Send a raw command.  See [`Connection::send_command`]
    pub fn send(&mut self, command: &str, write_only: bool) -> Result<Option<String>, Error> {
        self.connection.send_command(command, write_only)
    }

    /// Query a parameter, returning the raw values of its response
    ///
    /// # Returns
    /// * `Ok(Some(Vec<String>))` - The values
    /// * `Ok(None)` - The response couldn't be verified
    /// * `Err(Error::Args)` - Unknown parameter
    /// * `Err(Error)` - A transport error, or a malformed response
    pub fn get(&mut self, name: &str) -> Result<Option<Vec<String>>, Error> {
        trace!("Laser::get {name}");
        let param = parameter(name)?;
        self.connection.query(&param.query(), param.verify)
    }

    /// Query a parameter and parse its first value as the parameter's type.
    /// `None` if the value is unknown.
    pub fn get_value(&mut self, name: &str) -> Result<Option<Value>, Error> {
        let param = parameter(name)?;
        match self.get(name)?.as_deref() {
            Some([first, ..]) => Value::parse(param.value_type, first).map(Some),
            Some([]) => {
                debug!("No value in the response for {name}");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Set a parameter.  This is a write-only command.
    ///
    /// # Returns
    /// * `Ok(Some("OK"))` - The laser accepted the command
    /// * `Ok(_)` - The laser did not acknowledge in time.  The command may
    ///   still have been applied
    /// * `Err(Error::Args)` - Unknown or read-only parameter, or a value of
    ///   the wrong type
    pub fn set(&mut self, name: &str, value: Value) -> Result<Option<String>, Error> {
        trace!("Laser::set {name} {value:?}");
        let param = parameter(name)?;
        if !param.settable {
            return Err(Error::Args {
                message: format!("Laser parameter {name} is read-only"),
            });
        }
        if value.value_type() != param.value_type {
            return Err(Error::Args {
                message: format!(
                    "Laser parameter {name} takes a {:?} value, not {value:?}",
                    param.value_type
                ),
            });
        }

        let reply = self.connection.send_command(&param.setter(&value), true)?;
        if reply.is_none() {
            warn!("Setting {name} to {value} was not acknowledged");
        }
        Ok(reply)
    }

    /// Turn laser emission on
    pub fn on(&mut self) -> Result<Option<String>, Error> {
        self.set("emission", Value::Flag(true))
    }

    /// Turn laser emission off
    pub fn off(&mut self) -> Result<Option<String>, Error> {
        self.set("emission", Value::Flag(false))
    }

    /// Read and decode the fault code.  `None` if it is unknown
    pub fn fault_code(&mut self) -> Result<Option<LaserStatus>, Error> {
        match self.get_value("fault_code")? {
            Some(Value::Integer(code)) => match u32::try_from(code) {
                Ok(code) => Ok(Some(LaserStatus::from_code(code))),
                Err(_) => Err(CommunicationKind::MalformedResponse {
                    line: code.to_string(),
                }
                .into()),
            },
            _ => Ok(None),
        }
    }
}

/// Discover the lasers reachable through `transport`, skipping controllers.
/// The lasers are returned unopened, in discovery order.
pub fn lasers_on<T: Transport + Clone>(
    transport: &T,
    config: &ConnectionConfig,
) -> Vec<Laser<T>> {
    discover(transport)
        .into_values()
        .filter(|descriptor| !descriptor.is_controller)
        .map(|descriptor| {
            info!("Found laser {descriptor}");
            Laser::new(Connection::new(transport.clone(), descriptor, config.clone()))
        })
        .collect()
}

/// Discover all lasers on the host's USB bus, with the default
/// configuration
pub fn lasers() -> Result<Vec<Laser>, Error> {
    let transport = UsbTransport::new()?;
    Ok(lasers_on(&transport, &ConnectionConfig::default()))
}
