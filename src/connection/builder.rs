use crate::connection::{Connection, ConnectionConfig};
use crate::transport::UsbTransport;
use crate::{DeviceDescriptor, Error};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use rusb::{Context, UsbContext};
use std::time::Duration;

/// A builder pattern for creating [`Connection`] instances using a
/// [`UsbTransport`] and custom configuration.
///
/// # Examples
///
/// ## A simple example
///
/// ```no_run
/// use stradus::{ConnectionBuilder, DeviceDescriptor, DeviceKind};
///
/// let descriptor = DeviceDescriptor::new(DeviceKind::Laser, 2, 3);
/// let mut connection = ConnectionBuilder::new(descriptor).build().unwrap();
/// connection.open().unwrap();
/// ```
///
/// ## A more complex example
///
/// ```no_run
/// use stradus::{ConnectionBuilder, DeviceDescriptor, DeviceKind};
/// use std::time::Duration;
///
/// let descriptor = DeviceDescriptor::new(DeviceKind::Laser, 2, 3);
/// let connection = ConnectionBuilder::new(descriptor)
///     .retries(3)
///     .retry_backoff(Duration::from_millis(250))
///     .response_window(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// ```
pub struct ConnectionBuilder {
    descriptor: DeviceDescriptor,
    usb_context: Option<Context>,
    config: ConnectionConfig,
    log_target: Option<String>,
}

impl ConnectionBuilder {
    /// Creates a new [`ConnectionBuilder`] for the given device, with a
    /// default [`ConnectionConfig`]
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        ConnectionBuilder {
            descriptor,
            usb_context: None,
            config: ConnectionConfig::default(),
            log_target: None,
        }
    }

    /// Builds and returns a new, unopened, [`Connection`].
    ///
    /// # Returns
    /// * `Ok(Connection)` - the constructed Connection if successful
    /// * `Err(Error)` - if the USB context couldn't be created
    pub fn build(&mut self) -> Result<Connection<UsbTransport>, Error> {
        let transport = match self.usb_context.take() {
            Some(context) => UsbTransport::with_context(context),
            None => {
                trace!("Creating default USB context");
                let mut context = Context::new()?;
                context.set_log_level(rusb::LogLevel::Info);
                UsbTransport::with_context(context)
            }
        };

        let mut connection = Connection::new(transport, self.descriptor, self.config.clone());
        if let Some(target) = self.log_target.take() {
            connection.log_target = target;
        }
        Ok(connection)
    }

    /// Sets a custom USB context.  This allows setting the rusb debug log
    /// level via `context.set_log_level()`.
    ///
    /// If not set, a new [`rusb::Context`] will be created with
    /// `LogLevel::Info`
    pub fn context(&mut self, context: Context) -> &mut Self {
        self.usb_context = Some(context);
        self
    }

    /// Replaces the whole configuration
    pub fn config(&mut self, config: ConnectionConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Sets the log target under which this connection logs.  Defaults to
    /// `stradus::<descriptor>`
    pub fn log_target(&mut self, target: &str) -> &mut Self {
        self.log_target = Some(target.to_string());
        self
    }

    pub fn read_timeout(&mut self, duration: Duration) -> &mut Self {
        self.config.read_timeout = duration;
        self
    }

    pub fn write_timeout(&mut self, duration: Duration) -> &mut Self {
        self.config.write_timeout = duration;
        self
    }

    /// Sets the number of extra open attempts made after the first fails
    pub fn retries(&mut self, retries: u32) -> &mut Self {
        self.config.retries = retries;
        self
    }

    /// Sets the wait between failed open attempts.  Defaults to none
    pub fn retry_backoff(&mut self, duration: Duration) -> &mut Self {
        self.config.retry_backoff = duration;
        self
    }

    pub fn ack_window(&mut self, duration: Duration) -> &mut Self {
        self.config.ack_window = duration;
        self
    }

    pub fn response_window(&mut self, duration: Duration) -> &mut Self {
        self.config.response_window = duration;
        self
    }

    pub fn poll_interval(&mut self, duration: Duration) -> &mut Self {
        self.config.poll_interval = duration;
        self
    }
}
