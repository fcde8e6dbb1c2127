//! Command line access to Stradus lasers.
//!
//! Lists the lasers on the bus, and sends raw commands to, reads parameters
//! from and sets parameters on one of them.  Unless `--bus` and `--address`
//! are given, the first laser found is used.
//!
//! All logging is done to stderr and can be controlled via the `RUST_LOG`
//! environment variable.
use stradus::laser::{parameter, PARAMETERS};
use stradus::{
    discover, ConnectionBuilder, DeviceDescriptor, DeviceKind, Error, Laser, UsbTransport, Value,
};

use clap::{Parser, Subcommand};
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Bus number of the laser to use
    #[arg(long, requires = "address")]
    bus: Option<u8>,

    /// Address of the laser to use
    #[arg(long, requires = "bus")]
    address: Option<u8>,

    /// Transport timeout for each frame read, in ms
    #[arg(long, default_value_t = 40)]
    read_timeout: u64,

    /// Transport timeout for each frame write, in ms
    #[arg(long, default_value_t = 1000)]
    write_timeout: u64,

    /// Time allowed for the laser to accept a command, in ms
    #[arg(long, default_value_t = 50)]
    ack_window: u64,

    /// Time allowed for the laser to respond to a command, in ms
    #[arg(long, default_value_t = 1000)]
    response_window: u64,

    /// Extra attempts made to open the laser
    #[arg(long, default_value_t = 1)]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the Stradus devices on the bus
    List,
    /// List the laser parameters which can be read and set
    Params,
    /// Send a raw command, e.g. "?LP", and print the response
    Send {
        command: String,
        /// Don't wait for a response, only for the laser to accept the command
        #[arg(long)]
        write_only: bool,
    },
    /// Read a parameter
    Get { name: String },
    /// Set a parameter
    Set { name: String, value: String },
    /// Decode the laser's fault code
    Status,
}

fn list() -> Result<(), Error> {
    let transport = UsbTransport::new()?;
    let devices = discover(&transport);
    if devices.is_empty() {
        println!("No Stradus devices found");
    }
    for (id, device) in devices {
        println!("{id:<28} {device}");
    }
    Ok(())
}

fn params() {
    for param in PARAMETERS {
        println!(
            "{:<26} {:<6} {:<8} {:<3} {}",
            param.name,
            param.command,
            format!("{:?}", param.value_type),
            if param.settable { "rw" } else { "r" },
            param.description
        );
    }
}

fn find_laser(args: &Args) -> Result<DeviceDescriptor, Error> {
    if let (Some(bus), Some(address)) = (args.bus, args.address) {
        return Ok(DeviceDescriptor::new(DeviceKind::Laser, bus, address));
    }

    let transport = UsbTransport::new()?;
    discover(&transport)
        .into_values()
        .find(|device| !device.is_controller)
        .ok_or_else(|| Error::Args {
            message: "No Stradus lasers found".to_string(),
        })
}

fn open_laser(args: &Args) -> Result<Laser, Error> {
    let descriptor = find_laser(args)?;
    info!("Using laser {descriptor}");

    let connection = ConnectionBuilder::new(descriptor)
        .read_timeout(Duration::from_millis(args.read_timeout))
        .write_timeout(Duration::from_millis(args.write_timeout))
        .ack_window(Duration::from_millis(args.ack_window))
        .response_window(Duration::from_millis(args.response_window))
        .retries(args.retries)
        .build()?;
    let mut laser = Laser::new(connection);
    laser.open()?;
    Ok(laser)
}

fn execute(args: &Args) -> Result<(), Error> {
    match &args.command {
        Command::List => list()?,
        Command::Params => params(),
        Command::Send {
            command,
            write_only,
        } => match open_laser(args)?.send(command, *write_only)? {
            Some(response) => println!("{}", response.trim_end()),
            None => println!("No response"),
        },
        Command::Get { name } => match open_laser(args)?.get(name)? {
            Some(values) => println!("{name} = {}", values.join(", ")),
            None => println!("{name} unknown"),
        },
        Command::Set { name, value } => {
            let value = Value::from_arg(parameter(name)?.value_type, value)?;
            match open_laser(args)?.set(name, value)? {
                Some(_) => println!("{name} set"),
                None => println!("{name} not acknowledged"),
            }
        }
        Command::Status => match open_laser(args)?.fault_code()? {
            Some(status) => {
                println!("Fault code {}", status.bits());
                for fault in status.active_faults() {
                    println!("  {fault}");
                }
            }
            None => println!("Fault code unknown"),
        },
    }

    Ok(())
}

fn main() {
    env_logger::builder().init();
    let args = Args::parse();

    match execute(&args) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            error!("Error: {e}");
            eprintln!("Error: {e}");
            std::process::exit(e.to_errno());
        }
    }
}
