use std::{
    env,
    io::{Read, Write},
    net::TcpStream,
    path::Path,
    time::Duration,
};

use inquire::{Select, Text};
use serialport::SerialPort;
use siglent_ctl::{
    config::SessionConfig,
    mode::{ConstMode, ModeKey, OverallMode, SubMode},
    registry::InstrumentRegistry,
    session::Session,
    transport::LineTransport,
    value::TypedValue,
};
use tracing_subscriber::EnvFilter;

// Configuration constants - adjust these for your setup
const BAUD_RATE: u32 = 115200;
const CONFIG_FILE: &str = "siglent.toml";
const STABILIZATION_DELAY_MS: u64 = 1000;

/// The instrument is reachable either over its USB virtual serial port or over LAN.
enum Link {
    Serial(Box<dyn SerialPort>),
    Tcp(TcpStream),
}

pub struct PortWrapper(Link);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused => embedded_io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            std::io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            // TCP read timeouts surface as WouldBlock on some platforms.
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                embedded_io::ErrorKind::TimedOut
            }
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match &mut self.0 {
            Link::Serial(port) => port.read(buf),
            Link::Tcp(stream) => stream.read(buf),
        }
        .map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match &mut self.0 {
            Link::Serial(port) => port.write(buf),
            Link::Tcp(stream) => stream.write(buf),
        }
        .map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match &mut self.0 {
            Link::Serial(port) => port.flush(),
            Link::Tcp(stream) => stream.flush(),
        }
        .map_err(IoError)
    }
}

fn open_link(target: &str, timeout: Duration) -> Link {
    // Anything with a colon that isn't a Windows COM port is a LAN address.
    if target.contains(':') && !target.starts_with("COM") {
        let stream = TcpStream::connect(target).expect("Failed to connect");
        stream
            .set_read_timeout(Some(timeout))
            .expect("Failed to set read timeout");
        Link::Tcp(stream)
    } else {
        let port = serialport::new(target, BAUD_RATE)
            .timeout(timeout)
            .open()
            .expect("Failed to open serial port");
        Link::Serial(port)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = SessionConfig::load(Some(Path::new(CONFIG_FILE))).expect("Invalid configuration");

    // Serial port or host:port from the command line, or pick a serial port interactively
    let target = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found! Pass host:5025 to connect over LAN.");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();

        Select::new("Select a serial port:", port_names)
            .prompt()
            .expect("Failed to select port")
    });

    println!("Using: {}", target);

    let link = open_link(&target, Duration::from_millis(config.transport.timeout_ms));
    let transport: LineTransport<PortWrapper, 512> =
        LineTransport::from_config(PortWrapper(link), &config.transport)
            .expect("Invalid transport configuration");

    let mut session = Session::open(transport, &InstrumentRegistry::default(), config)
        .expect("Failed to open session");

    let id = session.identification();
    println!("Instrument: {} (S/N {}, firmware {})", id, id.serial, id.firmware);
    println!("Active mode: {:?}", session.active_mode());

    // Pick a mode to work in
    let modes = vec![
        ModeKey::constant(OverallMode::Basic, ConstMode::Voltage),
        ModeKey::constant(OverallMode::Basic, ConstMode::Current),
        ModeKey::constant(OverallMode::Basic, ConstMode::Power),
        ModeKey::constant(OverallMode::Basic, ConstMode::Resistance),
        ModeKey::dynamic(ConstMode::Current, SubMode::Continuous),
        ModeKey::constant(OverallMode::Battery, ConstMode::Current),
        ModeKey::bare(OverallMode::Led),
    ];
    let mode = Select::new("Select a mode:", modes)
        .prompt()
        .expect("Failed to select mode");
    let mode = session.transition(mode).expect("Failed to change mode");
    println!("Now in {}", mode);

    // Edit one parameter of that mode
    let descriptor = session
        .engine()
        .table()
        .lookup(mode)
        .expect("No descriptor for mode");
    let paths: Vec<String> = descriptor
        .params
        .iter()
        .filter(|spec| spec.is_writable())
        .map(|spec| descriptor.wire_path(spec.path))
        .collect();
    let path = Select::new("Select a parameter:", paths)
        .prompt()
        .expect("Failed to select parameter");
    let (lo, hi) = session.bounds(path.as_str()).expect("Unknown parameter");
    let current = session
        .current_value(&path)
        .map(ToString::to_string)
        .unwrap_or_default();
    let text = Text::new(&format!("New value for {} [{} .. {}]:", path, lo, hi))
        .with_default(&current)
        .prompt()
        .expect("Failed to read value");
    let value = match text.trim().parse::<f64>() {
        Ok(number) => TypedValue::Float(number),
        Err(_) => TypedValue::Text(text.trim().to_owned()),
    };

    let outcome = session
        .commit([(path.as_str(), value)])
        .expect("Failed to commit");
    println!("Written: {:?}", outcome.written);
    for clamped in &outcome.clamped {
        println!(
            "{} clamped from {} to {}",
            clamped.path, clamped.requested, clamped.committed
        );
    }

    session.set_load(true).expect("Failed to enable load");
    println!("Load enabled");

    std::thread::sleep(Duration::from_millis(STABILIZATION_DELAY_MS));

    let measurements = session.refresh_measurements().expect("Failed to measure");
    println!("{:#?}", measurements);

    session.set_load(false).expect("Failed to disable load");
    println!("Load disabled");

    println!("\n--- Saved settings ---");
    println!("{}", session.to_json().expect("Failed to serialize settings"));
}
