use std::cell::RefCell;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use structopt::StructOpt;

use ircloner_shared::record::EEPROM_SIZE;
use ircloner_shared::{
    Capture, FileStorage, Interpreter, MemStorage, NvStorage, SerialLink, Settings, StdDelay,
    StoreConfig, Transmit, WaveformStore,
};

mod vcdutils;

use crate::vcdutils::{VcdCapture, VcdTransmitter};

#[derive(Debug, StructOpt)]
#[structopt(name = "ircloner", about = "Capture, name and replay infrared remote control commands")]
struct Opt {
    /// Serial Device. Defaults to the first port found, or /dev/ttyACM0
    #[structopt(long = "device", parse(from_os_str))]
    serial: Option<PathBuf>,
    /// EEPROM image holding the saved commands
    #[structopt(long, parse(from_os_str), default_value = "ircloner.eeprom")]
    eeprom: PathBuf,
    /// Keep saved commands in memory only
    #[structopt(long)]
    volatile: bool,
    /// Capture from the top.ir wire of a vcd file instead of the device
    #[structopt(long, parse(from_os_str))]
    capture_vcd: Option<PathBuf>,
    /// Write transmissions to a vcd file instead of the device
    #[structopt(long, parse(from_os_str))]
    transmit_vcd: Option<PathBuf>,
    /// Give up waiting for a signal after this many seconds
    #[structopt(long)]
    capture_timeout: Option<u64>,
    /// Transmissions per play
    #[structopt(long, default_value = "10")]
    repeat: u32,
    /// Pause after each transmission, in milliseconds
    #[structopt(long, default_value = "1000")]
    repeat_delay: u32,
    /// Carrier frequency in kHz
    #[structopt(long, default_value = "38")]
    carrier: u16,
    /// Treat saved commands without occupancy marker as free slots
    #[structopt(long)]
    verify_marker: bool,
    #[structopt(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let loglevel = if opt.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut logger = env_logger::Builder::new();
    logger.filter_level(loglevel);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    logger.init();

    let settings = Settings {
        repeat: opt.repeat,
        repeat_delay_ms: opt.repeat_delay,
        carrier_khz: opt.carrier,
    };

    let storage: Box<dyn NvStorage> = if opt.volatile {
        Box::new(MemStorage::new(EEPROM_SIZE))
    } else {
        let storage = FileStorage::open(&opt.eeprom, EEPROM_SIZE)
            .with_context(|| format!("Could not open {}", opt.eeprom.display()))?;
        Box::new(storage)
    };

    let store = WaveformStore::with_config(
        storage,
        StoreConfig {
            verify_marker: opt.verify_marker,
        },
    );

    let mut device = None;

    let capture: Box<dyn Capture> = match &opt.capture_vcd {
        Some(path) => Box::new(VcdCapture::new(path)),
        None => Box::new(shared_device(&mut device, &opt)?),
    };

    let transmit: Box<dyn Transmit> = match &opt.transmit_vcd {
        Some(path) => Box::new(
            VcdTransmitter::create(path, settings.repeat_delay_ms)
                .with_context(|| format!("Could not create {}", path.display()))?,
        ),
        None => Box::new(shared_device(&mut device, &opt)?),
    };

    let mut interpreter = Interpreter::new(store, capture, transmit, StdDelay, settings);

    let stdin = io::stdin();
    let stdout = io::stdout();
    interpreter.run(stdin.lock(), stdout.lock())?;

    Ok(())
}

/// The device link, connected on first use and shared by capture and transmit
fn shared_device(
    device: &mut Option<Rc<RefCell<SerialLink>>>,
    opt: &Opt,
) -> Result<Rc<RefCell<SerialLink>>> {
    if let Some(link) = device {
        return Ok(Rc::clone(link));
    }

    let link = Rc::new(RefCell::new(connect(opt)?));
    device.replace(Rc::clone(&link));
    Ok(link)
}

fn connect(opt: &Opt) -> Result<SerialLink> {
    let path_serialport = if let Some(path) = &opt.serial {
        path.clone()
    } else {
        SerialLink::list_ports()
            .ok()
            .and_then(|ports| ports.first().map(|port| PathBuf::from(&port.port_name)))
            .unwrap_or_else(|| PathBuf::from("/dev/ttyACM0"))
    };

    log::info!("Connecting to {}", path_serialport.display());

    let mut link = SerialLink::new();
    link.connect(&path_serialport)
        .with_context(|| format!("Could not connect to {}", path_serialport.display()))?;
    link.set_capture_timeout(opt.capture_timeout.map(Duration::from_secs));

    match link.info() {
        Ok(info) => log::info!(
            "Device version: {}, samplerate: {}",
            info.version,
            info.samplerate
        ),
        Err(e) => log::warn!("Device did not answer Info: {}", e),
    }

    Ok(link)
}
