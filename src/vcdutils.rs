use std::fs::File;
use std::io;
use std::io::ErrorKind::InvalidInput;
use std::path::{Path, PathBuf};

use ircloner_shared::{Capture, Transmit};
use vcd::{self, SimulationCommand, TimescaleUnit, Value};

/// A space longer than this ends a burst, in microseconds
pub const IDLE_GAP_US: u128 = 20_000;

pub struct VcdWriter {
    vcd: vcd::Writer<File>,
    timestamp: u64,
    wire_id: vcd::IdCode,
}

impl VcdWriter {
    /// Create a new vcd file with a single `top.ir` wire, in microseconds
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;

        let mut writer = VcdWriter {
            vcd: vcd::Writer::new(file),
            timestamp: 0,
            wire_id: vcd::IdCode::FIRST,
        };
        writer.init()?;

        Ok(writer)
    }

    fn init(&mut self) -> io::Result<()> {
        let writer = &mut self.vcd;

        // Write the header
        writer.timescale(1, TimescaleUnit::US)?;
        writer.add_module("top")?;

        // Add the wire
        let id = writer.add_wire(1, "ir")?;
        self.wire_id = id;

        writer.upscope()?;
        writer.enddefinitions()?;

        // Write the initial values
        writer.begin(SimulationCommand::Dumpvars)?;
        writer.change_scalar(id, Value::V0)?;
        writer.end()?;

        Ok(())
    }

    /// Write one burst of mark/space durations, mark first, starting at the
    /// current offset. The wire always ends low.
    pub fn write_burst(&mut self, samples: &[u16]) -> io::Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut ts = 0;
        let mut high = true;
        self.write_value(ts, high)?;

        for (i, duration) in samples.iter().enumerate() {
            ts += u64::from(*duration);
            high = !high;

            // No rising edge after a trailing space
            if high && i == samples.len() - 1 {
                break;
            }
            self.write_value(ts, high)?;
        }

        self.add_offset(ts);

        Ok(())
    }

    pub fn write_value(&mut self, ts: u64, high: bool) -> io::Result<()> {
        let offseted_ts = self.timestamp + ts;

        self.vcd.timestamp(offseted_ts)?;
        let value = if high { Value::V1 } else { Value::V0 };
        self.vcd.change_scalar(self.wire_id, value)?;

        Ok(())
    }

    pub fn add_offset(&mut self, offset: u64) {
        self.timestamp += offset;
    }
}

/// Mark/space durations in microseconds of the first burst on the `top.ir`
/// wire in `path`. The burst starts at the first rising edge and ends at the
/// first space longer than [`IDLE_GAP_US`].
pub fn vcdfile_to_durations(path: &Path) -> io::Result<Vec<u16>> {
    let file = File::open(path)?;
    let mut parser = vcd::Parser::new(&file);

    // Parse the header and find the wire
    let header = parser.parse_header()?;
    let wire = header
        .find_var(&["top", "ir"])
        .ok_or_else(|| io::Error::new(InvalidInput, "no wire top.ir"))?
        .code;

    let (scale, unit) = header.timescale.unwrap_or((1, TimescaleUnit::US));
    let femtos_per_tick = u128::from(scale) * unit_in_femtos(unit)?;

    let mut current_ts = 0;
    let mut edges: Vec<(u64, bool)> = Vec::new();

    for command_result in parser {
        use vcd::Command::*;
        let command = command_result?;
        match command {
            ChangeScalar(i, v) if i == wire => {
                let high = v == Value::V1;
                // Only level changes are edges
                if edges.last().map_or(high, |(_, level)| *level != high) {
                    edges.push((current_ts, high));
                }
            }
            Timestamp(ts) => current_ts = ts,
            _ => (),
        }
    }

    let mut durations = Vec::new();

    for pair in edges.windows(2) {
        let ticks = u128::from(pair[1].0.saturating_sub(pair[0].0));
        let us = ticks * femtos_per_tick / 1_000_000_000;

        let space = !pair[0].1;
        if space && us > IDLE_GAP_US {
            break;
        }
        durations.push(us.min(u128::from(u16::MAX)) as u16);
    }

    Ok(durations)
}

fn unit_in_femtos(unit: TimescaleUnit) -> io::Result<u128> {
    Ok(match unit {
        TimescaleUnit::S => 1_000_000_000_000_000,
        TimescaleUnit::MS => 1_000_000_000_000,
        TimescaleUnit::US => 1_000_000_000,
        TimescaleUnit::NS => 1_000_000,
        TimescaleUnit::PS => 1_000,
        TimescaleUnit::FS => 1,
        #[allow(unreachable_patterns)]
        _ => return Err(io::Error::new(InvalidInput, "unsupported timescale")),
    })
}

/// Captures by reading a recorded trace
pub struct VcdCapture {
    path: PathBuf,
}

impl VcdCapture {
    pub fn new(path: &Path) -> Self {
        VcdCapture {
            path: path.to_path_buf(),
        }
    }
}

impl Capture for VcdCapture {
    fn decode_one(&mut self) -> io::Result<Vec<u16>> {
        log::info!("Capturing from {}", self.path.display());
        vcdfile_to_durations(&self.path)
    }
}

/// Transmits into a trace file
pub struct VcdTransmitter {
    writer: VcdWriter,
    /// Idle time between bursts, in microseconds
    gap: u64,
}

impl VcdTransmitter {
    pub fn create(path: &Path, gap_ms: u32) -> io::Result<Self> {
        Ok(VcdTransmitter {
            writer: VcdWriter::create(path)?,
            gap: u64::from(gap_ms) * 1000,
        })
    }
}

impl Transmit for VcdTransmitter {
    fn transmit(&mut self, samples: &[u16], carrier_khz: u16) -> io::Result<()> {
        log::debug!("Writing {} samples ({} kHz carrier)", samples.len(), carrier_khz);

        self.writer.write_burst(samples)?;
        self.writer.add_offset(self.gap);

        Ok(())
    }
}
