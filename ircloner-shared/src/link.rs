use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use postcard::{take_from_bytes, to_slice};
use serialport::{SerialPort, SerialPortInfo};

use crate::hardware::{Capture, Transmit};
use crate::protocol::{Command, Info, RawData, Reply, TransmitData};

const BAUD_RATE: u32 = 115_200;
/// Port read timeout, the granularity of all waits
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long the device gets to acknowledge a command
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Capture and transmit device on a serial port
#[derive(Default)]
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    capture_timeout: Option<Duration>,
    /// Bytes read past the end of the last reply
    pending: Vec<u8>,
}

impl SerialLink {
    pub fn new() -> Self {
        SerialLink::default()
    }

    /// Give up a capture after `timeout`. Without one a capture waits
    /// until a signal arrives.
    pub fn set_capture_timeout(&mut self, timeout: Option<Duration>) {
        self.capture_timeout = timeout;
    }

    pub fn list_ports() -> Result<Vec<SerialPortInfo>, serialport::Error> {
        serialport::available_ports()
    }

    pub fn connect<P: AsRef<Path>>(&mut self, path: P) -> Result<(), serialport::Error> {
        let path = path.as_ref().to_string_lossy();
        let port = serialport::new(path, BAUD_RATE)
            .timeout(POLL_INTERVAL)
            .open()?;

        self.port.replace(port);
        self.pending.clear();

        Ok(())
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::ErrorKind::NotConnected.into())
    }

    pub fn send_command(&mut self, cmd: &Command) -> io::Result<()> {
        let mut buf = [0u8; 512];
        let req = to_slice(cmd, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        self.port()?.write_all(req)
    }

    /// Read until a complete reply has arrived or `deadline` has passed
    pub fn read_reply(&mut self, deadline: Option<Instant>) -> io::Result<Reply> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        read_frame(port, &mut self.pending, deadline)
    }

    pub fn reply_ok(&mut self) -> io::Result<()> {
        match self.read_reply(Some(Instant::now() + REPLY_TIMEOUT))? {
            Reply::Ok => Ok(()),
            reply => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected Ok, got {:?}", reply),
            )),
        }
    }

    pub fn info(&mut self) -> io::Result<Info> {
        self.send_command(&Command::Info)?;

        match self.read_reply(Some(Instant::now() + REPLY_TIMEOUT))? {
            Reply::Info { info } => Ok(info),
            reply => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected Info, got {:?}", reply),
            )),
        }
    }

    fn wait_capture(&mut self) -> io::Result<RawData> {
        let deadline = self.capture_timeout.map(|timeout| Instant::now() + timeout);

        loop {
            match self.read_reply(deadline)? {
                Reply::CaptureReply { data } => return Ok(data),
                reply => log::debug!("Ignoring {:?} while capturing", reply),
            }
        }
    }
}

/// Read one reply from `reader`, starting with the bytes in `pending`.
/// Whatever follows the reply is left in `pending` for the next call.
fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    deadline: Option<Instant>,
) -> io::Result<Reply> {
    let mut recvbuf = [0u8; 1024];
    let mut offset = pending.len().min(recvbuf.len());
    recvbuf[..offset].copy_from_slice(&pending[..offset]);
    pending.clear();

    loop {
        if let Some((reply, rest)) = parse_reply(&recvbuf[..offset])? {
            pending.extend_from_slice(rest);
            return Ok(reply);
        }

        if offset == recvbuf.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "reply too large"));
        }

        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no reply from device"));
        }

        match reader.read(&mut recvbuf[offset..]) {
            Ok(readlen) => offset += readlen,
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(e),
        }
    }
}

/// The reply at the start of `buf` and the bytes after it, `None` while
/// the frame is still incomplete
fn parse_reply(buf: &[u8]) -> io::Result<Option<(Reply, &[u8])>> {
    match take_from_bytes::<Reply>(buf) {
        Ok((reply, rest)) => Ok(Some((reply, rest))),
        Err(postcard::Error::DeserializeUnexpectedEnd) => Ok(None),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
    }
}

impl Capture for SerialLink {
    fn decode_one(&mut self) -> io::Result<Vec<u16>> {
        log::info!("Capturing");

        // Set device in capture mode
        self.send_command(&Command::Capture)?;
        self.reply_ok()?;

        let res = self.wait_capture();

        // Back to idle, also when the capture failed
        if let Err(e) = self.send_command(&Command::Idle).and_then(|_| self.reply_ok()) {
            log::warn!("Device did not return to idle: {}", e);
        }

        let data = res?;
        log::debug!("Got CaptureReply data: {:?}", data);

        // Leading entry is the idle time before the first edge
        Ok(data.to_micros().into_iter().skip(1).collect())
    }
}

impl Transmit for SerialLink {
    fn transmit(&mut self, samples: &[u16], carrier_khz: u16) -> io::Result<()> {
        let cmd = Command::TransmitRaw(TransmitData {
            carrier_khz,
            data: RawData::from_samples(1_000_000, samples),
        });

        log::debug!("Sending {} samples at {} kHz", samples.len(), carrier_khz);

        self.send_command(&cmd)?;
        self.reply_ok()
    }
}
