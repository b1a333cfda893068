//! Line oriented command interpreter.
//!
//! Reads one command per line, drives the capture and transmit hardware
//! and keeps the waveform store up to date. All user facing text lives
//! here; the store never talks to the console.

use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::hardware::{Capture, Delay, Transmit, DEFAULT_CARRIER_KHZ};
use crate::nvs::NvStorage;
use crate::record::{WaveformRecord, MAX_NAME_LEN, RAW_BUFFER_LENGTH};
use crate::store::{Inserted, StoreError, WaveformStore};

pub const HELP: &str = "\
Available commands:
  record           - capture and name a new IR command
  play <name>      - send a saved command
  list             - show saved commands
  delete <name>    - remove a saved command
  delete all       - remove all saved commands
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    Record,
    Play(&'a str),
    Delete(&'a str),
    DeleteAll,
    List,
    Help,
    Unknown(&'a str),
}

impl<'a> Request<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();

        match line {
            "record" => Request::Record,
            "list" => Request::List,
            "help" => Request::Help,
            _ => {
                if let Some(name) = argument(line, "play") {
                    Request::Play(name)
                } else if let Some(name) = argument(line, "delete") {
                    if name.eq_ignore_ascii_case("all") {
                        Request::DeleteAll
                    } else {
                        Request::Delete(name)
                    }
                } else {
                    Request::Unknown(line)
                }
            }
        }
    }
}

/// The argument of `<verb> <arg>`
fn argument<'a>(line: &'a str, verb: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(verb)?;

    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    Some(rest.trim()).filter(|arg| !arg.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Transmissions per `play`
    pub repeat: u32,
    /// Pause after each transmission
    pub repeat_delay_ms: u32,
    pub carrier_khz: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            repeat: 10,
            repeat_delay_ms: 1000,
            carrier_khz: DEFAULT_CARRIER_KHZ,
        }
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("console: {0}")]
    Console(#[from] io::Error),
    #[error("capture failed: {0}")]
    Capture(io::Error),
    #[error("transmit failed: {0}")]
    Transmit(io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Interpreter<S, C, T, D> {
    store: WaveformStore<S>,
    capture: C,
    transmit: T,
    delay: D,
    settings: Settings,
}

impl<S, C, T, D> Interpreter<S, C, T, D>
where
    S: NvStorage,
    C: Capture,
    T: Transmit,
    D: Delay,
{
    pub fn new(store: WaveformStore<S>, capture: C, transmit: T, delay: D, settings: Settings) -> Self {
        Interpreter {
            store,
            capture,
            transmit,
            delay,
            settings,
        }
    }

    pub fn store(&mut self) -> &mut WaveformStore<S> {
        &mut self.store
    }

    /// Serve commands from `input` until it runs dry.
    ///
    /// Failing commands are reported on `output` and the loop carries on.
    /// Only a broken console ends it early.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> io::Result<()> {
        writeln!(output, "IR Command Manager Ready")?;
        output.write_all(HELP.as_bytes())?;
        output.flush()?;

        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                log::debug!("Input closed");
                return Ok(());
            }

            self.handle_line(&line, &mut input, &mut output)?;
        }
    }

    /// Handle a single command line. Prompts read their answers from `input`.
    pub fn handle_line<R: BufRead, W: Write>(
        &mut self,
        line: &str,
        input: &mut R,
        output: &mut W,
    ) -> io::Result<()> {
        let request = Request::parse(line);
        log::debug!("{:?}", request);

        let res = match request {
            Request::Record => self.record(input, output),
            Request::Play(name) => self.play(name, output),
            Request::Delete(name) => self.delete(name, output),
            Request::DeleteAll => self.delete_all(output),
            Request::List => self.list(output),
            Request::Help => Ok(()),
            Request::Unknown(_) => writeln!(
                output,
                "Unknown command. Use: record, play <name>, delete <name>, delete all, list"
            )
            .map_err(Error::from),
        };

        match res {
            Ok(()) => {}
            Err(Error::Console(e)) => return Err(e),
            Err(e) => {
                log::error!("{}", e);
                writeln!(output, "Error: {}", e)?;
            }
        }

        output.write_all(HELP.as_bytes())?;
        output.flush()
    }

    fn record<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> Result<(), Error> {
        writeln!(output, "Waiting for IR signal...")?;
        output.flush()?;

        let samples = self.capture.decode_one().map_err(Error::Capture)?;
        if samples.is_empty() {
            writeln!(output, "No IR signal captured.")?;
            return Ok(());
        }
        if samples.len() > RAW_BUFFER_LENGTH {
            log::warn!(
                "Captured {} samples, keeping the first {}",
                samples.len(),
                RAW_BUFFER_LENGTH
            );
        }
        writeln!(output, "IR signal captured!")?;

        write!(output, "Enter a name for this command (max {} chars): ", MAX_NAME_LEN)?;
        output.flush()?;

        let name = match read_answer(input)? {
            Some(name) => name,
            None => {
                writeln!(output, "Canceled.")?;
                return Ok(());
            }
        };

        let record = WaveformRecord::new(&name, &samples);
        if record.is_empty() {
            writeln!(output, "Name must not be empty. Canceled.")?;
            return Ok(());
        }
        if record.name() != name {
            writeln!(output, "Name shortened to '{}'", record.name())?;
        }

        let res = self.store.insert(&record, |_slot| {
            write!(output, "Name already exists. Overwrite? (y/n): ")?;
            output.flush()?;

            Ok(matches!(read_answer(input)?, Some(answer) if answer.eq_ignore_ascii_case("y")))
        });

        match res {
            Ok(Inserted::New(slot)) | Ok(Inserted::Overwritten(slot)) => {
                writeln!(output, "Saved command '{}' to slot {}", record.name(), slot)?;
            }
            Ok(Inserted::Declined(_)) => writeln!(output, "Canceled.")?,
            Err(StoreError::Full) => writeln!(output, "EEPROM full. Could not save command.")?,
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    fn play<W: Write>(&mut self, name: &str, output: &mut W) -> Result<(), Error> {
        let slot = match self.store.find_by_name(name)? {
            Some(slot) => slot,
            None => {
                writeln!(output, "Command not found.")?;
                return Ok(());
            }
        };

        let record = self.store.load(slot)?;
        let Settings {
            repeat,
            repeat_delay_ms,
            carrier_khz,
        } = self.settings;

        writeln!(output, "Sending command '{}' {} times...", record.name(), repeat)?;

        for attempt in 1..=repeat {
            writeln!(output, "Sending '{}': Attempt {} of {}", record.name(), attempt, repeat)?;
            output.flush()?;

            self.transmit
                .transmit(record.samples(), carrier_khz)
                .map_err(Error::Transmit)?;
            self.delay.delay_ms(repeat_delay_ms);
        }

        Ok(())
    }

    fn delete<W: Write>(&mut self, name: &str, output: &mut W) -> Result<(), Error> {
        match self.store.find_by_name(name)? {
            Some(slot) => {
                self.store.clear(slot)?;
                writeln!(output, "Deleted command '{}'", name)?;
            }
            None => writeln!(output, "Command not found.")?,
        }
        Ok(())
    }

    fn delete_all<W: Write>(&mut self, output: &mut W) -> Result<(), Error> {
        self.store.clear_all()?;
        writeln!(output, "All commands deleted.")?;
        Ok(())
    }

    fn list<W: Write>(&mut self, output: &mut W) -> Result<(), Error> {
        writeln!(output, "Saved commands:")?;

        for entry in self.store.list_occupied()? {
            let note = if entry.verified { "" } else { " (unverified)" };
            writeln!(output, "  [{}] {}{}", entry.slot, entry.name, note)?;
        }
        Ok(())
    }
}

/// Next input line, trimmed. `None` once the input is closed.
fn read_answer<R: BufRead>(input: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();

    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(Request::parse("record\n"), Request::Record);
        assert_eq!(Request::parse("  list  "), Request::List);
        assert_eq!(Request::parse("help"), Request::Help);
        assert_eq!(Request::parse("play tv-power"), Request::Play("tv-power"));
        assert_eq!(Request::parse("play   TV  \r\n"), Request::Play("TV"));
        assert_eq!(Request::parse("delete amp"), Request::Delete("amp"));
        assert_eq!(Request::parse("delete all"), Request::DeleteAll);
        assert_eq!(Request::parse("delete ALL"), Request::DeleteAll);
    }

    #[test]
    fn parse_unknown() {
        assert_eq!(Request::parse("Record"), Request::Unknown("Record"));
        assert_eq!(Request::parse("play"), Request::Unknown("play"));
        assert_eq!(Request::parse("play  "), Request::Unknown("play"));
        assert_eq!(Request::parse("playtv"), Request::Unknown("playtv"));
        assert_eq!(Request::parse("deleteall"), Request::Unknown("deleteall"));
        assert_eq!(Request::parse(""), Request::Unknown(""));
    }
}
