//! What the interpreter needs from the infrared hardware.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// Carrier used for playback unless configured otherwise
pub const DEFAULT_CARRIER_KHZ: u16 = 38;

/// Infrared receiver
pub trait Capture {
    /// Block until one waveform is decoded. Returns the durations in
    /// microseconds, starting with a mark.
    fn decode_one(&mut self) -> io::Result<Vec<u16>>;
}

/// Infrared transmitter
pub trait Transmit {
    fn transmit(&mut self, samples: &[u16], carrier_khz: u16) -> io::Result<()>;
}

pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl<C: Capture + ?Sized> Capture for Box<C> {
    fn decode_one(&mut self) -> io::Result<Vec<u16>> {
        (**self).decode_one()
    }
}

impl<T: Transmit + ?Sized> Transmit for Box<T> {
    fn transmit(&mut self, samples: &[u16], carrier_khz: u16) -> io::Result<()> {
        (**self).transmit(samples, carrier_khz)
    }
}

// A device that both receives and transmits is shared between the two roles

impl<C: Capture> Capture for Rc<RefCell<C>> {
    fn decode_one(&mut self) -> io::Result<Vec<u16>> {
        self.borrow_mut().decode_one()
    }
}

impl<T: Transmit> Transmit for Rc<RefCell<T>> {
    fn transmit(&mut self, samples: &[u16], carrier_khz: u16) -> io::Result<()> {
        self.borrow_mut().transmit(samples, carrier_khz)
    }
}
