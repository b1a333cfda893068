pub mod hardware;
pub mod interpreter;
pub mod nvs;
pub mod protocol;
pub mod record;
pub mod store;

#[cfg(feature = "link")]
pub mod link;

pub use hardware::{Capture, Delay, StdDelay, Transmit};
pub use interpreter::{Interpreter, Request, Settings};
pub use nvs::{FileStorage, MemStorage, NvStorage};
pub use record::WaveformRecord;
pub use store::{Entry, Inserted, SlotState, StoreConfig, StoreError, WaveformStore};

#[cfg(feature = "link")]
pub use link::SerialLink;
