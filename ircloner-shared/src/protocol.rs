use serde::{Deserialize, Serialize};

/// Samples that fit in one [`RawData`]
pub const RAW_DATA_CAPACITY: usize = 128;

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum Command {
    Idle,
    Info,
    /// Start a capture
    Capture,
    TransmitRaw(TransmitData),
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum Reply {
    Ok,
    CaptureReply { data: RawData },
    Info { info: Info },
}

/// Edge to edge durations, in ticks of `samplerate`
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct RawData {
    pub samplerate: u32,
    pub len: u32,
    pub bufs: [[u16; 32]; 4],
}

impl RawData {
    /// Anything past `RAW_DATA_CAPACITY` is dropped
    pub fn from_samples(samplerate: u32, samples: &[u16]) -> Self {
        let len = samples.len().min(RAW_DATA_CAPACITY);
        let mut data = RawData {
            samplerate,
            len: len as u32,
            bufs: [[0; 32]; 4],
        };

        for (i, sample) in samples[..len].iter().enumerate() {
            data.bufs[i / 32][i % 32] = *sample;
        }

        data
    }

    pub fn samples(&self) -> Vec<u16> {
        let len = (self.len as usize).min(RAW_DATA_CAPACITY);
        self.bufs.concat()[..len].to_vec()
    }

    /// Durations in microseconds
    pub fn to_micros(&self) -> Vec<u16> {
        if self.samplerate == 0 {
            return Vec::new();
        }

        self.samples()
            .into_iter()
            .map(|ticks| {
                let us = u64::from(ticks) * 1_000_000 / u64::from(self.samplerate);
                us.min(u64::from(u16::MAX)) as u16
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct TransmitData {
    pub carrier_khz: u16,
    /// Microsecond durations, mark first
    pub data: RawData,
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct Info {
    pub version: u32,
    /// Bitfield of transmitters
    pub transmitters: u32,
    /// Samplerate
    pub samplerate: u32,
}
