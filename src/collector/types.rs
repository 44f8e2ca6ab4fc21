//! Raw sample types produced by the optical sensor.
//!
//! A sample is one reading of both LED channels. Samples are immutable once
//! read and are handed from the driver to the window collector by value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One two-channel reading from the reflective PPG sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Red LED intensity
    pub red: u32,
    /// Infrared LED intensity
    pub ir: u32,
}

impl Sample {
    pub fn new(red: u32, ir: u32) -> Self {
        Self { red, ir }
    }

    /// Get the reading for one channel.
    pub fn channel(&self, channel: Channel) -> u32 {
        match channel {
            Channel::Red => self.red,
            Channel::Ir => self.ir,
        }
    }
}

/// Which LED channel the heart rate is estimated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Red,
    #[default]
    Ir,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Red => write!(f, "red"),
            Channel::Ir => write!(f, "ir"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "red" => Ok(Channel::Red),
            "ir" => Ok(Channel::Ir),
            other => Err(format!("unknown channel '{other}' (expected red or ir)")),
        }
    }
}

/// The result of one non-blocking FIFO poll.
///
/// Either list may be empty when the sensor had no new data ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBatch {
    pub red: Vec<u32>,
    pub ir: Vec<u32>,
}

impl SampleBatch {
    pub fn new(red: Vec<u32>, ir: Vec<u32>) -> Self {
        Self { red, ir }
    }

    /// An empty poll result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A batch is only usable when both channels delivered data.
    pub fn has_data(&self) -> bool {
        !self.red.is_empty() && !self.ir.is_empty()
    }

    /// Pair the channels into samples. Unmatched trailing readings are dropped
    /// so both channel buffers always stay the same length.
    pub fn into_samples(self) -> impl Iterator<Item = Sample> {
        self.red
            .into_iter()
            .zip(self.ir)
            .map(|(red, ir)| Sample::new(red, ir))
    }
}
