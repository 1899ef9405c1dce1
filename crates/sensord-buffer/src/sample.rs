//! Sample - one stamped measurement
//!
//! **Time base**: timestamps are microseconds on a monotonic clock anchored to
//! the first use in this process. They are unaffected by wall-clock changes
//! (NTP, manual adjustments) and fit in a `u64`.

use std::sync::OnceLock;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Global anchor point for monotonic time
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Monotonic time as microseconds since the process first asked for it
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// One immutable measurement produced at some stage of the pipeline.
///
/// The sequence number is assigned by the [`RingBuffer`](crate::RingBuffer)
/// that stored the sample; the timestamp is either the write time or the
/// hardware timestamp passed through by the producer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample<T> {
    sequence: u64,
    timestamp_us: u64,
    value: T,
}

impl<T> Sample<T> {
    /// Create a sample with an explicit sequence number and timestamp
    pub fn new(sequence: u64, timestamp_us: u64, value: T) -> Self {
        Self {
            sequence,
            timestamp_us,
            value,
        }
    }

    /// Write sequence assigned by the owning buffer
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Timestamp in microseconds (see module docs for the time base)
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Measurement value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consume the sample and return its value
    pub fn into_value(self) -> T {
        self.value
    }
}
