//! # Sample Frames
//!
//! Turns one transport message into one block of mono `f32` PCM samples.
//!
//! ## Wire Format:
//! - **Encoding**: IEEE-754 32-bit float, little-endian
//! - **Channels**: Mono
//! - **Length**: Any; every 4 bytes make one sample
//!
//! A message whose length is not a multiple of 4 is truncated to the largest
//! whole number of samples. The leftover bytes belong to no sample and are
//! dropped with the message; they are never prefixed onto the next one.

use byteorder::{ByteOrder, LittleEndian};

/// Number of bytes that encode one sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 4;

/// One block of PCM samples received as a unit.
///
/// A frame is built from a single message, handed to the detector once and
/// then dropped. It owns its samples, so no two connections can ever observe
/// the same buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleFrame {
    samples: Vec<f32>,
}

impl SampleFrame {
    /// Wrap already-decoded samples.
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Decode a message payload of little-endian `f32` samples.
    ///
    /// Produces `floor(bytes.len() / 4)` samples; the trailing
    /// `bytes.len() % 4` bytes are ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let sample_count = bytes.len() / BYTES_PER_SAMPLE;
        let whole = &bytes[..sample_count * BYTES_PER_SAMPLE];

        let mut samples = vec![0.0f32; sample_count];
        LittleEndian::read_f32_into(whole, &mut samples);

        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable access for in-place preprocessing (DC removal).
    pub(crate) fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }
}

impl From<Vec<f32>> for SampleFrame {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}
