//! Incremental PCM decoding for streamed synthesis audio
//!
//! The TTS endpoint streams mono 16-bit little-endian samples with no
//! framing, so a network read can end mid-sample. The decoder carries
//! the odd trailing byte into the next read.

/// Streaming decoder from raw LE bytes to normalized f32 samples
#[derive(Debug, Default)]
pub struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    /// Create a decoder with no carried byte
    #[must_use]
    pub const fn new() -> Self {
        Self { carry: None }
    }

    /// Decode all complete samples in `bytes`, in [-1, 1]
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
        let mut iter = bytes.iter().copied();

        if let Some(low) = self.carry.take() {
            match iter.next() {
                Some(high) => samples.push(to_f32(low, high)),
                None => {
                    self.carry = Some(low);
                    return samples;
                }
            }
        }

        loop {
            let Some(low) = iter.next() else { break };
            match iter.next() {
                Some(high) => samples.push(to_f32(low, high)),
                None => {
                    self.carry = Some(low);
                    break;
                }
            }
        }

        samples
    }
}

fn to_f32(low: u8, high: u8) -> f32 {
    f32::from(i16::from_le_bytes([low, high])) / 32768.0
}
