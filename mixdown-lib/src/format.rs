//! PCM sample format description.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const DEFAULT_BITS: u16 = 16;
const DEFAULT_CHANNELS: u16 = 2;

/// Interleaved signed PCM layout: rate, sample width and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl SampleFormat {
    pub const fn new(sample_rate: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            channels,
        }
    }

    /// Reject formats the converters cannot handle.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(RenderError::invalid_arg("sample rate must be non-zero"));
        }
        if self.channels == 0 {
            return Err(RenderError::invalid_arg("channel count must be non-zero"));
        }
        if !matches!(self.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(RenderError::InvalidArg(format!(
                "unsupported bits per sample: {}",
                self.bits_per_sample
            )));
        }
        Ok(())
    }

    /// Bytes per single sample of one channel.
    pub fn sample_bytes(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.sample_bytes() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_bytes() * self.sample_rate as usize
    }

    /// Whole-frame byte count covering `ms` milliseconds.
    pub fn bytes_for_ms(&self, ms: u32) -> usize {
        let frames = self.sample_rate as usize * ms as usize / 1000;
        frames * self.frame_bytes()
    }

    /// Duration in milliseconds of `bytes` bytes of audio.
    pub fn ms_for_bytes(&self, bytes: usize) -> u32 {
        let rate = self.bytes_per_second();
        if rate == 0 {
            return 0;
        }
        (bytes as u64 * 1000 / rate as u64) as u32
    }

    /// Round `bytes` down to a whole number of frames.
    pub fn align_down(&self, bytes: usize) -> usize {
        let frame = self.frame_bytes().max(1);
        bytes - bytes % frame
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_BITS, DEFAULT_CHANNELS)
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}bit/{}ch",
            self.sample_rate, self.bits_per_sample, self.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_48k_16bit_stereo() {
        let format = SampleFormat::default();
        assert_eq!(format, SampleFormat::new(48_000, 16, 2));
        assert_eq!(format.frame_bytes(), 4);
        assert_eq!(format.bytes_per_second(), 192_000);
    }

    #[test]
    fn block_sizes_follow_period() {
        let format = SampleFormat::new(8_000, 16, 1);
        assert_eq!(format.bytes_for_ms(20), 320);
        assert_eq!(format.ms_for_bytes(320), 20);
        assert_eq!(format.align_down(321), 320);
    }

    #[test]
    fn validate_rejects_odd_widths() {
        assert!(SampleFormat::new(44_100, 12, 2).validate().is_err());
        assert!(SampleFormat::new(0, 16, 2).validate().is_err());
        assert!(SampleFormat::new(44_100, 24, 6).validate().is_ok());
    }
}
