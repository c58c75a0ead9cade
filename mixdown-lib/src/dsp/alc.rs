//! Fixed-gain level control element.

use std::any::Any;

use crate::error::Result;
use crate::format::SampleFormat;

use super::pcm::{process_frames, read_sample, write_sample};
use super::{ElementKind, ProcessStatus, TransformElement};

const DEFAULT_GAIN: f32 = 1.0;

/// Scales every sample by a linear gain.
#[derive(Debug, Clone)]
pub struct AlcElement {
    gain: f32,
    format: SampleFormat,
}

impl AlcElement {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: sanitize_gain(gain),
            format: SampleFormat::default(),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Change the gain; takes effect on the next processed frame.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = sanitize_gain(gain);
    }
}

impl Default for AlcElement {
    fn default() -> Self {
        Self::new(DEFAULT_GAIN)
    }
}

impl TransformElement for AlcElement {
    fn kind(&self) -> ElementKind {
        ElementKind::Alc
    }

    fn open(&mut self, input: SampleFormat, _target: SampleFormat) -> Result<SampleFormat> {
        self.format = input;
        Ok(input)
    }

    fn process(
        &mut self,
        input: &mut Vec<u8>,
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<ProcessStatus> {
        let bits = self.format.bits_per_sample;
        let width = self.format.sample_bytes();
        let gain = self.gain as f64;
        Ok(process_frames(
            input,
            output,
            limit,
            self.format.frame_bytes(),
            |frame, out| {
                for sample in frame.chunks_exact(width) {
                    let value = read_sample(sample, bits) as f64 * gain;
                    write_sample(value.round() as i64, bits, out);
                }
            },
        ))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() && gain >= 0.0 {
        gain
    } else {
        DEFAULT_GAIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unity_gain_is_transparent() {
        let mut element = AlcElement::default();
        element
            .open(SampleFormat::new(8_000, 16, 1), SampleFormat::new(8_000, 16, 1))
            .unwrap();
        let mut input: Vec<u8> = [5_i16, -7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let expected = input.clone();
        let mut output = Vec::new();
        element.process(&mut input, &mut output, 64).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn gain_scales_and_saturates() {
        let mut element = AlcElement::new(2.0);
        element
            .open(SampleFormat::new(8_000, 16, 1), SampleFormat::new(8_000, 16, 1))
            .unwrap();
        let mut input: Vec<u8> = [100_i16, 30_000].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut output = Vec::new();
        element.process(&mut input, &mut output, 64).unwrap();
        assert_eq!(read_sample(&output[..2], 16), 200);
        assert_eq!(read_sample(&output[2..], 16), i16::MAX as i32);
    }

    #[test]
    fn non_finite_gain_falls_back_to_unity() {
        let mut element = AlcElement::new(0.5);
        element.set_gain(f32::NAN);
        assert_eq!(element.gain(), 1.0);
    }
}
