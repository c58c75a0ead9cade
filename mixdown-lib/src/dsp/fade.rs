//! Linear fade element.

use std::any::Any;

use crate::error::Result;
use crate::format::SampleFormat;

use super::pcm::{process_frames, read_sample, write_sample};
use super::{ElementKind, ProcessStatus, TransformElement};

const DEFAULT_FADE_MS: u32 = 50;

/// Ramps the signal in from silence after open, and out on request.
#[derive(Debug, Clone)]
pub struct FadeElement {
    fade_ms: u32,
    format: SampleFormat,
    total_frames: u64,
    elapsed_frames: u64,
    fading_in: bool,
}

impl FadeElement {
    pub fn new(fade_ms: u32) -> Self {
        Self {
            fade_ms,
            format: SampleFormat::default(),
            total_frames: 0,
            elapsed_frames: 0,
            fading_in: true,
        }
    }

    /// Restart the ramp towards full level.
    pub fn fade_in(&mut self) {
        self.restart(true);
    }

    /// Restart the ramp towards silence.
    pub fn fade_out(&mut self) {
        self.restart(false);
    }

    pub fn is_fading_in(&self) -> bool {
        self.fading_in
    }

    fn restart(&mut self, fading_in: bool) {
        let current = self.current_gain();
        self.fading_in = fading_in;
        let progress = if fading_in { current } else { 1.0 - current };
        self.elapsed_frames = (progress * self.total_frames as f64) as u64;
    }

    fn current_gain(&self) -> f64 {
        ramp_gain(self.elapsed_frames, self.total_frames, self.fading_in)
    }
}

fn ramp_gain(elapsed: u64, total: u64, fading_in: bool) -> f64 {
    if total == 0 {
        return if fading_in { 1.0 } else { 0.0 };
    }
    let progress = elapsed.min(total) as f64 / total as f64;
    if fading_in {
        progress
    } else {
        1.0 - progress
    }
}

impl Default for FadeElement {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_MS)
    }
}

impl TransformElement for FadeElement {
    fn kind(&self) -> ElementKind {
        ElementKind::Fade
    }

    fn open(&mut self, input: SampleFormat, _target: SampleFormat) -> Result<SampleFormat> {
        self.format = input;
        self.total_frames = input.sample_rate as u64 * self.fade_ms as u64 / 1000;
        self.reset();
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
        let total = self.total_frames;
        let fading_in = self.fading_in;
        let elapsed = &mut self.elapsed_frames;
        Ok(process_frames(
            input,
            output,
            limit,
            self.format.frame_bytes(),
            |frame, out| {
                let gain = ramp_gain(*elapsed, total, fading_in);
                for sample in frame.chunks_exact(width) {
                    let value = read_sample(sample, bits) as f64 * gain;
                    write_sample(value.round() as i64, bits, out);
                }
                if *elapsed < total {
                    *elapsed += 1;
                }
            },
        ))
    }

    fn reset(&mut self) {
        self.elapsed_frames = 0;
        self.fading_in = true;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(element: &mut FadeElement, frames: usize, value: i16) -> Vec<i16> {
        let mut input: Vec<u8> = std::iter::repeat(value)
            .take(frames)
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut output = Vec::new();
        element.process(&mut input, &mut output, usize::MAX).unwrap();
        output
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn fades_in_from_silence() {
        let mut element = FadeElement::new(1);
        let format = SampleFormat::new(4_000, 16, 1);
        element.open(format, format).unwrap();
        let out = run(&mut element, 6, 1000);
        assert_eq!(out, vec![0, 250, 500, 750, 1000, 1000]);
    }

    #[test]
    fn fade_out_reaches_silence() {
        let mut element = FadeElement::new(1);
        let format = SampleFormat::new(4_000, 16, 1);
        element.open(format, format).unwrap();
        run(&mut element, 8, 1000);
        element.fade_out();
        let out = run(&mut element, 6, 1000);
        assert_eq!(out, vec![1000, 750, 500, 250, 0, 0]);
        assert!(!element.is_fading_in());
    }
}
