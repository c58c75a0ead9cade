//! Sample-format conversion elements (bit depth, channel layout, rate).

use std::any::Any;

use crate::error::Result;
use crate::format::SampleFormat;

use super::pcm::{process_frames, read_sample, write_sample};
use super::{ElementKind, ProcessStatus, TransformElement};

/// Re-quantize samples to the target bit depth.
#[derive(Debug, Default)]
pub struct BitConvert {
    input: SampleFormat,
    out_bits: u16,
}

impl BitConvert {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformElement for BitConvert {
    fn kind(&self) -> ElementKind {
        ElementKind::BitConvert
    }

    fn open(&mut self, input: SampleFormat, target: SampleFormat) -> Result<SampleFormat> {
        self.input = input;
        self.out_bits = target.bits_per_sample;
        Ok(SampleFormat {
            bits_per_sample: target.bits_per_sample,
            ..input
        })
    }

    fn process(
        &mut self,
        input: &mut Vec<u8>,
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<ProcessStatus> {
        let in_bits = self.input.bits_per_sample;
        let out_bits = self.out_bits;
        let width = self.input.sample_bytes();
        Ok(process_frames(
            input,
            output,
            limit,
            self.input.frame_bytes(),
            |frame, out| {
                for sample in frame.chunks_exact(width) {
                    let value = read_sample(sample, in_bits) as i64;
                    let widened = value << (32 - in_bits);
                    write_sample(widened >> (32 - out_bits), out_bits, out);
                }
            },
        ))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Up- or down-mix interleaved frames to the target channel count.
///
/// Mono output averages every input channel, mono input is replicated, and
/// other layouts map output channel `c` to input channel `c % in_channels`.
#[derive(Debug, Default)]
pub struct ChannelConvert {
    input: SampleFormat,
    out_channels: u16,
}

impl ChannelConvert {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformElement for ChannelConvert {
    fn kind(&self) -> ElementKind {
        ElementKind::ChannelConvert
    }

    fn open(&mut self, input: SampleFormat, target: SampleFormat) -> Result<SampleFormat> {
        self.input = input;
        self.out_channels = target.channels;
        Ok(SampleFormat {
            channels: target.channels,
            ..input
        })
    }

    fn process(
        &mut self,
        input: &mut Vec<u8>,
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<ProcessStatus> {
        let bits = self.input.bits_per_sample;
        let width = self.input.sample_bytes();
        let in_channels = self.input.channels as usize;
        let out_channels = self.out_channels as usize;
        let mut samples = vec![0_i64; in_channels];
        Ok(process_frames(
            input,
            output,
            limit,
            self.input.frame_bytes(),
            |frame, out| {
                for (slot, sample) in samples.iter_mut().zip(frame.chunks_exact(width)) {
                    *slot = read_sample(sample, bits) as i64;
                }
                if out_channels == 1 {
                    let sum: i64 = samples.iter().sum();
                    write_sample(sum / in_channels as i64, bits, out);
                } else {
                    for channel in 0..out_channels {
                        write_sample(samples[channel % in_channels], bits, out);
                    }
                }
            },
        ))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Streaming linear-interpolation resampler.
///
/// Keeps the last input frame and the fractional read position between
/// calls, so output length tracks `in_frames * out_rate / in_rate` across
/// arbitrary write splits. The position is an exact integer phase measured
/// in units of `1 / out_rate` input frames.
#[derive(Debug, Default)]
pub struct RateConvert {
    input: SampleFormat,
    in_rate: u64,
    out_rate: u64,
    phase: u64,
    previous: Option<Vec<i64>>,
}

impl RateConvert {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransformElement for RateConvert {
    fn kind(&self) -> ElementKind {
        ElementKind::RateConvert
    }

    fn open(&mut self, input: SampleFormat, target: SampleFormat) -> Result<SampleFormat> {
        self.input = input;
        self.in_rate = input.sample_rate as u64;
        self.out_rate = target.sample_rate as u64;
        self.reset();
        Ok(SampleFormat {
            sample_rate: target.sample_rate,
            ..input
        })
    }

    fn process(
        &mut self,
        input: &mut Vec<u8>,
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<ProcessStatus> {
        let bits = self.input.bits_per_sample;
        let width = self.input.sample_bytes();
        let (in_rate, out_rate) = (self.in_rate, self.out_rate);
        let phase = &mut self.phase;
        let previous = &mut self.previous;
        Ok(process_frames(
            input,
            output,
            limit,
            self.input.frame_bytes(),
            |frame, out| {
                let current: Vec<i64> = frame
                    .chunks_exact(width)
                    .map(|sample| read_sample(sample, bits) as i64)
                    .collect();
                if let Some(prev) = previous.as_ref() {
                    while *phase < out_rate {
                        for (a, b) in prev.iter().zip(current.iter()) {
                            let delta = (*b - *a) as f64 * *phase as f64 / out_rate as f64;
                            write_sample(*a + delta.round() as i64, bits, out);
                        }
                        *phase += in_rate;
                    }
                    *phase -= out_rate;
                }
                *previous = Some(current);
            },
        ))
    }

    fn reset(&mut self) {
        self.phase = 0;
        self.previous = None;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
