//! Multi-source sample mixer with per-source gain envelopes.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};
use crate::format::SampleFormat;

use super::pcm::{read_sample, store_sample};

/// Linear fade applied when a stream is first mixed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainEnvelope {
    pub initial_gain: f32,
    pub target_gain: f32,
    pub transition_ms: u32,
}

impl GainEnvelope {
    pub fn new(initial_gain: f32, target_gain: f32, transition_ms: u32) -> Self {
        Self {
            initial_gain,
            target_gain,
            transition_ms,
        }
    }

    /// Constant gain with no transition.
    pub fn constant(gain: f32) -> Self {
        Self::new(gain, gain, 0)
    }

    /// Envelopes must be finite, non-negative and never ramp downwards.
    pub fn validate(&self) -> Result<()> {
        let finite = self.initial_gain.is_finite() && self.target_gain.is_finite();
        if !finite || self.initial_gain < 0.0 {
            return Err(RenderError::InvalidArg(format!(
                "gain envelope out of range: {:?}",
                self
            )));
        }
        if self.target_gain < self.initial_gain {
            return Err(RenderError::InvalidArg(format!(
                "target gain {} below initial gain {}",
                self.target_gain, self.initial_gain
            )));
        }
        Ok(())
    }
}

/// Direction a source's gain is ramping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    /// Towards the envelope's target gain.
    FadeUp,
    /// Back towards the envelope's initial gain.
    FadeDown,
}

#[derive(Debug, Clone)]
struct SourceGain {
    envelope: GainEnvelope,
    current: f64,
    step: f64,
    mode: MixMode,
}

impl SourceGain {
    fn new(envelope: GainEnvelope, sample_rate: u32) -> Self {
        let frames = sample_rate as u64 * envelope.transition_ms as u64 / 1000;
        let span = (envelope.target_gain - envelope.initial_gain) as f64;
        let step = if frames == 0 { span } else { span / frames as f64 };
        Self {
            envelope,
            current: envelope.initial_gain as f64,
            step,
            mode: MixMode::FadeUp,
        }
    }

    /// Gain for the next frame, advancing the ramp by one step.
    fn next(&mut self) -> f64 {
        match self.mode {
            MixMode::FadeUp => {
                let target = self.envelope.target_gain as f64;
                if self.current < target {
                    self.current = (self.current + self.step).min(target);
                }
                self.current
            }
            MixMode::FadeDown => {
                let floor = self.envelope.initial_gain as f64;
                if self.current > floor {
                    self.current = (self.current - self.step).max(floor);
                }
                self.current
            }
        }
    }
}

/// Weighted sum of N equally sized PCM buffers at one sample format.
#[derive(Debug, Clone)]
pub struct SampleMixer {
    format: SampleFormat,
    sources: Vec<SourceGain>,
}

impl SampleMixer {
    pub fn new(format: SampleFormat, envelopes: &[GainEnvelope]) -> Result<Self> {
        format.validate()?;
        for envelope in envelopes {
            envelope.validate()?;
        }
        Ok(Self {
            format,
            sources: envelopes
                .iter()
                .map(|envelope| SourceGain::new(*envelope, format.sample_rate))
                .collect(),
        })
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn set_mode(&mut self, source: usize, mode: MixMode) -> Result<()> {
        let slot = self
            .sources
            .get_mut(source)
            .ok_or_else(|| RenderError::NotFound(format!("mixer source {}", source)))?;
        slot.mode = mode;
        Ok(())
    }

    /// Restart a source's ramp from its initial gain, fading up.
    pub fn restart(&mut self, source: usize) -> Result<()> {
        let slot = self
            .sources
            .get_mut(source)
            .ok_or_else(|| RenderError::NotFound(format!("mixer source {}", source)))?;
        slot.current = slot.envelope.initial_gain as f64;
        slot.mode = MixMode::FadeUp;
        Ok(())
    }

    pub fn mode(&self, source: usize) -> Option<MixMode> {
        self.sources.get(source).map(|slot| slot.mode)
    }

    /// Current (last applied) gain of a source.
    pub fn gain(&self, source: usize) -> Option<f32> {
        self.sources.get(source).map(|slot| slot.current as f32)
    }

    /// Mix `inputs` (one per source, each `output.len()` bytes) into `output`.
    pub fn process(&mut self, inputs: &[&[u8]], output: &mut [u8]) -> Result<()> {
        if inputs.len() != self.sources.len() {
            return Err(RenderError::InvalidArg(format!(
                "mixer expects {} inputs, got {}",
                self.sources.len(),
                inputs.len()
            )));
        }
        if inputs.iter().any(|input| input.len() < output.len()) {
            return Err(RenderError::invalid_arg("mixer input shorter than output"));
        }
        let bits = self.format.bits_per_sample;
        let width = self.format.sample_bytes();
        let frame_bytes = self.format.frame_bytes();
        let mut gains = vec![0.0_f64; self.sources.len()];
        let mut offset = 0;
        while offset + frame_bytes <= output.len() {
            for (gain, source) in gains.iter_mut().zip(self.sources.iter_mut()) {
                *gain = source.next();
            }
            let mut position = offset;
            while position < offset + frame_bytes {
                let mut sum = 0.0_f64;
                for (input, gain) in inputs.iter().zip(gains.iter()) {
                    sum += read_sample(&input[position..], bits) as f64 * gain;
                }
                store_sample(sum.round() as i64, bits, &mut output[position..]);
                position += width;
            }
            offset += frame_bytes;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: i16, frames: usize) -> Vec<u8> {
        std::iter::repeat(value)
            .take(frames)
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }

    fn first(bytes: &[u8]) -> i16 {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }

    #[test]
    fn equal_weights_average_sources() {
        let format = SampleFormat::new(8_000, 16, 1);
        let envelope = GainEnvelope::constant(0.5);
        let mut mixer = SampleMixer::new(format, &[envelope, envelope]).unwrap();
        let a = block(16, 4);
        let b = block(48, 4);
        let mut out = vec![0u8; 8];
        mixer.process(&[&a, &b], &mut out).unwrap();
        assert_eq!(first(&out), 32);
        assert_eq!(first(&out[6..]), 32);
    }

    #[test]
    fn envelope_ramps_then_holds() {
        let format = SampleFormat::new(1_000, 16, 1);
        let mut mixer =
            SampleMixer::new(format, &[GainEnvelope::new(0.0, 1.0, 4)]).unwrap();
        let input = block(100, 6);
        let mut out = vec![0u8; 12];
        mixer.process(&[&input], &mut out).unwrap();
        let values: Vec<i16> = out.chunks_exact(2).map(first).collect();
        assert_eq!(values, vec![25, 50, 75, 100, 100, 100]);
    }

    #[test]
    fn fade_down_returns_to_initial_gain() {
        let format = SampleFormat::new(1_000, 16, 1);
        let mut mixer =
            SampleMixer::new(format, &[GainEnvelope::new(0.0, 1.0, 2)]).unwrap();
        let input = block(100, 4);
        let mut out = vec![0u8; 8];
        mixer.process(&[&input], &mut out).unwrap();
        mixer.set_mode(0, MixMode::FadeDown).unwrap();
        mixer.process(&[&input], &mut out).unwrap();
        let values: Vec<i16> = out.chunks_exact(2).map(first).collect();
        assert_eq!(values, vec![50, 0, 0, 0]);
        assert_eq!(mixer.gain(0), Some(0.0));
    }

    #[test]
    fn restart_rewinds_to_initial_gain() {
        let format = SampleFormat::new(1_000, 16, 1);
        let mut mixer =
            SampleMixer::new(format, &[GainEnvelope::new(0.0, 1.0, 2)]).unwrap();
        let input = block(100, 4);
        let mut out = vec![0u8; 8];
        mixer.process(&[&input], &mut out).unwrap();
        assert_eq!(mixer.gain(0), Some(1.0));
        mixer.set_mode(0, MixMode::FadeDown).unwrap();
        mixer.restart(0).unwrap();
        assert_eq!(mixer.gain(0), Some(0.0));
        assert_eq!(mixer.mode(0), Some(MixMode::FadeUp));
        assert!(matches!(mixer.restart(3), Err(RenderError::NotFound(_))));
    }

    #[test]
    fn rejects_descending_envelope() {
        let envelope = GainEnvelope::new(1.0, 0.5, 10);
        assert!(matches!(envelope.validate(), Err(RenderError::InvalidArg(_))));
        assert!(SampleMixer::new(SampleFormat::default(), &[envelope]).is_err());
    }

    #[test]
    fn sum_saturates_instead_of_wrapping() {
        let format = SampleFormat::new(8_000, 16, 1);
        let envelope = GainEnvelope::constant(1.0);
        let mut mixer = SampleMixer::new(format, &[envelope, envelope]).unwrap();
        let a = block(30_000, 1);
        let mut out = vec![0u8; 2];
        mixer.process(&[&a, &a], &mut out).unwrap();
        assert_eq!(first(&out), i16::MAX);
    }
}
