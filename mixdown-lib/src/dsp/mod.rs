//! Transform elements chained by a [`ProcessPipeline`](crate::pipeline::ProcessPipeline).
//!
//! Elements operate on interleaved signed PCM bytes. The engine only
//! orchestrates them; the built-in implementations here are small reference
//! versions (format conversion, fixed gain, linear fade) and callers register
//! their own factories for the remaining kinds through [`ElementPool`].

use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::error::Result;
use crate::format::SampleFormat;

pub mod alc;
pub mod convert;
pub mod fade;
pub mod mixer;
mod pcm;
mod pool;

pub use alc::AlcElement;
pub use convert::{BitConvert, ChannelConvert, RateConvert};
pub use fade::FadeElement;
pub use mixer::{GainEnvelope, MixMode, SampleMixer};
pub use pool::{ElementFactory, ElementPool};

/// Named element types the pool can instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    BitConvert,
    ChannelConvert,
    RateConvert,
    Alc,
    Fade,
    Eq,
    Sonic,
    Encoder,
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::BitConvert => "bit_convert",
            ElementKind::ChannelConvert => "channel_convert",
            ElementKind::RateConvert => "rate_convert",
            ElementKind::Alc => "alc",
            ElementKind::Fade => "fade",
            ElementKind::Eq => "eq",
            ElementKind::Sonic => "sonic",
            ElementKind::Encoder => "encoder",
        }
    }

    /// True for the kinds the pipeline inserts on its own to bridge formats.
    pub fn is_conversion(&self) -> bool {
        matches!(
            self,
            ElementKind::BitConvert | ElementKind::ChannelConvert | ElementKind::RateConvert
        )
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ElementKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let kind = match value.trim().to_lowercase().as_str() {
            "bit_convert" => ElementKind::BitConvert,
            "channel_convert" => ElementKind::ChannelConvert,
            "rate_convert" => ElementKind::RateConvert,
            "alc" => ElementKind::Alc,
            "fade" => ElementKind::Fade,
            "eq" => ElementKind::Eq,
            "sonic" => ElementKind::Sonic,
            "encoder" => ElementKind::Encoder,
            other => return Err(format!("unknown element kind: {}", other)),
        };
        Ok(kind)
    }
}

/// Outcome of one [`TransformElement::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Every complete unit of input was consumed.
    Done,
    /// Not enough input to make progress; leftover stays in the input port.
    NeedMore,
    /// Output hit its limit while input remains; drain downstream, then call again.
    Pending,
}

/// One DSP step inside a processing pipeline.
pub trait TransformElement: Send {
    fn kind(&self) -> ElementKind;

    /// Prepare for `input`, returning the format this element emits.
    ///
    /// `target` is the pipeline's final output format; conversion elements
    /// take their respective field from it, everything else passes `input`
    /// through.
    fn open(&mut self, input: SampleFormat, target: SampleFormat) -> Result<SampleFormat>;

    /// Consume bytes from the front of `input` and append results to `output`.
    ///
    /// `limit` is a soft cap on `output.len()`; once reached the element
    /// returns [`ProcessStatus::Pending`] if input remains.
    fn process(
        &mut self,
        input: &mut Vec<u8>,
        output: &mut Vec<u8>,
        limit: usize,
    ) -> Result<ProcessStatus>;

    /// Drop any carried state (interpolation history, ramps).
    fn reset(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
