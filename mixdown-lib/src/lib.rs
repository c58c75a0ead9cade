//! # Mixdown Render Library
//!
//! Real-time render engine that accepts PCM audio from several independent
//! producers, converts each one to a common output format, mixes them with
//! per-stream gain envelopes and hands a single stream to an output sink at a
//! fixed cadence.
//!
//! The main entry point is [`RenderEngine`]; producers obtain a
//! [`StreamHandle`] from it and drive the open/write/close lifecycle.

pub mod dsp;
pub mod engine;
pub mod error;
pub mod event;
pub mod format;
pub mod pipeline;
pub mod ring;
pub mod sink;
pub mod stream;

pub use dsp::{ElementKind, ElementPool, GainEnvelope, TransformElement};
pub use engine::{RenderConfig, RenderEngine, SoloTarget};
pub use error::{RenderError, Result};
pub use event::{EventHandler, RenderEvent};
pub use format::SampleFormat;
pub use sink::AudioSink;
pub use stream::{StreamHandle, StreamId, StreamLifecycle, StreamSnapshot};
