//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dsp::{ElementKind, ElementPool};
use crate::error::{RenderError, Result};
use crate::event::EventHandler;
use crate::format::SampleFormat;
use crate::sink::AudioSink;

pub const DEFAULT_PROCESS_PERIOD_MS: u32 = 20;
pub const MIN_PROCESS_PERIOD_MS: u32 = 5;
pub const DEFAULT_BUF_ALIGN: usize = 16;
pub const DEFAULT_MAX_WAIT_MS: u64 = 1000;

/// Options used by [`RenderEngine::create`](super::RenderEngine::create).
///
/// Every serializable field has a default, so a JSON document may name any
/// subset of them. `out_writer` must be set before creating an engine.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Number of producer streams. More than one enables the mix thread.
    pub max_stream_num: usize,
    /// Output format; `None` means 48 kHz / 16-bit / stereo.
    pub out_format: Option<SampleFormat>,
    /// Mixer iteration period. `0` selects the default; values below the
    /// minimum are raised to it.
    pub process_period_ms: u32,
    /// Byte alignment of internal port capacities. Power of two.
    pub process_buf_align: usize,
    /// Upper bound for every blocking wait inside the engine.
    pub max_wait_ms: u64,
    /// Elements appended to the mixed stream at create time.
    pub mixed_processors: Vec<ElementKind>,
    #[serde(skip)]
    pub out_writer: Option<Arc<dyn AudioSink>>,
    #[serde(skip)]
    pub event_handler: Option<EventHandler>,
    #[serde(skip)]
    pub pool: Option<Arc<ElementPool>>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_stream_num: 1,
            out_format: None,
            process_period_ms: DEFAULT_PROCESS_PERIOD_MS,
            process_buf_align: DEFAULT_BUF_ALIGN,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            mixed_processors: Vec::new(),
            out_writer: None,
            event_handler: None,
            pool: None,
        }
    }
}

impl RenderConfig {
    /// Default configuration writing to `sink`.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            out_writer: Some(sink),
            ..Self::default()
        }
    }

    pub fn with_streams(mut self, max_stream_num: usize) -> Self {
        self.max_stream_num = max_stream_num;
        self
    }

    pub fn with_out_format(mut self, format: SampleFormat) -> Self {
        self.out_format = Some(format);
        self
    }

    pub fn with_period_ms(mut self, period_ms: u32) -> Self {
        self.process_period_ms = period_ms;
        self
    }

    pub fn with_max_wait_ms(mut self, max_wait_ms: u64) -> Self {
        self.max_wait_ms = max_wait_ms;
        self
    }

    pub fn with_mixed_processors(mut self, kinds: &[ElementKind]) -> Self {
        self.mixed_processors = kinds.to_vec();
        self
    }

    pub fn with_event_handler(mut self, handler: EventHandler) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_pool(mut self, pool: ElementPool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }

    /// Parse the serializable options from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| RenderError::InvalidArg(format!("invalid render config: {}", err)))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| RenderError::Fail(format!("cannot serialize render config: {}", err)))
    }

    /// Period after applying the default and the floor.
    pub fn effective_period_ms(&self) -> u32 {
        match self.process_period_ms {
            0 => DEFAULT_PROCESS_PERIOD_MS,
            ms => ms.max(MIN_PROCESS_PERIOD_MS),
        }
    }
}

impl std::fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderConfig")
            .field("max_stream_num", &self.max_stream_num)
            .field("out_format", &self.out_format)
            .field("process_period_ms", &self.process_period_ms)
            .field("process_buf_align", &self.process_buf_align)
            .field("max_wait_ms", &self.max_wait_ms)
            .field("mixed_processors", &self.mixed_processors)
            .field("out_writer", &self.out_writer.is_some())
            .field("event_handler", &self.event_handler.is_some())
            .field("pool", &self.pool)
            .finish()
    }
}
