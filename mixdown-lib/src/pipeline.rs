//! Per-stream processing pipeline.
//!
//! A pipeline bridges a producer's native [`SampleFormat`] to the engine's
//! output format and runs the optional elements requested with
//! [`ProcessPipeline::add`]. Elements are wired linearly through byte ports:
//!
//! ```text
//! write() -> port[0] -> element[0] -> port[1] -> ... -> element[n-1] -> port[n] -> output
//! ```
//!
//! When input and output formats match and nothing was requested the
//! pipeline degenerates to a direct pass-through with no ports at all.

use log::{debug, error};
use std::sync::Arc;

use crate::dsp::{ElementKind, ElementPool, ProcessStatus, TransformElement};
use crate::error::{RenderError, Result};
use crate::format::SampleFormat;

/// Upper bound for a single port's growth before the chain is declared stuck.
const MAX_PORT_BYTES: usize = 1 << 22;

struct Chain {
    in_format: SampleFormat,
    out_format: SampleFormat,
    elements: Vec<Box<dyn TransformElement>>,
    ports: Vec<Vec<u8>>,
    limits: Vec<usize>,
}

enum PipelineState {
    Closed,
    Passthrough {
        format: SampleFormat,
    },
    Running(Chain),
    /// An element failed; writes are refused until close + reopen.
    Errored,
}

/// Ordered chain of transform elements for one stream.
pub struct ProcessPipeline {
    label: String,
    pool: Arc<ElementPool>,
    requested: Vec<ElementKind>,
    encoder_allowed: bool,
    chunk_bytes: usize,
    state: PipelineState,
}

impl ProcessPipeline {
    /// Create a closed pipeline.
    ///
    /// # Arguments
    ///
    /// * `label` - Name used in log lines.
    /// * `pool` - Element registry used at open time.
    /// * `encoder_allowed` - Whether an encoder may be requested here.
    /// * `chunk_bytes` - Initial soft capacity of each internal port.
    pub fn new(
        label: impl Into<String>,
        pool: Arc<ElementPool>,
        encoder_allowed: bool,
        chunk_bytes: usize,
    ) -> Self {
        Self {
            label: label.into(),
            pool,
            requested: Vec::new(),
            encoder_allowed,
            chunk_bytes: chunk_bytes.max(1),
            state: PipelineState::Closed,
        }
    }

    /// Request optional elements, appended in order.
    pub fn add(&mut self, kinds: &[ElementKind]) -> Result<()> {
        if !matches!(self.state, PipelineState::Closed) {
            return Err(RenderError::InvalidState(format!(
                "{}: processors must be added before open",
                self.label
            )));
        }
        for kind in kinds {
            if kind.is_conversion() {
                return Err(RenderError::InvalidArg(format!(
                    "{} is inserted automatically from the stream formats",
                    kind
                )));
            }
            if *kind == ElementKind::Encoder && !self.encoder_allowed {
                return Err(RenderError::NotSupported(format!(
                    "{}: encoding is reserved for the mixed stream",
                    self.label
                )));
            }
        }
        for kind in kinds {
            if self.requested.contains(kind) {
                debug!("{}: {} already requested", self.label, kind);
                continue;
            }
            self.requested.push(*kind);
        }
        Ok(())
    }

    pub fn requested(&self) -> &[ElementKind] {
        &self.requested
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, PipelineState::Closed)
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.state, PipelineState::Passthrough { .. })
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.state, PipelineState::Errored)
    }

    /// Format delivered to the output callback, once open.
    pub fn output_format(&self) -> Option<SampleFormat> {
        match &self.state {
            PipelineState::Passthrough { format } => Some(*format),
            PipelineState::Running(chain) => Some(chain.out_format),
            _ => None,
        }
    }

    /// Materialize the chain converting `in_format` to `out_format`.
    pub fn open(&mut self, in_format: SampleFormat, out_format: SampleFormat) -> Result<()> {
        if self.is_open() {
            return Err(RenderError::InvalidState(format!(
                "{}: pipeline already open",
                self.label
            )));
        }
        in_format.validate()?;
        out_format.validate()?;

        if in_format == out_format && self.requested.is_empty() {
            debug!("{}: pass-through at {}", self.label, in_format);
            self.state = PipelineState::Passthrough { format: in_format };
            return Ok(());
        }

        let mut kinds = Vec::new();
        if in_format.bits_per_sample != out_format.bits_per_sample {
            kinds.push(ElementKind::BitConvert);
        }
        if in_format.channels != out_format.channels {
            kinds.push(ElementKind::ChannelConvert);
        }
        if in_format.sample_rate != out_format.sample_rate {
            kinds.push(ElementKind::RateConvert);
        }
        kinds.extend(
            self.requested
                .iter()
                .filter(|kind| **kind != ElementKind::Encoder),
        );
        if self.requested.contains(&ElementKind::Encoder) {
            kinds.push(ElementKind::Encoder);
        }

        let mut elements = Vec::with_capacity(kinds.len());
        let mut format = in_format;
        for kind in kinds {
            let mut element = self.pool.create(kind)?;
            format = element.open(format, out_format)?;
            elements.push(element);
        }
        let ends_in_encoder = elements
            .last()
            .map(|element| element.kind() == ElementKind::Encoder)
            .unwrap_or(false);
        if format != out_format && !ends_in_encoder {
            return Err(RenderError::Fail(format!(
                "{}: chain produced {} instead of {}",
                self.label, format, out_format
            )));
        }

        let limit = self.chunk_bytes;
        let ports = (0..=elements.len())
            .map(|_| Vec::with_capacity(limit))
            .collect();
        debug!(
            "{}: opened {} -> {} with {} element(s)",
            self.label,
            in_format,
            out_format,
            elements.len()
        );
        self.state = PipelineState::Running(Chain {
            in_format,
            out_format,
            limits: vec![limit; elements.len()],
            elements,
            ports,
        });
        Ok(())
    }

    /// Push `data` through the chain, handing every produced chunk to `output`.
    ///
    /// Returns once the head element has taken all of `data`; incomplete
    /// frames are retained for the next call.
    pub fn write(
        &mut self,
        data: &[u8],
        output: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let outcome = match &mut self.state {
            PipelineState::Closed => {
                return Err(RenderError::InvalidState(format!(
                    "{}: pipeline not open",
                    self.label
                )))
            }
            PipelineState::Errored => {
                return Err(RenderError::Fail(format!(
                    "{}: pipeline errored, reopen required",
                    self.label
                )))
            }
            PipelineState::Passthrough { .. } => return output(data),
            PipelineState::Running(chain) => {
                chain.ports[0].extend_from_slice(data);
                chain.drive(output)
            }
        };
        if let Err(DriveError::Element(kind, err)) = &outcome {
            error!("{}: element {} failed: {}", self.label, kind, err);
            self.state = PipelineState::Errored;
        }
        outcome.map_err(|err| match err {
            DriveError::Element(kind, err) => {
                RenderError::Fail(format!("{}: element {} failed: {}", self.label, kind, err))
            }
            DriveError::Output(err) => err,
        })
    }

    /// Typed access to an element of an open chain.
    pub fn element_mut(
        &mut self,
        kind: ElementKind,
    ) -> Result<&mut (dyn TransformElement + 'static)> {
        let label = &self.label;
        match &mut self.state {
            PipelineState::Running(chain) => chain
                .elements
                .iter_mut()
                .find(|element| element.kind() == kind)
                .map(|element| element.as_mut())
                .ok_or_else(|| RenderError::NotFound(format!("{}: no {} element", label, kind))),
            _ => Err(RenderError::NotFound(format!(
                "{}: no {} element (pipeline has no chain)",
                label, kind
            ))),
        }
    }

    /// Bytes held in ports waiting for more input.
    pub fn buffered_bytes(&self) -> usize {
        match &self.state {
            PipelineState::Running(chain) => chain.ports.iter().map(Vec::len).sum(),
            _ => 0,
        }
    }

    /// Input format of the open chain.
    pub fn input_format(&self) -> Option<SampleFormat> {
        match &self.state {
            PipelineState::Passthrough { format } => Some(*format),
            PipelineState::Running(chain) => Some(chain.in_format),
            _ => None,
        }
    }

    /// Drop everything held in the ports and rewind every element, keeping
    /// the chain open.
    pub fn reset(&mut self) {
        if let PipelineState::Running(chain) = &mut self.state {
            for port in &mut chain.ports {
                port.clear();
            }
            for element in &mut chain.elements {
                element.reset();
            }
            debug!("{}: pipeline reset", self.label);
        }
    }

    /// Release ports and element instances. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.is_open() {
            debug!("{}: pipeline closed", self.label);
        }
        self.state = PipelineState::Closed;
    }
}

impl std::fmt::Debug for ProcessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            PipelineState::Closed => "closed",
            PipelineState::Passthrough { .. } => "passthrough",
            PipelineState::Running(_) => "running",
            PipelineState::Errored => "errored",
        };
        f.debug_struct("ProcessPipeline")
            .field("label", &self.label)
            .field("requested", &self.requested)
            .field("state", &state)
            .finish()
    }
}

enum DriveError {
    Element(ElementKind, RenderError),
    Output(RenderError),
}

impl Chain {
    /// Run every element until none has complete input left.
    ///
    /// Uses an explicit work stack: an element reporting `Pending` is
    /// revisited only after everything downstream of it has drained.
    fn drive(&mut self, output: &mut dyn FnMut(&[u8]) -> Result<()>) -> std::result::Result<(), DriveError> {
        let last = self.elements.len();
        let mut stack = vec![0_usize];
        while let Some(index) = stack.pop() {
            if index == last {
                if !self.ports[last].is_empty() {
                    // A chunk the output refused is dropped, never resent.
                    let delivered = output(&self.ports[last]);
                    self.ports[last].clear();
                    delivered.map_err(DriveError::Output)?;
                }
                continue;
            }

            let (head, tail) = self.ports.split_at_mut(index + 1);
            let input = &mut head[index];
            let port = &mut tail[0];
            let before = (input.len(), port.len());
            let element = &mut self.elements[index];
            let status = element
                .process(input, port, self.limits[index])
                .map_err(|err| DriveError::Element(element.kind(), err))?;

            match status {
                ProcessStatus::Pending => {
                    if before == (input.len(), port.len()) {
                        // Downstream cannot drain below the limit; grow this port.
                        let grown = self.limits[index] * 2;
                        if grown > MAX_PORT_BYTES {
                            return Err(DriveError::Element(
                                element.kind(),
                                RenderError::Fail("element made no progress".to_string()),
                            ));
                        }
                        self.limits[index] = grown;
                    }
                    stack.push(index);
                    stack.push(index + 1);
                }
                ProcessStatus::Done | ProcessStatus::NeedMore => {
                    if !port.is_empty() {
                        stack.push(index + 1);
                    }
                }
            }
        }
        Ok(())
    }
}
