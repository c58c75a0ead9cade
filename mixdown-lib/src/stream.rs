//! Producer streams: lifecycle state, per-stream resources and the
//! caller-facing [`StreamHandle`].
//!
//! Each stream has a primary lifecycle (`Closed -> Running -> Exiting ->
//! Closed`) plus orthogonal flags (writing, paused, flushing, exit-ack).
//! Both live in atomics so the mix thread can snapshot them without locks.

use log::{debug, info, warn};
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::dsp::{ElementKind, ElementPool, GainEnvelope, MixMode};
use crate::engine::EngineShared;
use crate::error::{RenderError, Result};
use crate::event::RenderEvent;
use crate::format::SampleFormat;
use crate::pipeline::ProcessPipeline;
use crate::ring::ByteRing;

/// Ordinal of a producer stream, `0..max_stream_num`.
pub type StreamId = usize;

/// Ring capacity in mixer blocks.
const RING_BLOCKS: usize = 3;

/// Primary lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    Closed,
    Running,
    /// Close requested; waiting for the mix thread to let go.
    Exiting,
}

impl StreamLifecycle {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => StreamLifecycle::Running,
            2 => StreamLifecycle::Exiting,
            _ => StreamLifecycle::Closed,
        }
    }

    fn raw(self) -> u8 {
        match self {
            StreamLifecycle::Closed => 0,
            StreamLifecycle::Running => 1,
            StreamLifecycle::Exiting => 2,
        }
    }

    /// Legal lifecycle edges.
    fn can_become(self, next: StreamLifecycle) -> bool {
        matches!(
            (self, next),
            (StreamLifecycle::Closed, StreamLifecycle::Running)
                | (StreamLifecycle::Running, StreamLifecycle::Exiting)
                | (StreamLifecycle::Running, StreamLifecycle::Closed)
                | (StreamLifecycle::Exiting, StreamLifecycle::Closed)
        )
    }
}

pub(crate) const FLAG_WRITING: u8 = 1 << 0;
pub(crate) const FLAG_PAUSED: u8 = 1 << 1;
pub(crate) const FLAG_FLUSHING: u8 = 1 << 2;
pub(crate) const FLAG_EXIT_ACK: u8 = 1 << 3;

/// Point-in-time view of a stream's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub lifecycle: StreamLifecycle,
    pub writing: bool,
    pub paused: bool,
    pub flushing: bool,
    pub exit_acked: bool,
}

impl StreamSnapshot {
    pub fn is_running(&self) -> bool {
        self.lifecycle == StreamLifecycle::Running
    }

    /// Whether the mix thread should pull audio from this stream.
    pub fn is_audible(&self) -> bool {
        self.is_running() && self.writing && !self.paused
    }
}

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    lifecycle: AtomicU8,
    flags: AtomicU8,
}

impl StreamState {
    pub(crate) fn lifecycle(&self) -> StreamLifecycle {
        StreamLifecycle::from_raw(self.lifecycle.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; fails if the current state is not `from`.
    pub(crate) fn transition(&self, from: StreamLifecycle, to: StreamLifecycle) -> bool {
        if !from.can_become(to) {
            return false;
        }
        self.lifecycle
            .compare_exchange(from.raw(), to.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_flag(&self, flag: u8) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    pub(crate) fn clear_flag(&self, flag: u8) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    pub(crate) fn has_flag(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    pub(crate) fn clear_all_flags(&self) {
        self.flags.store(0, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        let flags = self.flags.load(Ordering::Acquire);
        StreamSnapshot {
            lifecycle: self.lifecycle(),
            writing: flags & FLAG_WRITING != 0,
            paused: flags & FLAG_PAUSED != 0,
            flushing: flags & FLAG_FLUSHING != 0,
            exit_acked: flags & FLAG_EXIT_ACK != 0,
        }
    }
}

/// Resources touched by producer writes, serialized per stream.
pub(crate) struct StreamRuntime {
    pub(crate) pipeline: ProcessPipeline,
    pub(crate) in_format: Option<SampleFormat>,
}

/// One stream slot owned by the engine for its whole lifetime.
pub(crate) struct StreamSlot {
    pub(crate) label: String,
    pub(crate) state: StreamState,
    fade_up: AtomicU8,
    envelope: Mutex<GainEnvelope>,
    ring: Mutex<Option<Arc<ByteRing>>>,
    runtime: Mutex<StreamRuntime>,
}

impl StreamSlot {
    pub(crate) fn new(
        label: String,
        pool: Arc<ElementPool>,
        encoder_allowed: bool,
        chunk_bytes: usize,
        envelope: GainEnvelope,
    ) -> Self {
        Self {
            state: StreamState::default(),
            fade_up: AtomicU8::new(1),
            envelope: Mutex::new(envelope),
            ring: Mutex::new(None),
            runtime: Mutex::new(StreamRuntime {
                pipeline: ProcessPipeline::new(label.clone(), pool, encoder_allowed, chunk_bytes),
                in_format: None,
            }),
            label,
        }
    }

    pub(crate) fn runtime(&self) -> MutexGuard<'_, StreamRuntime> {
        lock(&self.runtime)
    }

    pub(crate) fn ring(&self) -> Option<Arc<ByteRing>> {
        lock(&self.ring).clone()
    }

    pub(crate) fn set_ring(&self, ring: Option<Arc<ByteRing>>) {
        *lock(&self.ring) = ring;
    }

    pub(crate) fn envelope(&self) -> GainEnvelope {
        *lock(&self.envelope)
    }

    pub(crate) fn set_envelope(&self, envelope: GainEnvelope) {
        *lock(&self.envelope) = envelope;
    }

    /// Mixing mode requested by the producer side.
    pub(crate) fn requested_mode(&self) -> MixMode {
        if self.fade_up.load(Ordering::Acquire) == 1 {
            MixMode::FadeUp
        } else {
            MixMode::FadeDown
        }
    }

    pub(crate) fn request_mode(&self, mode: MixMode) {
        let raw = match mode {
            MixMode::FadeUp => 1,
            MixMode::FadeDown => 0,
        };
        self.fade_up.store(raw, Ordering::Release);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Caller-side handle to one producer stream.
///
/// Handles are cheap to clone and may be moved to producer threads; every
/// operation fails with `InvalidState` once the engine is destroyed.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<EngineShared>,
    id: StreamId,
}

impl StreamHandle {
    pub(crate) fn new(shared: Arc<EngineShared>, id: StreamId) -> Self {
        Self { shared, id }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    fn slot(&self) -> &StreamSlot {
        &self.shared.streams[self.id]
    }

    /// Current lifecycle and flags.
    pub fn state(&self) -> StreamSnapshot {
        self.slot().state.snapshot()
    }

    /// Format the stream was opened with, while open.
    pub fn input_format(&self) -> Option<SampleFormat> {
        self.slot().runtime().in_format
    }

    /// Request optional elements for this stream's pipeline. Only before open.
    pub fn add_processor(&self, kinds: &[ElementKind]) -> Result<()> {
        self.shared.ensure_alive()?;
        self.slot().runtime().pipeline.add(kinds)
    }

    /// Open the stream for audio in `format`.
    ///
    /// The first stream to open also brings up the mixed stream and the
    /// mix thread (when more than one stream is configured) and triggers
    /// [`RenderEvent::Opened`].
    pub fn open(&self, format: SampleFormat) -> Result<()> {
        self.shared.ensure_alive()?;
        format.validate()?;
        let slot = self.slot();
        let mut control = self.shared.lock_control();
        if slot.state.lifecycle() != StreamLifecycle::Closed {
            return Err(RenderError::InvalidState(format!(
                "{} is already running",
                slot.label
            )));
        }

        let out_format = control.out_format;
        let multiplexed = self.shared.is_multiplexed();
        slot.runtime().pipeline.open(format, out_format)?;

        if multiplexed {
            let capacity = self.shared.block_bytes(&out_format) * RING_BLOCKS;
            match ByteRing::new(capacity) {
                Ok(ring) => slot.set_ring(Some(Arc::new(ring))),
                Err(err) => {
                    slot.runtime().pipeline.close();
                    return Err(err);
                }
            }
            if control.mixer.is_none() {
                if let Err(err) = self.shared.start_mixing(&mut control) {
                    slot.set_ring(None);
                    slot.runtime().pipeline.close();
                    return Err(err);
                }
            }
        }

        slot.runtime().in_format = Some(format);
        slot.state.clear_all_flags();
        slot.request_mode(MixMode::FadeUp);
        slot.state
            .transition(StreamLifecycle::Closed, StreamLifecycle::Running);
        control.open_count += 1;
        let first = control.open_count == 1;
        drop(control);

        info!("{} opened at {}", slot.label, format);
        if first {
            self.shared.emit(&RenderEvent::Opened);
        }
        Ok(())
    }

    /// Hand `data` (in the stream's open format) to the engine.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.shared.ensure_alive()?;
        let slot = self.slot();
        if slot.state.lifecycle() != StreamLifecycle::Running {
            return Err(RenderError::InvalidState(format!(
                "{} is not open",
                slot.label
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let solo = self.shared.solo_stream();
        if solo.is_some() && solo != Some(self.id) {
            return Ok(());
        }

        let ring = slot.ring();
        let direct = solo == Some(self.id) || ring.is_none();
        if direct && slot.state.has_flag(FLAG_PAUSED) {
            return Ok(());
        }

        let mut runtime = slot.runtime();
        if solo == Some(self.id) {
            let shared = &self.shared;
            return runtime
                .pipeline
                .write(data, &mut |chunk: &[u8]| shared.deliver_mixed(chunk));
        }

        match ring {
            Some(ring) => {
                slot.state.set_flag(FLAG_WRITING);
                let timeout = self.shared.settings.max_wait;
                runtime
                    .pipeline
                    .write(data, &mut |chunk: &[u8]| ring.write_all(chunk, timeout))
            }
            None => {
                slot.state.set_flag(FLAG_WRITING);
                let sink = &self.shared.sink;
                runtime
                    .pipeline
                    .write(data, &mut |chunk: &[u8]| sink.write(chunk))
            }
        }
    }

    /// Silence (`true`) or resume (`false`) this stream without closing it.
    pub fn pause(&self, paused: bool) -> Result<()> {
        self.shared.ensure_alive()?;
        let slot = self.slot();
        if slot.state.lifecycle() != StreamLifecycle::Running {
            return Err(RenderError::InvalidState(format!(
                "{} is not open",
                slot.label
            )));
        }
        if paused {
            slot.state.set_flag(FLAG_PAUSED);
        } else {
            slot.state.clear_flag(FLAG_PAUSED);
        }
        debug!("{} paused: {}", slot.label, paused);
        Ok(())
    }

    /// Discard audio buffered for the mix thread but not yet mixed.
    ///
    /// Waits (bounded) until the mix thread has dropped the data, so bytes
    /// written after this returns are never discarded.
    pub fn flush(&self) -> Result<()> {
        self.shared.ensure_alive()?;
        let slot = self.slot();
        if slot.state.lifecycle() != StreamLifecycle::Running {
            return Err(RenderError::InvalidState(format!(
                "{} is not open",
                slot.label
            )));
        }
        let ring = match slot.ring() {
            Some(ring) => ring,
            None => {
                slot.runtime().pipeline.reset();
                return Ok(());
            }
        };
        slot.state.set_flag(FLAG_FLUSHING);
        let max_wait = self.shared.settings.max_wait;
        if !self
            .shared
            .wait_until(max_wait, || !slot.state.has_flag(FLAG_FLUSHING))
        {
            warn!("{}: flush not acknowledged within {:?}", slot.label, max_wait);
            return Err(RenderError::Timeout(max_wait));
        }
        {
            // Anything an in-flight write pushed past the mix thread's reset
            // predates this flush too.
            let mut runtime = slot.runtime();
            runtime.pipeline.reset();
            ring.reset();
        }
        debug!("{} flushed", slot.label);
        Ok(())
    }

    /// Close the stream and release its ring buffer and pipeline.
    ///
    /// Closing an already closed stream is a no-op. The last stream to
    /// close tears down the mix thread and triggers [`RenderEvent::Closed`].
    pub fn close(&self) -> Result<()> {
        let slot = self.slot();
        let mut control = self.shared.lock_control();
        if slot.state.lifecycle() == StreamLifecycle::Closed {
            return Ok(());
        }

        slot.state.clear_flag(FLAG_WRITING);
        let ring = slot.ring();
        if ring.is_some() && control.mixer.is_some() {
            slot.state.clear_flag(FLAG_EXIT_ACK);
            slot.state
                .transition(StreamLifecycle::Running, StreamLifecycle::Exiting);
            let max_wait = self.shared.settings.max_wait;
            if !self
                .shared
                .wait_until(max_wait, || slot.state.has_flag(FLAG_EXIT_ACK))
            {
                warn!("{}: mix thread did not acknowledge exit within {:?}", slot.label, max_wait);
            }
        }
        if let Some(ring) = ring {
            // Wake a producer blocked on a full ring so it can observe the close.
            ring.reset();
        }

        {
            let mut runtime = slot.runtime();
            runtime.pipeline.close();
            runtime.in_format = None;
        }
        slot.set_ring(None);
        if !slot
            .state
            .transition(StreamLifecycle::Exiting, StreamLifecycle::Closed)
        {
            slot.state
                .transition(StreamLifecycle::Running, StreamLifecycle::Closed);
        }
        slot.state.clear_all_flags();

        control.open_count = control.open_count.saturating_sub(1);
        let last = control.open_count == 0;
        if last {
            self.shared.stop_mixing(&mut control);
        }
        drop(control);

        info!("{} closed", slot.label);
        if last {
            self.shared.emit(&RenderEvent::Closed);
        }
        Ok(())
    }

    /// Set the gain envelope applied when this stream is mixed in.
    ///
    /// Only allowed while no stream is open.
    pub fn set_mixer_gain(&self, envelope: GainEnvelope) -> Result<()> {
        self.shared.ensure_alive()?;
        envelope.validate()?;
        let control = self.shared.lock_control();
        if control.open_count > 0 || control.mixer.is_some() {
            return Err(RenderError::invalid_state(
                "gain envelopes are fixed while the engine is running",
            ));
        }
        self.slot().set_envelope(envelope);
        Ok(())
    }

    /// Envelope this stream will use on its next attach.
    pub fn mixer_gain(&self) -> GainEnvelope {
        self.slot().envelope()
    }

    /// Ramp this stream towards its target gain (`true`) or back to its
    /// initial gain (`false`). Requires a running mix thread.
    pub fn set_fade(&self, fade_in: bool) -> Result<()> {
        self.shared.ensure_alive()?;
        if !self.shared.is_multiplexed() {
            return Err(RenderError::NotSupported(
                "fading needs more than one configured stream".to_string(),
            ));
        }
        let control = self.shared.lock_control();
        if control.mixer.is_none() {
            return Err(RenderError::invalid_state("mixer is not running"));
        }
        let slot = self.slot();
        if slot.state.lifecycle() != StreamLifecycle::Running {
            return Err(RenderError::InvalidState(format!(
                "{} is not open",
                slot.label
            )));
        }
        let mode = if fade_in {
            MixMode::FadeUp
        } else {
            MixMode::FadeDown
        };
        slot.request_mode(mode);
        Ok(())
    }

    /// Approximate queued latency in milliseconds.
    ///
    /// Counts only bytes waiting in this stream's ring buffer, converted at
    /// the output byte rate; pipeline and sink-side buffering are not
    /// included.
    pub fn latency_ms(&self) -> Result<u32> {
        self.shared.ensure_alive()?;
        let out_format = self.shared.lock_control().out_format;
        Ok(out_format.ms_for_bytes(self.queued_bytes()))
    }

    /// Bytes written to the ring buffer that the mix thread has not read.
    pub fn queued_bytes(&self) -> usize {
        self.slot().ring().map(|ring| ring.filled()).unwrap_or(0)
    }

    /// Run `f` against a typed element of this stream's open pipeline.
    pub fn with_element<T, R, F>(&self, kind: ElementKind, f: F) -> Result<R>
    where
        T: Any,
        F: FnOnce(&mut T) -> R,
    {
        self.shared.ensure_alive()?;
        let mut runtime = self.slot().runtime();
        let element = runtime.pipeline.element_mut(kind)?;
        let typed = element.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
            RenderError::InvalidArg(format!(
                "{} element is not a {}",
                kind,
                std::any::type_name::<T>()
            ))
        })?;
        Ok(f(typed))
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
