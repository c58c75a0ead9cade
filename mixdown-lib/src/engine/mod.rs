//! Render engine: stream slots, solo routing and mix-thread ownership.

use log::{debug, info, warn};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::dsp::{ElementKind, ElementPool, GainEnvelope};
use crate::error::{RenderError, Result};
use crate::event::{EventHandler, RenderEvent};
use crate::format::SampleFormat;
use crate::sink::AudioSink;
use crate::stream::{lock, StreamHandle, StreamId, StreamLifecycle, StreamSlot};

mod config;
mod mix;

pub use config::{
    RenderConfig, DEFAULT_BUF_ALIGN, DEFAULT_MAX_WAIT_MS, DEFAULT_PROCESS_PERIOD_MS,
    MIN_PROCESS_PERIOD_MS,
};

use mix::{spawn_mix_thread, MixThreadArgs};

const SOLO_ALL: usize = usize::MAX;

/// Which streams reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoloTarget {
    /// Normal mixing of every stream.
    All,
    /// Only this stream, bypassing the mixer.
    Stream(StreamId),
}

pub(crate) struct EngineSettings {
    pub(crate) max_stream_num: usize,
    pub(crate) period: Duration,
    pub(crate) period_ms: u32,
    pub(crate) max_wait: Duration,
}

pub(crate) struct MixerHandle {
    running: Arc<AtomicBool>,
    exited: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

/// State guarded by the engine-wide mutex.
pub(crate) struct Control {
    pub(crate) out_format: SampleFormat,
    pub(crate) open_count: usize,
    pub(crate) mixer: Option<MixerHandle>,
}

pub(crate) struct EngineShared {
    pub(crate) settings: EngineSettings,
    pub(crate) sink: Arc<dyn AudioSink>,
    pub(crate) streams: Vec<StreamSlot>,
    pub(crate) mixed: Option<StreamSlot>,
    solo: AtomicUsize,
    destroyed: AtomicBool,
    events: Mutex<Option<EventHandler>>,
    control: Mutex<Control>,
    /// Paired with `acked`; the mix thread signals after setting or clearing
    /// a stream's acknowledgment flag.
    ack_lock: Mutex<()>,
    acked: Condvar,
}

impl EngineShared {
    pub(crate) fn lock_control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RenderError::invalid_state("render engine destroyed"));
        }
        Ok(())
    }

    pub(crate) fn is_multiplexed(&self) -> bool {
        self.settings.max_stream_num > 1
    }

    /// Bytes of one mixer iteration at `format`, at least one frame.
    pub(crate) fn block_bytes(&self, format: &SampleFormat) -> usize {
        format
            .bytes_for_ms(self.settings.period_ms)
            .max(format.frame_bytes())
    }

    pub(crate) fn solo_stream(&self) -> Option<StreamId> {
        match self.solo.load(Ordering::Acquire) {
            SOLO_ALL => None,
            id => Some(id),
        }
    }

    pub(crate) fn emit(&self, event: &RenderEvent) {
        let handler = lock(&self.events).clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    /// Hand output-format audio to the mixed pipeline, or the sink when the
    /// mixed pipeline is absent or closed.
    pub(crate) fn deliver_mixed(&self, data: &[u8]) -> Result<()> {
        if let Some(mixed) = &self.mixed {
            let mut runtime = mixed.runtime();
            if runtime.pipeline.is_open() {
                let sink = &self.sink;
                return runtime
                    .pipeline
                    .write(data, &mut |chunk: &[u8]| sink.write(chunk));
            }
        }
        self.sink.write(data)
    }

    /// Wake callers blocked in [`EngineShared::wait_until`].
    pub(crate) fn notify_ack(&self) {
        let _guard = lock(&self.ack_lock);
        self.acked.notify_all();
    }

    /// Block until `done` holds or `max_wait` elapses.
    ///
    /// `done` is rechecked on every [`EngineShared::notify_ack`].
    pub(crate) fn wait_until<F>(&self, max_wait: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + max_wait;
        let mut guard = lock(&self.ack_lock);
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.acked.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Open the mixed stream and spawn the mix thread.
    pub(crate) fn start_mixing(self: &Arc<Self>, control: &mut Control) -> Result<()> {
        let format = control.out_format;
        if let Some(mixed) = &self.mixed {
            let mut runtime = mixed.runtime();
            runtime.pipeline.open(format, format)?;
            runtime.in_format = Some(format);
            mixed
                .state
                .transition(StreamLifecycle::Closed, StreamLifecycle::Running);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (exited_tx, exited_rx) = mpsc::channel();
        let envelopes: Vec<GainEnvelope> = self.streams.iter().map(StreamSlot::envelope).collect();
        let spawned = spawn_mix_thread(MixThreadArgs {
            shared: Arc::clone(self),
            format,
            envelopes,
            running: running.clone(),
            exited: exited_tx,
        });
        match spawned {
            Ok(handle) => {
                control.mixer = Some(MixerHandle {
                    running,
                    exited: exited_rx,
                    handle: Some(handle),
                });
                info!("mix thread started at {}", format);
                Ok(())
            }
            Err(err) => {
                self.close_mixed();
                Err(err)
            }
        }
    }

    /// Stop the mix thread (bounded wait) and close the mixed stream.
    pub(crate) fn stop_mixing(&self, control: &mut Control) {
        if let Some(mut mixer) = control.mixer.take() {
            mixer.running.store(false, Ordering::Release);
            let max_wait = self.settings.max_wait + self.settings.period;
            match mixer.exited.recv_timeout(max_wait) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if let Some(handle) = mixer.handle.take() {
                        if handle.join().is_err() {
                            warn!("mix thread panicked");
                        }
                    }
                    info!("mix thread stopped");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("mix thread did not exit within {:?}; detaching", max_wait);
                }
            }
        }
        self.close_mixed();
    }

    fn close_mixed(&self) {
        if let Some(mixed) = &self.mixed {
            let mut runtime = mixed.runtime();
            runtime.pipeline.close();
            runtime.in_format = None;
            mixed.state.clear_all_flags();
            mixed
                .state
                .transition(StreamLifecycle::Running, StreamLifecycle::Closed);
        }
    }
}

/// Multi-producer render engine.
///
/// Each engine owns `max_stream_num` producer streams. With a single stream
/// audio flows straight through that stream's pipeline to the sink; with
/// more, producers write into per-stream ring buffers and a dedicated mix
/// thread combines them every process period.
pub struct RenderEngine {
    shared: Arc<EngineShared>,
}

impl RenderEngine {
    /// Build an engine from `config`.
    pub fn create(config: RenderConfig) -> Result<Self> {
        let period_ms = config.effective_period_ms();
        let RenderConfig {
            max_stream_num,
            out_format,
            process_buf_align,
            max_wait_ms,
            mixed_processors,
            out_writer,
            event_handler,
            pool,
            ..
        } = config;

        let sink = out_writer.ok_or_else(|| RenderError::invalid_arg("out_writer is required"))?;
        if max_stream_num == 0 {
            return Err(RenderError::invalid_arg("max_stream_num must be at least 1"));
        }
        let buf_align = if process_buf_align == 0 {
            DEFAULT_BUF_ALIGN
        } else {
            process_buf_align
        };
        if !buf_align.is_power_of_two() {
            return Err(RenderError::InvalidArg(format!(
                "process_buf_align {} is not a power of two",
                buf_align
            )));
        }
        let out_format = out_format.unwrap_or_default();
        out_format.validate()?;

        let settings = EngineSettings {
            max_stream_num,
            period: Duration::from_millis(period_ms as u64),
            period_ms,
            max_wait: Duration::from_millis(max_wait_ms),
        };
        let pool = pool.unwrap_or_else(|| Arc::new(ElementPool::with_defaults()));
        let chunk_bytes = align_up(
            out_format
                .bytes_for_ms(period_ms)
                .max(out_format.frame_bytes()),
            buf_align,
        );
        let multiplexed = max_stream_num > 1;
        let default_envelope = GainEnvelope::constant(1.0 / max_stream_num as f32);

        let mut streams = Vec::new();
        streams
            .try_reserve_exact(max_stream_num)
            .map_err(|err| RenderError::NoMem(format!("{} stream slots: {}", max_stream_num, err)))?;
        for id in 0..max_stream_num {
            streams.push(StreamSlot::new(
                format!("stream {}", id),
                pool.clone(),
                !multiplexed,
                chunk_bytes,
                default_envelope,
            ));
        }
        let mixed = multiplexed.then(|| {
            StreamSlot::new(
                "mixed stream".to_string(),
                pool.clone(),
                true,
                chunk_bytes,
                GainEnvelope::constant(1.0),
            )
        });

        let shared = Arc::new(EngineShared {
            settings,
            sink,
            streams,
            mixed,
            solo: AtomicUsize::new(SOLO_ALL),
            destroyed: AtomicBool::new(false),
            events: Mutex::new(event_handler),
            control: Mutex::new(Control {
                out_format,
                open_count: 0,
                mixer: None,
            }),
            ack_lock: Mutex::new(()),
            acked: Condvar::new(),
        });
        let engine = Self { shared };
        if !mixed_processors.is_empty() {
            engine.add_mixed_postprocessor(&mixed_processors)?;
        }

        info!(
            "render engine created: {} stream(s), {}, period {} ms",
            max_stream_num, out_format, period_ms
        );
        Ok(engine)
    }

    /// Handle to producer stream `id`.
    pub fn stream(&self, id: StreamId) -> Result<StreamHandle> {
        self.shared.ensure_alive()?;
        if id >= self.shared.streams.len() {
            return Err(RenderError::InvalidArg(format!(
                "stream {} out of range (max {})",
                id,
                self.shared.streams.len()
            )));
        }
        Ok(StreamHandle::new(self.shared.clone(), id))
    }

    /// Handles to every producer stream, in id order.
    pub fn streams(&self) -> Vec<StreamHandle> {
        (0..self.shared.streams.len())
            .map(|id| StreamHandle::new(self.shared.clone(), id))
            .collect()
    }

    pub fn max_stream_num(&self) -> usize {
        self.shared.settings.max_stream_num
    }

    pub fn process_period(&self) -> Duration {
        self.shared.settings.period
    }

    pub fn output_format(&self) -> SampleFormat {
        self.shared.lock_control().out_format
    }

    /// Whether any producer stream is open.
    pub fn is_running(&self) -> bool {
        self.shared.lock_control().open_count > 0
    }

    /// Change the output format. Only while no stream is open.
    pub fn set_output_format(&self, format: SampleFormat) -> Result<()> {
        self.shared.ensure_alive()?;
        format.validate()?;
        let mut control = self.shared.lock_control();
        if control.open_count > 0 {
            return Err(RenderError::invalid_state(
                "output format is fixed while streams are open",
            ));
        }
        control.out_format = format;
        debug!("output format set to {}", format);
        Ok(())
    }

    /// Route only one stream to the sink, or restore normal mixing.
    pub fn set_solo_stream(&self, target: SoloTarget) -> Result<()> {
        self.shared.ensure_alive()?;
        let raw = match target {
            SoloTarget::All => SOLO_ALL,
            SoloTarget::Stream(id) if id < self.shared.streams.len() => id,
            SoloTarget::Stream(id) => {
                return Err(RenderError::InvalidArg(format!(
                    "solo stream {} out of range",
                    id
                )))
            }
        };
        let _control = self.shared.lock_control();
        self.shared.solo.store(raw, Ordering::Release);
        debug!("solo target: {:?}", target);
        Ok(())
    }

    pub fn solo_stream(&self) -> SoloTarget {
        match self.shared.solo_stream() {
            Some(id) => SoloTarget::Stream(id),
            None => SoloTarget::All,
        }
    }

    /// Append elements to the mixed stream's pipeline.
    ///
    /// With a single configured stream there is no mixed stream and the
    /// elements go to stream 0 instead. Rejected once any stream is open.
    pub fn add_mixed_postprocessor(&self, kinds: &[ElementKind]) -> Result<()> {
        self.shared.ensure_alive()?;
        let control = self.shared.lock_control();
        if control.open_count > 0 {
            return Err(RenderError::invalid_state(
                "mixed processors must be added before any stream opens",
            ));
        }
        let slot = self.shared.mixed.as_ref().unwrap_or(&self.shared.streams[0]);
        let mut runtime = slot.runtime();
        runtime.pipeline.add(kinds)
    }

    /// Run `f` against a typed element of the open mixed pipeline.
    pub fn with_mixed_element<T, R, F>(&self, kind: ElementKind, f: F) -> Result<R>
    where
        T: Any,
        F: FnOnce(&mut T) -> R,
    {
        self.shared.ensure_alive()?;
        let slot = self.shared.mixed.as_ref().unwrap_or(&self.shared.streams[0]);
        let mut runtime = slot.runtime();
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

    /// Replace (or remove) the event handler.
    pub fn set_event_handler(&self, handler: Option<EventHandler>) {
        *lock(&self.shared.events) = handler;
    }

    /// Close every open stream and stop the mix thread.
    pub fn destroy(self) {
        drop(self);
    }

    fn shutdown(&self) {
        if self.shared.destroyed.load(Ordering::Acquire) {
            return;
        }
        for handle in self.streams() {
            if let Err(err) = handle.close() {
                warn!("closing stream {} on destroy: {}", handle.id(), err);
            }
        }
        self.shared.destroyed.store(true, Ordering::Release);
        let mut control = self.shared.lock_control();
        self.shared.stop_mixing(&mut control);
        info!("render engine destroyed");
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("max_stream_num", &self.max_stream_num())
            .field("output_format", &self.output_format())
            .field("process_period", &self.process_period())
            .field("solo", &self.solo_stream())
            .field("running", &self.is_running())
            .finish()
    }
}

fn align_up(bytes: usize, align: usize) -> usize {
    let align = align.max(1);
    bytes.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sink() -> Arc<dyn AudioSink> {
        Arc::new(|_: &[u8]| -> Result<()> { Ok(()) })
    }

    #[test]
    fn create_requires_writer() {
        let err = RenderEngine::create(RenderConfig::default()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArg(_)));
    }

    #[test]
    fn create_rejects_zero_streams_and_bad_alignment() {
        let config = RenderConfig::new(sink()).with_streams(0);
        assert!(matches!(
            RenderEngine::create(config),
            Err(RenderError::InvalidArg(_))
        ));
        let mut config = RenderConfig::new(sink());
        config.process_buf_align = 24;
        assert!(matches!(
            RenderEngine::create(config),
            Err(RenderError::InvalidArg(_))
        ));
    }

    #[test]
    fn defaults_are_applied() {
        let engine = RenderEngine::create(RenderConfig::new(sink()).with_period_ms(1)).unwrap();
        assert_eq!(engine.output_format(), SampleFormat::new(48_000, 16, 2));
        assert_eq!(engine.process_period(), Duration::from_millis(5));
        assert_eq!(engine.solo_stream(), SoloTarget::All);
        assert!(!engine.is_running());
        assert!(engine.shared.mixed.is_none());
    }

    #[test]
    fn mixed_slot_exists_only_when_multiplexed() {
        let engine = RenderEngine::create(RenderConfig::new(sink()).with_streams(3)).unwrap();
        assert!(engine.shared.mixed.is_some());
        assert_eq!(engine.streams().len(), 3);
        assert!(matches!(engine.stream(3), Err(RenderError::InvalidArg(_))));
        assert!(matches!(
            engine.set_solo_stream(SoloTarget::Stream(5)),
            Err(RenderError::InvalidArg(_))
        ));
    }

    #[test]
    fn output_format_is_fixed_while_running() {
        let engine = RenderEngine::create(RenderConfig::new(sink())).unwrap();
        let stream = engine.stream(0).unwrap();
        stream.open(SampleFormat::new(48_000, 16, 2)).unwrap();
        assert!(engine.is_running());
        assert!(matches!(
            engine.set_output_format(SampleFormat::new(8_000, 16, 1)),
            Err(RenderError::InvalidState(_))
        ));
        assert!(matches!(
            engine.add_mixed_postprocessor(&[ElementKind::Alc]),
            Err(RenderError::InvalidState(_))
        ));
        stream.close().unwrap();
        engine
            .set_output_format(SampleFormat::new(8_000, 16, 1))
            .unwrap();
    }

    #[test]
    fn mix_thread_lives_while_streams_are_open() {
        let engine = RenderEngine::create(
            RenderConfig::new(sink())
                .with_streams(2)
                .with_out_format(SampleFormat::new(8_000, 16, 1))
                .with_period_ms(5),
        )
        .unwrap();
        let a = engine.stream(0).unwrap();
        let b = engine.stream(1).unwrap();
        a.open(SampleFormat::new(8_000, 16, 1)).unwrap();
        assert!(engine.shared.lock_control().mixer.is_some());
        b.open(SampleFormat::new(8_000, 16, 1)).unwrap();
        a.close().unwrap();
        assert!(engine.shared.lock_control().mixer.is_some());
        b.close().unwrap();
        assert!(engine.shared.lock_control().mixer.is_none());
    }

    #[test]
    fn handles_fail_after_destroy() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let handler: EventHandler = Arc::new(move |event: &RenderEvent| {
            captured.lock().unwrap().push(event.clone());
        });
        let engine = RenderEngine::create(
            RenderConfig::new(sink()).with_event_handler(handler),
        )
        .unwrap();
        let stream = engine.stream(0).unwrap();
        stream.open(SampleFormat::default()).unwrap();
        engine.destroy();
        assert_eq!(
            *events.lock().unwrap(),
            vec![RenderEvent::Opened, RenderEvent::Closed]
        );
        assert!(matches!(
            stream.write(&[0; 4]),
            Err(RenderError::InvalidState(_))
        ));
        assert!(!stream.state().is_running());
    }

    #[test]
    fn acknowledgment_wakes_waiter() {
        let engine = RenderEngine::create(RenderConfig::new(sink())).unwrap();
        let shared = engine.shared.clone();
        let flag = Arc::new(AtomicBool::new(false));
        let signaller = {
            let shared = shared.clone();
            let flag = flag.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
                shared.notify_ack();
            })
        };
        let started = Instant::now();
        assert!(shared.wait_until(Duration::from_secs(5), || flag.load(Ordering::Acquire)));
        assert!(started.elapsed() < Duration::from_secs(1));
        signaller.join().unwrap();

        assert!(!shared.wait_until(Duration::from_millis(10), || false));
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(100, 16), 112);
        assert_eq!(align_up(96, 16), 96);
    }
}
