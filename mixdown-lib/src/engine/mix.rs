//! Mixing thread combining the producer ring buffers every process period.

use log::{debug, error, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::dsp::{GainEnvelope, SampleMixer};
use crate::error::{RenderError, Result};
use crate::event::RenderEvent;
use crate::format::SampleFormat;
use crate::stream::{StreamLifecycle, FLAG_EXIT_ACK, FLAG_FLUSHING};

use super::EngineShared;

/// Arguments required to spawn the mixing thread.
pub(crate) struct MixThreadArgs {
    pub shared: Arc<EngineShared>,
    pub format: SampleFormat,
    /// One envelope per producer stream, fixed for the thread's lifetime.
    pub envelopes: Vec<GainEnvelope>,
    pub running: Arc<AtomicBool>,
    pub exited: mpsc::Sender<()>,
}

/// Spawn the mixing thread.
///
/// Clearing `running` makes the thread finish its current iteration and
/// send one message on `exited`.
pub(crate) fn spawn_mix_thread(args: MixThreadArgs) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("mixdown-mix".to_string())
        .spawn(move || run_mix_loop(args))
        .map_err(|err| RenderError::NoResource(format!("cannot spawn mix thread: {}", err)))
}

fn run_mix_loop(args: MixThreadArgs) {
    let MixThreadArgs {
        shared,
        format,
        envelopes,
        running,
        exited,
    } = args;

    let mut mixer = match SampleMixer::new(format, &envelopes) {
        Ok(mixer) => mixer,
        Err(err) => {
            error!("mix thread cannot start: {}", err);
            shared.emit(&RenderEvent::Error {
                stream: None,
                message: err.to_string(),
            });
            let _ = exited.send(());
            return;
        }
    };

    let period = shared.settings.period;
    let half_period = period / 2;
    let block = shared.block_bytes(&format);
    let frame_bytes = format.frame_bytes();
    let count = shared.streams.len();
    let mut buffers = vec![vec![0_u8; block]; count];
    let mut attached = vec![false; count];
    let mut mixed = vec![0_u8; block];
    let mut consume_fast = false;
    let mut error_reported = false;

    debug!("mix thread running: {} streams, {} byte blocks", count, block);

    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        // Catch up with producers that outpace us by waiting for full blocks.
        let deadline = consume_fast.then(|| started + half_period);
        let mut has_data = false;

        for (index, slot) in shared.streams.iter().enumerate() {
            let buffer = &mut buffers[index];
            let snapshot = slot.state.snapshot();
            match snapshot.lifecycle {
                StreamLifecycle::Exiting => {
                    if !snapshot.exit_acked {
                        slot.state.set_flag(FLAG_EXIT_ACK);
                        shared.notify_ack();
                        debug!("{}: exit acknowledged", slot.label);
                    }
                    buffer.fill(0);
                    attached[index] = false;
                    continue;
                }
                StreamLifecycle::Closed => {
                    buffer.fill(0);
                    attached[index] = false;
                    continue;
                }
                StreamLifecycle::Running => {}
            }

            let ring = match slot.ring() {
                Some(ring) => ring,
                None => {
                    buffer.fill(0);
                    continue;
                }
            };
            if snapshot.flushing {
                ring.reset();
                slot.state.clear_flag(FLAG_FLUSHING);
                shared.notify_ack();
                debug!("{}: ring flushed", slot.label);
            }
            if !snapshot.is_audible() {
                buffer.fill(0);
                continue;
            }

            if !attached[index] {
                attached[index] = true;
                if let Err(err) = mixer.restart(index) {
                    warn!("{}: cannot apply gain envelope: {}", slot.label, err);
                }
            }
            let wanted = slot.requested_mode();
            if mixer.mode(index) != Some(wanted) {
                if let Err(err) = mixer.set_mode(index, wanted) {
                    warn!("{}: cannot change mix mode: {}", slot.label, err);
                }
            }

            let read = ring.read(buffer, frame_bytes, deadline);
            buffer[read..].fill(0);
            if read > 0 {
                has_data = true;
            }
        }

        if has_data && shared.solo_stream().is_none() {
            let inputs: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();
            let outcome = mixer
                .process(&inputs, &mut mixed)
                .and_then(|_| shared.deliver_mixed(&mixed));
            match outcome {
                Ok(()) => error_reported = false,
                Err(err) => {
                    if !error_reported {
                        error!("mixed output failed: {}", err);
                        shared.emit(&RenderEvent::Error {
                            stream: None,
                            message: err.to_string(),
                        });
                        error_reported = true;
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        consume_fast = elapsed < half_period;
        if elapsed < period {
            thread::sleep(period - elapsed);
        }
    }

    debug!("mix thread exiting");
    let _ = exited.send(());
}
