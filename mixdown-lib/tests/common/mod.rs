#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mixdown_lib::{AudioSink, EventHandler, RenderEvent, Result};

/// Sink that records every byte handed to it.
#[derive(Clone, Default)]
pub struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Arc<dyn AudioSink> {
        let bytes = self.bytes.clone();
        Arc::new(move |data: &[u8]| -> Result<()> {
            bytes.lock().unwrap().extend_from_slice(data);
            Ok(())
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn samples(&self) -> Vec<i16> {
        decode16(&self.bytes())
    }

    pub fn clear(&self) {
        self.bytes.lock().unwrap().clear();
    }
}

/// Handler that records every event.
#[derive(Clone, Default)]
pub struct Events {
    seen: Arc<Mutex<Vec<RenderEvent>>>,
}

impl Events {
    pub fn handler(&self) -> EventHandler {
        let seen = self.seen.clone();
        Arc::new(move |event: &RenderEvent| seen.lock().unwrap().push(event.clone()))
    }

    pub fn seen(&self) -> Vec<RenderEvent> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn pcm16(value: i16, frames: usize) -> Vec<u8> {
    std::iter::repeat(value)
        .take(frames)
        .flat_map(|v| v.to_le_bytes())
        .collect()
}

pub fn decode16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Poll `done` until it holds or `timeout` passes.
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut done: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}
