//! Byte ring buffer that decouples a producer stream from the mix thread.
//!
//! Storage is a `dasp_ring_buffer::Bounded` behind a mutex, with a pair of
//! condition variables so either side can wait (bounded) for the other.

use dasp_ring_buffer::Bounded;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{RenderError, Result};

/// Single-producer/single-consumer PCM byte ring.
#[derive(Debug)]
pub struct ByteRing {
    inner: Mutex<Bounded<Vec<u8>>>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

impl ByteRing {
    /// Allocate a ring holding up to `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RenderError::invalid_arg("ring capacity must be non-zero"));
        }
        let mut storage: Vec<u8> = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|err| RenderError::NoMem(format!("ring of {} bytes: {}", capacity, err)))?;
        storage.resize(capacity, 0);
        Ok(Self {
            inner: Mutex::new(Bounded::from(storage)),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered and not yet read.
    pub fn filled(&self) -> usize {
        self.lock().len()
    }

    /// Discard everything buffered and wake a blocked writer.
    pub fn reset(&self) {
        let mut ring = self.lock();
        while ring.pop().is_some() {}
        drop(ring);
        self.writable.notify_all();
    }

    /// Write all of `data`, waiting for free space as needed.
    ///
    /// Gives up with [`RenderError::Timeout`] once `timeout` has elapsed
    /// without the ring draining; bytes already copied stay buffered. The
    /// bound applies to each stall, not to the whole call.
    pub fn write_all(&self, data: &[u8], timeout: Duration) -> Result<()> {
        let mut deadline = Instant::now() + timeout;
        let mut offset = 0;
        let mut ring = self.lock();
        while offset < data.len() {
            let space = ring.max_len() - ring.len();
            if space == 0 {
                let now = Instant::now();
                if now >= deadline {
                    return Err(RenderError::Timeout(timeout));
                }
                ring = match self.writable.wait_timeout(ring, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
                continue;
            }
            let take = space.min(data.len() - offset);
            for &byte in &data[offset..offset + take] {
                ring.push(byte);
            }
            offset += take;
            deadline = Instant::now() + timeout;
            self.readable.notify_all();
        }
        Ok(())
    }

    /// Read whole frames into `out`.
    ///
    /// When `wait_until` is set, blocks until `out` can be filled completely
    /// or the deadline passes; otherwise copies whatever is buffered. Returns
    /// the byte count read, always a multiple of `frame_bytes`.
    pub fn read(&self, out: &mut [u8], frame_bytes: usize, wait_until: Option<Instant>) -> usize {
        let frame_bytes = frame_bytes.max(1);
        let wanted = out.len() - out.len() % frame_bytes;
        let mut ring = self.lock();
        if let Some(deadline) = wait_until {
            while ring.len() < wanted {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                ring = match self.readable.wait_timeout(ring, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }
        let available = ring.len() - ring.len() % frame_bytes;
        let count = available.min(wanted);
        for slot in out.iter_mut().take(count) {
            match ring.pop() {
                Some(byte) => *slot = byte,
                None => break,
            }
        }
        drop(ring);
        if count > 0 {
            self.writable.notify_all();
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, Bounded<Vec<u8>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let ring = ByteRing::new(8).unwrap();
        ring.write_all(&[1, 2, 3, 4], Duration::from_millis(10)).unwrap();
        ring.write_all(&[5, 6], Duration::from_millis(10)).unwrap();
        let mut out = [0u8; 6];
        assert_eq!(ring.read(&mut out, 1, None), 6);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
        assert_eq!(ring.filled(), 0);
    }

    #[test]
    fn reads_whole_frames_only() {
        let ring = ByteRing::new(16).unwrap();
        ring.write_all(&[9; 5], Duration::from_millis(10)).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(ring.read(&mut out, 2, None), 4);
        assert_eq!(ring.filled(), 1);
    }

    #[test]
    fn full_ring_times_out_writer() {
        let ring = ByteRing::new(4).unwrap();
        let result = ring.write_all(&[0; 6], Duration::from_millis(5));
        assert_eq!(result, Err(RenderError::Timeout(Duration::from_millis(5))));
        assert_eq!(ring.filled(), 4);
    }

    #[test]
    fn long_write_outlasts_timeout_while_reader_drains() {
        let ring = Arc::new(ByteRing::new(4).unwrap());
        let reader = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                let mut out = [0u8; 2];
                while seen.len() < 40 {
                    thread::sleep(Duration::from_millis(5));
                    let count = ring.read(&mut out, 1, None);
                    seen.extend_from_slice(&out[..count]);
                }
                seen
            })
        };
        let data: Vec<u8> = (0..40).collect();
        let started = Instant::now();
        ring.write_all(&data, Duration::from_millis(30)).unwrap();
        assert!(started.elapsed() > Duration::from_millis(30));
        assert_eq!(reader.join().unwrap(), data);
    }

    #[test]
    fn reset_discards_and_unblocks_writer() {
        let ring = Arc::new(ByteRing::new(4).unwrap());
        ring.write_all(&[1; 4], Duration::from_millis(5)).unwrap();
        let writer = {
            let ring = ring.clone();
            thread::spawn(move || ring.write_all(&[2; 4], Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        ring.reset();
        assert!(writer.join().unwrap().is_ok());
        let mut out = [0u8; 4];
        assert_eq!(ring.read(&mut out, 1, None), 4);
        assert_eq!(out, [2; 4]);
    }

    #[test]
    fn blocking_read_waits_for_full_block() {
        let ring = Arc::new(ByteRing::new(16).unwrap());
        ring.write_all(&[3; 2], Duration::from_millis(5)).unwrap();
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                ring.write_all(&[4; 2], Duration::from_millis(5))
            })
        };
        let mut out = [0u8; 4];
        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(ring.read(&mut out, 2, Some(deadline)), 4);
        assert_eq!(out, [3, 3, 4, 4]);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn blocking_read_returns_partial_at_deadline() {
        let ring = ByteRing::new(16).unwrap();
        ring.write_all(&[7; 2], Duration::from_millis(5)).unwrap();
        let mut out = [0u8; 8];
        let deadline = Instant::now() + Duration::from_millis(5);
        assert_eq!(ring.read(&mut out, 2, Some(deadline)), 2);
    }
}
