//! Double-buffered send window (§4.2 "Buffer swap") used by [`super::mpi::MpiTransport`].
//!
//! Writers enter the *active* generation, append their message, and leave;
//! the background flusher swaps generations and waits for the now-retired
//! one to drain before handing it to the network. This is the
//! atomic-(generation, refcount) pattern `original_source`'s buffered
//! exchange uses to let senders and the flusher run lock-free against each
//! other — reworked here around a plain `Vec<u8>` per slot instead of a
//! raw `mmap`'d region (see `SPEC_FULL.md` §7 for why).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::transport::PeerId;

struct EpochRefcount {
    generation: AtomicU32,
    refcounts: [AtomicU32; 2],
}

impl EpochRefcount {
    fn new() -> Self {
        EpochRefcount {
            generation: AtomicU32::new(0),
            refcounts: [AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    fn active_index(&self) -> usize {
        (self.generation.load(Ordering::Acquire) % 2) as usize
    }

    /// Enter a write critical section. Retries if a swap lands between the
    /// index read and the refcount bump.
    fn enter(&self) -> usize {
        loop {
            let idx = self.active_index();
            self.refcounts[idx].fetch_add(1, Ordering::AcqRel);
            if self.active_index() == idx {
                return idx;
            }
            self.refcounts[idx].fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn release(&self, idx: usize) {
        self.refcounts[idx].fetch_sub(1, Ordering::AcqRel);
    }

    /// Flip the active generation and spin until the retired slot's
    /// refcount drains to zero. Returns the now-retired index, ready to
    /// hand off.
    fn swap_and_drain(&self) -> usize {
        let retiring = self.active_index();
        self.generation.fetch_add(1, Ordering::AcqRel);
        while self.refcounts[retiring].load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
        retiring
    }
}

/// Per-peer staged bytes behind the epoch-refcount swap guard. Each staged
/// message is length-prefixed (`u64` little-endian) so a drained slot is a
/// ready-to-send concatenated block per peer.
pub struct SendWindow {
    epoch: EpochRefcount,
    slots: [Mutex<HashMap<PeerId, Vec<u8>>>; 2],
}

impl SendWindow {
    pub fn new() -> Self {
        SendWindow {
            epoch: EpochRefcount::new(),
            slots: [Mutex::new(HashMap::new()), Mutex::new(HashMap::new())],
        }
    }

    /// Stage `msg` for `peer` in the currently active generation.
    pub fn stage(&self, peer: PeerId, msg: &[u8]) {
        let idx = self.epoch.enter();
        {
            let mut slot = self.slots[idx].lock();
            let entry = slot.entry(peer).or_default();
            entry.extend_from_slice(&(msg.len() as u64).to_le_bytes());
            entry.extend_from_slice(msg);
        }
        self.epoch.release(idx);
    }

    /// Swap generations, wait for the retired one to drain, and return its
    /// contents (peer -> concatenated length-prefixed messages). Empties
    /// the slot so the next swap starts fresh.
    pub fn swap(&self) -> HashMap<PeerId, Vec<u8>> {
        let idx = self.epoch.swap_and_drain();
        let mut slot = self.slots[idx].lock();
        std::mem::take(&mut *slot)
    }

    pub fn shrink(&self) {
        for slot in &self.slots {
            let mut s = slot.lock();
            s.shrink_to_fit();
            for buf in s.values_mut() {
                buf.shrink_to_fit();
            }
        }
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a drained slot's concatenated bytes back into individual
/// messages. Used on the receiving side and by tests.
pub fn split_messages(mut buf: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while buf.len() >= 8 {
        let len = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
        buf = &buf[8..];
        if buf.len() < len {
            break;
        }
        out.push(buf[0..len].to_vec());
        buf = &buf[len..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn staged_messages_round_trip_through_swap() {
        let w = SendWindow::new();
        w.stage(1, b"hello");
        w.stage(1, b"world");
        w.stage(2, b"other");
        let drained = w.swap();
        assert_eq!(split_messages(&drained[&1]), vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(split_messages(&drained[&2]), vec![b"other".to_vec()]);
    }

    #[test]
    fn swap_with_no_staged_messages_is_empty() {
        let w = SendWindow::new();
        assert!(w.swap().is_empty());
    }

    #[test]
    fn concurrent_stage_and_swap_never_loses_or_corrupts_messages() {
        let w = Arc::new(SendWindow::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let w = Arc::clone(&w);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let msg = format!("t{t}-{i}");
                    w.stage(0, msg.as_bytes());
                }
            }));
        }
        let mut collected = Vec::new();
        while collected.len() < 1600 {
            let drained = w.swap();
            if let Some(bytes) = drained.get(&0) {
                collected.extend(split_messages(bytes));
            }
            thread::yield_now();
        }
        for h in handles {
            h.join().unwrap();
        }
        // drain whatever landed in the active buffer after the last worker finished
        loop {
            let drained = w.swap();
            match drained.get(&0) {
                Some(bytes) if !bytes.is_empty() => collected.extend(split_messages(bytes)),
                _ => break,
            }
        }
        assert_eq!(collected.len(), 1600);
    }
}
