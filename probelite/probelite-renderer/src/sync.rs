//! In-flight frame slots and completion tokens.
//!
//! `draw` acquires slot `frame_index % N` before recording; the backend hands the
//! matching `FrameCompletion` to the device and fires it once the submission retires,
//! which releases the slot and wakes anyone waiting on the `FrameToken`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{RenderError, RenderResult};

/// How long a waiter sleeps between device polls.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

struct SlotsInner {
    busy: Mutex<Vec<bool>>,
    released: Condvar,
}

/// Fixed ring of frame slots shared between the host thread and completion callbacks.
#[derive(Clone)]
pub struct FrameSlots {
    inner: Arc<SlotsInner>,
}

impl FrameSlots {
    pub fn new(count: usize) -> Self {
        Self { inner: Arc::new(SlotsInner { busy: Mutex::new(vec![false; count]), released: Condvar::new() }) }
    }

    pub fn len(&self) -> usize {
        self.inner.busy.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_busy(&self, slot: usize) -> bool {
        self.inner.busy.lock()[slot]
    }

    /// Blocks until `slot` is free, calling `poll` between waits so device callbacks can run.
    pub fn acquire(&self, slot: usize, frame_index: u64, timeout: Duration, poll: impl FnMut()) -> RenderResult<(FrameToken, FrameCompletion)> {
        let mut busy = self.wait_free(slot, timeout, poll).inspect_err(|_| {
            log::warn!("frame {frame_index}: slot {slot} still in flight after {timeout:?}");
        })?;
        busy[slot] = true;
        drop(busy);

        let state = Arc::new(TokenState { done: Mutex::new(false), cond: Condvar::new() });
        let token = FrameToken { frame_index, slot, state: state.clone() };
        let completion = FrameCompletion { slots: self.clone(), slot, state, fired: false };
        Ok((token, completion))
    }

    /// Waits until no slot is in flight.
    pub fn drain(&self, timeout: Duration, mut poll: impl FnMut()) -> RenderResult<()> {
        for slot in 0..self.len() {
            drop(self.wait_free(slot, timeout, &mut poll)?);
        }
        Ok(())
    }

    fn wait_free(&self, slot: usize, timeout: Duration, mut poll: impl FnMut()) -> RenderResult<MutexGuard<'_, Vec<bool>>> {
        let start = Instant::now();
        let mut busy = self.inner.busy.lock();
        while busy[slot] {
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(RenderError::Timeout { what: "frame slot", waited });
            }
            drop(busy);
            poll();
            busy = self.inner.busy.lock();
            if busy[slot] {
                self.inner.released.wait_for(&mut busy, POLL_INTERVAL.min(timeout.saturating_sub(waited)));
            }
        }
        Ok(busy)
    }

    fn release(&self, slot: usize) {
        let mut busy = self.inner.busy.lock();
        busy[slot] = false;
        self.inner.released.notify_all();
    }
}

struct TokenState {
    done: Mutex<bool>,
    cond: Condvar,
}

/// Handle returned by `draw`; completes when the device has finished the frame.
#[derive(Clone)]
pub struct FrameToken {
    frame_index: u64,
    slot: usize,
    state: Arc<TokenState>,
}

impl std::fmt::Debug for FrameToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameToken")
            .field("frame_index", &self.frame_index)
            .field("slot", &self.slot)
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl FrameToken {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_complete(&self) -> bool {
        *self.state.done.lock()
    }

    /// Waits for completion. Callers on the device thread should use `wait_polling`.
    pub fn wait(&self, timeout: Duration) -> RenderResult<()> {
        self.wait_polling(timeout, || {})
    }

    /// Waits for completion, calling `poll` between waits (e.g. `device.poll`).
    pub fn wait_polling(&self, timeout: Duration, mut poll: impl FnMut()) -> RenderResult<()> {
        let start = Instant::now();
        loop {
            poll();
            let mut done = self.state.done.lock();
            if *done {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(RenderError::Timeout { what: "frame completion", waited });
            }
            self.state.cond.wait_for(&mut done, POLL_INTERVAL.min(timeout - waited));
        }
    }
}

/// Device-side half of a token. Firing (or dropping) it releases the slot exactly once.
pub struct FrameCompletion {
    slots: FrameSlots,
    slot: usize,
    state: Arc<TokenState>,
    fired: bool,
}

impl std::fmt::Debug for FrameCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCompletion")
            .field("slot", &self.slot)
            .field("fired", &self.fired)
            .finish()
    }
}

impl FrameCompletion {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if self.fired {
            return;
        }
        self.fired = true;
        self.slots.release(self.slot);
        let mut done = self.state.done.lock();
        *done = true;
        self.state.cond.notify_all();
        log::trace!("slot {} released", self.slot);
    }
}

impl Drop for FrameCompletion {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completion_releases_slot_and_token() {
        let slots = FrameSlots::new(3);
        let (token, completion) = slots.acquire(1, 4, Duration::from_millis(10), || {}).unwrap();
        assert!(slots.is_busy(1));
        assert!(!token.is_complete());
        completion.complete();
        assert!(!slots.is_busy(1));
        token.wait(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn busy_slot_times_out() {
        let slots = FrameSlots::new(1);
        let (_token, _completion) = slots.acquire(0, 0, Duration::from_millis(10), || {}).unwrap();
        let err = slots.acquire(0, 1, Duration::from_millis(20), || {}).unwrap_err();
        assert!(matches!(err, RenderError::Timeout { .. }));
    }

    #[test]
    fn waiter_wakes_when_another_thread_completes() {
        let slots = FrameSlots::new(1);
        let (_, completion) = slots.acquire(0, 0, Duration::from_millis(10), || {}).unwrap();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            completion.complete();
        });
        let start = Instant::now();
        slots.acquire(0, 1, Duration::from_secs(2), || {}).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
        handle.join().unwrap();
    }

    #[test]
    fn drain_waits_for_every_slot() {
        let slots = FrameSlots::new(3);
        let (_, first) = slots.acquire(0, 0, Duration::from_millis(10), || {}).unwrap();
        let (_, second) = slots.acquire(2, 2, Duration::from_millis(10), || {}).unwrap();
        assert!(slots.drain(Duration::from_millis(10), || {}).is_err());
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            first.complete();
            second.complete();
        });
        slots.drain(Duration::from_secs(2), || {}).unwrap();
        assert!((0..3).all(|s| !slots.is_busy(s)));
        handle.join().unwrap();
    }

    #[test]
    fn dropping_an_unfired_completion_releases() {
        let slots = FrameSlots::new(2);
        let (token, completion) = slots.acquire(0, 0, Duration::from_millis(10), || {}).unwrap();
        drop(completion);
        assert!(token.is_complete());
        assert!(!slots.is_busy(0));
    }
}
