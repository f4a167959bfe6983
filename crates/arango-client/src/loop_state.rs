//! The loop-state atom coordinating submitters with the serve task.
//!
//! A single 32-bit word encodes the write-loop-active flag (bit 0), the
//! read-loop-active flag (bit 1) and the count of queued writes (bits 2
//! and up). It is the only synchronization between submitting threads and
//! the serve task: producers bump the queue count after pushing an item
//! and start a stalled loop by compare-and-swapping the flags on; the
//! serve task decrements the count as it pops and clears the flags only
//! while the count is zero.

use std::sync::atomic::{AtomicU32, Ordering};

/// Write loop is running.
pub(crate) const WRITE_LOOP_ACTIVE: u32 = 1;

/// Read loop is running.
pub(crate) const READ_LOOP_ACTIVE: u32 = 1 << 1;

/// Both loop flags.
pub(crate) const LOOP_FLAGS: u32 = WRITE_LOOP_ACTIVE | READ_LOOP_ACTIVE;

/// Increment for one queued write.
pub(crate) const WRITE_QUEUE_INC: u32 = 1 << 2;

/// Mask selecting the queue counter bits.
pub(crate) const WRITE_QUEUE_MASK: u32 = !LOOP_FLAGS;

/// Number of queued writes encoded in `state`.
pub(crate) const fn queued(state: u32) -> u32 {
    (state & WRITE_QUEUE_MASK) >> 2
}

/// The shared loop-state word.
#[derive(Debug, Default)]
pub(crate) struct LoopState(AtomicU32);

impl LoopState {
    pub(crate) fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub(crate) fn load(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Producer side: account for one pushed item. Returns the state prior
    /// to the increment.
    pub(crate) fn add_queued(&self) -> u32 {
        self.0.fetch_add(WRITE_QUEUE_INC, Ordering::SeqCst)
    }

    /// Consumer side: account for one popped item. Returns the state prior
    /// to the decrement.
    pub(crate) fn sub_queued(&self) -> u32 {
        self.0.fetch_sub(WRITE_QUEUE_INC, Ordering::AcqRel)
    }

    /// Half-duplex start rule: turn both loop flags on together, iff both
    /// are clear and at least one write is queued. Exactly one caller wins.
    pub(crate) fn try_start_both(&self) -> bool {
        let mut state = self.load();
        while state & LOOP_FLAGS == 0 && queued(state) > 0 {
            match self.0.compare_exchange_weak(
                state,
                state | LOOP_FLAGS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Full-duplex start rule: turn the write flag on, iff it is clear and
    /// at least one write is queued. The read flag is independent.
    pub(crate) fn try_start_write(&self) -> bool {
        let mut state = self.load();
        while state & WRITE_LOOP_ACTIVE == 0 && queued(state) > 0 {
            match self.0.compare_exchange_weak(
                state,
                state | WRITE_LOOP_ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
            std::hint::spin_loop();
        }
        false
    }

    /// Mark the read loop active (VelocyStream; stays on while connected).
    pub(crate) fn set_read_active(&self) {
        self.0.fetch_or(READ_LOOP_ACTIVE, Ordering::SeqCst);
    }

    /// Stop rule for the half-duplex combined loop: clear both flags iff
    /// the queue count is zero. Returns `true` when the loop stopped and
    /// `false` when more writes are queued and the loop must continue.
    pub(crate) fn try_stop_both(&self) -> bool {
        let mut state = self.load();
        while state & LOOP_FLAGS != 0 && queued(state) == 0 {
            match self.0.compare_exchange_weak(
                state,
                state & !LOOP_FLAGS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
            std::hint::spin_loop();
        }
        state & LOOP_FLAGS == 0
    }

    /// Stop rule for the full-duplex write loop: clear the write flag iff
    /// the queue count is zero.
    pub(crate) fn try_stop_write(&self) -> bool {
        let mut state = self.load();
        while state & WRITE_LOOP_ACTIVE != 0 && queued(state) == 0 {
            match self.0.compare_exchange_weak(
                state,
                state & !WRITE_LOOP_ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
            std::hint::spin_loop();
        }
        state & WRITE_LOOP_ACTIVE == 0
    }

    /// Unconditionally clear both loop flags (connection teardown).
    pub(crate) fn clear_flags(&self) {
        let mut state = self.load();
        while state & LOOP_FLAGS != 0 {
            match self.0.compare_exchange_weak(
                state,
                state & !LOOP_FLAGS,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(observed) => state = observed,
            }
            std::hint::spin_loop();
        }
    }
}
