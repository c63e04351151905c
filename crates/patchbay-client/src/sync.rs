//! Synchronization barrier bookkeeping.
//!
//! The barrier turns the server's asynchronous "done up to `seq`" reply into
//! a blocking call. It holds no thread primitive: the caller drives the event
//! loop itself until [`SyncBarrier::is_complete`] flips.

use tracing::trace;

/// Counters exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Barrier calls started.
    pub syncs: u64,
    /// Event-loop iterations driven, by barriers or otherwise.
    pub loop_iterations: u64,
}

#[derive(Debug, Default)]
pub struct SyncBarrier {
    next_seq: u32,
    pending: Option<u32>,
    done: bool,
    stats: SyncStats,
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next value of the monotonically increasing request counter.
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Arm the barrier for the server sequence `seq`.
    pub fn begin(&mut self, seq: u32) {
        self.pending = Some(seq);
        self.done = false;
        self.stats.syncs += 1;
        trace!(seq, "sync requested");
    }

    /// Feed an acknowledgement. Only an exact match completes the barrier.
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        if self.pending == Some(seq) {
            self.pending = None;
            self.done = true;
            trace!(seq, "sync acknowledged");
            true
        } else {
            trace!(seq, pending = ?self.pending, "stale sync ack");
            false
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done
    }

    pub fn pending(&self) -> Option<u32> {
        self.pending
    }

    pub(crate) fn record_iteration(&mut self) {
        self.stats.loop_iterations += 1;
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }
}
