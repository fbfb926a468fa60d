//! Per-partition offset bookkeeping for concurrent handling.
//!
//! With more than one message in flight, a partition's committed position may
//! only advance past offsets that are settled as `Handled`. An offset that was
//! nacked stays pending until its redelivered copy is handled, so a crash
//! never skips it.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionState {
    pending: BTreeSet<i64>,
    attempts: HashMap<i64, u32>,
    handled_up_to: Option<i64>,
}

/// Tracks in-flight offsets and attempt counters for every partition.
#[derive(Debug, Default)]
pub(crate) struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionState>,
}

impl OffsetTracker {
    /// Record a delivery; returns its attempt number (starting at 1).
    pub(crate) fn start(&mut self, topic: &str, partition: i32, offset: i64) -> u32 {
        let state = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_default();
        state.pending.insert(offset);
        let attempt = state.attempts.entry(offset).or_insert(0);
        *attempt += 1;
        *attempt
    }

    /// Settle an offset as handled; returns the position that is now safe to commit.
    pub(crate) fn handled(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        state.pending.remove(&offset);
        state.attempts.remove(&offset);
        let next = offset + 1;
        state.handled_up_to = Some(state.handled_up_to.map_or(next, |current| current.max(next)));

        match state.pending.first() {
            Some(&lowest) => Some(lowest),
            None => state.handled_up_to,
        }
    }

    /// Number of unsettled or nacked offsets across all partitions.
    pub(crate) fn pending(&self) -> usize {
        self.partitions.values().map(|state| state.pending.len()).sum()
    }
}
