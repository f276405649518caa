use std::collections::BTreeMap;

use crate::simulation::{Action, TickBatch};

/// Batches waiting for their tick, one slot per side.
#[derive(Debug, Default)]
pub struct TickInbox {
    local: BTreeMap<u32, TickBatch>,
    remote: BTreeMap<u32, TickBatch>,
    /// Leading parts of split remote batches, in arrival order.
    partial: BTreeMap<u32, Vec<Action>>,
}

impl TickInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_local(&mut self, batch: TickBatch) {
        self.local.insert(batch.tick, batch);
    }

    /// Completes the remote batch for its tick, ahead of any parts already
    /// held. Returns false when a batch for that tick was already held.
    pub fn insert_remote(&mut self, mut batch: TickBatch) -> bool {
        if self.remote.contains_key(&batch.tick) {
            return false;
        }
        if let Some(mut actions) = self.partial.remove(&batch.tick) {
            actions.append(&mut batch.actions);
            batch.actions = actions;
        }
        self.remote.insert(batch.tick, batch);
        true
    }

    /// Holds a leading part of a split remote batch. The tick stays
    /// incomplete until [`insert_remote`](Self::insert_remote) closes it.
    pub fn insert_remote_part(&mut self, batch: TickBatch) -> bool {
        if self.remote.contains_key(&batch.tick) {
            return false;
        }
        self.partial.entry(batch.tick).or_default().extend(batch.actions);
        true
    }

    pub fn has_local(&self, tick: u32) -> bool {
        self.local.contains_key(&tick)
    }

    pub fn has_remote(&self, tick: u32) -> bool {
        self.remote.contains_key(&tick)
    }

    pub fn is_complete(&self, tick: u32) -> bool {
        self.has_local(tick) && self.has_remote(tick)
    }

    /// Removes and returns both batches for `tick`, or leaves the inbox
    /// untouched if either is missing.
    pub fn take(&mut self, tick: u32) -> Option<[TickBatch; 2]> {
        if !self.is_complete(tick) {
            return None;
        }
        let local = self.local.remove(&tick)?;
        let remote = self.remote.remove(&tick)?;
        Some([local, remote])
    }

    /// Remote batches received ahead of execution.
    pub fn remote_backlog(&self) -> usize {
        self.remote.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub tick: u32,
    pub local: u32,
    pub remote: u32,
}

/// Pairs up state checksums by tick as the two sides report them.
#[derive(Debug, Default)]
pub struct ChecksumLedger {
    local: BTreeMap<u32, u32>,
    remote: BTreeMap<u32, u32>,
}

impl ChecksumLedger {
    pub fn record_local(&mut self, tick: u32, value: u32) -> Option<Mismatch> {
        self.local.insert(tick, value);
        self.settle(tick)
    }

    pub fn record_remote(&mut self, tick: u32, value: u32) -> Option<Mismatch> {
        self.remote.insert(tick, value);
        self.settle(tick)
    }

    pub fn pending(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    fn settle(&mut self, tick: u32) -> Option<Mismatch> {
        let (&local, &remote) = (self.local.get(&tick)?, self.remote.get(&tick)?);
        self.local.remove(&tick);
        self.remote.remove(&tick);
        (local != remote).then_some(Mismatch { tick, local, remote })
    }
}
