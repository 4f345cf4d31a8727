//! Deferred change set queue
//!
//! Change sets can be queued instead of committed immediately. Queued work
//! groups under its correlation UID; standard sets queued into the same
//! group merge into one pending set, so queuing the same object twice costs
//! one statement. A processing pass drains every group, committing the
//! uncorrelated (nil) group first and the rest in the order their groups
//! first appeared.

use crate::core::changeset::ChangeSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct PendingState {
    groups: HashMap<Uuid, Vec<ChangeSet>>,
    order: Vec<Uuid>,
}

/// Pending change sets grouped by correlation UID
#[derive(Default)]
pub struct TransactionQueue {
    pending: Mutex<PendingState>,
}

impl TransactionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change set under its correlation group
    ///
    /// A standard set merges into the group's trailing standard set when one
    /// is pending, deduplicating repeated instances; operational sets always
    /// queue as their own entry to keep their ordering intact.
    pub fn queue(&self, change_set: ChangeSet) {
        let group = change_set.group();
        let mut pending = self.pending.lock();
        if !pending.groups.contains_key(&group) {
            pending.order.push(group);
        }
        let entry = pending.groups.entry(group).or_default();
        if let ChangeSet::Standard(incoming) = change_set {
            if let Some(ChangeSet::Standard(tail)) = entry.last_mut() {
                tail.merge_from(incoming);
                return;
            }
            entry.push(ChangeSet::Standard(incoming));
        } else {
            entry.push(change_set);
        }
    }

    /// Drain everything queued so far
    ///
    /// The nil group comes first; the remaining groups follow in first-queued
    /// order. Sets queued after this call wait for the next pass.
    pub fn take_pending(&self) -> Vec<(Uuid, Vec<ChangeSet>)> {
        let mut pending = self.pending.lock();
        let order = std::mem::take(&mut pending.order);
        let mut groups = std::mem::take(&mut pending.groups);
        let mut drained = Vec::with_capacity(order.len());
        if let Some(sets) = groups.remove(&Uuid::nil()) {
            drained.push((Uuid::nil(), sets));
        }
        for group in order {
            if let Some(sets) = groups.remove(&group) {
                drained.push((group, sets));
            }
        }
        drained
    }

    /// Whether anything is queued
    pub fn is_empty(&self) -> bool {
        self.pending.lock().groups.is_empty()
    }

    /// Number of queued change sets across all groups
    pub fn len(&self) -> usize {
        self.pending.lock().groups.values().map(Vec::len).sum()
    }
}
