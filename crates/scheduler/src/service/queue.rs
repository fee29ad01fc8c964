use std::collections::BTreeMap;

use offload_core::{Priority, TaskId};

/// Tasks waiting for dispatch, ordered by priority then arrival.
///
/// Keys are `(priority, sequence)`. `Priority` sorts `High` first and the
/// sequence number is assigned at enqueue, so the first entry is always the
/// oldest task of the highest waiting tier.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    entries: BTreeMap<(Priority, u64), TaskId>,
}

impl TaskQueue {
    pub(crate) fn push(&mut self, id: TaskId, priority: Priority, seq: u64) {
        self.entries.insert((priority, seq), id);
    }

    /// Take the next task to dispatch.
    pub(crate) fn pop(&mut self) -> Option<TaskId> {
        self.entries.pop_first().map(|(_, id)| id)
    }

    pub(crate) fn remove(&mut self, priority: Priority, seq: u64) -> Option<TaskId> {
        self.entries.remove(&(priority, seq))
    }

    /// Remove every entry, in dispatch order.
    pub(crate) fn drain(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
