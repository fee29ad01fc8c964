use std::collections::HashMap;

use offload_core::TaskId;
use tokio::task::JoinHandle;

/// One timeout timer per tracked task.
#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    handles: HashMap<TaskId, JoinHandle<()>>,
}

impl TimerRegistry {
    /// Track a timer. A timer already registered for the task is aborted.
    pub(crate) fn insert(&mut self, id: TaskId, handle: JoinHandle<()>) {
        if let Some(old) = self.handles.insert(id, handle) {
            old.abort();
        }
    }

    /// Abort and forget the task's timer.
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        match self.handles.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget the timer without aborting it. Used by the timer itself when it
    /// fires, since aborting the running task would cut its own cleanup short.
    pub(crate) fn forget(&mut self, id: TaskId) {
        self.handles.remove(&id);
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}
