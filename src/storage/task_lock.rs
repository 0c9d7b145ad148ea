use crate::error::TablesError;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Per-table mutual exclusion for mutations. Reads never touch it.
#[derive(Debug, Default)]
pub(crate) struct TaskLock {
    held: Mutex<bool>,
    cv: Condvar,
}

impl TaskLock {
    /// Waits at most `timeout` for the lock. On expiry nothing has been
    /// mutated, so the caller may retry.
    pub(crate) fn acquire(
        &self,
        table_id: &str,
        timeout: Duration,
    ) -> Result<TaskLockGuard<'_>, TablesError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while *held {
            let result = self.cv.wait_until(&mut held, deadline);
            if result.timed_out() && *held {
                warn!(
                    table_id,
                    waited_ms = timeout.as_millis() as u64,
                    "task lock acquisition timed out"
                );
                return Err(TablesError::TaskLockFailure {
                    table_id: table_id.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
        *held = true;
        Ok(TaskLockGuard { lock: self })
    }
}

pub(crate) struct TaskLockGuard<'a> {
    lock: &'a TaskLock,
}

impl Drop for TaskLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.lock.held.lock();
        *held = false;
        drop(held);
        self.lock.cv.notify_one();
    }
}
