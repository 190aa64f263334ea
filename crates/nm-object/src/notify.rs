//! Change notification coalescing.
//!
//! Property updates queue the local property name here. The first queued
//! name schedules one deferred flush on the local task set; everything
//! queued before the flush runs is emitted in that single batch.
//!
//! # Deduplication Logic
//!
//! - A name already pending is not queued again and keeps its position
//! - The batch is emitted in first-queued order
//! - The flush takes the pending list before emitting, so names queued by
//!   handlers land in the next batch

use tokio::task::AbortHandle;

/// Pending notifications for one object.
#[derive(Debug, Default)]
pub(crate) struct NotifyQueue {
    /// Pending local property names, oldest first
    pending: Vec<String>,
    /// Handle of the scheduled flush task, if any
    flush: Option<AbortHandle>,
}

impl NotifyQueue {
    /// Queues `property`.
    ///
    /// Returns true when no flush is scheduled yet and the caller must
    /// schedule one.
    pub(crate) fn queue(&mut self, property: &str) -> bool {
        if !self.pending.iter().any(|p| p == property) {
            self.pending.push(property.to_string());
        }
        self.flush.is_none()
    }

    /// Records the flush task scheduled for the current batch.
    pub(crate) fn set_flush(&mut self, handle: AbortHandle) {
        self.flush = Some(handle);
    }

    /// Returns true while a flush is scheduled.
    pub(crate) fn is_scheduled(&self) -> bool {
        self.flush.is_some()
    }

    /// Returns the pending names, oldest first.
    pub(crate) fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Takes the current batch and clears the scheduled flag.
    pub(crate) fn take_batch(&mut self) -> Vec<String> {
        self.flush = None;
        std::mem::take(&mut self.pending)
    }

    /// Cancels the scheduled flush and discards pending names.
    ///
    /// Returns the number of names discarded.
    pub(crate) fn cancel(&mut self) -> usize {
        if let Some(handle) = self.flush.take() {
            handle.abort();
        }
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dummy_handle() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    #[tokio::test]
    async fn test_first_queue_requests_flush() {
        let mut queue = NotifyQueue::default();
        assert!(queue.queue("speed"));
        queue.set_flush(dummy_handle());
        assert!(queue.is_scheduled());
        assert!(!queue.queue("carrier"));
        assert!(!queue.queue("speed"));
        assert_eq!(queue.pending(), &["speed".to_string(), "carrier".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicates_keep_first_position() {
        let mut queue = NotifyQueue::default();
        queue.queue("a");
        queue.set_flush(dummy_handle());
        queue.queue("b");
        queue.queue("a");
        queue.queue("c");
        queue.queue("b");

        let batch = queue.take_batch();
        assert_eq!(batch, vec!["a", "b", "c"]);
        assert!(!queue.is_scheduled());
        assert!(queue.pending().is_empty());
    }

    #[tokio::test]
    async fn test_queue_after_take_starts_fresh_batch() {
        let mut queue = NotifyQueue::default();
        queue.queue("a");
        queue.set_flush(dummy_handle());
        let _ = queue.take_batch();

        assert!(queue.queue("a"));
        assert_eq!(queue.pending(), &["a".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_aborts_and_discards() {
        let task = tokio::spawn(std::future::pending::<()>());
        let mut queue = NotifyQueue::default();
        queue.queue("a");
        queue.queue("b");
        queue.set_flush(task.abort_handle());

        assert_eq!(queue.cancel(), 2);
        assert!(!queue.is_scheduled());
        assert!(queue.pending().is_empty());
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
