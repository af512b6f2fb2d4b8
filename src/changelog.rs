//! Per-collection change-log stream
//!
//! Every successful mutation emits exactly one event, in epoch order, before
//! the mutating call returns; the collection layer calls `emit` under its
//! writer gate to guarantee the ordering. A replication consumer subscribes
//! with a channel; a bounded tail buffer supports late attach.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::backend::RecordId;
use crate::constants::CHANGELOG_TAIL_CAPACITY;

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    /// Insert or upsert of a record
    Insert,
    /// Delete of a record
    Delete,
}

/// One mutation event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub collection: String,
    pub id: RecordId,
    pub epoch: u64,
    pub timestamp: DateTime<Utc>,
}

/// Mutation event stream for one collection
pub struct ChangeLog {
    collection: String,
    tail: Mutex<VecDeque<ChangeEvent>>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl ChangeLog {
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            tail: Mutex::new(VecDeque::with_capacity(CHANGELOG_TAIL_CAPACITY)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Record one mutation. Called under the collection's writer gate so
    /// events leave in epoch order.
    pub fn emit(&self, operation: ChangeOperation, id: RecordId, epoch: u64) {
        let event = ChangeEvent {
            operation,
            collection: self.collection.clone(),
            id,
            epoch,
            timestamp: Utc::now(),
        };

        {
            let mut tail = self.tail.lock();
            if tail.len() == CHANGELOG_TAIL_CAPACITY {
                tail.pop_front();
            }
            tail.push_back(event.clone());
        }

        // Drop subscribers whose receiver is gone.
        self.subscribers
            .lock()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Attach a consumer; events emitted after this call are delivered in
    /// order.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Recent events, oldest first, for late-attaching consumers.
    pub fn recent(&self) -> Vec<ChangeEvent> {
        self.tail.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_order() {
        let log = ChangeLog::new("vectors");
        let rx = log.subscribe();

        log.emit(ChangeOperation::Insert, RecordId::from("a"), 1);
        log.emit(ChangeOperation::Insert, RecordId::from("b"), 2);
        log.emit(ChangeOperation::Delete, RecordId::from("a"), 3);

        let events: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].epoch, 1);
        assert_eq!(events[2].epoch, 3);
        assert_eq!(events[2].operation, ChangeOperation::Delete);
    }

    #[test]
    fn test_dead_subscriber_is_dropped() {
        let log = ChangeLog::new("vectors");
        {
            let _rx = log.subscribe();
        }
        // Receiver is gone; emit must not fail or grow the subscriber list.
        log.emit(ChangeOperation::Insert, RecordId::from("a"), 1);
        assert_eq!(log.subscribers.lock().len(), 0);
    }

    #[test]
    fn test_tail_supports_late_attach() {
        let log = ChangeLog::new("vectors");
        log.emit(ChangeOperation::Insert, RecordId::from("a"), 1);
        log.emit(ChangeOperation::Insert, RecordId::from("b"), 2);

        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id.as_str(), "a");
    }
}
