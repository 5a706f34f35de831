//! Event payloads and starting-position descriptors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a partition within one event hub. The transport assigns
/// these; the core treats them as opaque strings.
pub type PartitionId = String;

/// Byte offset of an event within its partition's log.
pub type OffsetValue = i64;

/// Monotonically increasing position of an event within its partition.
pub type SequenceNumber = i64;

/// A starting-position descriptor for opening a partition consumer.
///
/// Value type: two positions are equal iff they carry the same tag and
/// payload. `FromSequence`'s `inclusive` flag distinguishes "start at this
/// sequence number" from "start just after it".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPosition {
    /// Start of the partition.
    Earliest,
    /// Only events enqueued after the consumer opens.
    Latest,
    /// A specific byte offset.
    FromOffset(OffsetValue),
    /// A specific sequence number.
    FromSequence { sequence: SequenceNumber, inclusive: bool },
    /// The first event enqueued at or after a timestamp.
    FromEnqueuedTime(DateTime<Utc>),
}

impl EventPosition {
    /// The position a brand-new partition (no checkpoint, no handler
    /// override) starts from.
    pub const DEFAULT: Self = Self::Earliest;
}

/// An event delivered to the user handler. Immutable once delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Opaque payload bytes.
    pub body: Vec<u8>,
    /// Byte offset within the partition.
    pub offset: OffsetValue,
    /// Sequence number within the partition.
    pub sequence_number: SequenceNumber,
    /// When the transport enqueued this event.
    pub enqueued_time: DateTime<Utc>,
    /// Optional partition routing key the publisher supplied.
    pub partition_key: Option<String>,
    /// Free-form application properties.
    pub properties: HashMap<String, String>,
}

impl Event {
    /// Construct an event for tests and reference transports.
    #[must_use]
    pub fn new(body: Vec<u8>, offset: OffsetValue, sequence_number: SequenceNumber) -> Self {
        Self {
            body,
            offset,
            sequence_number,
            enqueued_time: Utc::now(),
            partition_key: None,
            properties: HashMap::new(),
        }
    }
}

/// A batch of events returned from one read attempt. Empty batches are a
/// normal "no events yet" result, not an error.
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub events: Vec<Event>,
}

impl EventBatch {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

impl IntoIterator for EventBatch {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_position_equality_is_by_tag_and_payload() {
        assert_eq!(EventPosition::Earliest, EventPosition::Earliest);
        assert_eq!(EventPosition::Latest, EventPosition::Latest);
        assert_ne!(EventPosition::Earliest, EventPosition::Latest);
        assert_eq!(EventPosition::FromOffset(42), EventPosition::FromOffset(42));
        assert_ne!(EventPosition::FromOffset(1), EventPosition::FromOffset(2));
    }

    #[test]
    fn from_sequence_distinguishes_inclusive_flag() {
        let a = EventPosition::FromSequence { sequence: 5, inclusive: true };
        let b = EventPosition::FromSequence { sequence: 5, inclusive: false };
        assert_ne!(a, b);
    }

    #[test]
    fn event_batch_empty() {
        let batch = EventBatch::empty();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn event_batch_into_iter_preserves_order() {
        let batch = EventBatch::new(vec![
            Event::new(b"a".to_vec(), 0, 0),
            Event::new(b"b".to_vec(), 1, 1),
        ]);
        let collected: Vec<_> = batch.into_iter().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].sequence_number, 0);
        assert_eq!(collected[1].sequence_number, 1);
    }
}
