//! Items flowing into the pipeline and the results flowing out of it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an [`Item`]
///
/// Sequence numbers are strictly increasing per producer, so the pair is
/// unique across all producers sharing a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId {
    /// Producer that created the item
    pub producer: usize,
    /// Position in the producer's output, starting at 0
    pub sequence: u64,
}

impl ItemId {
    /// Create an item id
    pub fn new(producer: usize, sequence: u64) -> Self {
        Self { producer, sequence }
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item-{}-{}", self.producer, self.sequence)
    }
}

/// A unit of work. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item<T> {
    id: ItemId,
    payload: T,
    created_at: DateTime<Utc>,
}

impl<T> Item<T> {
    /// Create an item stamped with the current time
    pub fn new(id: ItemId, payload: T) -> Self {
        Self {
            id,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Item identity
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Item payload
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// When the producer created the item
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Consume the item, returning its payload
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// The outcome of transforming exactly one [`Item`] on exactly one worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkResult<U> {
    item_id: ItemId,
    value: U,
    worker_id: usize,
    processed_at: DateTime<Utc>,
}

impl<U> WorkResult<U> {
    /// Create a result stamped with the current time
    pub fn new(item_id: ItemId, value: U, worker_id: usize) -> Self {
        Self {
            item_id,
            value,
            worker_id,
            processed_at: Utc::now(),
        }
    }

    /// Id of the item this result came from
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// Transformed value
    pub fn value(&self) -> &U {
        &self.value
    }

    /// Worker that produced the result
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// When the worker finished the transform
    pub fn processed_at(&self) -> DateTime<Utc> {
        self.processed_at
    }

    /// Consume the result, returning the value
    pub fn into_value(self) -> U {
        self.value
    }
}
