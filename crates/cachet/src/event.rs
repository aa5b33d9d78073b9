//! Entry events and listener capability sets

use std::fmt;
use std::ops::BitOr;

/// What happened to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A key without a live value received one
    Created,
    /// A live value was replaced
    Updated,
    /// A live value was removed
    Removed,
}

impl EventKind {
    fn bit(self) -> u8 {
        match self {
            EventKind::Created => 0b001,
            EventKind::Updated => 0b010,
            EventKind::Removed => 0b100,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// Set of event kinds a listener handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventKinds(u8);

impl EventKinds {
    /// No events
    pub const NONE: EventKinds = EventKinds(0);
    /// Created events only
    pub const CREATED: EventKinds = EventKinds(0b001);
    /// Updated events only
    pub const UPDATED: EventKinds = EventKinds(0b010);
    /// Removed events only
    pub const REMOVED: EventKinds = EventKinds(0b100);
    /// Every event kind
    pub const ALL: EventKinds = EventKinds(0b111);

    /// Whether `kind` is in the set
    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether the set is empty
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for EventKinds {
    type Output = EventKinds;

    fn bitor(self, rhs: EventKinds) -> EventKinds {
        EventKinds(self.0 | rhs.0)
    }
}

impl From<EventKind> for EventKinds {
    fn from(kind: EventKind) -> Self {
        EventKinds(kind.bit())
    }
}

/// A committed change to one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryEvent<K> {
    /// Kind of change
    pub kind: EventKind,
    /// Affected key
    pub key: K,
    /// Value after the change (`None` for removals)
    pub value: Option<Vec<u8>>,
    /// Value before the change, when known and requested
    pub old_value: Option<Vec<u8>>,
}

impl<K> EntryEvent<K> {
    pub(crate) fn created(key: K, value: Vec<u8>) -> Self {
        Self {
            kind: EventKind::Created,
            key,
            value: Some(value),
            old_value: None,
        }
    }

    pub(crate) fn updated(key: K, value: Vec<u8>, old_value: Vec<u8>) -> Self {
        Self {
            kind: EventKind::Updated,
            key,
            value: Some(value),
            old_value: Some(old_value),
        }
    }

    pub(crate) fn removed(key: K, old_value: Vec<u8>) -> Self {
        Self {
            kind: EventKind::Removed,
            key,
            value: None,
            old_value: Some(old_value),
        }
    }

    /// Created or Updated, depending on whether a live value existed
    pub(crate) fn upsert(key: K, value: Vec<u8>, previous: Option<Vec<u8>>) -> Self {
        match previous {
            Some(old_value) => Self::updated(key, value, old_value),
            None => Self::created(key, value),
        }
    }
}
