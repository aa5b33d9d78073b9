//! Entry processors: atomic read-modify-write against one entry
//!
//! A processor sees a [`MutableEntry`], a private working copy of the entry.
//! Nothing it does reaches the cache until it returns successfully; the cache
//! then commits the recorded change while still holding the key's lock.

use cachetdb::{CacheLoader, StoreError};
use tracing::debug;

use crate::error::ProcessingError;
use crate::table::Lookup;

/// Ad-hoc argument handed to a processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
    /// Signed integer
    Integer(i64),
}

impl Argument {
    /// Byte view of `Bytes` and `Text` arguments
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Argument::Bytes(bytes) => Some(bytes),
            Argument::Text(text) => Some(text.as_bytes()),
            Argument::Integer(_) => None,
        }
    }

    /// Integer value, if this is an `Integer`
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Argument::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Argument {
    fn from(bytes: Vec<u8>) -> Self {
        Argument::Bytes(bytes)
    }
}

impl From<&[u8]> for Argument {
    fn from(bytes: &[u8]) -> Self {
        Argument::Bytes(bytes.to_vec())
    }
}

impl From<String> for Argument {
    fn from(text: String) -> Self {
        Argument::Text(text)
    }
}

impl From<&str> for Argument {
    fn from(text: &str) -> Self {
        Argument::Text(text.to_string())
    }
}

impl From<i64> for Argument {
    fn from(n: i64) -> Self {
        Argument::Integer(n)
    }
}

/// Unit of work executed atomically against one entry
pub trait EntryProcessor<K> {
    /// Value handed back to the caller of `invoke`
    type Output;

    /// Inspect and optionally change `entry`. Returning an error discards
    /// every change made to the entry.
    fn process(
        &self,
        entry: &mut MutableEntry<'_, K>,
        args: &[Argument],
    ) -> Result<Self::Output, ProcessingError>;
}

#[derive(Debug)]
pub(crate) enum Change {
    None,
    Set(Vec<u8>),
    Remove,
}

/// What the engine needs once the processor has returned
pub(crate) struct EntryParts {
    pub(crate) original: Lookup,
    pub(crate) loaded: Option<Option<Vec<u8>>>,
    pub(crate) load_error: Option<StoreError>,
    pub(crate) change: Change,
}

impl EntryParts {
    /// Live value before the processor ran, from the table or from a load
    pub(crate) fn previous_value(&self) -> Option<Vec<u8>> {
        match &self.original {
            Lookup::Hit(value) => Some(value.clone()),
            Lookup::NotFound => None,
            Lookup::Miss => self.loaded.clone().flatten(),
        }
    }
}

/// Working copy of one entry.
///
/// With read-through enabled, [`value`](Self::value) loads a missing entry on
/// first use; [`exists`](Self::exists) never loads.
pub struct MutableEntry<'a, K> {
    key: &'a K,
    original: Lookup,
    loader: Option<&'a dyn CacheLoader<K>>,
    loaded: Option<Option<Vec<u8>>>,
    load_error: Option<StoreError>,
    change: Change,
}

impl<'a, K> MutableEntry<'a, K> {
    pub(crate) fn new(key: &'a K, original: Lookup, loader: Option<&'a dyn CacheLoader<K>>) -> Self {
        Self {
            key,
            original,
            loader,
            loaded: None,
            load_error: None,
            change: Change::None,
        }
    }

    /// Key of the entry
    pub fn key(&self) -> &K {
        self.key
    }

    /// Whether the entry currently has a value, without loading
    pub fn exists(&self) -> bool {
        match &self.change {
            Change::Set(_) => true,
            Change::Remove => false,
            Change::None => match &self.original {
                Lookup::Hit(_) => true,
                Lookup::NotFound => false,
                Lookup::Miss => matches!(self.loaded, Some(Some(_))),
            },
        }
    }

    /// Current value of the working copy
    pub fn value(&mut self) -> Option<&[u8]> {
        if matches!(self.change, Change::None) {
            self.ensure_loaded();
        }

        match &self.change {
            Change::Set(value) => Some(value.as_slice()),
            Change::Remove => None,
            Change::None => match &self.original {
                Lookup::Hit(value) => Some(value.as_slice()),
                Lookup::NotFound => None,
                Lookup::Miss => self.loaded.as_ref().and_then(|loaded| loaded.as_deref()),
            },
        }
    }

    /// Replace the value; committed when the processor succeeds
    pub fn set_value(&mut self, value: impl Into<Vec<u8>>) {
        self.change = Change::Set(value.into());
    }

    /// Remove the entry; committed when the processor succeeds
    pub fn remove(&mut self) {
        self.change = Change::Remove;
    }

    fn ensure_loaded(&mut self) {
        if !matches!(self.original, Lookup::Miss) || self.loaded.is_some() || self.load_error.is_some() {
            return;
        }
        let Some(loader) = self.loader else {
            return;
        };

        match loader.load(self.key) {
            Ok(loaded) => self.loaded = Some(loaded),
            Err(err) => self.load_error = Some(err),
        }
    }

    pub(crate) fn into_parts(self) -> EntryParts {
        EntryParts {
            original: self.original,
            loaded: self.loaded,
            load_error: self.load_error,
            change: self.change,
        }
    }
}

/// Returns the entry's value, creating it from a `Bytes` first argument when
/// the entry does not exist.
///
/// Fails when the entry does not exist and no usable argument was given;
/// zero arguments and unrecognized arguments are treated alike.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOrGet;

impl<K: std::fmt::Debug> EntryProcessor<K> for CreateOrGet {
    type Output = Vec<u8>;

    fn process(
        &self,
        entry: &mut MutableEntry<'_, K>,
        args: &[Argument],
    ) -> Result<Vec<u8>, ProcessingError> {
        let initial = match args.first() {
            Some(Argument::Bytes(bytes)) => Some(bytes.clone()),
            Some(other) => {
                debug!(key = ?entry.key(), argument = ?other, "Ignoring unrecognized argument");
                None
            }
            None => None,
        };

        if entry.exists() {
            if let Some(value) = entry.value() {
                return Ok(value.to_vec());
            }
        }

        match initial {
            Some(value) => {
                debug!(key = ?entry.key(), "Creating entry");
                entry.set_value(value.clone());
                Ok(value)
            }
            None => Err(ProcessingError::new(
                "entry has no value and no initial value was provided",
            )),
        }
    }
}

/// Appends the first argument (bytes or text) to the value, loading it
/// through if needed, and returns the new value. An absent value is treated
/// as empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Append;

impl<K> EntryProcessor<K> for Append {
    type Output = Vec<u8>;

    fn process(
        &self,
        entry: &mut MutableEntry<'_, K>,
        args: &[Argument],
    ) -> Result<Vec<u8>, ProcessingError> {
        let suffix = args
            .first()
            .and_then(Argument::as_bytes)
            .ok_or_else(|| ProcessingError::new("append requires a bytes or text argument"))?;

        let mut value = entry.value().map(<[u8]>::to_vec).unwrap_or_default();
        value.extend_from_slice(suffix);
        entry.set_value(value.clone());

        Ok(value)
    }
}
