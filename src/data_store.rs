use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    model::{Flag, Segment},
    preprocess::Preprocessed,
};

/// Source of flags and segments consulted during evaluation (prerequisites and segment
/// references are resolved through it).
pub trait DataProvider: Send + Sync {
    /// Return the flag with the given key. Deleted flags must be reported as `None`.
    fn get_flag(&self, key: &str) -> Option<&Flag>;

    /// Return the segment with the given key. Deleted segments must be reported as `None`.
    fn get_segment(&self, key: &str) -> Option<&Segment>;

    /// Preprocessed lookup structures for the provided items, if the provider keeps them.
    fn preprocessed(&self) -> Option<&Preprocessed> {
        None
    }
}

/// An immutable snapshot of flags and segments.
///
/// All items are preprocessed once on construction.
#[derive(Debug, Default)]
pub struct FlagData {
    flags: HashMap<String, Arc<Flag>>,
    segments: HashMap<String, Arc<Segment>>,
    preprocessed: Preprocessed,
}

impl FlagData {
    pub fn new(
        flags: impl IntoIterator<Item = Flag>,
        segments: impl IntoIterator<Item = Segment>,
    ) -> FlagData {
        let mut preprocessed = Preprocessed::new();

        let flags: HashMap<String, Arc<Flag>> = flags
            .into_iter()
            .map(|flag| {
                let flag = Arc::new(flag);
                preprocessed.insert_flag(flag.clone());
                (flag.key.clone(), flag)
            })
            .collect();
        let segments: HashMap<String, Arc<Segment>> = segments
            .into_iter()
            .map(|segment| {
                let segment = Arc::new(segment);
                preprocessed.insert_segment(segment.clone());
                (segment.key.clone(), segment)
            })
            .collect();

        log::debug!(target: "flageval",
                    flags = flags.len(),
                    segments = segments.len();
                    "preprocessed flag data");

        FlagData {
            flags,
            segments,
            preprocessed,
        }
    }

    /// Iterate over all flags that are not deleted.
    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.flags
            .values()
            .map(AsRef::as_ref)
            .filter(|flag| !flag.deleted)
    }
}

impl DataProvider for FlagData {
    fn get_flag(&self, key: &str) -> Option<&Flag> {
        self.flags
            .get(key)
            .map(AsRef::as_ref)
            .filter(|flag| !flag.deleted)
    }

    fn get_segment(&self, key: &str) -> Option<&Segment> {
        self.segments
            .get(key)
            .map(AsRef::as_ref)
            .filter(|segment| !segment.deleted)
    }

    fn preprocessed(&self) -> Option<&Preprocessed> {
        Some(&self.preprocessed)
    }
}

/// `DataStore` provides a Sync storage for flag data that allows concurrent access for readers and
/// writers.
///
/// Readers take a snapshot with [`DataStore::get`] and evaluate against it, so an evaluation never
/// observes a partially applied update.
pub struct DataStore {
    data: RwLock<Arc<FlagData>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Arc::new(FlagData::default())),
        }
    }

    pub fn get(&self) -> Arc<FlagData> {
        // A poisoned lock still holds a complete snapshot: the only writer is `set`, which swaps
        // the whole `Arc`.
        match self.data.read() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the snapshot, returning the previous one.
    pub fn set(&self, data: FlagData) -> Arc<FlagData> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(data);

        let previous = match self.data.write() {
            Ok(mut slot) => std::mem::replace(&mut *slot, new_value),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), new_value),
        };
        log::debug!(target: "flageval", "replaced flag data");
        previous
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}
