//! Lazily built `tag key -> tag value -> chunk ids` splits used to narrow the
//! search candidate set.
//!
//! Splits are built per key on first use and stamped with the store
//! generation they were built from. Appends and clears bump the generation,
//! which drops every cached split. Deletes and updates do not: a deleted
//! chunk id may linger in a split until the next append, and the matcher
//! skips ids the store no longer knows.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    document::{ChunkId, Tags},
    error::{Error, Result},
    store::DocumentStore,
};

/// One `key == value` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Flatten `[{key: value, ...}, ...]` maps into predicates, in order.
    pub fn from_maps(maps: &[Tags]) -> Vec<Self> {
        maps.iter()
            .flat_map(|m| m.iter().map(|(k, v)| Self::new(k, v)))
            .collect()
    }

    /// Parse `key=value`.
    pub fn parse(s: &str) -> Option<Self> {
        let (key, value) = s.split_once('=')?;
        let key = key.trim();
        (!key.is_empty()).then(|| Self::new(key, value.trim()))
    }
}

/// How multiple predicates combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMethod {
    #[default]
    Or,
    And,
}

impl FilterMethod {
    /// Parse a method name. Only `OR` and `AND` are recognized; anything
    /// else, including other casings, falls back to `OR` with a warning.
    pub fn from_name(name: &str) -> Self {
        match name {
            "OR" => Self::Or,
            "AND" => Self::And,
            other => {
                warn!(method = other, "unknown filter method, using OR");
                Self::Or
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Or => "OR",
            Self::And => "AND",
        }
    }
}

/// Result of tag filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// No filtering: every chunk in the store.
    All,
    Only(HashSet<ChunkId>),
}

impl Candidates {
    pub fn contains(&self, id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(ids) => ids.contains(id),
        }
    }
}

type Split = HashMap<String, HashSet<ChunkId>>;

#[derive(Default)]
struct Cached {
    generation: u64,
    splits: HashMap<String, Arc<Split>>,
}

#[derive(Default)]
pub struct TagFilterIndex {
    cache: Mutex<Cached>,
}

impl TagFilterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached split.
    pub fn invalidate(&self) -> Result<()> {
        let mut cache = self.lock()?;
        cache.splits.clear();
        Ok(())
    }

    /// Number of keys with a split built for the current generation.
    pub fn cached_keys(&self) -> Result<usize> {
        Ok(self.lock()?.splits.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Cached>> {
        self.cache
            .lock()
            .map_err(|_| Error::LockPoisoned("tag filter index"))
    }

    fn split_for(&self, store: &DocumentStore, key: &str) -> Result<Arc<Split>> {
        let generation = store.generation();
        {
            let mut cache = self.lock()?;
            if cache.generation != generation {
                cache.generation = generation;
                cache.splits.clear();
            }
            if let Some(split) = cache.splits.get(key) {
                return Ok(Arc::clone(split));
            }
        }

        // Built outside the lock; concurrent builders for the same key do
        // duplicate work and the first to install wins.
        let mut split = Split::new();
        for chunk in store.chunks() {
            if let Some(value) = chunk.tags.get(key) {
                split
                    .entry(value.clone())
                    .or_default()
                    .insert(chunk.id.clone());
            }
        }
        let split = Arc::new(split);
        debug!(key, values = split.len(), generation, "built tag split");

        let mut cache = self.lock()?;
        if cache.generation != generation {
            return Ok(split);
        }
        Ok(Arc::clone(
            cache.splits.entry(key.to_string()).or_insert(split),
        ))
    }

    /// Resolve filters to a candidate set.
    ///
    /// No filters means no restriction. `Or` unions the per-predicate sets.
    /// `And` intersects them, so any predicate that matches nothing empties
    /// the result.
    pub fn filtered_candidates(
        &self,
        store: &DocumentStore,
        filters: &[TagFilter],
        method: FilterMethod,
    ) -> Result<Candidates> {
        if filters.is_empty() {
            return Ok(Candidates::All);
        }

        let mut matched: Vec<HashSet<ChunkId>> = Vec::with_capacity(filters.len());
        for filter in filters {
            let split = self.split_for(store, &filter.key)?;
            matched.push(split.get(&filter.value).cloned().unwrap_or_default());
        }

        let ids = match method {
            FilterMethod::Or => matched.into_iter().flatten().collect(),
            FilterMethod::And => {
                let mut sets = matched.into_iter();
                let first = sets.next().unwrap_or_default();
                sets.fold(first, |acc, set| {
                    acc.intersection(&set).cloned().collect()
                })
            }
        };
        Ok(Candidates::Only(ids))
    }
}

impl std::fmt::Debug for TagFilterIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagFilterIndex").finish_non_exhaustive()
    }
}
