//! Store singleton: a name-keyed map of collections plus the process-lifetime
//! write guard and seeded RNG every collection handle shares.
//!
//! The guard is a plain `parking_lot::RwLock`, not a reentrant lock type —
//! internal helpers that must run while it is already held take
//! `&mut DatabaseState`/`&DatabaseState` as a parameter rather than
//! acquiring their own.

use crate::collection::{Collection, CollectionState};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

pub struct DatabaseState {
    pub collections: IndexMap<String, CollectionState>,
    pub rng: StdRng,
}

pub struct Database {
    pub(crate) inner: Arc<RwLock<DatabaseState>>,
}

impl Database {
    /// Seeds the RNG from system entropy.
    pub fn new() -> Self {
        Database {
            inner: Arc::new(RwLock::new(DatabaseState {
                collections: IndexMap::new(),
                rng: StdRng::from_entropy(),
            })),
        }
    }

    /// Deterministic-testing initializer.
    pub fn with_seed(seed: u64) -> Self {
        Database {
            inner: Arc::new(RwLock::new(DatabaseState {
                collections: IndexMap::new(),
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// Returns a handle to the named collection, creating it on first
    /// reference. The handle shares this database's lock and RNG.
    pub fn collection(&self, name: &str) -> Collection {
        {
            let mut state = self.inner.write();
            state
                .collections
                .entry(name.to_string())
                .or_insert_with(CollectionState::new);
        }
        Collection::new(name.to_string(), Arc::clone(&self.inner))
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner.read().collections.keys().cloned().collect()
    }

    pub fn drop_collection(&self, name: &str) {
        self.inner.write().collections.shift_remove(name);
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
