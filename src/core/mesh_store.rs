//! Concurrent tetrahedron store.
//!
//! The store maps every live [`Tetra`] to a [`TetraRecord`] holding its bucket of pending
//! (not yet inserted) points and its four neighbor links. It is sharded: each shard is a
//! `Mutex`-guarded [`FastHashMap`] and a key always lives in the shard picked by its
//! [`FastHasher`] hash, so `get`, `insert` and `remove` on different keys rarely contend.
//!
//! Shard locks are held only for the duration of one map operation. Mutual exclusion
//! between insertion tasks comes from point ownership, not from the store: a task only
//! mutates records whose four vertices it owns, with one exception. A task may rewrite a
//! single neighbor slot of a boundary tetrahedron it does *not* own. That slot is the one
//! facing the task's cavity, and every vertex of the shared face is owned by the task, so
//! no other task can touch the same slot at the same time. Links are replaced with
//! [`ArcSwap::rcu`], so concurrent readers always observe a whole four-slot array.

#![forbid(unsafe_code)]

use crate::core::collections::{FastHashMap, FastHasher};
use crate::core::tetra::{PointIndex, Tetra, TetraError, Triangle};
use arc_swap::ArcSwap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The four neighbor slots of a tetrahedron.
///
/// Slot `i` is the tetrahedron across the face opposite vertex `i`; `None` means the face
/// lies on the outer hull.
pub type NeighborLinks = [Option<Tetra>; 4];

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Broken mesh invariants detected while a task rewires the mesh.
///
/// These are never expected during a correct run; the scheduler halts on the first one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MeshInvariantError {
    /// A tetrahedron that must be live is missing from the store.
    #[error("Tetrahedron {tetra} is not present in the mesh store")]
    MissingTetra {
        /// The missing key.
        tetra: Tetra,
    },
    /// A tetrahedron was inserted twice.
    #[error("Tetrahedron {tetra} is already present in the mesh store")]
    DuplicateTetra {
        /// The duplicated key.
        tetra: Tetra,
    },
    /// A new tetrahedron could not be formed.
    #[error(transparent)]
    Tetra(#[from] TetraError),
    /// A neighbor slot did not point where the adjacency says it must.
    #[error("Tetrahedron {tetra} slot {slot}: expected neighbor {expected:?}, found {found:?}")]
    LinkMismatch {
        /// The tetrahedron whose link was checked.
        tetra: Tetra,
        /// The checked slot.
        slot: usize,
        /// The expected neighbor.
        expected: Option<Tetra>,
        /// The neighbor actually stored.
        found: Option<Tetra>,
    },
    /// A neighbor link points at a tetrahedron that does not have the shared face.
    #[error("Tetrahedron {tetra} does not have face {face:?}")]
    MissingFace {
        /// The linked tetrahedron.
        tetra: Tetra,
        /// The face it was expected to share.
        face: Triangle,
    },
    /// A face of a new tetrahedron has no partner in the re-triangulated cavity.
    #[error("Cavity around new tetrahedron {tetra} is not closed")]
    OpenCavity {
        /// The tetrahedron with an unmatched face.
        tetra: Tetra,
    },
}

// =============================================================================
// TETRA RECORD
// =============================================================================

/// Value stored per live tetrahedron.
#[derive(Debug)]
pub struct TetraRecord {
    pending: Vec<PointIndex>,
    links: ArcSwap<NeighborLinks>,
}

impl TetraRecord {
    /// Creates a record with the given bucket and neighbor links.
    #[must_use]
    pub fn new(pending: Vec<PointIndex>, links: NeighborLinks) -> Self {
        Self {
            pending,
            links: ArcSwap::from_pointee(links),
        }
    }

    /// Points located in this tetrahedron that are not inserted yet.
    ///
    /// The bucket is fixed at creation; a tetrahedron is replaced, never refilled.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> &[PointIndex] {
        &self.pending
    }

    /// A consistent snapshot of all four neighbor slots.
    #[inline]
    #[must_use]
    pub fn links(&self) -> NeighborLinks {
        **self.links.load()
    }

    /// Replaces one neighbor slot and returns its previous value.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= 4`.
    pub fn set_link(&self, slot: usize, link: Option<Tetra>) -> Option<Tetra> {
        let previous = self.links.rcu(|current| {
            let mut next = **current;
            next[slot] = link;
            next
        });
        previous[slot]
    }
}

// =============================================================================
// MESH STORE
// =============================================================================

/// Sharded map from live tetrahedra to their records.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::mesh_store::{MeshStore, TetraRecord};
/// use par_delaunay::core::tetra::Tetra;
///
/// let store = MeshStore::new(8);
/// let t = Tetra::new([0, 1, 2, 3]).unwrap();
/// store.insert(t, TetraRecord::new(vec![4, 5], [None; 4])).unwrap();
/// assert_eq!(store.get(&t).unwrap().pending(), &[4, 5]);
/// assert!(store.insert(t, TetraRecord::new(vec![], [None; 4])).is_err());
/// store.remove(&t).unwrap();
/// assert!(store.is_empty());
/// ```
#[derive(Debug)]
pub struct MeshStore {
    shards: Box<[Mutex<FastHashMap<Tetra, Arc<TetraRecord>>>]>,
}

impl MeshStore {
    /// Creates an empty store; `shards` is rounded up to a power of two (minimum 1).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Mutex::new(FastHashMap::default()))
            .collect();
        Self { shards }
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "only the low bits select a shard"
    )]
    fn shard(&self, key: &Tetra) -> MutexGuard<'_, FastHashMap<Tetra, Arc<TetraRecord>>> {
        let mut hasher = FastHasher::default();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) & (self.shards.len() - 1);
        // A panicking task halts the run, so a poisoned shard still holds consistent data
        // for inspection.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a live tetrahedron.
    #[must_use]
    pub fn get(&self, key: &Tetra) -> Option<Arc<TetraRecord>> {
        self.shard(key).get(key).cloned()
    }

    /// Inserts a new tetrahedron.
    ///
    /// # Errors
    ///
    /// Returns [`MeshInvariantError::DuplicateTetra`] if `key` is already live; the existing
    /// record is left untouched.
    pub fn insert(
        &self,
        key: Tetra,
        record: TetraRecord,
    ) -> Result<Arc<TetraRecord>, MeshInvariantError> {
        let mut shard = self.shard(&key);
        if shard.contains_key(&key) {
            return Err(MeshInvariantError::DuplicateTetra { tetra: key });
        }
        let record = Arc::new(record);
        shard.insert(key, Arc::clone(&record));
        Ok(record)
    }

    /// Removes a live tetrahedron and returns its record.
    ///
    /// # Errors
    ///
    /// Returns [`MeshInvariantError::MissingTetra`] if `key` is not live.
    pub fn remove(&self, key: &Tetra) -> Result<Arc<TetraRecord>, MeshInvariantError> {
        self.shard(key)
            .remove(key)
            .ok_or(MeshInvariantError::MissingTetra { tetra: *key })
    }

    /// Number of live tetrahedra.
    ///
    /// Only a snapshot while tasks are running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns `true` if no tetrahedron is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live entries, in unspecified order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Tetra, Arc<TetraRecord>)> {
        let mut out = Vec::new();
        for shard in &*self.shards {
            let shard = shard.lock().unwrap_or_else(PoisonError::into_inner);
            out.extend(shard.iter().map(|(key, record)| (*key, Arc::clone(record))));
        }
        out
    }
}

impl Default for MeshStore {
    fn default() -> Self {
        Self::new(1)
    }
}
