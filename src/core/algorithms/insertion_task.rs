//! Cavity-based insertion of one point.
//!
//! An [`InsertionTask`] names a tetrahedron. Executing it inserts the first pending point
//! of that tetrahedron into the mesh (Bowyer–Watson):
//!
//! 1. lock the four vertices of the target and look it up;
//! 2. grow the *cavity* (every tetrahedron whose circumsphere contains the point) by a
//!    breadth-first walk over neighbor links, locking the vertices of every cavity member;
//! 3. replace the cavity by the fan of tetrahedra joining the point to the cavity's
//!    boundary faces;
//! 4. move the other pending points of the cavity into the new tetrahedra;
//! 5. link the new tetrahedra to each other and to the tetrahedra around the cavity;
//! 6. commit to the store and spawn one task per new tetrahedron that still has pending
//!    points.
//!
//! Locks are only ever *tried*. If any of them is owned by another task the whole task
//! aborts before touching the store, all locks are released, and the same target is
//! enqueued again. Nothing is written before every lock the task needs is held, so an
//! abort never leaves partial state behind.

#![forbid(unsafe_code)]

use crate::core::collections::{
    FastHashMap, FastHashSet, SmallBuffer, fast_hash_map_with_capacity,
    fast_hash_set_with_capacity,
};
use crate::core::mesh_store::{MeshInvariantError, MeshStore, NeighborLinks, TetraRecord};
use crate::core::point_registry::{Contention, LockSet, PointRegistry};
use crate::core::scheduler::JobQueue;
use crate::core::tetra::{PointIndex, Tetra, TetraError, Triangle};
use crate::geometry::point::Point3;
use crate::geometry::predicates::{
    Location, in_sphere_adjusted, point_in_closed_tetra, point_in_tetra,
};
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cavities rarely exceed this many tetrahedra.
const INLINE_CAVITY: usize = 16;

// =============================================================================
// TASK TYPES
// =============================================================================

/// Request to insert the first pending point of `target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InsertionTask {
    target: Tetra,
}

/// What one execution of an [`InsertionTask`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// `point` was inserted; `removed` cavity tetrahedra were replaced by `created` new ones.
    Inserted {
        /// The inserted point.
        point: PointIndex,
        /// Number of new tetrahedra.
        created: usize,
        /// Number of cavity tetrahedra removed.
        removed: usize,
    },
    /// A lock was owned by another task; the task was enqueued again.
    Retry {
        /// The point that could not be acquired.
        contended: PointIndex,
    },
    /// The target had already been replaced by another task.
    Stale,
    /// The target has no pending points.
    Empty,
}

/// Run-wide counters updated by every task.
#[derive(Debug, Default)]
pub struct InsertionCounters {
    inserted: AtomicUsize,
    retries: AtomicUsize,
    stale: AtomicUsize,
    duplicates: AtomicUsize,
    orphaned: AtomicUsize,
}

/// Point-in-time copy of [`InsertionCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Points inserted.
    pub inserted: usize,
    /// Tasks aborted on contention and enqueued again.
    pub retries: usize,
    /// Tasks whose target no longer existed.
    pub stale: usize,
    /// Pending points dropped because they coincide with a mesh vertex.
    pub duplicates: usize,
    /// Pending points no new tetrahedron contained.
    pub orphaned: usize,
}

impl InsertionCounters {
    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared state every task operates on.
#[derive(Clone, Copy, Debug)]
pub struct MeshContext<'a> {
    /// Point coordinates and ownership tokens.
    pub registry: &'a PointRegistry,
    /// Live tetrahedra.
    pub store: &'a MeshStore,
    /// Run-wide counters.
    pub counters: &'a InsertionCounters,
}

/// Why a task stopped early.
#[derive(Debug)]
enum Abort {
    Contended(Contention),
    Fatal(MeshInvariantError),
}

impl From<Contention> for Abort {
    fn from(contention: Contention) -> Self {
        Self::Contended(contention)
    }
}

impl From<MeshInvariantError> for Abort {
    fn from(err: MeshInvariantError) -> Self {
        Self::Fatal(err)
    }
}

impl From<TetraError> for Abort {
    fn from(err: TetraError) -> Self {
        Self::Fatal(err.into())
    }
}

/// A tetrahedron of the re-triangulated cavity, before it is committed.
#[derive(Debug)]
struct NewTetra {
    key: Tetra,
    /// Boundary face of the cavity this tetrahedron was built on.
    base: Triangle,
    /// Cavity member that owned `base`.
    replaces: Tetra,
    /// Tetrahedron on the far side of `base`, if any.
    outer: Option<Tetra>,
    pending: Vec<PointIndex>,
    links: NeighborLinks,
}

// =============================================================================
// EXECUTION
// =============================================================================

impl InsertionTask {
    /// Creates a task for `target`.
    #[must_use]
    pub const fn new(target: Tetra) -> Self {
        Self { target }
    }

    /// The tetrahedron whose first pending point this task inserts.
    #[must_use]
    pub const fn target(&self) -> Tetra {
        self.target
    }

    /// Runs the task once.
    ///
    /// Contention is not an error: the task re-enqueues itself on `queue` and reports
    /// [`TaskOutcome::Retry`].
    ///
    /// # Errors
    ///
    /// Returns [`MeshInvariantError`] if the mesh is found inconsistent. The store may then
    /// be partially rewritten and the run must stop.
    pub fn execute(
        self,
        ctx: &MeshContext<'_>,
        queue: &JobQueue<Self>,
    ) -> Result<TaskOutcome, MeshInvariantError> {
        let counters = ctx.counters;
        match self.try_insert(ctx, queue) {
            Ok(outcome) => {
                match outcome {
                    TaskOutcome::Inserted { .. } => InsertionCounters::bump(&counters.inserted),
                    TaskOutcome::Stale => InsertionCounters::bump(&counters.stale),
                    TaskOutcome::Retry { .. } | TaskOutcome::Empty => {}
                }
                Ok(outcome)
            }
            Err(Abort::Contended(Contention { point })) => {
                // Every lock was released when `try_insert` returned.
                InsertionCounters::bump(&counters.retries);
                tracing::trace!("insertion at {} contended on point {point}; retrying", self.target);
                queue.push_job(self);
                Ok(TaskOutcome::Retry { contended: point })
            }
            Err(Abort::Fatal(err)) => Err(err),
        }
    }

    fn try_insert(
        self,
        ctx: &MeshContext<'_>,
        queue: &JobQueue<Self>,
    ) -> Result<TaskOutcome, Abort> {
        let MeshContext {
            registry, store, ..
        } = *ctx;
        let mut locks = registry.lock_set();

        // TRY_LOCK_ROOT
        locks.acquire_all_or_none(self.target.vertices())?;

        // LOOKUP
        let Some(root) = store.get(&self.target) else {
            tracing::trace!("insertion target {} is stale", self.target);
            return Ok(TaskOutcome::Stale);
        };
        let Some(&point) = root.pending().first() else {
            return Ok(TaskOutcome::Empty);
        };
        let position = registry.position(point);

        // EXPAND_CAVITY
        let cavity = expand_cavity(ctx, &mut locks, (self.target, root), position)?;

        // RETRIANGULATE
        let mut created = retriangulate(&cavity, point)?;

        // REDISTRIBUTE
        redistribute(ctx, &cavity, &mut created, point);

        // LINK
        link_new_tetras(&mut created, point)?;
        patch_boundary(store, &created)?;

        // COMMIT
        debug_assert!(cavity.iter().all(|(key, _)| locks.holds_tetra(key)));
        for (key, _) in &cavity {
            store.remove(key)?;
        }
        let removed = cavity.len();
        let mut spawn = Vec::with_capacity(created.len());
        let created_count = created.len();
        for tetra in created {
            if !tetra.pending.is_empty() {
                spawn.push(tetra.key);
            }
            store.insert(tetra.key, TetraRecord::new(tetra.pending, tetra.links))?;
        }

        // SPAWN
        for key in spawn {
            queue.push_job(Self::new(key));
        }

        // UNLOCK happens when `locks` is dropped.
        Ok(TaskOutcome::Inserted {
            point,
            created: created_count,
            removed,
        })
    }
}

type Cavity = SmallBuffer<(Tetra, Arc<TetraRecord>), INLINE_CAVITY>;

/// Breadth-first walk from the root collecting every tetrahedron whose circumsphere
/// strictly contains `position`, locking each member's vertices.
///
/// Neighbors that fail the test are cavity boundary tetrahedra and stay unlocked; the
/// vertices of the face they share with the cavity are locked through the member.
fn expand_cavity(
    ctx: &MeshContext<'_>,
    locks: &mut LockSet<'_>,
    root: (Tetra, Arc<TetraRecord>),
    position: Point3,
) -> Result<Cavity, Abort> {
    let mut visited: FastHashSet<Tetra> = fast_hash_set_with_capacity(INLINE_CAVITY * 4);
    visited.insert(root.0);
    let mut cavity = Cavity::new();
    cavity.push(root);

    let mut head = 0;
    while head < cavity.len() {
        let links = cavity[head].1.links();
        head += 1;
        for neighbor in links.into_iter().flatten() {
            if !visited.insert(neighbor) {
                continue;
            }
            if in_sphere_adjusted(ctx.registry.positions(&neighbor), position) > 0.0 {
                locks.acquire_all_or_none(neighbor.vertices())?;
                let record = ctx
                    .store
                    .get(&neighbor)
                    .ok_or(MeshInvariantError::MissingTetra { tetra: neighbor })?;
                cavity.push((neighbor, record));
            }
        }
    }
    Ok(cavity)
}

/// Builds one new tetrahedron per boundary face of the cavity.
///
/// Faces shared by two members cancel out; every face left over is on the boundary. The
/// result is ordered by face so that the first-match rule of redistribution does not
/// depend on hash iteration order.
fn retriangulate(cavity: &Cavity, point: PointIndex) -> Result<Vec<NewTetra>, Abort> {
    let mut open_faces: FastHashMap<Triangle, (usize, usize)> =
        fast_hash_map_with_capacity(cavity.len() * 4);
    for (member, (key, _)) in cavity.iter().enumerate() {
        for (slot, face) in key.faces().into_iter().enumerate() {
            match open_faces.entry(face) {
                Entry::Occupied(shared) => {
                    shared.remove();
                }
                Entry::Vacant(open) => {
                    open.insert((member, slot));
                }
            }
        }
    }
    let mut boundary: Vec<_> = open_faces.into_iter().collect();
    boundary.sort_unstable_by_key(|(face, _)| *face);

    boundary
        .into_iter()
        .map(|(base, (member, slot))| -> Result<NewTetra, Abort> {
            let (replaces, record) = &cavity[member];
            let key = Tetra::from_face(base, point)?;
            let outer = record.links()[slot];
            let mut links = [None; 4];
            // `point` is not on `base`, so it is always a vertex of `key`.
            if let Some(apex_slot) = key.slot_of_vertex(point) {
                links[apex_slot] = outer;
            }
            Ok(NewTetra {
                key,
                base,
                replaces: *replaces,
                outer,
                pending: Vec::new(),
                links,
            })
        })
        .collect()
}

/// Moves the pending points of the cavity (other than `point`) into the new tetrahedra.
///
/// A point goes to the first new tetrahedron strictly containing it. Points on shared
/// faces or edges go to the first tetrahedron containing them in the closed sense, unless
/// they coincide with one of its vertices, in which case they are duplicates and dropped.
fn redistribute(
    ctx: &MeshContext<'_>,
    cavity: &Cavity,
    created: &mut [NewTetra],
    point: PointIndex,
) {
    let registry = ctx.registry;
    let shapes: Vec<[Point3; 4]> = created
        .iter()
        .map(|tetra| registry.positions(&tetra.key))
        .collect();

    for (_, record) in cavity {
        for &pending in record.pending() {
            if pending == point {
                continue;
            }
            let q = registry.position(pending);
            if let Some(i) = shapes
                .iter()
                .position(|&shape| point_in_tetra(shape, q) == Location::INSIDE)
            {
                created[i].pending.push(pending);
                continue;
            }
            match shapes
                .iter()
                .position(|&shape| point_in_closed_tetra(shape, q))
            {
                Some(i) if shapes[i].iter().any(|v| v.same_position(&q)) => {
                    InsertionCounters::bump(&ctx.counters.duplicates);
                    tracing::debug!(
                        "dropping point {pending}: duplicates a vertex of {}",
                        created[i].key
                    );
                }
                Some(i) => created[i].pending.push(pending),
                None => {
                    InsertionCounters::bump(&ctx.counters.orphaned);
                    tracing::warn!(
                        "point {pending} at {:?} lies in no tetrahedron of the cavity of point {point}",
                        q.coords()
                    );
                }
            }
        }
    }
}

/// Links new tetrahedra that share a face through the inserted point.
fn link_new_tetras(created: &mut [NewTetra], point: PointIndex) -> Result<(), Abort> {
    let mut spokes: FastHashMap<Triangle, (usize, usize)> =
        fast_hash_map_with_capacity(created.len() * 3);
    for i in 0..created.len() {
        let key = created[i].key;
        for (slot, face) in key.faces().into_iter().enumerate() {
            if !face.contains(point) {
                continue;
            }
            match spokes.entry(face) {
                Entry::Occupied(partner) => {
                    let (j, partner_slot) = partner.remove();
                    created[i].links[slot] = Some(created[j].key);
                    created[j].links[partner_slot] = Some(key);
                }
                Entry::Vacant(open) => {
                    open.insert((i, slot));
                }
            }
        }
    }
    if let Some(&(i, _)) = spokes.values().next() {
        return Err(MeshInvariantError::OpenCavity {
            tetra: created[i].key,
        }
        .into());
    }
    Ok(())
}

/// Re-points each outer tetrahedron's link from the removed cavity member to the new
/// tetrahedron built on the same face.
///
/// All links are checked before any is rewritten.
fn patch_boundary(store: &MeshStore, created: &[NewTetra]) -> Result<(), Abort> {
    let mut patches = Vec::with_capacity(created.len());
    for tetra in created {
        let Some(outer) = tetra.outer else {
            continue;
        };
        let record = store
            .get(&outer)
            .ok_or(MeshInvariantError::MissingTetra { tetra: outer })?;
        let slot = outer
            .slot_of_face(&tetra.base)
            .ok_or(MeshInvariantError::MissingFace {
                tetra: outer,
                face: tetra.base,
            })?;
        let found = record.links()[slot];
        if found != Some(tetra.replaces) {
            return Err(MeshInvariantError::LinkMismatch {
                tetra: outer,
                slot,
                expected: Some(tetra.replaces),
                found,
            }
            .into());
        }
        patches.push((record, slot, tetra.key));
    }
    for (record, slot, key) in patches {
        record.set_link(slot, Some(key));
    }
    Ok(())
}
