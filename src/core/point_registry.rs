//! Point registry: immutable coordinates plus one exclusive-access token per point.
//!
//! A task *owns* a point while it holds that point's token. Tokens are only ever acquired
//! with a non-blocking attempt, and the "lock several, abort on any failure" pattern is
//! expressed once, by [`LockSet::acquire_all_or_none`]. Dropping a [`LockSet`] releases
//! every token it holds, so an aborted or finished task cannot leak ownership across task
//! boundaries.
//!
//! Reading a coordinate never requires a token: coordinates are immutable once the registry
//! is built.

#![forbid(unsafe_code)]

use crate::core::collections::SmallBuffer;
use crate::core::tetra::{PointIndex, Tetra};
use crate::geometry::point::Point3;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Inline capacity of a [`LockSet`]; typical cavities involve a few dozen points.
const INLINE_TOKENS: usize = 32;

/// A non-blocking acquisition failed because another task owns `point`.
///
/// This is a control-flow signal (the task aborts and is retried later), never a reported
/// failure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("point {point} is owned by another task")]
pub struct Contention {
    /// The point whose token could not be acquired.
    pub point: PointIndex,
}

/// Exclusive-access token of a single point.
#[derive(Debug, Default)]
struct PointToken {
    held: AtomicBool,
}

impl PointToken {
    fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// All points of one triangulation run: the real input points followed by the four
/// synthetic hull points.
#[derive(Debug)]
pub struct PointRegistry {
    positions: Vec<Point3>,
    tokens: Box<[PointToken]>,
    real_count: usize,
}

impl PointRegistry {
    /// Registers `real` points (indices `0..N`) followed by `hull` (indices `N..N + 4`).
    #[must_use]
    pub fn new(real: Vec<Point3>, hull: [Point3; 4]) -> Self {
        let real_count = real.len();
        let mut positions = real;
        positions.extend_from_slice(&hull);
        let tokens = (0..positions.len()).map(|_| PointToken::default()).collect();
        Self {
            positions,
            tokens,
            real_count,
        }
    }

    /// Total number of registered points, hull points included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if no point is registered (never the case once hull points exist).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of real (non-hull) points.
    #[inline]
    #[must_use]
    pub const fn real_count(&self) -> usize {
        self.real_count
    }

    /// The tetrahedron spanned by the four hull points.
    #[must_use]
    pub fn hull_tetra(&self) -> Tetra {
        Tetra::consecutive(self.real_count)
    }

    /// Coordinates of a registered point.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    #[must_use]
    pub fn position(&self, index: PointIndex) -> Point3 {
        self.positions[index]
    }

    /// Coordinates of the four vertices of `tetra`, in canonical order.
    #[inline]
    #[must_use]
    pub fn positions(&self, tetra: &Tetra) -> [Point3; 4] {
        tetra.vertices().map(|v| self.positions[v])
    }

    /// Returns `true` if some task currently owns `index`.
    #[must_use]
    pub fn is_owned(&self, index: PointIndex) -> bool {
        self.tokens[index].is_held()
    }

    /// Starts an empty ownership set for one task.
    #[must_use]
    pub fn lock_set(&self) -> LockSet<'_> {
        LockSet {
            registry: self,
            held: SmallBuffer::new(),
        }
    }
}

/// The set of point tokens held by one task.
///
/// Dropping the set releases everything it holds.
#[derive(Debug)]
pub struct LockSet<'a> {
    registry: &'a PointRegistry,
    held: SmallBuffer<PointIndex, INLINE_TOKENS>,
}

impl LockSet<'_> {
    /// Acquires every point of `points` not already held, or none of them.
    ///
    /// Points already held by this set are skipped. If any acquisition fails, the tokens
    /// acquired during *this call* are released again and the set is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Contention`] naming the first point owned by another task.
    pub fn acquire_all_or_none(
        &mut self,
        points: impl IntoIterator<Item = PointIndex>,
    ) -> Result<(), Contention> {
        let before = self.held.len();
        for point in points {
            if self.holds(point) {
                continue;
            }
            if self.registry.tokens[point].try_acquire() {
                self.held.push(point);
            } else {
                for released in self.held.drain(before..) {
                    self.registry.tokens[released].release();
                }
                return Err(Contention { point });
            }
        }
        Ok(())
    }

    /// Returns `true` if this set holds `point`.
    #[must_use]
    pub fn holds(&self, point: PointIndex) -> bool {
        self.held.contains(&point)
    }

    /// Returns `true` if this set holds all four vertices of `tetra`.
    #[must_use]
    pub fn holds_tetra(&self, tetra: &Tetra) -> bool {
        tetra.vertices().iter().all(|&v| self.holds(v))
    }

    /// Number of held tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns `true` if no token is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Releases every held token.
    pub fn release_all(&mut self) {
        for point in self.held.drain(..) {
            self.registry.tokens[point].release();
        }
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(n: usize) -> PointRegistry {
        let real = (0..n)
            .map(|i| Point3::new([i as f64, 0.5, 0.25]))
            .collect::<Vec<_>>();
        let hull = [
            Point3::new([10.0, 10.0, 10.0]),
            Point3::new([10.0, -10.0, -10.0]),
            Point3::new([-10.0, 10.0, -10.0]),
            Point3::new([-10.0, -10.0, 10.0]),
        ];
        PointRegistry::new(real, hull)
    }

    #[test]
    fn test_registry_layout() {
        let reg = registry(3);
        assert_eq!(reg.len(), 7);
        assert_eq!(reg.real_count(), 3);
        assert_eq!(reg.hull_tetra().vertices(), [3, 4, 5, 6]);
        assert_eq!(reg.position(1), Point3::new([1.0, 0.5, 0.25]));
        assert_eq!(reg.positions(&reg.hull_tetra())[0], Point3::new([10.0, 10.0, 10.0]));
    }

    #[test]
    fn test_acquire_all_or_none_is_atomic() {
        let reg = registry(6);
        let mut first = reg.lock_set();
        first.acquire_all_or_none([0, 1, 2]).unwrap();

        let mut second = reg.lock_set();
        second.acquire_all_or_none([5]).unwrap();
        // 3 and 4 are free, 2 is not: nothing from this call may stay held.
        let err = second.acquire_all_or_none([3, 4, 2]).unwrap_err();
        assert_eq!(err, Contention { point: 2 });
        assert!(!reg.is_owned(3));
        assert!(!reg.is_owned(4));
        assert!(second.holds(5), "earlier acquisitions survive a failed call");
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_reacquiring_held_points_is_a_no_op() {
        let reg = registry(4);
        let mut set = reg.lock_set();
        set.acquire_all_or_none([0, 1, 2, 3]).unwrap();
        set.acquire_all_or_none([2, 3, 4]).unwrap();
        assert_eq!(set.len(), 5);
        assert!(set.holds_tetra(&Tetra::new([0, 1, 2, 4]).unwrap()));
    }

    #[test]
    fn test_drop_releases_tokens() {
        let reg = registry(4);
        {
            let mut set = reg.lock_set();
            set.acquire_all_or_none([0, 1]).unwrap();
            assert!(reg.is_owned(0));
        }
        assert!(!reg.is_owned(0));
        assert!(!reg.is_owned(1));

        let mut set = reg.lock_set();
        set.acquire_all_or_none([0, 1]).unwrap();
        set.release_all();
        assert!(set.is_empty());
        assert!(!reg.is_owned(1));
    }

    #[test]
    fn test_tokens_are_exclusive_across_threads() {
        let reg = registry(1);
        let winners = std::sync::atomic::AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(8);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let mut set = reg.lock_set();
                    let acquired = set.acquire_all_or_none([0]).is_ok();
                    if acquired {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Hold the token until every thread has made its attempt.
                    barrier.wait();
                });
            }
        });
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(!reg.is_owned(0));
    }
}
