//! Canonical tetrahedron and triangle keys.
//!
//! A [`Tetra`] is identified by its four point indices sorted ascending, so equal vertex
//! sets hash and compare identically no matter in which order they were produced. The same
//! holds for [`Triangle`] faces.
//!
//! # Slot convention
//!
//! Neighbor slot `i` of a tetrahedron refers to the tetrahedron across the face opposite
//! vertex `i` (in canonical order), i.e. across [`Tetra::face(i)`](Tetra::face).

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a point in the point registry.
///
/// Real input points use `0..N`, the four synthetic hull points `N..N + 4`.
pub type PointIndex = usize;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised when building a tetrahedron key.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::tetra::{Tetra, TetraError};
///
/// let err = Tetra::new([0, 1, 1, 2]).unwrap_err();
/// assert!(matches!(err, TetraError::RepeatedVertex { vertex: 1, .. }));
/// ```
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TetraError {
    /// The four indices are not pairwise distinct.
    #[error("Tetrahedron {vertices:?} repeats vertex {vertex}")]
    RepeatedVertex {
        /// The offending vertex list (sorted).
        vertices: [PointIndex; 4],
        /// The repeated index.
        vertex: PointIndex,
    },
}

// =============================================================================
// TRIANGLE
// =============================================================================

/// A canonical (sorted) triangular face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triangle([PointIndex; 3]);

impl Triangle {
    /// Creates a canonical face from three indices in any order.
    #[must_use]
    pub fn new(mut vertices: [PointIndex; 3]) -> Self {
        vertices.sort_unstable();
        Self(vertices)
    }

    /// The sorted vertex indices.
    #[inline]
    #[must_use]
    pub const fn vertices(&self) -> [PointIndex; 3] {
        self.0
    }

    /// Returns `true` if `vertex` is one of the three corners.
    #[inline]
    #[must_use]
    pub fn contains(&self, vertex: PointIndex) -> bool {
        self.0.contains(&vertex)
    }
}

// =============================================================================
// TETRA
// =============================================================================

/// A canonical tetrahedron key: four pairwise distinct point indices, sorted ascending.
///
/// Deserialization goes through [`Tetra::new`], so a deserialized key is always canonical.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::tetra::Tetra;
///
/// let a = Tetra::new([7, 2, 9, 4]).unwrap();
/// let b = Tetra::new([9, 7, 4, 2]).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.vertices(), [2, 4, 7, 9]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "[PointIndex; 4]", into = "[PointIndex; 4]")]
pub struct Tetra([PointIndex; 4]);

impl Tetra {
    /// Canonicalizes four indices into a key.
    ///
    /// # Errors
    ///
    /// Returns [`TetraError::RepeatedVertex`] if the indices are not pairwise distinct.
    pub fn new(mut vertices: [PointIndex; 4]) -> Result<Self, TetraError> {
        vertices.sort_unstable();
        if let Some(pair) = vertices.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TetraError::RepeatedVertex {
                vertices,
                vertex: pair[0],
            });
        }
        Ok(Self(vertices))
    }

    /// Builds the tetrahedron formed by a face and an apex.
    ///
    /// # Errors
    ///
    /// Returns [`TetraError::RepeatedVertex`] if `apex` is a corner of `face`.
    pub fn from_face(face: Triangle, apex: PointIndex) -> Result<Self, TetraError> {
        let [a, b, c] = face.vertices();
        Self::new([a, b, c, apex])
    }

    /// The tetrahedron `(first, first + 1, first + 2, first + 3)`.
    #[inline]
    #[must_use]
    pub(crate) const fn consecutive(first: PointIndex) -> Self {
        Self([first, first + 1, first + 2, first + 3])
    }

    /// The sorted vertex indices.
    #[inline]
    #[must_use]
    pub const fn vertices(&self) -> [PointIndex; 4] {
        self.0
    }

    /// Returns `true` if `vertex` is one of the four corners.
    #[inline]
    #[must_use]
    pub fn contains(&self, vertex: PointIndex) -> bool {
        self.0.contains(&vertex)
    }

    /// Position of `vertex` in canonical order.
    #[inline]
    #[must_use]
    pub fn slot_of_vertex(&self, vertex: PointIndex) -> Option<usize> {
        self.0.iter().position(|&v| v == vertex)
    }

    /// The face opposite the vertex in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= 4`.
    #[must_use]
    pub fn face(&self, slot: usize) -> Triangle {
        let [a, b, c, d] = self.0;
        // Removing one element from a sorted array keeps it sorted.
        match slot {
            0 => Triangle([b, c, d]),
            1 => Triangle([a, c, d]),
            2 => Triangle([a, b, d]),
            3 => Triangle([a, b, c]),
            _ => panic!("tetrahedron face slot {slot} out of range"),
        }
    }

    /// All four faces, `faces()[i] == face(i)`.
    #[must_use]
    pub fn faces(&self) -> [Triangle; 4] {
        [self.face(0), self.face(1), self.face(2), self.face(3)]
    }

    /// The slot whose opposite face is `face`, if `face` is a face of this tetrahedron.
    #[must_use]
    pub fn slot_of_face(&self, face: &Triangle) -> Option<usize> {
        let mut missing = None;
        for (slot, &v) in self.0.iter().enumerate() {
            if !face.contains(v) {
                if missing.is_some() {
                    return None;
                }
                missing = Some(slot);
            }
        }
        missing
    }

    /// Returns `true` if any vertex index is `>= first_hull_index`.
    #[inline]
    #[must_use]
    pub fn touches_hull(&self, first_hull_index: PointIndex) -> bool {
        self.0[3] >= first_hull_index
    }
}

impl TryFrom<[PointIndex; 4]> for Tetra {
    type Error = TetraError;

    fn try_from(vertices: [PointIndex; 4]) -> Result<Self, Self::Error> {
        Self::new(vertices)
    }
}

impl From<Tetra> for [PointIndex; 4] {
    fn from(tetra: Tetra) -> Self {
        tetra.0
    }
}

impl std::fmt::Display for Tetra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "({a}, {b}, {c}, {d})")
    }
}
