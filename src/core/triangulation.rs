//! Result of a triangulation run and its validation.

#![forbid(unsafe_code)]

use crate::core::collections::{FastHashMap, FastHashSet, fast_hash_map_with_capacity};
use crate::core::mesh_store::NeighborLinks;
use crate::core::tetra::{PointIndex, Tetra};
use crate::geometry::point::Point3;
use crate::geometry::predicates::{Location, in_sphere_adjusted, point_in_tetra};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Reasons a [`Triangulation`] fails validation.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::triangulation::ValidationError;
///
/// let err = ValidationError::UncoveredPoint { index: 3 };
/// assert_eq!(err.to_string(), "Point 3 is not a vertex of any tetrahedron");
/// ```
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A point lies strictly inside the circumsphere of a tetrahedron.
    #[error("Point {point} lies inside the circumsphere of tetrahedron {tetra}")]
    DelaunayViolation {
        /// The offending tetrahedron.
        tetra: Tetra,
        /// The point inside its circumsphere.
        point: PointIndex,
    },
    /// A point lies strictly inside a tetrahedron it is not a vertex of.
    #[error("Point {point} lies strictly inside tetrahedron {tetra}")]
    PointInsideTetra {
        /// The offending tetrahedron.
        tetra: Tetra,
        /// The enclosed point.
        point: PointIndex,
    },
    /// A neighbor link names a tetrahedron that is not part of the triangulation.
    #[error("Tetrahedron {tetra} slot {slot} links to unknown tetrahedron {neighbor}")]
    DanglingNeighbor {
        /// The linking tetrahedron.
        tetra: Tetra,
        /// The slot holding the link.
        slot: usize,
        /// The unknown neighbor.
        neighbor: Tetra,
    },
    /// A neighbor does not share the face of the slot it is stored in.
    #[error("Tetrahedron {tetra} slot {slot} links to {neighbor}, which does not share that face")]
    NotAdjacent {
        /// The linking tetrahedron.
        tetra: Tetra,
        /// The slot holding the link.
        slot: usize,
        /// The non-adjacent neighbor.
        neighbor: Tetra,
    },
    /// A neighbor does not link back.
    #[error("Tetrahedron {tetra} links to {neighbor}, which links to {found:?} instead")]
    AsymmetricNeighbor {
        /// The linking tetrahedron.
        tetra: Tetra,
        /// The neighbor.
        neighbor: Tetra,
        /// What the neighbor links to across the shared face.
        found: Option<Tetra>,
    },
    /// An interior face has no neighbor.
    #[error("Tetrahedron {tetra} has no neighbor across interior face {slot}")]
    MissingNeighbor {
        /// The tetrahedron.
        tetra: Tetra,
        /// The unlinked slot.
        slot: usize,
    },
    /// A real point that is not a duplicate of another is missing from the mesh.
    #[error("Point {index} is not a vertex of any tetrahedron")]
    UncoveredPoint {
        /// The missing point.
        index: PointIndex,
    },
}

// =============================================================================
// RESULT TYPES
// =============================================================================

/// One tetrahedron of the result with its neighbor links.
///
/// `neighbors[i]` is the cell across the face opposite `vertices.vertices()[i]`; `None`
/// means that face lies on the outer hull.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TetraCell {
    /// Vertex indices, canonical order.
    pub vertices: Tetra,
    /// Neighbor across each face.
    pub neighbors: NeighborLinks,
}

/// Counters describing one triangulation run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangulationStats {
    /// Jobs pushed onto the queue, retries included.
    pub total_jobs: usize,
    /// Points inserted into the mesh.
    pub insertions: usize,
    /// Tasks aborted on contention and retried.
    pub retries: usize,
    /// Tasks whose target had already been replaced.
    pub stale_tasks: usize,
    /// Input points dropped because they coincide with an earlier point.
    pub duplicates: usize,
    /// Points no tetrahedron contained during redistribution.
    pub orphaned: usize,
    /// Worker threads used.
    pub workers: usize,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

/// A finished 3D Delaunay triangulation.
///
/// Points are indexed as supplied by the caller; indices `number_of_real_points()..` are
/// the four synthetic hull vertices.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::prelude::*;
///
/// let points = [
///     Point3::new([0.0, 0.0, 0.0]),
///     Point3::new([2.0, 0.0, 0.0]),
///     Point3::new([0.0, 2.0, 0.0]),
///     Point3::new([0.0, 0.0, 2.0]),
///     Point3::new([2.0, 2.0, 2.0]),
/// ];
/// let triangulation = triangulate(&points, 2).unwrap();
/// assert_eq!(triangulation.number_of_points(), 9);
/// assert_eq!(triangulation.hull_indices(), 5..9);
/// assert!(triangulation.real_tetrahedra().all(|t| t.vertices().iter().all(|&v| v < 5)));
/// assert!(triangulation.is_valid().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triangulation {
    points: Vec<Point3>,
    real_count: usize,
    cells: Vec<TetraCell>,
    stats: TriangulationStats,
}

impl Triangulation {
    pub(crate) const fn new(
        points: Vec<Point3>,
        real_count: usize,
        cells: Vec<TetraCell>,
        stats: TriangulationStats,
    ) -> Self {
        Self {
            points,
            real_count,
            cells,
            stats,
        }
    }

    /// Number of points, hull vertices included.
    #[must_use]
    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    /// Number of caller-supplied points.
    #[must_use]
    pub const fn number_of_real_points(&self) -> usize {
        self.real_count
    }

    /// All points: the caller's points followed by the four hull vertices.
    #[must_use]
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Coordinates of point `index`, if it exists.
    #[must_use]
    pub fn point(&self, index: PointIndex) -> Option<Point3> {
        self.points.get(index).copied()
    }

    /// Index range of the synthetic hull vertices.
    #[must_use]
    pub const fn hull_indices(&self) -> std::ops::Range<PointIndex> {
        self.real_count..self.real_count + 4
    }

    /// Returns `true` if `index` is a synthetic hull vertex.
    #[must_use]
    pub const fn is_hull_vertex(&self, index: PointIndex) -> bool {
        index >= self.real_count
    }

    /// Every tetrahedron, hull-incident ones included, in ascending key order.
    pub fn tetrahedra(&self) -> impl Iterator<Item = Tetra> + '_ {
        self.cells.iter().map(|cell| cell.vertices)
    }

    /// Tetrahedra whose four vertices are all caller-supplied points.
    pub fn real_tetrahedra(&self) -> impl Iterator<Item = Tetra> + '_ {
        self.tetrahedra()
            .filter(|tetra| !tetra.touches_hull(self.real_count))
    }

    /// Every tetrahedron together with its neighbor links.
    #[must_use]
    pub fn cells(&self) -> &[TetraCell] {
        &self.cells
    }

    /// Number of tetrahedra, hull-incident ones included.
    #[must_use]
    pub fn number_of_tetrahedra(&self) -> usize {
        self.cells.len()
    }

    /// Counters of the run that produced this triangulation.
    #[must_use]
    pub const fn stats(&self) -> &TriangulationStats {
        &self.stats
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    fn shape(&self, tetra: &Tetra) -> [Point3; 4] {
        tetra.vertices().map(|v| self.points[v])
    }

    /// Checks the empty-circumsphere property against every point.
    ///
    /// Cost is `O(tetrahedra × points)`; tetrahedra are checked in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::DelaunayViolation`] or
    /// [`ValidationError::PointInsideTetra`] for some offending pair.
    pub fn validate_delaunay(&self) -> Result<(), ValidationError> {
        self.cells.par_iter().try_for_each(|cell| {
            let tetra = cell.vertices;
            let shape = self.shape(&tetra);
            for (point, &position) in self.points.iter().enumerate() {
                if tetra.contains(point) {
                    continue;
                }
                if in_sphere_adjusted(shape, position) > 0.0 {
                    return Err(ValidationError::DelaunayViolation { tetra, point });
                }
                if point_in_tetra(shape, position) == Location::INSIDE {
                    return Err(ValidationError::PointInsideTetra { tetra, point });
                }
            }
            Ok(())
        })
    }

    /// Checks that neighbor links cross the face of their slot, that only outer hull faces
    /// are unlinked, and that links are reciprocal.
    ///
    /// Link targets are checked for every cell before reciprocity, so a single corrupted
    /// slot is reported as such rather than as an asymmetry seen from its neighbor.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate_neighbors(&self) -> Result<(), ValidationError> {
        let index: FastHashMap<Tetra, usize> = self
            .cells
            .iter()
            .enumerate()
            .map(|(i, cell)| (cell.vertices, i))
            .collect();

        let mut reciprocal = Vec::with_capacity(self.cells.len() * 4);
        for cell in &self.cells {
            let tetra = cell.vertices;
            for (slot, link) in cell.neighbors.iter().enumerate() {
                let face = tetra.face(slot);
                let Some(neighbor) = *link else {
                    if face.vertices().iter().any(|&v| !self.is_hull_vertex(v)) {
                        return Err(ValidationError::MissingNeighbor { tetra, slot });
                    }
                    continue;
                };
                let Some(&other) = index.get(&neighbor) else {
                    return Err(ValidationError::DanglingNeighbor {
                        tetra,
                        slot,
                        neighbor,
                    });
                };
                let Some(back) = neighbor.slot_of_face(&face).filter(|_| neighbor != tetra)
                else {
                    return Err(ValidationError::NotAdjacent {
                        tetra,
                        slot,
                        neighbor,
                    });
                };
                reciprocal.push((tetra, other, back));
            }
        }

        for (tetra, other, back) in reciprocal {
            let neighbor = &self.cells[other];
            let found = neighbor.neighbors[back];
            if found != Some(tetra) {
                return Err(ValidationError::AsymmetricNeighbor {
                    tetra,
                    neighbor: neighbor.vertices,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Checks that every real point is a vertex, unless it duplicates the position of one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UncoveredPoint`] for the first missing point.
    pub fn validate_coverage(&self) -> Result<(), ValidationError> {
        let covered: FastHashSet<PointIndex> = self
            .cells
            .iter()
            .flat_map(|cell| cell.vertices.vertices())
            .collect();

        // Adding 0.0 turns -0.0 into 0.0, matching `Point3::same_position`.
        let position_key = |p: &Point3| p.coords().map(|c| (c + 0.0).to_bits());
        let mut covered_positions = fast_hash_map_with_capacity(covered.len());
        for &v in &covered {
            if let Some(p) = self.point(v) {
                covered_positions.insert(position_key(&p), v);
            }
        }

        (0..self.real_count)
            .filter(|index| !covered.contains(index))
            .find(|&index| !covered_positions.contains_key(&position_key(&self.points[index])))
            .map_or(Ok(()), |index| Err(ValidationError::UncoveredPoint { index }))
    }

    /// Runs every validation.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub fn is_valid(&self) -> Result<(), ValidationError> {
        self.validate_neighbors()?;
        self.validate_coverage()?;
        self.validate_delaunay()
    }
}
