//! Triangulation driver.
//!
//! [`Triangulator::triangulate`] validates the input, optionally sorts it for locality,
//! encloses it in a synthetic hull tetrahedron, seeds the mesh store with that single
//! tetrahedron (holding every real point as pending), and runs insertion tasks on the
//! worker pool until no task is left. The live tetrahedra are then reported in the
//! caller's index space.

#![forbid(unsafe_code)]

use crate::core::algorithms::insertion_task::{InsertionCounters, InsertionTask, MeshContext};
use crate::core::algorithms::spatial_sort::spatial_sort_by;
use crate::core::mesh_store::{MeshInvariantError, MeshStore, NeighborLinks, TetraRecord};
use crate::core::point_registry::PointRegistry;
use crate::core::scheduler::{DEFAULT_HIGH_WATER_MARK, DEFAULT_LOW_WATER_MARK, JobQueue};
use crate::core::tetra::{PointIndex, Tetra};
use crate::core::triangulation::{TetraCell, Triangulation, TriangulationStats};
use crate::geometry::point::Point3;
use crate::geometry::predicates::{Location, point_in_tetra};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Default size of the hull tetrahedron relative to the input's bounding radius.
pub const DEFAULT_HULL_SCALE: f64 = 20.0;

/// Smallest accepted hull scale; the inscribed sphere of the hull then still has a larger
/// radius than the input's bounding sphere.
pub const MIN_HULL_SCALE: f64 = 2.0;

/// Default number of mesh store shards.
pub const DEFAULT_STORE_SHARDS: usize = 64;

/// Smallest bounding radius relative to the largest coordinate magnitude (2^-20). Keeps the
/// hull offsets well above the rounding step of far-away input.
const MAGNITUDE_RADIUS_FRACTION: f64 = 1.0 / 1_048_576.0;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors returned by [`Triangulator::triangulate`].
#[derive(Debug, Error)]
pub enum TriangulationError {
    /// An input coordinate is NaN or infinite.
    #[error("Input point {index} has a non-finite coordinate: {point:?}")]
    NonFiniteCoordinate {
        /// Index of the offending point.
        index: usize,
        /// Its coordinates.
        point: [f64; 3],
    },
    /// No representable hull tetrahedron strictly encloses the input, or the predicates on
    /// it would overflow (coordinates too large).
    #[error("No finite hull strictly encloses the input (bounding radius {radius})")]
    DegenerateHull {
        /// Bounding radius of the input.
        radius: f64,
    },
    /// The mesh became inconsistent during insertion.
    #[error("Mesh invariant violated during insertion: {source}")]
    InvariantViolation {
        /// The violated invariant.
        #[from]
        source: MeshInvariantError,
    },
    /// The configuration could not be built.
    #[error("Invalid triangulator configuration: {0}")]
    Config(#[from] TriangulatorConfigBuilderError),
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tuning knobs of a triangulation run.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::triangulator::TriangulatorConfigBuilder;
///
/// let config = TriangulatorConfigBuilder::default()
///     .workers(4)
///     .spatial_sort(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.workers(), 4);
/// assert_eq!(config.low_water_mark(), 50);
///
/// assert!(TriangulatorConfigBuilder::default().workers(0).build().is_err());
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct TriangulatorConfig {
    /// Number of worker threads (`K`).
    #[builder(default = "default_workers()")]
    workers: usize,
    /// Reorder the input for spatial locality before inserting.
    #[builder(default = "true")]
    spatial_sort: bool,
    /// Batch workers sleep while the queue holds at most this many jobs.
    #[builder(default = "DEFAULT_LOW_WATER_MARK")]
    low_water_mark: usize,
    /// All workers are woken once the queue holds more than this many jobs.
    #[builder(default = "DEFAULT_HIGH_WATER_MARK")]
    high_water_mark: usize,
    /// Size of the hull tetrahedron relative to the bounding radius of the input.
    #[builder(default = "DEFAULT_HULL_SCALE")]
    hull_scale: f64,
    /// Number of mesh store shards (rounded up to a power of two).
    #[builder(default = "DEFAULT_STORE_SHARDS")]
    store_shards: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
}

impl TriangulatorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.workers == Some(0) {
            return Err("workers must be at least 1".to_string());
        }
        if self.store_shards == Some(0) {
            return Err("store_shards must be at least 1".to_string());
        }
        if let Some(scale) = self.hull_scale {
            if !(scale.is_finite() && scale >= MIN_HULL_SCALE) {
                return Err(format!(
                    "hull_scale must be finite and at least {MIN_HULL_SCALE}, got {scale}"
                ));
            }
        }
        let low = self.low_water_mark.unwrap_or(DEFAULT_LOW_WATER_MARK);
        let high = self.high_water_mark.unwrap_or(DEFAULT_HIGH_WATER_MARK);
        if low > high {
            return Err(format!(
                "low_water_mark ({low}) must not exceed high_water_mark ({high})"
            ));
        }
        Ok(())
    }
}

impl TriangulatorConfig {
    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Whether the input is spatially sorted before insertion.
    #[inline]
    #[must_use]
    pub const fn spatial_sort(&self) -> bool {
        self.spatial_sort
    }

    /// Low-water mark of the job queue.
    #[inline]
    #[must_use]
    pub const fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    /// High-water mark of the job queue.
    #[inline]
    #[must_use]
    pub const fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Hull size relative to the input's bounding radius.
    #[inline]
    #[must_use]
    pub const fn hull_scale(&self) -> f64 {
        self.hull_scale
    }

    /// Number of mesh store shards.
    #[inline]
    #[must_use]
    pub const fn store_shards(&self) -> usize {
        self.store_shards
    }
}

impl Default for TriangulatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            spatial_sort: true,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            hull_scale: DEFAULT_HULL_SCALE,
            store_shards: DEFAULT_STORE_SHARDS,
        }
    }
}

// =============================================================================
// HULL
// =============================================================================

/// Vertices of the synthetic tetrahedron enclosing `points`.
///
/// The hull is a regular tetrahedron centred on the bounding box of the input. Its
/// inscribed sphere has radius `scale * r / sqrt(3)`, where `r` is half the bounding-box
/// diagonal, so every input point is strictly inside for `scale >= MIN_HULL_SCALE`. `r` is
/// at least 1 and at least 2^-20 of the largest coordinate magnitude.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::triangulator::hull_points;
/// use par_delaunay::geometry::point::Point3;
/// use par_delaunay::geometry::predicates::{Location, point_in_tetra};
///
/// let points = [Point3::new([0.0, 0.0, 0.0]), Point3::new([4.0, 2.0, -1.0])];
/// let hull = hull_points(&points, 20.0);
/// assert!(points.iter().all(|&p| point_in_tetra(hull, p) == Location::INSIDE));
/// ```
#[must_use]
pub fn hull_points(points: &[Point3], scale: f64) -> [Point3; 4] {
    let (center, radius) = bounding_sphere(points);
    let s = scale * radius;
    [[1.0, 1.0, 1.0], [1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [-1.0, -1.0, 1.0]]
        .map(|dir: [f64; 3]| Point3::new(std::array::from_fn(|axis| center[axis] + s * dir[axis])))
}

/// Centre of the bounding box and half its diagonal, floored at 1 and at a fixed fraction
/// of the largest coordinate magnitude.
fn bounding_sphere(points: &[Point3]) -> ([f64; 3], f64) {
    let Some(first) = points.first() else {
        return ([0.0; 3], 1.0);
    };
    let (min, max) = points.iter().fold((first.coords(), first.coords()), |(mut min, mut max), p| {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
        (min, max)
    });
    let center = std::array::from_fn(|axis| min[axis] / 2.0 + max[axis] / 2.0);
    let magnitude = min
        .iter()
        .chain(&max)
        .fold(0.0_f64, |acc, c| acc.max(c.abs()));
    let floor = (magnitude * MAGNITUDE_RADIUS_FRACTION).max(1.0);
    let extents: [f64; 3] = std::array::from_fn(|axis| max[axis] - min[axis]);
    let largest = extents.iter().copied().fold(0.0, f64::max);
    if largest == 0.0 {
        return (center, floor);
    }
    // Scaled by the largest extent so that squaring cannot overflow.
    let diagonal = largest * extents.iter().map(|e| (e / largest).powi(2)).sum::<f64>().sqrt();
    (center, (diagonal / 2.0).max(floor))
}

/// Whether `insphere` on tetrahedra spanning up to the hull edge stays finite. Its terms are
/// products of five coordinate differences.
fn predicates_fit(radius: f64, scale: f64) -> bool {
    (2.0 * scale * radius).powi(5).is_finite()
}

// =============================================================================
// TRIANGULATOR
// =============================================================================

/// Runs concurrent incremental insertion with a fixed configuration.
#[derive(Clone, Debug, Default)]
pub struct Triangulator {
    config: TriangulatorConfig,
}

impl Triangulator {
    /// Creates a triangulator.
    #[must_use]
    pub const fn new(config: TriangulatorConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TriangulatorConfig {
        &self.config
    }

    /// Computes the Delaunay triangulation of `points`.
    ///
    /// Tetrahedra of the result refer to `points` by index; indices
    /// `points.len()..points.len() + 4` are the synthetic hull vertices. Points with
    /// identical coordinates are inserted once.
    ///
    /// # Errors
    ///
    /// - [`TriangulationError::NonFiniteCoordinate`] if an input coordinate is NaN or
    ///   infinite.
    /// - [`TriangulationError::DegenerateHull`] if no representable hull encloses the input.
    /// - [`TriangulationError::InvariantViolation`] if the mesh became inconsistent.
    pub fn triangulate(&self, points: &[Point3]) -> Result<Triangulation, TriangulationError> {
        let started = Instant::now();
        if let Some((index, point)) = points.iter().enumerate().find(|(_, p)| !p.is_finite()) {
            return Err(TriangulationError::NonFiniteCoordinate {
                index,
                point: point.coords(),
            });
        }
        let radius = bounding_sphere(points).1;
        let hull = hull_points(points, self.config.hull_scale);
        // Extreme coordinates can overflow the hull or the predicates on it.
        let encloses = predicates_fit(radius, self.config.hull_scale)
            && hull.iter().all(Point3::is_finite)
            && points
                .iter()
                .all(|&p| point_in_tetra(hull, p) == Location::INSIDE);
        if !encloses {
            return Err(TriangulationError::DegenerateHull { radius });
        }

        // Registry index `i` holds caller index `order[i].0`.
        let mut order: Vec<(PointIndex, Point3)> = points.iter().copied().enumerate().collect();
        if self.config.spatial_sort {
            spatial_sort_by(&mut order, |(_, p)| *p);
        }
        let registry = PointRegistry::new(order.iter().map(|(_, p)| *p).collect(), hull);
        let store = MeshStore::new(self.config.store_shards);
        let counters = InsertionCounters::default();
        let queue = JobQueue::new(self.config.low_water_mark, self.config.high_water_mark);

        let root = registry.hull_tetra();
        store.insert(root, TetraRecord::new((0..registry.real_count()).collect(), [None; 4]))?;
        queue.push_job(InsertionTask::new(root));

        let ctx = MeshContext {
            registry: &registry,
            store: &store,
            counters: &counters,
        };
        self.run_insertions(&ctx, &queue)?;
        debug_assert_eq!(queue.unfinished_jobs(), 0);
        debug_assert!((0..registry.len()).all(|i| !registry.is_owned(i)));

        let counts = counters.snapshot();
        let stats = TriangulationStats {
            total_jobs: queue.total_jobs(),
            insertions: counts.inserted,
            retries: counts.retries,
            stale_tasks: counts.stale,
            duplicates: counts.duplicates,
            orphaned: counts.orphaned,
            workers: self.config.workers,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            "triangulated {} points with {} workers: {} tetrahedra in {} shards, {} jobs, {} retries, {} duplicates in {:?}",
            points.len(),
            stats.workers,
            store.len(),
            store.shard_count(),
            stats.total_jobs,
            stats.retries,
            stats.duplicates,
            stats.elapsed
        );

        let caller_index = |registry_index: PointIndex| {
            order
                .get(registry_index)
                .map_or(registry_index, |(original, _)| *original)
        };
        let mut cells = store
            .entries()
            .into_iter()
            .map(|(key, record)| remap_cell(key, record.links(), &caller_index))
            .collect::<Result<Vec<_>, _>>()?;
        cells.sort_unstable_by_key(|cell| cell.vertices);

        let mut all_points = points.to_vec();
        all_points.extend_from_slice(&hull);
        Ok(Triangulation::new(all_points, points.len(), cells, stats))
    }

    /// Drains `queue` on the worker pool; the first fatal task error stops every worker.
    fn run_insertions(
        &self,
        ctx: &MeshContext<'_>,
        queue: &JobQueue<InsertionTask>,
    ) -> Result<(), TriangulationError> {
        queue.run_jobs(self.config.workers, |task, queue| {
            task.execute(ctx, queue).map(|_| ())
        })?;
        Ok(())
    }
}

/// Rewrites a live tetrahedron from registry indices into caller indices.
///
/// Renaming vertices changes the canonical order, so the neighbor slots are permuted
/// along with them.
fn remap_cell(
    key: Tetra,
    links: NeighborLinks,
    caller_index: &impl Fn(PointIndex) -> PointIndex,
) -> Result<TetraCell, MeshInvariantError> {
    let remap = |tetra: Tetra| Tetra::new(tetra.vertices().map(caller_index));
    let mut slots: [(PointIndex, Option<Tetra>); 4] = [(0, None); 4];
    for (slot, (vertex, link)) in key.vertices().into_iter().zip(links).enumerate() {
        slots[slot] = (caller_index(vertex), link.map(&remap).transpose()?);
    }
    slots.sort_unstable_by_key(|(vertex, _)| *vertex);
    Ok(TetraCell {
        vertices: Tetra::new(slots.map(|(vertex, _)| vertex))?,
        neighbors: slots.map(|(_, link)| link),
    })
}

/// Triangulates `points` with `workers` threads and default settings otherwise.
///
/// # Errors
///
/// See [`Triangulator::triangulate`]; additionally [`TriangulationError::Config`] if
/// `workers` is zero.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::triangulator::triangulate;
/// use par_delaunay::geometry::point::Point3;
///
/// let points = [
///     Point3::new([0.0, 0.0, 0.0]),
///     Point3::new([1.0, 0.0, 0.0]),
///     Point3::new([0.0, 1.0, 0.0]),
///     Point3::new([0.0, 0.0, 1.0]),
/// ];
/// let triangulation = triangulate(&points, 2).unwrap();
/// assert_eq!(triangulation.real_tetrahedra().count(), 1);
/// ```
pub fn triangulate(points: &[Point3], workers: usize) -> Result<Triangulation, TriangulationError> {
    let config = TriangulatorConfigBuilder::default().workers(workers).build()?;
    Triangulator::new(config).triangulate(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_config_defaults() {
        let config = TriangulatorConfigBuilder::default().build().unwrap();
        assert!(config.workers() >= 1);
        assert!(config.spatial_sort());
        assert_eq!(config.low_water_mark(), 50);
        assert_eq!(config.high_water_mark(), 100);
        assert_relative_eq!(config.hull_scale(), 20.0);
        assert_eq!(config.store_shards(), 64);
        assert_eq!(config.workers(), TriangulatorConfig::default().workers());
    }

    #[test]
    fn test_config_validation() {
        let inverted = TriangulatorConfigBuilder::default()
            .low_water_mark(10)
            .high_water_mark(5)
            .build();
        assert!(inverted.is_err());
        assert!(TriangulatorConfigBuilder::default().hull_scale(f64::NAN).build().is_err());
        assert!(TriangulatorConfigBuilder::default().hull_scale(0.5).build().is_err());
        assert!(TriangulatorConfigBuilder::default().store_shards(0).build().is_err());
        let err = TriangulatorConfigBuilder::default().workers(0).build().unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = TriangulatorConfigBuilder::default().workers(3).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: TriangulatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_hull_encloses_input() {
        let points = [
            Point3::new([-100.0, 3.0, 7.0]),
            Point3::new([250.0, -40.0, 0.0]),
            Point3::new([0.0, 0.0, 1000.0]),
        ];
        let hull = hull_points(&points, DEFAULT_HULL_SCALE);
        for p in points {
            assert_eq!(point_in_tetra(hull, p), Location::INSIDE);
        }
        // Corners of the bounding box are enclosed too.
        assert_eq!(
            point_in_tetra(hull, Point3::new([250.0, 3.0, 1000.0])),
            Location::INSIDE
        );
    }

    #[test]
    fn test_hull_for_empty_input_is_centred_at_origin() {
        let hull = hull_points(&[], 20.0);
        assert_eq!(hull[0], Point3::new([20.0, 20.0, 20.0]));
        assert_eq!(hull[3], Point3::new([-20.0, -20.0, 20.0]));
    }

    #[test]
    fn test_rejects_non_finite_input() {
        let points = [Point3::new([0.0, 0.0, 0.0]), Point3::new([1.0, f64::NAN, 0.0])];
        let err = Triangulator::default().triangulate(&points).unwrap_err();
        assert!(matches!(
            err,
            TriangulationError::NonFiniteCoordinate { index: 1, .. }
        ));
    }

    #[test]
    fn test_rejects_overflowing_hull() {
        let points = [
            Point3::new([-1e307, 0.0, 0.0]),
            Point3::new([1e307, 0.0, 0.0]),
        ];
        let err = Triangulator::default().triangulate(&points).unwrap_err();
        assert!(matches!(err, TriangulationError::DegenerateHull { .. }));

        // A hull that far out is finite, but insphere terms on it are not.
        let far = [Point3::new([1e300, 1e300, 1e300])];
        let err = Triangulator::default().triangulate(&far).unwrap_err();
        assert!(matches!(err, TriangulationError::DegenerateHull { .. }));
    }

    #[test]
    fn test_single_point_far_from_origin() {
        let far = [Point3::new([1e18, 0.0, 0.0])];
        let hull = hull_points(&far, DEFAULT_HULL_SCALE);
        assert!(hull.iter().all(|h| h[0] != far[0][0]));

        let triangulation = Triangulator::default().triangulate(&far).unwrap();
        assert_eq!(triangulation.stats().insertions, 1);
        assert_eq!(triangulation.tetrahedra().count(), 4);
        assert!(triangulation.is_valid().is_ok());
    }

    #[test]
    fn test_dangling_link_stops_the_run() {
        let hull = [
            Point3::new([10.0, 10.0, 10.0]),
            Point3::new([10.0, -10.0, -10.0]),
            Point3::new([-10.0, 10.0, -10.0]),
            Point3::new([-10.0, -10.0, 10.0]),
        ];
        let registry = PointRegistry::new(
            vec![Point3::new([0.0, 0.0, 0.0]), Point3::new([-1.0, -1.0, 1.0])],
            hull,
        );
        let store = MeshStore::new(4);
        let counters = InsertionCounters::default();
        let queue = JobQueue::default();

        // Across face (A, B, C) of the hull sits a tetrahedron that was never stored. Its
        // circumsphere contains the origin, so the cavity walk has to fetch it.
        let dangling = Tetra::new([1, 2, 3, 4]).unwrap();
        let root = registry.hull_tetra();
        store
            .insert(root, TetraRecord::new(vec![0], [None, None, None, Some(dangling)]))
            .unwrap();
        queue.push_job(InsertionTask::new(root));

        let ctx = MeshContext {
            registry: &registry,
            store: &store,
            counters: &counters,
        };
        let triangulator = Triangulator::new(
            TriangulatorConfigBuilder::default().workers(2).build().unwrap(),
        );
        let err = triangulator.run_insertions(&ctx, &queue).unwrap_err();
        assert!(matches!(
            err,
            TriangulationError::InvariantViolation {
                source: MeshInvariantError::MissingTetra { tetra }
            } if tetra == dangling
        ));
        assert!(queue.is_halted());
        assert_eq!(store.len(), 1);
        assert_eq!(counters.snapshot().inserted, 0);
    }

    #[test]
    fn test_remap_cell_permutes_neighbor_slots() {
        // Registry order [a, b, c, d, e] = caller indices [4, 3, 2, 1, 0].
        let reverse = |i: PointIndex| if i < 5 { 4 - i } else { i };
        let key = Tetra::new([0, 1, 2, 5]).unwrap();
        let across_b = Tetra::new([0, 2, 5, 6]).unwrap();
        let links = [None, Some(across_b), None, None];

        let cell = remap_cell(key, links, &reverse).unwrap();
        assert_eq!(cell.vertices.vertices(), [2, 3, 4, 5]);
        // Registry vertex 1 became caller vertex 3, now in slot 1 of [2, 3, 4, 5].
        assert_eq!(cell.neighbors[1], Some(Tetra::new([4, 2, 5, 6]).unwrap()));
        assert_eq!(cell.neighbors.iter().flatten().count(), 1);
    }

    #[test]
    fn test_triangulate_single_tetrahedron() {
        let points = [
            Point3::new([0.0, 0.0, 0.0]),
            Point3::new([1.0, 0.0, 0.0]),
            Point3::new([0.0, 1.0, 0.0]),
            Point3::new([0.0, 0.0, 1.0]),
        ];
        let triangulation = triangulate(&points, 1).unwrap();
        let real: Vec<_> = triangulation.real_tetrahedra().collect();
        assert_eq!(real, vec![Tetra::new([0, 1, 2, 3]).unwrap()]);
        assert_eq!(triangulation.stats().insertions, 4);
        assert!(triangulation.is_valid().is_ok());
    }
}
