//! Property-based tests for triangulation invariants.
//!
//! For random point sets, the concurrent triangulation must:
//! - satisfy the empty-circumsphere property,
//! - have reciprocal neighbor links across shared faces,
//! - contain every distinct input point as a vertex,
//! - not depend on the number of workers.

use par_delaunay::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

/// Strategy for generating finite f64 coordinates in a reasonable range
fn finite_coordinate() -> impl Strategy<Value = f64> {
    (-100.0..100.0).prop_filter("must be finite", |x: &f64| x.is_finite())
}

/// Strategy for generating 3D points
fn point_3d() -> impl Strategy<Value = Point3> {
    prop::array::uniform3(finite_coordinate()).prop_map(Point3::new)
}

/// Strategy for generating a small point set (0-40 points)
fn small_point_set() -> impl Strategy<Value = Vec<Point3>> {
    prop::collection::vec(point_3d(), 0..=40)
}

/// Strategy for generating points on a coarse integer lattice, which produces many
/// duplicates and degenerate configurations
fn lattice_point_set() -> impl Strategy<Value = Vec<Point3>> {
    prop::collection::vec(
        prop::array::uniform3(0_i8..4).prop_map(|c| Point3::new(c.map(f64::from))),
        1..=30,
    )
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_triangulation_is_valid(points in small_point_set(), workers in 1_usize..=4) {
        let triangulation = triangulate(&points, workers).unwrap();
        prop_assert_eq!(triangulation.validate_neighbors(), Ok(()));
        prop_assert_eq!(triangulation.validate_coverage(), Ok(()));
        prop_assert_eq!(triangulation.validate_delaunay(), Ok(()));
        prop_assert_eq!(triangulation.number_of_real_points(), points.len());
        let stats = triangulation.stats();
        prop_assert_eq!(stats.insertions + stats.duplicates, points.len());
        prop_assert_eq!(stats.orphaned, 0);
    }

    #[test]
    fn prop_worker_count_does_not_change_result(points in small_point_set()) {
        let single = triangulate(&points, 1).unwrap();
        let parallel = triangulate(&points, 4).unwrap();
        let a: BTreeSet<Tetra> = single.tetrahedra().collect();
        let b: BTreeSet<Tetra> = parallel.tetrahedra().collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_degenerate_lattice_is_valid(points in lattice_point_set(), workers in 1_usize..=4) {
        let triangulation = triangulate(&points, workers).unwrap();
        prop_assert!(triangulation.is_valid().is_ok(), "{:?}", triangulation.is_valid());
        let distinct: BTreeSet<[u64; 3]> = points
            .iter()
            .map(|p| p.coords().map(f64::to_bits))
            .collect();
        prop_assert_eq!(triangulation.stats().insertions, distinct.len());
    }

    #[test]
    fn prop_every_cell_has_distinct_sorted_vertices(points in small_point_set()) {
        let triangulation = triangulate(&points, 2).unwrap();
        let mut seen = BTreeSet::new();
        for tetra in triangulation.tetrahedra() {
            let v = tetra.vertices();
            prop_assert!(v.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(v[3] < triangulation.number_of_points());
            prop_assert!(seen.insert(tetra), "duplicate tetrahedron {}", tetra);
        }
    }
}
