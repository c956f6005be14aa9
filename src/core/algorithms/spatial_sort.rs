//! Spatial partitioner.
//!
//! Reorders points in place so that points close in space end up close in the sequence:
//! each range is split at the midpoint of its widest axis and both halves are sorted
//! recursively, in parallel through `rayon::join` for large ranges. Insertion tasks
//! spawned from neighboring points then tend to touch disjoint parts of the mesh.
//!
//! The order only affects performance. The triangulation produced afterwards is the same
//! for any permutation of the input.

#![forbid(unsafe_code)]

use crate::geometry::point::Point3;

/// Ranges shorter than this recurse on the calling thread.
const PARALLEL_CUTOFF: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
struct AxisSplit {
    axis: usize,
    median: f64,
}

/// Reorders `points` for spatial locality.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::algorithms::spatial_sort::spatial_sort;
/// use par_delaunay::geometry::point::Point3;
///
/// let mut points = vec![
///     Point3::new([9.0, 0.0, 0.0]),
///     Point3::new([0.0, 0.0, 0.0]),
///     Point3::new([8.0, 0.0, 0.0]),
///     Point3::new([1.0, 0.0, 0.0]),
/// ];
/// spatial_sort(&mut points);
/// assert!(points[0][0] < 5.0 && points[1][0] < 5.0);
/// assert!(points[2][0] > 5.0 && points[3][0] > 5.0);
/// ```
pub fn spatial_sort(points: &mut [Point3]) {
    spatial_sort_by(points, |p| *p);
}

/// Reorders arbitrary items for spatial locality of the position returned by `coords`.
///
/// Used by the triangulator to sort `(original index, position)` pairs.
pub fn spatial_sort_by<T, F>(items: &mut [T], coords: F)
where
    T: Send,
    F: Fn(&T) -> Point3 + Sync,
{
    sort_range(items, &coords);
}

fn sort_range<T, F>(items: &mut [T], coords: &F)
where
    T: Send,
    F: Fn(&T) -> Point3 + Sync,
{
    let size = items.len();
    if size < 2 {
        return;
    }
    let Some(split) = widest_axis_split(items, coords) else {
        // All points coincide.
        return;
    };
    let left_size = partition(items, coords, split);
    if left_size == 0 || left_size == size {
        // The midpoint rounded onto an extreme value; this range cannot be split further.
        return;
    }
    let (left, right) = items.split_at_mut(left_size);
    if size >= PARALLEL_CUTOFF {
        rayon::join(|| sort_range(left, coords), || sort_range(right, coords));
    } else {
        sort_range(left, coords);
        sort_range(right, coords);
    }
}

/// Axis of largest extent and its midpoint, or `None` if the range has zero extent.
fn widest_axis_split<T, F>(items: &[T], coords: &F) -> Option<AxisSplit>
where
    F: Fn(&T) -> Point3,
{
    let first = coords(items.first()?).coords();
    let (min, max) = items
        .iter()
        .skip(1)
        .fold((first, first), |(mut min, mut max), item| {
            let p = coords(item);
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
            (min, max)
        });

    let (axis, extent) = (0..3)
        .map(|axis| (axis, max[axis] - min[axis]))
        .fold((0, f64::NEG_INFINITY), |best, candidate| {
            if candidate.1 > best.1 { candidate } else { best }
        });
    (extent > 0.0).then(|| AxisSplit {
        axis,
        median: min[axis] + extent / 2.0,
    })
}

/// Two-pointer partition: items with coordinate `<= median` move to the front.
///
/// Returns the size of the front part.
fn partition<T, F>(items: &mut [T], coords: &F, split: AxisSplit) -> usize
where
    F: Fn(&T) -> Point3,
{
    let (mut left, mut right) = (0, items.len());
    while left < right {
        if coords(&items[left])[split.axis] <= split.median {
            left += 1;
        } else {
            right -= 1;
            items.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(n: usize, seed: u64) -> Vec<Point3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Point3::new([
                    rng.random_range(-10.0..10.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-5.0..5.0),
                ])
            })
            .collect()
    }

    fn sorted_bits(points: &[Point3]) -> Vec<[u64; 3]> {
        let mut bits: Vec<_> = points.iter().map(|p| p.coords().map(f64::to_bits)).collect();
        bits.sort_unstable();
        bits
    }

    #[test]
    fn test_result_is_a_permutation() {
        let original = random_points(5000, 7);
        let mut points = original.clone();
        spatial_sort(&mut points);
        assert_eq!(sorted_bits(&points), sorted_bits(&original));
    }

    #[test]
    fn test_first_split_separates_halves() {
        let original = random_points(3000, 11);
        let split = widest_axis_split(&original, &|p: &Point3| *p).unwrap();
        assert_eq!(split.axis, 0, "x has the widest range");
        let left_size = original
            .iter()
            .filter(|p| p[split.axis] <= split.median)
            .count();

        let mut points = original;
        spatial_sort(&mut points);
        assert!(points[..left_size].iter().all(|p| p[0] <= split.median));
        assert!(points[left_size..].iter().all(|p| p[0] > split.median));
    }

    #[test]
    fn test_partition_returns_left_size() {
        let mut items = [5.0, 1.0, 4.0, 2.0, 3.0].map(|x| Point3::new([x, 0.0, 0.0]));
        let split = AxisSplit {
            axis: 0,
            median: 3.0,
        };
        let left = partition(&mut items, &|p: &Point3| *p, split);
        assert_eq!(left, 3);
        assert!(items[..3].iter().all(|p| p[0] <= 3.0));
        assert!(items[3..].iter().all(|p| p[0] > 3.0));
    }

    #[test]
    fn test_identical_points_terminate() {
        let mut points = vec![Point3::new([1.0, 2.0, 3.0]); 4096];
        spatial_sort(&mut points);
        assert!(points.iter().all(|p| *p == Point3::new([1.0, 2.0, 3.0])));
        assert!(widest_axis_split(&points, &|p: &Point3| *p).is_none());
    }

    #[test]
    fn test_adjacent_floats_terminate() {
        let a = 1.0_f64;
        let b = f64::from_bits(a.to_bits() + 1);
        let mut points: Vec<_> = (0..64)
            .map(|i| Point3::new([if i % 2 == 0 { a } else { b }, 0.0, 0.0]))
            .collect();
        spatial_sort(&mut points);
        assert_eq!(points.len(), 64);
    }

    #[test]
    fn test_trivial_inputs() {
        let mut empty: Vec<Point3> = Vec::new();
        spatial_sort(&mut empty);
        let mut one = vec![Point3::new([1.0, 1.0, 1.0])];
        spatial_sort(&mut one);
        assert_eq!(one[0], Point3::new([1.0, 1.0, 1.0]));
    }

    #[test]
    fn test_sort_by_keeps_payload() {
        let points = random_points(200, 3);
        let mut tagged: Vec<(usize, Point3)> = points.iter().copied().enumerate().collect();
        spatial_sort_by(&mut tagged, |(_, p)| *p);
        let mut indices: Vec<usize> = tagged.iter().map(|(i, _)| *i).collect();
        assert!(tagged.iter().all(|(i, p)| points[*i] == *p));
        indices.sort_unstable();
        assert_eq!(indices, (0..200).collect::<Vec<_>>());
    }
}
