//! Three-dimensional coordinate type.
//!
//! `Point3` is a plain, `Copy` coordinate triple. Points are registered once and never
//! mutated afterwards, so no interior mutability lives here; ownership tokens are kept by
//! the [`PointRegistry`](crate::core::point_registry::PointRegistry).

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::ops::Index;

/// A point in 3D space with `f64` coordinates.
///
/// # Examples
///
/// ```rust
/// use par_delaunay::geometry::point::Point3;
///
/// let p = Point3::new([1.0, 2.0, 3.0]);
/// assert_eq!(p.coords(), [1.0, 2.0, 3.0]);
/// assert_eq!(p[1], 2.0);
/// assert!(p.is_finite());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Point3([f64; 3]);

impl Point3 {
    /// Creates a point from its coordinates.
    #[inline]
    #[must_use]
    pub const fn new(coords: [f64; 3]) -> Self {
        Self(coords)
    }

    /// Returns the coordinates as an array.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> [f64; 3] {
        self.0
    }

    /// Returns `true` if no coordinate is NaN or infinite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|c| c.is_finite())
    }

    /// Exact coordinate-wise equality, treating `-0.0` and `0.0` as the same position.
    ///
    /// Used to recognise duplicated input points.
    #[inline]
    #[must_use]
    pub fn same_position(&self, other: &Self) -> bool {
        self.0 == other.0
    }

    pub(crate) const fn to_robust(self) -> robust::Coord3D<f64> {
        robust::Coord3D {
            x: self.0[0],
            y: self.0[1],
            z: self.0[2],
        }
    }
}

impl From<[f64; 3]> for Point3 {
    fn from(coords: [f64; 3]) -> Self {
        Self(coords)
    }
}

impl From<Point3> for [f64; 3] {
    fn from(point: Point3) -> Self {
        point.0
    }
}

impl Index<usize> for Point3 {
    type Output = f64;

    fn index(&self, axis: usize) -> &f64 {
        &self.0[axis]
    }
}
