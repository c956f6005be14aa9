//! Exact geometric predicates for 3D Delaunay triangulation.
//!
//! The two primitives, [`orient`] and [`in_sphere`], are evaluated with Shewchuk's adaptive
//! precision arithmetic (via the [`robust`] crate), so their **sign** is always exact,
//! including an exact zero for coplanar and co-spherical configurations. A wrong sign would
//! silently corrupt the mesh, and concurrently running tasks must agree on every answer.
//!
//! Only the sign of the returned scalars is load-bearing; their magnitude is an
//! implementation detail of the provider.

#![forbid(unsafe_code)]

use crate::geometry::point::Point3;

/// Represents the position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point lies exactly on the circumsphere
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Represents the orientation of a tetrahedron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// `orient` is negative
    NEGATIVE,
    /// The four points are exactly coplanar
    DEGENERATE,
    /// `orient` is positive
    POSITIVE,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

/// Classification of a point against a tetrahedron, see [`point_in_tetra`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Some replacement orientation disagrees with the tetrahedron's orientation
    OUTSIDE,
    /// At least one of the five orientation tests is exactly zero
    BOUNDARY,
    /// Strictly inside
    INSIDE,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

// =============================================================================
// PRIMITIVES
// =============================================================================

/// Exact orientation of `d` relative to the plane through `a`, `b`, `c`.
///
/// Returns a positive value if `d` lies below the plane, where "below" is defined so that
/// `a`, `b`, `c` appear counter-clockwise when viewed from above; a negative value if `d`
/// lies above; and exactly zero if the four points are coplanar.
///
/// # Example
///
/// ```
/// use par_delaunay::geometry::point::Point3;
/// use par_delaunay::geometry::predicates::orient;
///
/// let a = Point3::new([0.0, 0.0, 0.0]);
/// let b = Point3::new([1.0, 0.0, 0.0]);
/// let c = Point3::new([0.0, 1.0, 0.0]);
/// assert!(orient(a, b, c, Point3::new([0.0, 0.0, -1.0])) > 0.0);
/// assert!(orient(a, b, c, Point3::new([0.0, 0.0, 1.0])) < 0.0);
/// assert_eq!(orient(a, b, c, Point3::new([0.3, 0.3, 0.0])), 0.0);
/// ```
#[inline]
#[must_use]
pub fn orient(a: Point3, b: Point3, c: Point3, d: Point3) -> f64 {
    robust::orient3d(a.to_robust(), b.to_robust(), c.to_robust(), d.to_robust())
}

/// Exact in-sphere test of `e` against the sphere through `a`, `b`, `c`, `d`.
///
/// Returns a positive value if `e` lies strictly inside, negative if strictly outside and
/// zero if the five points are co-spherical.
///
/// The result is only meaningful when `orient(a, b, c, d) > 0`; with a negative
/// orientation the sign is reversed. Use [`in_sphere_adjusted`] when the orientation of
/// the tetrahedron is not known.
#[inline]
#[must_use]
pub fn in_sphere(a: Point3, b: Point3, c: Point3, d: Point3, e: Point3) -> f64 {
    robust::insphere(
        a.to_robust(),
        b.to_robust(),
        c.to_robust(),
        d.to_robust(),
        e.to_robust(),
    )
}

/// Typed wrapper over [`orient`].
#[inline]
#[must_use]
pub fn orientation(a: Point3, b: Point3, c: Point3, d: Point3) -> Orientation {
    let det = orient(a, b, c, d);
    if det > 0.0 {
        Orientation::POSITIVE
    } else if det < 0.0 {
        Orientation::NEGATIVE
    } else {
        Orientation::DEGENERATE
    }
}

// =============================================================================
// DERIVED PREDICATES
// =============================================================================

/// The five orientations used by the containment tests: the tetrahedron itself, then the
/// tetrahedron with each vertex in turn replaced by `p`.
fn replacement_orientations(t: [Point3; 4], p: Point3) -> [f64; 5] {
    let [a, b, c, d] = t;
    [
        orient(a, b, c, d),
        orient(p, b, c, d),
        orient(a, p, c, d),
        orient(a, b, p, d),
        orient(a, b, c, p),
    ]
}

/// Classify `p` relative to the tetrahedron with vertex positions `t`.
///
/// This is a 5-test sign-consistency check, not a volumetric computation:
/// - if any of the five orientation values is exactly zero, `p` is
///   [`Location::BOUNDARY`] (this includes points on the supporting plane of a face but
///   outside the face itself);
/// - otherwise, if any replacement orientation has the opposite sign to the base
///   orientation, `p` is [`Location::OUTSIDE`];
/// - otherwise `p` is [`Location::INSIDE`].
///
/// # Example
///
/// ```
/// use par_delaunay::geometry::point::Point3;
/// use par_delaunay::geometry::predicates::{Location, point_in_tetra};
///
/// let t = [
///     Point3::new([0.0, 0.0, 0.0]),
///     Point3::new([1.0, 0.0, 0.0]),
///     Point3::new([0.0, 1.0, 0.0]),
///     Point3::new([0.0, 0.0, 1.0]),
/// ];
/// assert_eq!(point_in_tetra(t, Point3::new([0.1, 0.1, 0.1])), Location::INSIDE);
/// assert_eq!(point_in_tetra(t, Point3::new([0.1, 0.1, 0.0])), Location::BOUNDARY);
/// assert_eq!(point_in_tetra(t, Point3::new([1.0, 1.0, 1.0])), Location::OUTSIDE);
/// ```
#[must_use]
pub fn point_in_tetra(t: [Point3; 4], p: Point3) -> Location {
    let res = replacement_orientations(t, p);
    if res.iter().any(|&o| o == 0.0) {
        return Location::BOUNDARY;
    }
    let base_positive = res[0] > 0.0;
    if res[1..].iter().any(|&o| (o > 0.0) != base_positive) {
        Location::OUTSIDE
    } else {
        Location::INSIDE
    }
}

/// Closed containment: `p` lies inside or on the boundary of a non-degenerate tetrahedron.
///
/// Unlike [`point_in_tetra`], a point on the supporting plane of a face but outside the
/// tetrahedron is reported as *not* contained. Degenerate (flat) tetrahedra contain
/// nothing.
#[must_use]
pub fn point_in_closed_tetra(t: [Point3; 4], p: Point3) -> bool {
    let res = replacement_orientations(t, p);
    if res[0] == 0.0 {
        return false;
    }
    let base_positive = res[0] > 0.0;
    res[1..]
        .iter()
        .all(|&o| o == 0.0 || (o > 0.0) == base_positive)
}

/// In-sphere test that first fixes the orientation of `t`.
///
/// If `t` is negatively oriented two vertices are swapped before calling [`in_sphere`], so
/// its precondition always holds. Returns a positive value when `p` violates the empty
/// circumsphere of `t` (i.e. `t` belongs to the cavity of `p`).
///
/// # Example
///
/// ```
/// use par_delaunay::geometry::point::Point3;
/// use par_delaunay::geometry::predicates::in_sphere_adjusted;
///
/// let t = [
///     Point3::new([0.0, 0.0, 0.0]),
///     Point3::new([1.0, 0.0, 0.0]),
///     Point3::new([0.0, 1.0, 0.0]),
///     Point3::new([0.0, 0.0, 1.0]),
/// ];
/// let mut flipped = t;
/// flipped.swap(0, 1);
/// let inside = Point3::new([0.5, 0.5, 0.5]);
/// assert!(in_sphere_adjusted(t, inside) > 0.0);
/// assert!(in_sphere_adjusted(flipped, inside) > 0.0);
/// assert!(in_sphere_adjusted(t, Point3::new([2.0, 2.0, 2.0])) < 0.0);
/// ```
#[must_use]
pub fn in_sphere_adjusted(t: [Point3; 4], p: Point3) -> f64 {
    let [a, b, c, d] = t;
    if orient(a, b, c, d) < 0.0 {
        in_sphere(a, c, b, d, p)
    } else {
        in_sphere(a, b, c, d, p)
    }
}

/// Typed wrapper over [`in_sphere_adjusted`].
#[must_use]
pub fn in_sphere_test(t: [Point3; 4], p: Point3) -> InSphere {
    let det = in_sphere_adjusted(t, p);
    if det > 0.0 {
        InSphere::INSIDE
    } else if det < 0.0 {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tetra() -> [Point3; 4] {
        [
            Point3::new([0.0, 0.0, 0.0]),
            Point3::new([1.0, 0.0, 0.0]),
            Point3::new([0.0, 1.0, 0.0]),
            Point3::new([0.0, 0.0, 1.0]),
        ]
    }

    // =============================================================================
    // ORIENTATION TESTS
    // =============================================================================

    #[test]
    fn test_orient_sign_convention() {
        let [a, b, c, d] = unit_tetra();
        // d = (0,0,1) lies above the ccw base a,b,c, so the value is negative.
        assert_eq!(orientation(a, b, c, d), Orientation::NEGATIVE);
        assert_eq!(orientation(b, a, c, d), Orientation::POSITIVE);
        assert_relative_eq!(orient(a, b, c, d).abs(), 1.0);
    }

    #[test]
    fn test_orient_exact_zero_for_coplanar() {
        let a = Point3::new([0.1, 0.2, 0.3]);
        let b = Point3::new([1.1, 0.2, 0.3]);
        let c = Point3::new([0.1, 1.2, 0.3]);
        let d = Point3::new([0.7, 0.9, 0.3]);
        assert_eq!(orient(a, b, c, d), 0.0);
        assert_eq!(orientation(a, b, c, d), Orientation::DEGENERATE);
    }

    #[test]
    fn test_orient_survives_near_degenerate_input() {
        // Nearly coplanar points where naive floating point evaluation is unreliable.
        let a = Point3::new([0.5, 0.5, 0.5]);
        let b = Point3::new([12.0, 12.0, 12.0]);
        let c = Point3::new([24.0, 24.0, 24.0]);
        let d = Point3::new([0.5 + f64::EPSILON, 0.5, 0.5]);
        // Collinear a, b, c make every configuration degenerate regardless of d.
        assert_eq!(orient(a, b, c, d), 0.0);
    }

    // =============================================================================
    // POINT IN TETRA TESTS
    // =============================================================================

    #[test]
    fn test_point_in_tetra_is_orientation_independent() {
        let t = unit_tetra();
        let mut flipped = t;
        flipped.swap(2, 3);
        let inside = Point3::new([0.2, 0.2, 0.2]);
        assert_eq!(point_in_tetra(t, inside), Location::INSIDE);
        assert_eq!(point_in_tetra(flipped, inside), Location::INSIDE);
    }

    #[test]
    fn test_point_in_tetra_boundary_cases() {
        let t = unit_tetra();
        // On a face
        assert_eq!(point_in_tetra(t, Point3::new([0.2, 0.2, 0.0])), Location::BOUNDARY);
        // On an edge
        assert_eq!(point_in_tetra(t, Point3::new([0.5, 0.0, 0.0])), Location::BOUNDARY);
        // At a vertex
        assert_eq!(point_in_tetra(t, t[3]), Location::BOUNDARY);
        // On a face plane but outside the face: still reported as boundary
        assert_eq!(point_in_tetra(t, Point3::new([2.0, 2.0, 0.0])), Location::BOUNDARY);
    }

    #[test]
    fn test_point_in_tetra_outside() {
        let t = unit_tetra();
        assert_eq!(point_in_tetra(t, Point3::new([0.5, 0.5, 0.5])), Location::OUTSIDE);
        assert_eq!(point_in_tetra(t, Point3::new([-0.1, 0.2, 0.2])), Location::OUTSIDE);
    }

    #[test]
    fn test_point_in_closed_tetra() {
        let t = unit_tetra();
        assert!(point_in_closed_tetra(t, Point3::new([0.2, 0.2, 0.2])));
        assert!(point_in_closed_tetra(t, Point3::new([0.2, 0.2, 0.0])));
        assert!(point_in_closed_tetra(t, t[1]));
        assert!(!point_in_closed_tetra(t, Point3::new([2.0, 2.0, 0.0])));
        assert!(!point_in_closed_tetra(t, Point3::new([0.5, 0.5, 0.5])));

        let flat = [t[0], t[1], t[2], Point3::new([1.0, 1.0, 0.0])];
        assert!(!point_in_closed_tetra(flat, Point3::new([0.2, 0.2, 0.0])));
    }

    // =============================================================================
    // IN SPHERE TESTS
    // =============================================================================

    #[test]
    fn test_in_sphere_requires_positive_orientation() {
        let [a, b, c, d] = unit_tetra();
        let centre = Point3::new([0.5, 0.5, 0.5]);
        // (a, b, c, d) is negatively oriented: the raw predicate reports the reversed sign.
        assert!(in_sphere(a, b, c, d, centre) < 0.0);
        assert!(in_sphere(b, a, c, d, centre) > 0.0);
    }

    #[test]
    fn test_in_sphere_adjusted_classification() {
        let t = unit_tetra();
        // Circumsphere: centre (0.5, 0.5, 0.5), radius sqrt(3)/2.
        assert_eq!(in_sphere_test(t, Point3::new([0.5, 0.5, 0.5])), InSphere::INSIDE);
        assert_eq!(in_sphere_test(t, Point3::new([1.0, 1.0, 1.0])), InSphere::BOUNDARY);
        assert_eq!(in_sphere_test(t, Point3::new([1.0, 1.0, 1.5])), InSphere::OUTSIDE);
        // Vertices of the tetrahedron are on its sphere.
        for v in t {
            assert_eq!(in_sphere_adjusted(t, v), 0.0);
        }
    }

    #[test]
    fn test_display_impls() {
        assert_eq!(InSphere::INSIDE.to_string(), "INSIDE");
        assert_eq!(Orientation::DEGENERATE.to_string(), "DEGENERATE");
        assert_eq!(Location::BOUNDARY.to_string(), "BOUNDARY");
    }
}
