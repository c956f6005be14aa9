//! # par-delaunay
//!
//! This is a library for computing the 3D Delaunay triangulation of a point set by
//! **concurrent incremental insertion**: a fixed pool of worker threads inserts different
//! points into one shared, partially built mesh at the same time.
//!
//! # Features
//!
//! - Cavity-based (Bowyer–Watson) insertion, one task per tetrahedron holding pending points
//! - Fine-grained per-point ownership tokens with whole-task abort-and-retry on contention
//!   (no task ever blocks on a point, so the protocol is deadlock-free)
//! - A sharded concurrent tetrahedron store with atomically swapped neighbor links
//! - A randomized-priority work queue with outstanding-work termination detection
//! - Exact geometric predicates (adaptive-precision `orient3d` / `insphere` from the
//!   [`robust`] crate)
//! - Parallel spatial partitioning of the input for insertion locality
//! - Serialization/Deserialization of results with [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use par_delaunay::prelude::*;
//!
//! let points = vec![
//!     Point3::new([0.0, 0.0, 0.0]),
//!     Point3::new([1.0, 0.0, 0.0]),
//!     Point3::new([0.0, 1.0, 0.0]),
//!     Point3::new([0.0, 0.0, 1.0]),
//!     Point3::new([0.3, 0.2, 0.25]),
//! ];
//!
//! let config = TriangulatorConfigBuilder::default().workers(2).build().unwrap();
//! let triangulation = Triangulator::new(config).triangulate(&points).unwrap();
//!
//! // Indices >= points.len() are the four synthetic hull vertices.
//! assert!(triangulation.real_tetrahedra().count() >= 1);
//! assert!(triangulation.is_valid().is_ok());
//! ```
//!
//! # Concurrency protocol
//!
//! Every point owns an exclusive-access token. An insertion task targeting a tetrahedron
//! first acquires the tokens of its four vertices, then grows the *cavity* of the first
//! pending point breadth-first, acquiring the tokens of every tetrahedron it absorbs. Any
//! failed acquisition drops every token the task holds and re-enqueues a fresh task for the
//! same target. A task that acquired everything re-triangulates the cavity, redistributes
//! the pending points, patches the neighbor links of the surrounding tetrahedra and commits
//! the result to the store in one step.
//!
//! The Delaunay triangulation of points in general position is unique, so the final mesh
//! does not depend on the number of workers or on the order in which tasks run.
//!
//! # Triangulation Invariants
//!
//! At quiescence (no task in flight), and checked by
//! [`Triangulation::is_valid`](core::triangulation::Triangulation::is_valid):
//!
//! | Invariant | Helper method |
//! |---|---|
//! | Empty circumsphere for every tetrahedron | `validate_delaunay` |
//! | Neighbor links are reciprocal and share a face | `validate_neighbors` |
//! | Every distinct real point is a vertex | `validate_coverage` |

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The `core` module contains the mesh data model, the task scheduler, the insertion
/// engine and the driver that ties them together.
pub mod core {
    /// Algorithms executed on behalf of the driver
    pub mod algorithms {
        /// Cavity-based insertion task (one state machine run per task)
        pub mod insertion_task;
        /// Recursive parallel spatial partitioning of the input points
        pub mod spatial_sort;
    }
    /// Hash collection aliases used throughout the crate
    pub mod collections;
    pub mod mesh_store;
    pub mod point_registry;
    pub mod scheduler;
    pub mod tetra;
    pub mod triangulation;
    pub mod triangulator;

    pub use mesh_store::*;
    pub use point_registry::*;
    pub use scheduler::*;
    pub use tetra::*;
    pub use triangulation::*;
    pub use triangulator::*;
}

/// Contains the `Point3` coordinate type and the exact geometric predicates.
pub mod geometry {
    pub mod point;
    pub mod predicates;

    pub use point::*;
    pub use predicates::*;
}

/// A prelude module that re-exports commonly used types.
pub mod prelude {
    pub use crate::core::{
        mesh_store::{MeshInvariantError, MeshStore, NeighborLinks, TetraRecord},
        tetra::{PointIndex, Tetra, TetraError, Triangle},
        triangulation::{TetraCell, Triangulation, TriangulationStats, ValidationError},
        triangulator::{
            Triangulator, TriangulatorConfig, TriangulatorConfigBuilder,
            TriangulatorConfigBuilderError, TriangulationError, triangulate,
        },
    };

    pub use crate::core::collections::{FastHashMap, FastHashSet};

    pub use crate::geometry::{
        point::Point3,
        predicates::{
            InSphere, Location, Orientation, in_sphere, in_sphere_adjusted, orient, orientation,
            point_in_closed_tetra, point_in_tetra,
        },
    };
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
