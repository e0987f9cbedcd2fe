//! Core positioning algorithms

pub mod trilateration;

pub use trilateration::{triangulate, GeometryError, TriangulationEngine};
