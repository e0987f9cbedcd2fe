//! Closed-form 2D trilateration from three fixed anchors
//!
//! The anchor triangle defines an orthonormal basis: `ex` points from the
//! first anchor to the second, `ey` is the part of the first-to-third vector
//! orthogonal to `ex`. In that basis the intersection of the three range
//! circles has a direct solution:
//! - `x = (d1² - d2² + d²) / 2d`
//! - `y = (d1² - d3² + i² + j²) / 2j - (i / j) x`
//!
//! where `d = |p2 - p1|`, `i = ex·(p3 - p1)` and `j = ey·(p3 - p1)`.
//!
//! Ranges are used exactly as reported: no smoothing, averaging or outlier
//! rejection. The solve is exact for consistent ranges and degrades with
//! measurement noise and with flat anchor triangles.

use crate::core::Point2;
use nalgebra::Vector2;
use thiserror::Error;

/// Relative tolerance below which anchor geometry is treated as degenerate
pub const DEGENERACY_TOLERANCE: f64 = 1e-9;

/// Reasons a position cannot be solved
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("first and second anchor coincide")]
    CoincidentAnchors,
    #[error("anchors are collinear")]
    CollinearAnchors,
    #[error("solution is not finite")]
    NonFiniteSolution,
}

/// Basis derived once from an anchor triangle
#[derive(Debug, Clone, Copy, PartialEq)]
struct Basis {
    origin: Vector2<f64>,
    ex: Vector2<f64>,
    ey: Vector2<f64>,
    d: f64,
    i: f64,
    j: f64,
}

impl Basis {
    fn from_anchors(anchors: &[Point2; 3]) -> Result<Self, GeometryError> {
        let p1 = to_vector(&anchors[0]);
        let p2 = to_vector(&anchors[1]);
        let p3 = to_vector(&anchors[2]);

        if !(p1.iter().chain(p2.iter()).chain(p3.iter())).all(|v| v.is_finite()) {
            return Err(GeometryError::NonFiniteSolution);
        }

        let p12 = p2 - p1;
        let p13 = p3 - p1;
        let d = p12.norm();
        let scale = d.max(p13.norm());

        if d <= DEGENERACY_TOLERANCE * scale.max(1.0) {
            return Err(GeometryError::CoincidentAnchors);
        }

        let ex = p12 / d;
        let i = ex.dot(&p13);
        let orthogonal = p13 - ex * i;
        let orthogonal_norm = orthogonal.norm();

        if orthogonal_norm <= DEGENERACY_TOLERANCE * scale {
            return Err(GeometryError::CollinearAnchors);
        }

        let ey = orthogonal / orthogonal_norm;
        let j = ey.dot(&p13);

        let basis = Basis { origin: p1, ex, ey, d, i, j };
        if [d, i, j, ey.x, ey.y].iter().all(|v| v.is_finite()) {
            Ok(basis)
        } else {
            Err(GeometryError::NonFiniteSolution)
        }
    }

    fn solve(&self, d1: f64, d2: f64, d3: f64) -> Result<Point2, GeometryError> {
        let Basis { origin, ex, ey, d, i, j } = *self;

        let x = (d1 * d1 - d2 * d2 + d * d) / (2.0 * d);
        let y = (d1 * d1 - d3 * d3 + i * i + j * j) / (2.0 * j) - (i / j) * x;

        let position = origin + ex * x + ey * y;
        let point = Point2::new(position.x, position.y);

        if x.is_finite() && y.is_finite() && point.is_finite() {
            Ok(point)
        } else {
            Err(GeometryError::NonFiniteSolution)
        }
    }
}

fn to_vector(point: &Point2) -> Vector2<f64> {
    Vector2::new(point.x, point.y)
}

/// Solve a position for three anchors and the ranges measured from each.
///
/// Returns `None` for coincident or collinear anchors and whenever any
/// intermediate or final value is not finite.
pub fn triangulate(p1: Point2, p2: Point2, p3: Point2, d1: f64, d2: f64, d3: f64) -> Option<Point2> {
    Basis::from_anchors(&[p1, p2, p3])
        .and_then(|basis| basis.solve(d1, d2, d3))
        .ok()
}

/// Trilateration engine bound to a fixed anchor layout
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulationEngine {
    anchors: [Point2; 3],
    basis: Result<Basis, GeometryError>,
}

impl TriangulationEngine {
    pub fn new(anchors: [Point2; 3]) -> Self {
        Self {
            anchors,
            basis: Basis::from_anchors(&anchors),
        }
    }

    pub fn anchors(&self) -> &[Point2; 3] {
        &self.anchors
    }

    /// Whether the anchor layout admits any solution at all
    pub fn check_geometry(&self) -> Result<(), GeometryError> {
        self.basis.map(|_| ())
    }

    /// Solve from ranges ordered like the anchors
    pub fn solve(&self, distances: [f64; 3]) -> Result<Point2, GeometryError> {
        let basis = self.basis?;
        basis.solve(distances[0], distances[1], distances[2])
    }

    pub fn triangulate(&self, distances: [f64; 3]) -> Option<Point2> {
        self.solve(distances).ok()
    }
}
