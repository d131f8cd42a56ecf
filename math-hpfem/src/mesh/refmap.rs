//! Reference maps from reference elements to physical elements
//!
//! Reference domains:
//! - triangle: (-1,-1), (1,-1), (-1,1), affine map
//! - quadrilateral: [-1,1] x [-1,1], bilinear map

use super::types::{ElementType, Point};
use crate::error::{AdaptError, Result};

/// Vertices of the reference element, counter-clockwise
pub fn reference_vertices(shape: ElementType) -> Vec<Point> {
    match shape {
        ElementType::Triangle => vec![
            Point::new_2d(-1.0, -1.0),
            Point::new_2d(1.0, -1.0),
            Point::new_2d(-1.0, 1.0),
        ],
        _ => vec![
            Point::new_2d(-1.0, -1.0),
            Point::new_2d(1.0, -1.0),
            Point::new_2d(1.0, 1.0),
            Point::new_2d(-1.0, 1.0),
        ],
    }
}

/// Jacobian of a 2D reference map at one point
#[derive(Debug, Clone, Copy)]
pub struct Jacobian {
    /// [[dx/dxi, dx/deta], [dy/dxi, dy/deta]]
    pub matrix: [[f64; 2]; 2],
    /// Determinant of the Jacobian
    pub det: f64,
    /// Inverse of the Jacobian
    pub inverse: [[f64; 2]; 2],
}

impl Jacobian {
    /// Compute the Jacobian from reference shape gradients and node coordinates
    pub fn from_2d(grad_ref: &[[f64; 2]], coords: &[Point]) -> Self {
        let mut j = [[0.0; 2]; 2];

        for (g, p) in grad_ref.iter().zip(coords) {
            j[0][0] += g[0] * p.x; // dx/dxi
            j[0][1] += g[1] * p.x; // dx/deta
            j[1][0] += g[0] * p.y; // dy/dxi
            j[1][1] += g[1] * p.y; // dy/deta
        }

        let det = j[0][0] * j[1][1] - j[0][1] * j[1][0];
        let inv_det = 1.0 / det;

        Self {
            matrix: j,
            det,
            inverse: [
                [j[1][1] * inv_det, -j[0][1] * inv_det],
                [-j[1][0] * inv_det, j[0][0] * inv_det],
            ],
        }
    }

    /// Transform reference gradients to physical gradients
    /// grad_physical = J^{-T} * grad_ref
    #[inline]
    pub fn transform_gradient(&self, grad_ref: [f64; 2]) -> [f64; 2] {
        [
            self.inverse[0][0] * grad_ref[0] + self.inverse[1][0] * grad_ref[1],
            self.inverse[0][1] * grad_ref[0] + self.inverse[1][1] * grad_ref[1],
        ]
    }

    /// Pull a physical gradient back to the reference element
    /// grad_ref = J^T * grad_physical
    #[inline]
    pub fn pull_back_gradient(&self, grad_phys: [f64; 2]) -> [f64; 2] {
        [
            self.matrix[0][0] * grad_phys[0] + self.matrix[1][0] * grad_phys[1],
            self.matrix[0][1] * grad_phys[0] + self.matrix[1][1] * grad_phys[1],
        ]
    }
}

/// Map between the reference element and one physical element
#[derive(Debug, Clone)]
pub struct RefMap {
    shape: ElementType,
    vertices: Vec<Point>,
}

impl RefMap {
    /// Build the map for an element given its vertex coordinates.
    ///
    /// Fails for 3D shapes and for elements with non-positive area.
    pub fn new(shape: ElementType, vertices: Vec<Point>) -> Result<Self> {
        shape.ensure_planar()?;
        let map = Self { shape, vertices };
        let centre = match shape {
            ElementType::Triangle => [-1.0 / 3.0, -1.0 / 3.0],
            _ => [0.0, 0.0],
        };
        let jac = map.jacobian(centre[0], centre[1]);
        if !(jac.det.is_finite() && jac.det > 0.0) {
            return Err(AdaptError::EvaluationFailure {
                component: 0,
                element: usize::MAX,
                reason: format!("degenerate {:?} geometry (det J = {})", shape, jac.det),
            });
        }
        Ok(map)
    }

    pub fn shape(&self) -> ElementType {
        self.shape
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Vertex shape functions at a reference point
    fn shape_values(&self, xi: f64, eta: f64) -> Vec<f64> {
        match self.shape {
            ElementType::Triangle => vec![-(xi + eta) / 2.0, (1.0 + xi) / 2.0, (1.0 + eta) / 2.0],
            _ => vec![
                0.25 * (1.0 - xi) * (1.0 - eta),
                0.25 * (1.0 + xi) * (1.0 - eta),
                0.25 * (1.0 + xi) * (1.0 + eta),
                0.25 * (1.0 - xi) * (1.0 + eta),
            ],
        }
    }

    /// Vertex shape function gradients at a reference point
    fn shape_gradients(&self, xi: f64, eta: f64) -> Vec<[f64; 2]> {
        match self.shape {
            ElementType::Triangle => vec![[-0.5, -0.5], [0.5, 0.0], [0.0, 0.5]],
            _ => vec![
                [-0.25 * (1.0 - eta), -0.25 * (1.0 - xi)],
                [0.25 * (1.0 - eta), -0.25 * (1.0 + xi)],
                [0.25 * (1.0 + eta), 0.25 * (1.0 + xi)],
                [-0.25 * (1.0 + eta), 0.25 * (1.0 - xi)],
            ],
        }
    }

    /// Map a reference point to physical coordinates
    pub fn map(&self, xi: f64, eta: f64) -> Point {
        let n = self.shape_values(xi, eta);
        let (x, y) = n
            .iter()
            .zip(&self.vertices)
            .fold((0.0, 0.0), |(x, y), (w, p)| (x + w * p.x, y + w * p.y));
        Point::new_2d(x, y)
    }

    /// Jacobian at a reference point
    pub fn jacobian(&self, xi: f64, eta: f64) -> Jacobian {
        Jacobian::from_2d(&self.shape_gradients(xi, eta), &self.vertices)
    }

    /// Whether a reference point lies in the closed reference element (with tolerance)
    pub fn contains_reference(&self, xi: f64, eta: f64, tol: f64) -> bool {
        match self.shape {
            ElementType::Triangle => xi >= -1.0 - tol && eta >= -1.0 - tol && xi + eta <= tol,
            _ => xi.abs() <= 1.0 + tol && eta.abs() <= 1.0 + tol,
        }
    }

    /// Map a physical point back to the reference element.
    ///
    /// Exact for triangles and parallelograms; Newton iteration otherwise.
    /// Returns `None` if the iteration does not converge.
    pub fn inverse_map(&self, p: &Point) -> Option<[f64; 2]> {
        let mut r = match self.shape {
            ElementType::Triangle => [-1.0 / 3.0, -1.0 / 3.0],
            _ => [0.0, 0.0],
        };
        for _ in 0..20 {
            let x = self.map(r[0], r[1]);
            let res = [p.x - x.x, p.y - x.y];
            let jac = self.jacobian(r[0], r[1]);
            let d = [
                jac.inverse[0][0] * res[0] + jac.inverse[0][1] * res[1],
                jac.inverse[1][0] * res[0] + jac.inverse[1][1] * res[1],
            ];
            r[0] += d[0];
            r[1] += d[1];
            if d[0].abs() + d[1].abs() < 1e-13 {
                return Some(r);
            }
        }
        None
    }
}

impl super::types::Mesh {
    /// Reference map of an element, with the element id attached to geometry failures
    pub fn refmap(&self, id: usize) -> Result<RefMap> {
        let elem = self.element(id)?;
        RefMap::new(elem.element_type, self.element_points(id)?).map_err(|e| match e {
            AdaptError::EvaluationFailure {
                component, reason, ..
            } => AdaptError::EvaluationFailure {
                component,
                element: id,
                reason,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> RefMap {
        RefMap::new(
            ElementType::Triangle,
            vec![
                Point::new_2d(0.0, 0.0),
                Point::new_2d(1.0, 0.0),
                Point::new_2d(0.0, 1.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_triangle_map_vertices() {
        let map = unit_triangle();
        let p = map.map(1.0, -1.0);
        assert!((p.x - 1.0).abs() < 1e-14 && p.y.abs() < 1e-14);

        // Reference triangle has area 2, unit triangle 1/2
        let jac = map.jacobian(0.0, -0.5);
        assert!((jac.det - 0.25).abs() < 1e-14);
    }

    #[test]
    fn test_gradient_round_trip() {
        let map = RefMap::new(
            ElementType::Quadrilateral,
            vec![
                Point::new_2d(0.0, 0.0),
                Point::new_2d(2.0, 0.0),
                Point::new_2d(2.0, 1.0),
                Point::new_2d(0.0, 1.0),
            ],
        )
        .unwrap();
        let jac = map.jacobian(0.3, -0.2);
        let g = jac.transform_gradient(jac.pull_back_gradient([1.5, -2.0]));
        assert!((g[0] - 1.5).abs() < 1e-14);
        assert!((g[1] + 2.0).abs() < 1e-14);
    }

    #[test]
    fn test_inverse_map_quad() {
        let map = RefMap::new(
            ElementType::Quadrilateral,
            vec![
                Point::new_2d(0.0, 0.0),
                Point::new_2d(2.0, 0.0),
                Point::new_2d(2.5, 1.5),
                Point::new_2d(0.0, 1.0),
            ],
        )
        .unwrap();
        let p = map.map(0.4, -0.7);
        let r = map.inverse_map(&p).unwrap();
        assert!((r[0] - 0.4).abs() < 1e-10);
        assert!((r[1] + 0.7).abs() < 1e-10);
    }

    #[test]
    fn test_reference_map_is_identity() {
        let map = RefMap::new(
            ElementType::Quadrilateral,
            reference_vertices(ElementType::Quadrilateral),
        )
        .unwrap();
        let p = map.map(0.25, -0.5);
        assert!((p.x - 0.25).abs() < 1e-15 && (p.y + 0.5).abs() < 1e-15);
        assert!((map.jacobian(0.1, 0.2).det - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_degenerate_element_rejected() {
        let map = RefMap::new(
            ElementType::Triangle,
            vec![
                Point::new_2d(0.0, 0.0),
                Point::new_2d(1.0, 0.0),
                Point::new_2d(2.0, 0.0),
            ],
        );
        assert!(matches!(map, Err(AdaptError::EvaluationFailure { .. })));
    }
}
