//! Quadrature rule selection based on element type and polynomial degree

use super::gauss::{QuadraturePoint, gauss_quadrilateral, gauss_triangle};
use crate::error::Result;
use crate::mesh::{ElementType, RefMap, SplitKind, child_points, reference_vertices};

/// Quadrature rule on a 2D reference element
#[derive(Debug, Clone)]
pub struct QuadratureRule {
    /// Element type this rule is for
    pub element_type: ElementType,
    /// Polynomial degree integrated exactly
    pub degree: usize,
    /// Quadrature points and weights
    pub points: Vec<QuadraturePoint>,
}

impl QuadratureRule {
    /// Create a rule exact for polynomials of `degree` on the reference element
    pub fn new(element_type: ElementType, degree: usize) -> Result<Self> {
        element_type.ensure_planar()?;
        let points = match element_type {
            ElementType::Triangle => gauss_triangle(degree),
            _ => gauss_quadrilateral(degree),
        };

        Ok(Self {
            element_type,
            degree,
            points,
        })
    }

    /// Composite rule over the four isotropic children of the reference element.
    ///
    /// Integrates piecewise polynomials of `degree` on the reference split
    /// exactly; points stay in the parent's reference coordinates.
    pub fn composite(element_type: ElementType, degree: usize) -> Result<Self> {
        let base = Self::new(element_type, degree)?;
        let children = child_points(
            element_type,
            &reference_vertices(element_type),
            SplitKind::Isotropic,
        )?;

        let mut points = Vec::with_capacity(children.len() * base.num_points());
        for child in children {
            let map = RefMap::new(element_type, child)?;
            for qp in base.iter() {
                let x = map.map(qp.xi(), qp.eta());
                let det = map.jacobian(qp.xi(), qp.eta()).det;
                points.push(QuadraturePoint::new_2d(x.x, x.y, qp.weight * det));
            }
        }

        Ok(Self {
            element_type,
            degree,
            points,
        })
    }

    /// Number of quadrature points
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Iterator over quadrature points
    pub fn iter(&self) -> impl Iterator<Item = &QuadraturePoint> {
        self.points.iter()
    }
}

/// Degree needed to integrate the H1 product of two order-`p` functions
/// exactly on an affine element.
///
/// Bilinear quads add one degree per variable through the Jacobian; the
/// extra two degrees cover that.
pub fn degree_for_h1_product(p: usize) -> usize {
    2 * p + 2
}
