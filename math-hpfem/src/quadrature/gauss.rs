//! Gauss-Legendre quadrature points and weights
//!
//! Rules of any order on [-1, 1], tensor products on the reference square
//! and collapsed (Duffy) rules on the reference triangle
//! (-1,-1), (1,-1), (-1,1).

use crate::basis::legendre::legendre_and_derivative;
use std::f64::consts::PI;

/// A single quadrature point with weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraturePoint {
    /// Reference coordinates (xi, eta)
    pub coords: [f64; 2],
    /// Integration weight
    pub weight: f64,
}

impl QuadraturePoint {
    pub fn new_1d(xi: f64, weight: f64) -> Self {
        Self {
            coords: [xi, 0.0],
            weight,
        }
    }

    pub fn new_2d(xi: f64, eta: f64, weight: f64) -> Self {
        Self {
            coords: [xi, eta],
            weight,
        }
    }

    #[inline]
    pub fn xi(&self) -> f64 {
        self.coords[0]
    }

    #[inline]
    pub fn eta(&self) -> f64 {
        self.coords[1]
    }
}

/// 1D Gauss-Legendre quadrature on [-1, 1] with `n` points.
///
/// Exact for polynomials of degree `2n - 1`. Nodes are the roots of P_n,
/// found by Newton iteration from Chebyshev initial guesses, and returned in
/// ascending order.
pub fn gauss_legendre_1d(n: usize) -> Vec<QuadraturePoint> {
    let n = n.max(1);
    let mut points = vec![QuadraturePoint::new_1d(0.0, 0.0); n];

    // Roots are symmetric; compute the upper half and mirror
    for i in 0..n.div_ceil(2) {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let (p, d) = legendre_and_derivative(n, x);
            dp = d;
            let dx = p / d;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, d) = legendre_and_derivative(n, x);
        if d.is_finite() && d != 0.0 {
            dp = d;
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points[i] = QuadraturePoint::new_1d(-x, w);
        points[n - 1 - i] = QuadraturePoint::new_1d(x, w);
    }
    if n % 2 == 1 {
        points[n / 2].coords[0] = 0.0;
    }

    points
}

/// Number of 1D points needed to integrate a polynomial of `degree` exactly
pub fn points_for_degree(degree: usize) -> usize {
    degree / 2 + 1
}

/// Tensor-product Gauss rule on the reference square, exact for `degree`
/// in each variable
pub fn gauss_quadrilateral(degree: usize) -> Vec<QuadraturePoint> {
    let pts_1d = gauss_legendre_1d(points_for_degree(degree));
    let mut points = Vec::with_capacity(pts_1d.len() * pts_1d.len());

    for py in &pts_1d {
        for px in &pts_1d {
            points.push(QuadraturePoint::new_2d(
                px.xi(),
                py.xi(),
                px.weight * py.weight,
            ));
        }
    }

    points
}

/// Collapsed Gauss rule on the reference triangle, exact for total `degree`.
///
/// The square (a, b) maps onto the triangle through
/// xi = (1 + a)(1 - b)/2 - 1, eta = b, with Jacobian (1 - b)/2; one extra
/// point in b absorbs that factor. Weights sum to the reference area 2.
pub fn gauss_triangle(degree: usize) -> Vec<QuadraturePoint> {
    let pts_a = gauss_legendre_1d(points_for_degree(degree));
    let pts_b = gauss_legendre_1d(points_for_degree(degree + 1));
    let mut points = Vec::with_capacity(pts_a.len() * pts_b.len());

    for pb in &pts_b {
        let b = pb.xi();
        let scale = 0.5 * (1.0 - b);
        for pa in &pts_a {
            let xi = (1.0 + pa.xi()) * scale - 1.0;
            points.push(QuadraturePoint::new_2d(xi, b, pa.weight * pb.weight * scale));
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gauss_1d_weights_sum() {
        for n in 1..=12 {
            let pts = gauss_legendre_1d(n);
            assert_eq!(pts.len(), n);
            let sum: f64 = pts.iter().map(|p| p.weight).sum();
            assert_relative_eq!(sum, 2.0, epsilon = 1e-13);
        }
    }

    #[test]
    fn test_gauss_1d_known_nodes() {
        let pts = gauss_legendre_1d(2);
        assert_relative_eq!(pts[1].xi(), 1.0 / 3.0_f64.sqrt(), epsilon = 1e-14);

        let pts = gauss_legendre_1d(3);
        assert_relative_eq!(pts[2].xi(), (0.6_f64).sqrt(), epsilon = 1e-14);
        assert_relative_eq!(pts[1].weight, 8.0 / 9.0, epsilon = 1e-14);
        assert_eq!(pts[1].xi(), 0.0);
    }

    #[test]
    fn test_gauss_1d_exactness() {
        // 6 points integrate x^10 exactly: 2/11
        let pts = gauss_legendre_1d(6);
        let integral: f64 = pts.iter().map(|p| p.weight * p.xi().powi(10)).sum();
        assert_relative_eq!(integral, 2.0 / 11.0, epsilon = 1e-14);
    }

    #[test]
    fn test_quadrilateral_area() {
        let pts = gauss_quadrilateral(4);
        let sum: f64 = pts.iter().map(|p| p.weight).sum();
        assert_relative_eq!(sum, 4.0, epsilon = 1e-13);
    }

    #[test]
    fn test_triangle_area_and_moments() {
        let pts = gauss_triangle(6);
        let area: f64 = pts.iter().map(|p| p.weight).sum();
        assert_relative_eq!(area, 2.0, epsilon = 1e-13);

        // Centroid of the reference triangle is (-1/3, -1/3)
        let mx: f64 = pts.iter().map(|p| p.weight * p.xi()).sum();
        assert_relative_eq!(mx / area, -1.0 / 3.0, epsilon = 1e-13);

        // Integral of (1 + xi)^2 over the reference triangle is 4/3
        let q: f64 = pts.iter().map(|p| p.weight * (1.0 + p.xi()).powi(2)).sum();
        assert_relative_eq!(q, 4.0 / 3.0, epsilon = 1e-13);
    }
}
