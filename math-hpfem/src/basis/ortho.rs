//! H1-orthonormal hierarchical bases on the reference elements
//!
//! Legendre products P_i(xi) P_j(eta) are taken in hierarchical order (all
//! functions of degree d before any of degree d + 1) and orthonormalised with
//! modified Gram-Schmidt against
//!
//! (u, v) = ∫ u v + u_xi v_xi + u_eta v_eta
//!
//! over the reference element. Because earlier functions never see later
//! ones, the basis of order p is a prefix of the basis of order p + 1, and a
//! projection onto order p is the truncation of the projection onto any
//! higher order.

use super::legendre::legendre_table;
use crate::error::{AdaptError, Result};
use crate::mesh::ElementType;
use crate::quadrature::{QuadraturePoint, degree_for_h1_product, gauss_quadrilateral, gauss_triangle};
use ndarray::{Array1, Array2, ArrayView1};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Highest polynomial order a default cache serves
pub const DEFAULT_MAX_ORDER: usize = 10;

/// Basis values and reference derivatives at a set of points, shaped
/// `(num_functions, num_points)`
#[derive(Debug, Clone)]
pub struct BasisValues {
    pub values: Array2<f64>,
    pub dx: Array2<f64>,
    pub dy: Array2<f64>,
}

/// Orthonormal basis of one (shape, order), sampled at a reference quadrature rule
#[derive(Debug, Clone)]
pub struct OrthonormalBasisTable {
    shape: ElementType,
    order: usize,
    exponents: Vec<(usize, usize)>,
    /// Row k holds the Legendre-product coefficients of function k
    coefficients: Array2<f64>,
    points: Vec<[f64; 2]>,
    weights: Vec<f64>,
    sampled: BasisValues,
}

/// Number of basis functions of a complete space of `order`
pub fn num_functions(shape: ElementType, order: usize) -> usize {
    match shape {
        ElementType::Triangle => (order + 1) * (order + 2) / 2,
        _ => (order + 1) * (order + 1),
    }
}

/// Legendre-product exponents in hierarchical order
fn hierarchical_exponents(shape: ElementType, order: usize) -> Vec<(usize, usize)> {
    let mut exps = Vec::with_capacity(num_functions(shape, order));
    for d in 0..=order {
        match shape {
            ElementType::Triangle => {
                for i in (0..=d).rev() {
                    exps.push((i, d - i));
                }
            }
            _ => {
                for j in 0..d {
                    exps.push((d, j));
                }
                for i in 0..d {
                    exps.push((i, d));
                }
                exps.push((d, d));
            }
        }
    }
    exps
}

/// Sample the raw Legendre products at reference points
fn sample_raw(exponents: &[(usize, usize)], order: usize, points: &[[f64; 2]]) -> BasisValues {
    let n = exponents.len();
    let mut values: Array2<f64> = Array2::zeros((n, points.len()));
    let mut dx: Array2<f64> = Array2::zeros((n, points.len()));
    let mut dy: Array2<f64> = Array2::zeros((n, points.len()));

    for (q, pt) in points.iter().enumerate() {
        let (px, dpx) = legendre_table(order, pt[0]);
        let (py, dpy) = legendre_table(order, pt[1]);
        for (k, &(i, j)) in exponents.iter().enumerate() {
            values[[k, q]] = px[i] * py[j];
            dx[[k, q]] = dpx[i] * py[j];
            dy[[k, q]] = px[i] * dpy[j];
        }
    }

    BasisValues { values, dx, dy }
}

fn h1_inner(
    weights: &[f64],
    a: (ArrayView1<f64>, ArrayView1<f64>, ArrayView1<f64>),
    b: (ArrayView1<f64>, ArrayView1<f64>, ArrayView1<f64>),
) -> f64 {
    weights
        .iter()
        .enumerate()
        .map(|(q, w)| w * (a.0[q] * b.0[q] + a.1[q] * b.1[q] + a.2[q] * b.2[q]))
        .sum()
}

impl OrthonormalBasisTable {
    fn build(shape: ElementType, order: usize, rule: &[QuadraturePoint]) -> Self {
        let exponents = hierarchical_exponents(shape, order);
        let n = exponents.len();
        let points: Vec<[f64; 2]> = rule.iter().map(|p| p.coords).collect();
        let weights: Vec<f64> = rule.iter().map(|p| p.weight).collect();
        let raw = sample_raw(&exponents, order, &points);

        let npts = points.len();
        let mut coefficients: Array2<f64> = Array2::zeros((n, n));
        let mut sampled = BasisValues {
            values: Array2::zeros((n, npts)),
            dx: Array2::zeros((n, npts)),
            dy: Array2::zeros((n, npts)),
        };

        for k in 0..n {
            let mut c: Array1<f64> = Array1::zeros(n);
            c[k] = 1.0;
            let mut v = raw.values.row(k).to_owned();
            let mut vx = raw.dx.row(k).to_owned();
            let mut vy = raw.dy.row(k).to_owned();

            // Two sweeps keep high orders orthogonal to round-off
            for _ in 0..2 {
                for m in 0..k {
                    let proj = h1_inner(
                        &weights,
                        (v.view(), vx.view(), vy.view()),
                        (
                            sampled.values.row(m),
                            sampled.dx.row(m),
                            sampled.dy.row(m),
                        ),
                    );
                    c.scaled_add(-proj, &coefficients.row(m));
                    v.scaled_add(-proj, &sampled.values.row(m));
                    vx.scaled_add(-proj, &sampled.dx.row(m));
                    vy.scaled_add(-proj, &sampled.dy.row(m));
                }
            }

            let norm = h1_inner(
                &weights,
                (v.view(), vx.view(), vy.view()),
                (v.view(), vx.view(), vy.view()),
            )
            .sqrt();
            coefficients.row_mut(k).assign(&(c / norm));
            sampled.values.row_mut(k).assign(&(v / norm));
            sampled.dx.row_mut(k).assign(&(vx / norm));
            sampled.dy.row_mut(k).assign(&(vy / norm));
        }

        Self {
            shape,
            order,
            exponents,
            coefficients,
            points,
            weights,
            sampled,
        }
    }

    pub fn shape(&self) -> ElementType {
        self.shape
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn num_functions(&self) -> usize {
        self.exponents.len()
    }

    /// Reference coordinates of the sampling rule
    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    /// Weights of the sampling rule on the reference element
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Basis values at the sampling rule, `(num_functions, num_points)`
    pub fn values(&self) -> &Array2<f64> {
        &self.sampled.values
    }

    /// Reference xi-derivatives at the sampling rule
    pub fn dx(&self) -> &Array2<f64> {
        &self.sampled.dx
    }

    /// Reference eta-derivatives at the sampling rule
    pub fn dy(&self) -> &Array2<f64> {
        &self.sampled.dy
    }

    /// Evaluate every basis function at arbitrary reference points
    pub fn evaluate(&self, points: &[[f64; 2]]) -> BasisValues {
        let raw = sample_raw(&self.exponents, self.order, points);
        BasisValues {
            values: self.coefficients.dot(&raw.values),
            dx: self.coefficients.dot(&raw.dx),
            dy: self.coefficients.dot(&raw.dy),
        }
    }
}

type TableKey = (ElementType, usize);
type TableSlot = Arc<OnceLock<Arc<OrthonormalBasisTable>>>;

/// Lazily built orthonormal basis tables keyed by (shape, order).
///
/// Every table of one cache is sampled at the same reference rule, exact for
/// H1 products of order `max_order`. Concurrent first requests for a key
/// build the table once; the others block until it is ready.
#[derive(Debug)]
pub struct OrthonormalBasisCache {
    max_order: usize,
    quad_degree: usize,
    tables: Mutex<HashMap<TableKey, TableSlot>>,
}

impl Default for OrthonormalBasisCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ORDER)
    }
}

impl OrthonormalBasisCache {
    pub fn new(max_order: usize) -> Self {
        Self {
            max_order,
            quad_degree: degree_for_h1_product(max_order),
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Table for (shape, order), building it on first use
    pub fn get(&self, shape: ElementType, order: usize) -> Result<Arc<OrthonormalBasisTable>> {
        shape.ensure_planar()?;
        if order > self.max_order {
            return Err(AdaptError::OrderOutOfRange {
                order,
                max: self.max_order,
            });
        }

        let slot = {
            let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(tables.entry((shape, order)).or_default())
        };

        let table = slot.get_or_init(|| {
            log::debug!("building orthonormal basis for {:?} of order {}", shape, order);
            let rule = match shape {
                ElementType::Triangle => gauss_triangle(self.quad_degree),
                _ => gauss_quadrilateral(self.quad_degree),
            };
            Arc::new(OrthonormalBasisTable::build(shape, order, &rule))
        });
        Ok(Arc::clone(table))
    }

    /// Number of keys requested so far
    pub fn len(&self) -> usize {
        self.tables.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
