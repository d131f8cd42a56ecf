//! Functions defined over meshes
//!
//! The adaptivity core only needs values and gradients at physical points.
//! [`ExactSolution`] wraps an analytic function; [`ProjectedSolution`] is the
//! element-wise H1 projection of a function onto a [`Space`], built with the
//! orthonormal basis tables.

use crate::basis::{OrthonormalBasisCache, OrthonormalBasisTable};
use crate::error::{AdaptError, Result};
use crate::mesh::{Mesh, Point, RefMap};
use crate::space::{Discretization, Space, SpaceSignature};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Value and physical gradient at one point
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FunctionValue {
    pub value: f64,
    pub dx: f64,
    pub dy: f64,
}

impl FunctionValue {
    pub fn new(value: f64, dx: f64, dy: f64) -> Self {
        Self { value, dx, dy }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.dx.is_finite() && self.dy.is_finite()
    }
}

impl std::ops::Sub for FunctionValue {
    type Output = FunctionValue;

    fn sub(self, rhs: FunctionValue) -> FunctionValue {
        FunctionValue::new(self.value - rhs.value, self.dx - rhs.dx, self.dy - rhs.dy)
    }
}

/// A scalar function that can be sampled at physical points of a mesh
pub trait MeshFunction: Send + Sync {
    /// Values and gradients at the given points
    fn evaluate(&self, points: &[Point]) -> Result<Vec<FunctionValue>>;

    /// Signature of the space this function belongs to, if any
    fn space_signature(&self) -> Option<SpaceSignature> {
        None
    }

    /// Signature of the coarse space, if this function lives on a reference space
    fn reference_of(&self) -> Option<SpaceSignature> {
        None
    }
}

type ExactFn = dyn Fn(f64, f64) -> FunctionValue + Send + Sync;

/// Closure-backed analytic function
pub struct ExactSolution {
    f: Box<ExactFn>,
}

impl ExactSolution {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(f64, f64) -> FunctionValue + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl std::fmt::Debug for ExactSolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExactSolution")
    }
}

impl MeshFunction for ExactSolution {
    fn evaluate(&self, points: &[Point]) -> Result<Vec<FunctionValue>> {
        Ok(points.iter().map(|p| (self.f)(p.x, p.y)).collect())
    }
}

#[derive(Debug)]
struct ElementProjection {
    table: Arc<OrthonormalBasisTable>,
    coefficients: Vec<f64>,
}

/// Element-wise H1 projection of a function onto a space
#[derive(Debug)]
pub struct ProjectedSolution {
    mesh: Mesh,
    maps: Vec<RefMap>,
    elements: HashMap<usize, ElementProjection>,
    signature: SpaceSignature,
    reference_of: Option<SpaceSignature>,
}

const LOCATE_TOL: f64 = 1e-10;

/// Project `f` onto the orthonormal basis of one element
fn project_element(
    map: &RefMap,
    table: Arc<OrthonormalBasisTable>,
    f: &dyn MeshFunction,
) -> Result<ElementProjection> {
    let physical: Vec<Point> = table.points().iter().map(|r| map.map(r[0], r[1])).collect();
    let samples = f.evaluate(&physical)?;

    let mut coefficients = vec![0.0; table.num_functions()];
    for (q, (r, s)) in table.points().iter().zip(&samples).enumerate() {
        if !s.is_finite() {
            return Err(AdaptError::EvaluationFailure {
                component: 0,
                element: usize::MAX,
                reason: format!("non-finite function value at ({}, {})", physical[q].x, physical[q].y),
            });
        }
        let g = map.jacobian(r[0], r[1]).pull_back_gradient([s.dx, s.dy]);
        let w = table.weights()[q];
        for (k, c) in coefficients.iter_mut().enumerate() {
            *c += w
                * (s.value * table.values()[[k, q]]
                    + g[0] * table.dx()[[k, q]]
                    + g[1] * table.dy()[[k, q]]);
        }
    }

    Ok(ElementProjection {
        table,
        coefficients,
    })
}

impl ProjectedSolution {
    /// Project `f` onto every active element of `space`
    pub fn new(
        mesh: &Mesh,
        space: &Space,
        cache: &OrthonormalBasisCache,
        f: &dyn MeshFunction,
    ) -> Result<Self> {
        let maps = (0..mesh.num_elements())
            .map(|id| mesh.refmap(id))
            .collect::<Result<Vec<_>>>()?;
        let active = mesh.active_elements();

        let project = |&id: &usize| -> Result<(usize, ElementProjection)> {
            let table = cache.get(mesh.elements[id].element_type, space.order(id))?;
            let proj = project_element(&maps[id], table, f).map_err(|e| match e {
                AdaptError::EvaluationFailure {
                    component, reason, ..
                } => AdaptError::EvaluationFailure {
                    component,
                    element: id,
                    reason,
                },
                other => other,
            })?;
            Ok((id, proj))
        };

        #[cfg(feature = "parallel")]
        let projected: Vec<Result<(usize, ElementProjection)>> = active.par_iter().map(project).collect();
        #[cfg(not(feature = "parallel"))]
        let projected: Vec<Result<(usize, ElementProjection)>> = active.iter().map(project).collect();

        let elements = projected.into_iter().collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            mesh: mesh.clone(),
            maps,
            elements,
            signature: space.signature(mesh),
            reference_of: space.reference_of(),
        })
    }

    /// Project `f` onto the space of one component of a discretization
    pub fn for_component(
        disc: &Discretization,
        component: usize,
        cache: &OrthonormalBasisCache,
        f: &dyn MeshFunction,
    ) -> Result<Self> {
        Self::new(disc.mesh(component), disc.space(component), cache, f)
            .map_err(|e| e.for_component(component))
    }

    /// Mesh the projection was built on
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Active element containing a point and the point's reference coordinates
    pub fn locate(&self, p: &Point) -> Option<(usize, [f64; 2])> {
        let mut candidates: Vec<usize> = self.mesh.root_elements().map(|e| e.id).collect();
        loop {
            let (id, r) = candidates.iter().find_map(|&id| {
                let map = &self.maps[id];
                let r = map.inverse_map(p)?;
                map.contains_reference(r[0], r[1], LOCATE_TOL)
                    .then_some((id, r))
            })?;
            let elem = &self.mesh.elements[id];
            if elem.active {
                return Some((id, r));
            }
            candidates = elem.children.clone();
        }
    }
}

impl MeshFunction for ProjectedSolution {
    fn evaluate(&self, points: &[Point]) -> Result<Vec<FunctionValue>> {
        // Group points by element so each basis is evaluated once per element
        let mut groups: HashMap<usize, Vec<(usize, [f64; 2])>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            let (id, r) = self.locate(p).ok_or_else(|| AdaptError::EvaluationFailure {
                component: 0,
                element: usize::MAX,
                reason: format!("point ({}, {}) lies outside the mesh", p.x, p.y),
            })?;
            groups.entry(id).or_default().push((i, r));
        }

        let mut out = vec![FunctionValue::default(); points.len()];
        for (id, group) in groups {
            let proj = self
                .elements
                .get(&id)
                .ok_or(AdaptError::UnknownElement { element: id })?;
            let refs: Vec<[f64; 2]> = group.iter().map(|&(_, r)| r).collect();
            let basis = proj.table.evaluate(&refs);

            for (q, &(i, r)) in group.iter().enumerate() {
                let mut v = 0.0;
                let mut g = [0.0; 2];
                for (k, c) in proj.coefficients.iter().enumerate() {
                    v += c * basis.values[[k, q]];
                    g[0] += c * basis.dx[[k, q]];
                    g[1] += c * basis.dy[[k, q]];
                }
                let g = self.maps[id].jacobian(r[0], r[1]).transform_gradient(g);
                out[i] = FunctionValue::new(v, g[0], g[1]);
            }
        }

        Ok(out)
    }

    fn space_signature(&self) -> Option<SpaceSignature> {
        Some(self.signature)
    }

    fn reference_of(&self) -> Option<SpaceSignature> {
        self.reference_of
    }
}
