//! hp refinement selection for one element
//!
//! Each candidate is scored by error reduction per added degree of freedom.
//! A child's error for a given order is the physical H1 norm of the residual
//! left after projecting the reference solution onto the child's orthonormal
//! basis of that order. Because the bases are hierarchical, one projection
//! onto the highest order a child needs yields the residuals of every lower
//! order by truncation.

use super::candidates::{RefinementCandidate, generate_candidates};
use super::config::AdaptivityConfig;
use crate::basis::{OrthonormalBasisCache, num_functions};
use crate::error::{AdaptError, Result};
use crate::mesh::{ElementType, Point, RefMap, SplitKind, child_points, reference_vertices};
use crate::quadrature::{QuadratureRule, degree_for_h1_product};
use crate::solution::{FunctionValue, MeshFunction};
use crate::space::{RefinementDofs, SpaceKind, patch_dofs};
use std::collections::{BTreeMap, BTreeSet};

const REGION_TOL: f64 = 1e-12;

/// What the selector needs to know about the element being refined
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub component: usize,
    pub element: usize,
    pub shape: ElementType,
    /// Physical vertex coordinates, counter-clockwise
    pub vertices: &'a [Point],
    /// Current order
    pub order: usize,
    pub kind: SpaceKind,
    /// Level at which the element's edges hang on a coarser neighbour
    pub hanging_level: usize,
    /// DOF changes counted on the mesh; without it the element is counted
    /// on its own
    pub dofs: Option<&'a RefinementDofs>,
}

/// A candidate with its error, added DOFs and score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: RefinementCandidate,
    /// Squared H1 projection error of the candidate patch
    pub error: f64,
    pub delta_dof: usize,
    /// (current error - candidate error) / added DOFs
    pub score: f64,
}

/// Whether `a` beats `b`: higher score, then fewer added DOFs, then simpler split
fn beats(a: &ScoredCandidate, b: &ScoredCandidate) -> bool {
    let tol = 1e-12 * a.score.abs().max(b.score.abs());
    if (a.score - b.score).abs() > tol {
        return a.score > b.score;
    }
    if a.delta_dof != b.delta_dof {
        return a.delta_dof < b.delta_dof;
    }
    a.candidate.priority() < b.candidate.priority()
}

/// Best of a scored candidate list; earlier entries win exact ties
pub fn best_candidate(scored: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    scored
        .iter()
        .fold(None, |best: Option<&ScoredCandidate>, c| match best {
            Some(b) if !beats(c, b) => Some(b),
            _ => Some(c),
        })
}

/// Chooses element refinements from a reference solution
#[derive(Debug, Clone, Copy)]
pub struct RefinementSelector<'a> {
    cache: &'a OrthonormalBasisCache,
    config: &'a AdaptivityConfig,
}

/// Quadrature of one child region: reference points of the child, weights
/// on the child's reference element, and indices into the parent samples
struct Region {
    map: RefMap,
    refs: Vec<[f64; 2]>,
    weights: Vec<f64>,
    samples: Vec<usize>,
}

impl<'a> RefinementSelector<'a> {
    pub fn new(cache: &'a OrthonormalBasisCache, config: &'a AdaptivityConfig) -> Self {
        Self { cache, config }
    }

    /// Candidates that survive pruning, with their added DOFs
    fn feasible(&self, ctx: &SelectionContext<'_>) -> Vec<(RefinementCandidate, usize)> {
        let current = patch_dofs(ctx.kind, ctx.shape, SplitKind::None, &[ctx.order]) as isize;
        let delta_dof = |c: &RefinementCandidate| match ctx.dofs {
            Some(dofs) => dofs.delta(c.split, &c.orders),
            None => Some(patch_dofs(ctx.kind, ctx.shape, c.split, &c.orders) as isize - current),
        };
        let split_allowed = match self.config.mesh_regularity {
            Some(bound) => ctx.hanging_level + 1 <= 2 * bound,
            None => true,
        };

        generate_candidates(ctx.shape, ctx.order, self.config.adapt_type, self.config.iso_only)
            .into_iter()
            .filter(|c| c.max_order() <= self.config.max_order)
            .filter(|c| split_allowed || !c.is_split())
            .filter_map(|c| match delta_dof(&c) {
                Some(delta) if delta > 0 => Some((c, delta as usize)),
                _ => None,
            })
            .collect()
    }

    /// Score every feasible candidate of an element
    pub fn score_candidates(
        &self,
        ctx: &SelectionContext<'_>,
        fine: &dyn MeshFunction,
    ) -> Result<Vec<ScoredCandidate>> {
        ctx.shape.ensure_planar()?;
        let feasible = self.feasible(ctx);
        if feasible.is_empty() {
            return Err(AdaptError::NoFeasibleRefinement {
                component: ctx.component,
                element: ctx.element,
            });
        }

        // Orders needed per child region, including the current order on the whole element
        let mut needed: BTreeMap<(SplitKind, usize), BTreeSet<usize>> = BTreeMap::new();
        needed
            .entry((SplitKind::None, 0))
            .or_default()
            .insert(ctx.order);
        for (c, _) in &feasible {
            for (k, &o) in c.orders.iter().enumerate() {
                needed.entry((c.split, k)).or_default().insert(o);
            }
        }

        let errors = self.region_errors(ctx, fine, &needed)?;
        let error_of = |split: SplitKind, orders: &[usize]| -> f64 {
            orders
                .iter()
                .enumerate()
                .map(|(k, &o)| errors.get(&(split, k, o)).copied().unwrap_or(0.0))
                .sum()
        };

        let current = error_of(SplitKind::None, &[ctx.order]);
        Ok(feasible
            .into_iter()
            .map(|(candidate, delta_dof)| {
                let error = error_of(candidate.split, &candidate.orders);
                ScoredCandidate {
                    score: (current - error) / delta_dof as f64,
                    candidate,
                    error,
                    delta_dof,
                }
            })
            .collect())
    }

    /// Pick the refinement of one element.
    ///
    /// Fails with `NoFeasibleRefinement` when pruning leaves nothing to choose.
    pub fn choose_refinement(
        &self,
        ctx: &SelectionContext<'_>,
        fine: &dyn MeshFunction,
    ) -> Result<RefinementCandidate> {
        let scored = self.score_candidates(ctx, fine)?;
        let best = best_candidate(&scored).ok_or(AdaptError::NoFeasibleRefinement {
            component: ctx.component,
            element: ctx.element,
        })?;
        log::debug!(
            "element {}: {:?} {:?} (score {:.3e}, +{} dofs)",
            ctx.element,
            best.candidate.split,
            best.candidate.orders,
            best.score,
            best.delta_dof
        );
        Ok(best.candidate.clone())
    }

    /// Squared projection errors keyed by (split, child, order)
    fn region_errors(
        &self,
        ctx: &SelectionContext<'_>,
        fine: &dyn MeshFunction,
        needed: &BTreeMap<(SplitKind, usize), BTreeSet<usize>>,
    ) -> Result<BTreeMap<(SplitKind, usize, usize), f64>> {
        let failure = |reason: String| AdaptError::EvaluationFailure {
            component: ctx.component,
            element: ctx.element,
            reason,
        };
        let with_element = |e: AdaptError| match e {
            AdaptError::EvaluationFailure { reason, .. } => failure(reason),
            other => other,
        };

        // Sample the reference solution once on the composite rule of the whole element
        let top_order = needed.values().flat_map(|s| s.iter().copied()).max().unwrap_or(ctx.order);
        let degree = degree_for_h1_product(top_order.max(ctx.order + self.config.order_increase));
        let rule = QuadratureRule::composite(ctx.shape, degree)?;
        let parent = RefMap::new(ctx.shape, ctx.vertices.to_vec()).map_err(with_element)?;
        let physical: Vec<Point> = rule.iter().map(|q| parent.map(q.xi(), q.eta())).collect();
        let samples = fine.evaluate(&physical).map_err(with_element)?;
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(failure("reference solution is not finite".to_string()));
        }

        let ref_vertices = reference_vertices(ctx.shape);
        let mut errors = BTreeMap::new();

        for (&(split, child), orders) in needed {
            let region_ref = child_points(ctx.shape, &ref_vertices, split)?;
            let region_phys = child_points(ctx.shape, ctx.vertices, split)?;
            let ref_map = RefMap::new(ctx.shape, region_ref[child].clone()).map_err(with_element)?;
            let region = Region::collect(
                &rule,
                &ref_map,
                RefMap::new(ctx.shape, region_phys[child].clone()).map_err(with_element)?,
            );

            let max_order = orders.iter().copied().max().unwrap_or(0);
            for (order, err) in self.project_region(ctx.shape, &region, &samples, max_order, orders)? {
                errors.insert((split, child, order), err);
            }
        }

        Ok(errors)
    }

    /// Residual norms of the projection of the samples onto each requested order
    fn project_region(
        &self,
        shape: ElementType,
        region: &Region,
        samples: &[FunctionValue],
        max_order: usize,
        orders: &BTreeSet<usize>,
    ) -> Result<Vec<(usize, f64)>> {
        let table = self.cache.get(shape, max_order)?;
        let basis = table.evaluate(&region.refs);
        let n = table.num_functions();
        let npts = region.refs.len();

        // Reference-domain values, gradients and physical scaling at each point
        let mut f = Vec::with_capacity(npts);
        let mut jac = Vec::with_capacity(npts);
        for (q, r) in region.refs.iter().enumerate() {
            let s = samples[region.samples[q]];
            let j = region.map.jacobian(r[0], r[1]);
            f.push((s.value, j.pull_back_gradient([s.dx, s.dy])));
            jac.push(j);
        }

        let mut coeffs = vec![0.0; n];
        for (k, c) in coeffs.iter_mut().enumerate() {
            *c = (0..npts)
                .map(|q| {
                    let (v, g) = f[q];
                    region.weights[q]
                        * (v * basis.values[[k, q]] + g[0] * basis.dx[[k, q]] + g[1] * basis.dy[[k, q]])
                })
                .sum();
        }

        let mut out = Vec::with_capacity(orders.len());
        for &order in orders {
            let m = num_functions(shape, order);
            let mut err = 0.0;
            for q in 0..npts {
                let (mut r, mut g) = f[q];
                for (k, c) in coeffs.iter().take(m).enumerate() {
                    r -= c * basis.values[[k, q]];
                    g[0] -= c * basis.dx[[k, q]];
                    g[1] -= c * basis.dy[[k, q]];
                }
                let gp = jac[q].transform_gradient(g);
                err += region.weights[q] * jac[q].det * (r * r + gp[0] * gp[0] + gp[1] * gp[1]);
            }
            out.push((order, err));
        }
        Ok(out)
    }
}

impl Region {
    /// Points of the parent's composite rule that fall inside the region
    fn collect(rule: &QuadratureRule, ref_map: &RefMap, map: RefMap) -> Self {
        let det = ref_map.jacobian(0.0, 0.0).det.abs();
        let mut refs = Vec::new();
        let mut weights = Vec::new();
        let mut samples = Vec::new();

        for (i, q) in rule.iter().enumerate() {
            let Some(s) = ref_map.inverse_map(&Point::new_2d(q.xi(), q.eta())) else {
                continue;
            };
            if ref_map.contains_reference(s[0], s[1], REGION_TOL) {
                refs.push(s);
                weights.push(q.weight / det);
                samples.push(i);
            }
        }

        Self {
            map,
            refs,
            weights,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::config::AdaptType;
    use crate::mesh::unit_square_quads;
    use crate::solution::ExactSolution;
    use crate::space::Space;
    use approx::assert_relative_eq;

    fn scored(split: SplitKind, orders: Vec<usize>, delta_dof: usize, gain: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: RefinementCandidate::split(split, orders),
            error: 1.0 - gain,
            delta_dof,
            score: gain / delta_dof as f64,
        }
    }

    fn unit_square() -> Vec<Point> {
        vec![
            Point::new_2d(0.0, 0.0),
            Point::new_2d(1.0, 0.0),
            Point::new_2d(1.0, 1.0),
            Point::new_2d(0.0, 1.0),
        ]
    }

    fn ctx(vertices: &[Point], order: usize, hanging_level: usize) -> SelectionContext<'_> {
        SelectionContext {
            component: 0,
            element: 0,
            shape: ElementType::Quadrilateral,
            vertices,
            order,
            kind: SpaceKind::H1,
            hanging_level,
            dofs: None,
        }
    }

    fn x_squared() -> ExactSolution {
        ExactSolution::new(|x, _| FunctionValue::new(x * x, 2.0 * x, 0.0))
    }

    #[test]
    fn test_ratio_winner() {
        // Isotropic: 0.8 gained for 4 DOFs beats an order bump: 0.3 for 2 DOFs
        let list = vec![
            scored(SplitKind::None, vec![3], 2, 0.3),
            scored(SplitKind::Isotropic, vec![2, 2, 2, 2], 4, 0.8),
        ];
        assert_eq!(best_candidate(&list).unwrap().candidate.split, SplitKind::Isotropic);
    }

    #[test]
    fn test_tie_breaks() {
        // Equal score: fewer DOFs wins
        let list = vec![
            scored(SplitKind::Isotropic, vec![1, 1, 1, 1], 4, 0.4),
            scored(SplitKind::None, vec![3], 2, 0.2),
        ];
        assert_eq!(best_candidate(&list).unwrap().delta_dof, 2);

        // Equal score and DOFs: simpler split wins
        let list = vec![
            scored(SplitKind::AnisoVertical, vec![1, 1], 2, 0.2),
            scored(SplitKind::AnisoHorizontal, vec![1, 1], 2, 0.2),
        ];
        assert_eq!(
            best_candidate(&list).unwrap().candidate.split,
            SplitKind::AnisoHorizontal
        );
        assert!(best_candidate(&[]).is_none());
    }

    #[test]
    fn test_p_adaptivity_picks_exact_order() {
        let cache = OrthonormalBasisCache::new(6);
        let config = AdaptivityConfig {
            adapt_type: AdaptType::P,
            ..Default::default()
        };
        let selector = RefinementSelector::new(&cache, &config);
        let vertices = unit_square();
        let scored = selector.score_candidates(&ctx(&vertices, 1, 0), &x_squared()).unwrap();

        // Order 2 already reproduces x^2: both candidates remove the whole error
        assert_eq!(scored.len(), 2);
        assert_relative_eq!(scored[0].error, 0.0, epsilon = 1e-12);
        assert_relative_eq!(scored[1].error, 0.0, epsilon = 1e-12);
        let best = selector.choose_refinement(&ctx(&vertices, 1, 0), &x_squared()).unwrap();
        assert_eq!(best, RefinementCandidate::p(2));
    }

    #[test]
    fn test_h_adaptivity_cuts_across_the_variation() {
        let cache = OrthonormalBasisCache::new(6);
        let config = AdaptivityConfig {
            adapt_type: AdaptType::H,
            ..Default::default()
        };
        let selector = RefinementSelector::new(&cache, &config);
        let vertices = unit_square();
        let best = selector.choose_refinement(&ctx(&vertices, 1, 0), &x_squared()).unwrap();
        assert_eq!(best.split, SplitKind::AnisoVertical);

        let iso_config = AdaptivityConfig {
            iso_only: true,
            ..config
        };
        let selector = RefinementSelector::new(&cache, &iso_config);
        let best = selector.choose_refinement(&ctx(&vertices, 1, 0), &x_squared()).unwrap();
        assert_eq!(best.split, SplitKind::Isotropic);
    }

    #[test]
    fn test_order_increase_never_increases_error() {
        let cache = OrthonormalBasisCache::new(6);
        let config = AdaptivityConfig::default();
        let selector = RefinementSelector::new(&cache, &config);
        let vertices = unit_square();
        let f = ExactSolution::new(|x, y| {
            FunctionValue::new((3.0 * x).sin() * y, 3.0 * (3.0 * x).cos() * y, (3.0 * x).sin())
        });
        let scored = selector.score_candidates(&ctx(&vertices, 2, 0), &f).unwrap();

        // Raising the order never increases the projection error
        let current = scored[0].error + scored[0].score * scored[0].delta_dof as f64;
        for s in scored.iter().filter(|s| !s.candidate.is_split()) {
            assert!(s.error <= current + 1e-12);
        }
        assert!(scored.iter().all(|s| s.error >= 0.0 && s.score.is_finite()));

        // All-linear patches carry no more DOFs than the quadratic element
        assert!(scored.iter().all(|s| s.candidate.max_order() >= 2));
    }

    #[test]
    fn test_pruning() {
        let cache = OrthonormalBasisCache::new(6);
        let vertices = unit_square();

        // Order bumps beyond max_order are dropped
        let config = AdaptivityConfig {
            adapt_type: AdaptType::P,
            max_order: 3,
            ..Default::default()
        };
        let selector = RefinementSelector::new(&cache, &config);
        let at_max = SelectionContext {
            component: 2,
            ..ctx(&vertices, 3, 0)
        };
        let err = selector.choose_refinement(&at_max, &x_squared()).unwrap_err();
        assert!(matches!(
            err,
            AdaptError::NoFeasibleRefinement {
                component: 2,
                element: 0
            }
        ));

        // Splits that would break the regularity bound are dropped
        let config = AdaptivityConfig {
            adapt_type: AdaptType::H,
            mesh_regularity: Some(1),
            ..Default::default()
        };
        let selector = RefinementSelector::new(&cache, &config);
        assert!(selector.choose_refinement(&ctx(&vertices, 1, 1), &x_squared()).is_ok());
        let err = selector.choose_refinement(&ctx(&vertices, 1, 2), &x_squared()).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_mesh_dofs_prune_candidates_that_lose_edge_dofs() {
        let mesh = unit_square_quads(3);
        let space = Space::new(&mesh, SpaceKind::H1, 4);
        let centre = 4;
        let dofs = RefinementDofs::new(
            &mesh,
            &mesh.topology(),
            &space,
            centre,
            SplitKind::available(ElementType::Quadrilateral, false),
        )
        .unwrap();
        let vertices = mesh.element_points(centre).unwrap();
        let context = SelectionContext {
            element: centre,
            dofs: Some(&dofs),
            ..ctx(&vertices, 4, 0)
        };

        let cache = OrthonormalBasisCache::new(7);
        let config = AdaptivityConfig::default();
        let selector = RefinementSelector::new(&cache, &config);
        let f = ExactSolution::new(|x, y| {
            let v = (-20.0 * ((x - 0.5).powi(2) + (y - 0.4).powi(2))).exp();
            FunctionValue::new(v, -40.0 * (x - 0.5) * v, -40.0 * (y - 0.4) * v)
        });
        let scored = selector.score_candidates(&context, &f).unwrap();

        // Anisotropic children at order 3 would drop the whole edges below the neighbours' order
        let lossy = RefinementCandidate::split(SplitKind::AnisoHorizontal, vec![3, 3]);
        assert!(scored.iter().all(|s| s.candidate != lossy));
        for s in &scored {
            let delta = dofs.delta(s.candidate.split, &s.candidate.orders).unwrap();
            assert_eq!(s.delta_dof as isize, delta);
            assert!(delta > 0);
        }
    }

    #[test]
    fn test_triangle_selection() {
        let cache = OrthonormalBasisCache::new(6);
        let config = AdaptivityConfig::default();
        let selector = RefinementSelector::new(&cache, &config);
        let vertices = vec![
            Point::new_2d(0.0, 0.0),
            Point::new_2d(1.0, 0.0),
            Point::new_2d(0.0, 1.0),
        ];
        let ctx = SelectionContext {
            component: 0,
            element: 4,
            shape: ElementType::Triangle,
            vertices: &vertices,
            order: 2,
            kind: SpaceKind::H1,
            hanging_level: 0,
            dofs: None,
        };
        let f = ExactSolution::new(|x, y| FunctionValue::new((x * y).exp(), y * (x * y).exp(), x * (x * y).exp()));
        let scored = selector.score_candidates(&ctx, &f).unwrap();
        assert!(scored.iter().all(|s| !s.candidate.split.is_anisotropic()));
        assert!(scored.iter().all(|s| s.score.is_finite() && s.error >= 0.0));
    }
}
