//! Adaptation driver: error evaluation, ranking, selection and commit
//!
//! One call to [`AdaptationDriver::adapt_step`] runs the stages in order:
//!
//! 1. evaluate element errors from the coarse/reference pairs
//! 2. stop if the error or the DOF count reached its limit
//! 3. rank elements and choose a refinement for each, per element in parallel
//! 4. apply every refinement to a copy of the discretization and swap it in
//! 5. restore the mesh regularity bound and recount DOFs

use super::candidates::RefinementCandidate;
use super::config::{AdaptType, AdaptivityConfig};
use super::estimator::{ErrorEstimate, ErrorEvaluator, SolutionPair};
use super::forms::FormRegistry;
use super::ranking;
use super::selector::{RefinementSelector, SelectionContext};
use crate::basis::OrthonormalBasisCache;
use crate::error::{AdaptError, Result};
use crate::mesh::{MeshTopology, SplitKind};
use crate::space::{Discretization, RefinementDofs};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Stage reached by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdaptState {
    #[default]
    Idle,
    ErrorEvaluated,
    Selected,
    Applied,
    Converged,
}

/// Why a step applied nothing (or why the run should stop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConvergedReason {
    #[default]
    NotYet,
    ErrorBelowThreshold,
    DofCapReached,
    /// No element with error left has a feasible refinement
    NothingRefinable,
}

/// A refinement committed to one element of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRefinement {
    pub component: usize,
    pub element: usize,
    pub candidate: RefinementCandidate,
}

/// Outcome of one adaptation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub applied: Vec<AppliedRefinement>,
    /// Elements that were ranked but had no feasible refinement
    pub skipped: Vec<(usize, usize)>,
    /// DOFs after the step
    pub dof_count: usize,
    pub converged_reason: ConvergedReason,
    /// Relative error measured at the start of the step
    pub relative_error: f64,
}

impl StepReport {
    pub fn converged(&self) -> bool {
        self.converged_reason != ConvergedReason::NotYet
    }

    pub fn relative_error_percent(&self) -> f64 {
        100.0 * self.relative_error
    }
}

/// One row of the convergence history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub step: usize,
    pub dofs: usize,
    pub error_percent: f64,
}

/// DOFs against error, one record per evaluated step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceHistory {
    records: Vec<ConvergenceRecord>,
}

impl ConvergenceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dofs: usize, error_percent: f64) {
        let step = self.records.len();
        self.records.push(ConvergenceRecord {
            step,
            dofs,
            error_percent,
        });
    }

    pub fn records(&self) -> &[ConvergenceRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&ConvergenceRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AdaptError::InvalidConfig(format!("cannot serialise history: {e}")))
    }
}

/// Drives hp-adaptation of a [`Discretization`]
#[derive(Debug)]
pub struct AdaptationDriver {
    config: AdaptivityConfig,
    cache: Arc<OrthonormalBasisCache>,
    evaluator: ErrorEvaluator,
    state: AdaptState,
    last_estimate: Option<ErrorEstimate>,
    history: ConvergenceHistory,
}

impl AdaptationDriver {
    /// Driver with its own basis cache, large enough for reference solutions
    /// of elements at `config.max_order`
    pub fn new(config: AdaptivityConfig) -> Result<Self> {
        let cache = Arc::new(OrthonormalBasisCache::new(
            config.max_order + config.order_increase,
        ));
        Self::with_cache(config, cache)
    }

    /// Driver sharing a basis cache with the host
    pub fn with_cache(config: AdaptivityConfig, cache: Arc<OrthonormalBasisCache>) -> Result<Self> {
        config.validate()?;
        if config.max_order > cache.max_order() {
            return Err(AdaptError::OrderOutOfRange {
                order: config.max_order,
                max: cache.max_order(),
            });
        }
        let evaluator = ErrorEvaluator::new(config.order_increase, config.normalization);
        Ok(Self {
            config,
            cache,
            evaluator,
            state: AdaptState::Idle,
            last_estimate: None,
            history: ConvergenceHistory::new(),
        })
    }

    pub fn config(&self) -> &AdaptivityConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<OrthonormalBasisCache> {
        &self.cache
    }

    pub fn state(&self) -> AdaptState {
        self.state
    }

    pub fn history(&self) -> &ConvergenceHistory {
        &self.history
    }

    /// Estimate from the most recent evaluation
    pub fn last_estimate(&self) -> Option<&ErrorEstimate> {
        self.last_estimate.as_ref()
    }

    /// Evaluate element errors without refining anything
    pub fn calc_error(
        &mut self,
        disc: &Discretization,
        pairs: &[SolutionPair<'_>],
        forms: &FormRegistry,
    ) -> Result<ErrorEstimate> {
        let estimate = self.evaluator.evaluate(disc, pairs, forms)?;
        self.state = AdaptState::ErrorEvaluated;
        self.last_estimate = Some(estimate.clone());
        Ok(estimate)
    }

    /// Run one adaptation step.
    ///
    /// On error the discretization is left untouched.
    pub fn adapt_step(
        &mut self,
        disc: &mut Discretization,
        pairs: &[SolutionPair<'_>],
        forms: &FormRegistry,
    ) -> Result<StepReport> {
        let estimate = self.calc_error(disc, pairs, forms)?;
        let relative_error = estimate.relative_error();
        let dofs = disc.num_dofs();
        self.history.push(dofs, 100.0 * relative_error);

        let reason = if 100.0 * relative_error < self.config.error_stop_percent {
            ConvergedReason::ErrorBelowThreshold
        } else if dofs >= self.config.dof_cap {
            ConvergedReason::DofCapReached
        } else {
            ConvergedReason::NotYet
        };
        if reason != ConvergedReason::NotYet {
            log::info!(
                "converged ({:?}): error {:.4}%, {} dofs",
                reason,
                100.0 * relative_error,
                dofs
            );
            self.state = AdaptState::Converged;
            return Ok(StepReport {
                applied: Vec::new(),
                skipped: Vec::new(),
                dof_count: dofs,
                converged_reason: reason,
                relative_error,
            });
        }

        let (decisions, skipped) = self.select_refinable(disc, pairs, &estimate)?;
        self.state = AdaptState::Selected;
        let (mut next, decisions, skipped) = commit_growing(disc, decisions, skipped, dofs)?;
        if decisions.is_empty() {
            log::info!(
                "nothing refinable: error {:.4}%, {} dofs, {} elements skipped",
                100.0 * relative_error,
                dofs,
                skipped.len()
            );
            self.state = AdaptState::Converged;
            return Ok(StepReport {
                applied: Vec::new(),
                skipped,
                dof_count: dofs,
                converged_reason: ConvergedReason::NothingRefinable,
                relative_error,
            });
        }

        if self.config.same_orders {
            sync_orders(&mut next);
        }
        if let Some(bound) = self.config.mesh_regularity {
            regularize(&mut next, bound)?;
        }
        *disc = next;
        self.state = AdaptState::Applied;

        let dof_count = disc.num_dofs();
        let converged_reason = if dof_count >= self.config.dof_cap {
            self.state = AdaptState::Converged;
            ConvergedReason::DofCapReached
        } else {
            ConvergedReason::NotYet
        };

        log::info!(
            "step {}: error {:.4}%, {} refined, {} skipped, dofs {} -> {}",
            self.history.len() - 1,
            100.0 * relative_error,
            decisions.len(),
            skipped.len(),
            dofs,
            dof_count
        );

        Ok(StepReport {
            applied: decisions,
            skipped,
            dof_count,
            converged_reason,
            relative_error,
        })
    }

    /// Rank the elements and choose their refinements.
    ///
    /// Elements without a feasible refinement leave the ranking and the
    /// selection is refilled from the elements ranked after them, until a
    /// round skips nothing or no element is left.
    fn select_refinable(
        &self,
        disc: &Discretization,
        pairs: &[SolutionPair<'_>],
        estimate: &ErrorEstimate,
    ) -> Result<(Vec<AppliedRefinement>, Vec<(usize, usize)>)> {
        let mut remaining = estimate.clone();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut decisions = Vec::new();
        let mut skipped = Vec::new();

        loop {
            let ranked = ranking::select(
                &remaining,
                self.config.strategy,
                self.config.threshold,
                self.config.fraction_cutoff,
            )?;
            let fresh: Vec<(usize, usize)> = ranked.into_iter().filter(|k| !seen.contains(k)).collect();
            if fresh.is_empty() {
                break;
            }
            seen.extend(fresh.iter().copied());

            let (chosen, dropped) = self.choose(disc, pairs, &fresh)?;
            decisions.extend(chosen);
            if dropped.is_empty() {
                break;
            }
            remaining
                .records
                .retain(|r| !dropped.contains(&(r.component, r.element)));
            skipped.extend(dropped);
        }

        decisions.sort_by_key(|d: &AppliedRefinement| (d.component, d.element));
        skipped.sort_unstable();
        Ok((decisions, skipped))
    }

    /// Choose a refinement for every ranked element
    fn choose(
        &self,
        disc: &Discretization,
        pairs: &[SolutionPair<'_>],
        ranked: &[(usize, usize)],
    ) -> Result<(Vec<AppliedRefinement>, Vec<(usize, usize)>)> {
        let selector = RefinementSelector::new(&self.cache, &self.config);
        let topologies: Vec<MeshTopology> = disc.meshes.iter().map(|m| m.topology()).collect();

        let choose_one = |&(component, element): &(usize, usize)| -> Result<Option<AppliedRefinement>> {
            let mesh = disc.mesh(component);
            let space = disc.space(component);
            let shape = mesh.active_element(element)?.element_type;
            let vertices = mesh.element_points(element)?;
            let topo = &topologies[disc.mesh_index(component)];
            let splits = match self.config.adapt_type {
                AdaptType::P => &[][..],
                _ => SplitKind::available(shape, self.config.iso_only),
            };
            let dofs = RefinementDofs::new(mesh, topo, space, element, splits)?;
            let ctx = SelectionContext {
                component,
                element,
                shape,
                vertices: &vertices,
                order: space.order(element),
                kind: space.kind(),
                hanging_level: topo.hanging_level(element),
                dofs: Some(&dofs),
            };
            match selector.choose_refinement(&ctx, pairs[component].fine) {
                Ok(candidate) => Ok(Some(AppliedRefinement {
                    component,
                    element,
                    candidate,
                })),
                Err(e) if e.is_recoverable() => {
                    log::warn!("{e}, skipped");
                    Ok(None)
                }
                Err(e) => Err(e.for_component(component)),
            }
        };

        #[cfg(feature = "parallel")]
        let chosen: Vec<Result<Option<AppliedRefinement>>> = ranked.par_iter().map(choose_one).collect();
        #[cfg(not(feature = "parallel"))]
        let chosen: Vec<Result<Option<AppliedRefinement>>> = ranked.iter().map(choose_one).collect();

        let mut decisions = Vec::with_capacity(ranked.len());
        let mut skipped = Vec::new();
        for (result, &key) in chosen.into_iter().zip(ranked) {
            match result? {
                Some(d) => decisions.push(d),
                None => skipped.push(key),
            }
        }
        decisions.sort_by_key(|d| (d.component, d.element));
        Ok((decisions, skipped))
    }

    /// Coarsen parents whose active children carry little error.
    ///
    /// `estimate` must belong to the current discretization. A parent is
    /// coarsened when the scaled errors of its children, summed over the
    /// components on its mesh, fall below `threshold`; it takes the largest
    /// order of its children. Coarsenings that would break the regularity
    /// bound are undone. Returns the number of coarsened parents.
    pub fn unrefine(
        &mut self,
        disc: &mut Discretization,
        estimate: &ErrorEstimate,
        threshold: f64,
    ) -> Result<usize> {
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(AdaptError::InvalidConfig(format!(
                "unrefine threshold must be finite and non-negative, got {threshold}"
            )));
        }

        let mut coarsened = 0;
        let Discretization {
            meshes,
            mesh_of,
            spaces,
        } = disc;

        for (m, mesh) in meshes.iter_mut().enumerate() {
            let components: Vec<usize> = (0..mesh_of.len()).filter(|&c| mesh_of[c] == m).collect();
            let parents: Vec<usize> = (0..mesh.num_elements())
                .filter(|&id| mesh.is_coarsenable(id))
                .collect();

            for parent in parents {
                let children = mesh.elements[parent].children.clone();
                let error: f64 = components
                    .iter()
                    .flat_map(|&c| children.iter().map(move |&e| (c, e)))
                    .map(|(c, e)| estimate.element_error(c, e).unwrap_or(0.0))
                    .sum();
                if error >= threshold {
                    continue;
                }

                let split = mesh.elements[parent].split.unwrap_or(SplitKind::Isotropic);
                let children = mesh.coarsen_element(parent)?;
                let regular = match self.config.mesh_regularity {
                    Some(bound) => mesh.topology().max_hanging_level() <= bound,
                    None => true,
                };
                if !regular {
                    mesh.restore_children(parent, children, split);
                    continue;
                }

                for &c in &components {
                    let order = children
                        .iter()
                        .map(|&e| spaces[c].order(e))
                        .max()
                        .unwrap_or_else(|| spaces[c].order(parent));
                    spaces[c].set_order(parent, order);
                }
                log::debug!("mesh {m}: coarsened element {parent}");
                coarsened += 1;
            }
        }

        if coarsened > 0 {
            log::info!("unrefine: {coarsened} parents coarsened");
        }
        Ok(coarsened)
    }
}

/// Commit the chosen refinements; the first split of an element on a shared mesh wins
fn apply_refinements(disc: &mut Discretization, decisions: &[AppliedRefinement]) -> Result<()> {
    let Discretization {
        meshes,
        mesh_of,
        spaces,
    } = disc;

    for d in decisions {
        let m = mesh_of[d.component];
        let mesh = &mut meshes[m];
        let (active, existing, children) = {
            let elem = mesh.element(d.element)?;
            (elem.active, elem.split, elem.children.clone())
        };

        if active {
            if d.candidate.is_split() {
                let children = mesh.split_element(d.element, d.candidate.split)?;
                for c in (0..spaces.len()).filter(|&c| mesh_of[c] == m && c != d.component) {
                    spaces[c].inherit_children(mesh, d.element);
                }
                for (&child, &order) in children.iter().zip(&d.candidate.orders) {
                    spaces[d.component].set_order(child, order);
                }
            } else {
                spaces[d.component].set_order(d.element, d.candidate.orders[0]);
            }
        } else {
            // Split earlier in this step by another component on the same mesh
            let same_split = existing == Some(d.candidate.split);
            for (k, &child) in children.iter().enumerate() {
                let order = if same_split {
                    d.candidate.orders[k]
                } else {
                    d.candidate.max_order()
                };
                spaces[d.component].set_order(child, order);
            }
        }
    }
    Ok(())
}

/// Apply the decisions to a copy of `disc`.
///
/// Refinements chosen for neighbouring elements can interact on a shared
/// edge. If together they lower the DOF count below `dofs`, they are applied
/// one at a time instead and any that would lower the count is skipped.
fn commit_growing(
    disc: &Discretization,
    decisions: Vec<AppliedRefinement>,
    mut skipped: Vec<(usize, usize)>,
    dofs: usize,
) -> Result<(Discretization, Vec<AppliedRefinement>, Vec<(usize, usize)>)> {
    let mut next = disc.clone();
    apply_refinements(&mut next, &decisions)?;
    if next.num_dofs() >= dofs {
        return Ok((next, decisions, skipped));
    }

    log::warn!("refinements of neighbouring elements lower the dof count, committing them one by one");
    let mut next = disc.clone();
    let mut count = dofs;
    let mut kept = Vec::with_capacity(decisions.len());
    for d in decisions {
        let mut trial = next.clone();
        apply_refinements(&mut trial, std::slice::from_ref(&d))?;
        let n = trial.num_dofs();
        if n >= count {
            next = trial;
            count = n;
            kept.push(d);
        } else {
            skipped.push((d.component, d.element));
        }
    }
    skipped.sort_unstable();
    Ok((next, kept, skipped))
}

/// Give every component on a mesh the largest order any of them holds
fn sync_orders(disc: &mut Discretization) {
    for m in 0..disc.num_meshes() {
        let components = disc.components_on_mesh(m);
        if components.len() < 2 {
            continue;
        }
        for id in disc.meshes[m].active_elements() {
            let order = components
                .iter()
                .map(|&c| disc.spaces[c].order(id))
                .max()
                .unwrap_or(0);
            for &c in &components {
                disc.spaces[c].set_order(id, order);
            }
        }
    }
}

/// Regularize every mesh; elements split here pass their order to the children
fn regularize(disc: &mut Discretization, bound: usize) -> Result<()> {
    let Discretization {
        meshes,
        mesh_of,
        spaces,
    } = disc;

    for (m, mesh) in meshes.iter_mut().enumerate() {
        let split = mesh.regularize(bound)?;
        if split.is_empty() {
            continue;
        }
        log::debug!("mesh {m}: {} elements split for regularity", split.len());
        for parent in split {
            for c in (0..spaces.len()).filter(|&c| mesh_of[c] == m) {
                spaces[c].inherit_children(mesh, parent);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::unit_square_quads;
    use crate::solution::{ExactSolution, FunctionValue, ProjectedSolution};
    use crate::space::SpaceKind;

    fn peak() -> ExactSolution {
        ExactSolution::new(|x, y| {
            let r2 = (x - 0.3).powi(2) + (y - 0.3).powi(2);
            let v = (-40.0 * r2).exp();
            FunctionValue::new(v, -80.0 * (x - 0.3) * v, -80.0 * (y - 0.3) * v)
        })
    }

    fn step(
        driver: &mut AdaptationDriver,
        disc: &mut Discretization,
        f: &ExactSolution,
    ) -> Result<StepReport> {
        let fine_disc = disc.reference(1)?;
        let coarse = ProjectedSolution::for_component(disc, 0, driver.cache(), f)?;
        let fine = ProjectedSolution::for_component(&fine_disc, 0, driver.cache(), f)?;
        let forms = FormRegistry::with_defaults(disc);
        driver.adapt_step(disc, &[SolutionPair::new(&coarse, &fine)], &forms)
    }

    #[test]
    fn test_state_machine() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            max_order: 4,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(driver.state(), AdaptState::Idle);

        let mut disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 1);
        let report = step(&mut driver, &mut disc, &peak()).unwrap();
        assert!(!report.converged());
        assert!(!report.applied.is_empty());
        assert_eq!(driver.state(), AdaptState::Applied);
        assert_eq!(driver.history().len(), 1);
        assert!(driver.last_estimate().is_some());
    }

    #[test]
    fn test_dof_cap_stops_before_refining() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            max_order: 4,
            dof_cap: 9,
            ..Default::default()
        })
        .unwrap();
        // 2x2 bilinear quads: 9 vertex DOFs
        let mut disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 1);
        let before = disc.num_dofs();
        let report = step(&mut driver, &mut disc, &peak()).unwrap();
        assert_eq!(report.converged_reason, ConvergedReason::DofCapReached);
        assert!(report.applied.is_empty());
        assert_eq!(disc.num_dofs(), before);
        assert_eq!(driver.state(), AdaptState::Converged);
    }

    #[test]
    fn test_error_below_threshold() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            max_order: 4,
            ..Default::default()
        })
        .unwrap();
        // A bilinear function is reproduced exactly
        let f = ExactSolution::new(|x, y| FunctionValue::new(1.0 + x + 2.0 * y + x * y, 1.0 + y, 2.0 + x));
        let mut disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 1);
        let report = step(&mut driver, &mut disc, &f).unwrap();
        assert_eq!(report.converged_reason, ConvergedReason::ErrorBelowThreshold);
        assert!(report.applied.is_empty());
    }

    #[test]
    fn test_run_ends_when_nothing_is_refinable() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            adapt_type: AdaptType::P,
            max_order: 6,
            error_stop_percent: 0.0,
            ..Default::default()
        })
        .unwrap();
        let mut disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 6);
        let before = disc.num_dofs();

        let report = step(&mut driver, &mut disc, &peak()).unwrap();
        assert_eq!(report.converged_reason, ConvergedReason::NothingRefinable);
        assert!(report.converged());
        assert!(report.applied.is_empty());
        assert!(!report.skipped.is_empty());
        assert_eq!(report.dof_count, before);
        assert_eq!(disc.num_dofs(), before);
        assert_eq!(driver.state(), AdaptState::Converged);
    }

    #[test]
    fn test_skipped_elements_make_room_for_the_next_ranked() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            adapt_type: AdaptType::P,
            max_order: 4,
            fraction_cutoff: 0.25,
            error_stop_percent: 0.0,
            ..Default::default()
        })
        .unwrap();
        let mut disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 4);
        disc.space_mut(0).set_order(3, 2);
        let wave = ExactSolution::new(|x, y| {
            FunctionValue::new(
                (3.0 * x).sin() * (2.0 * y).cos(),
                3.0 * (3.0 * x).cos() * (2.0 * y).cos(),
                -2.0 * (3.0 * x).sin() * (2.0 * y).sin(),
            )
        });

        let report = step(&mut driver, &mut disc, &wave).unwrap();
        assert_eq!(report.converged_reason, ConvergedReason::NotYet);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].element, 3);
        assert!(report.skipped.iter().all(|&(_, e)| e != 3));
        assert!(disc.space(0).order(3) > 2);
    }

    #[test]
    fn test_hp_step_never_lowers_dofs() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig {
            error_stop_percent: 0.0,
            ..Default::default()
        })
        .unwrap();
        let mut disc = Discretization::single_mesh(unit_square_quads(3), 1, SpaceKind::H1, 2);
        for _ in 0..3 {
            let before = disc.num_dofs();
            let report = step(&mut driver, &mut disc, &peak()).unwrap();
            assert!(report.dof_count >= before, "{} -> {}", before, report.dof_count);
            assert_eq!(report.converged_reason, ConvergedReason::NotYet);
        }
    }

    #[test]
    fn test_first_split_wins_on_shared_mesh() {
        let mut disc = Discretization::single_mesh(unit_square_quads(1), 2, SpaceKind::H1, 2);
        let decisions = vec![
            AppliedRefinement {
                component: 0,
                element: 0,
                candidate: RefinementCandidate::split(SplitKind::AnisoHorizontal, vec![1, 2]),
            },
            AppliedRefinement {
                component: 1,
                element: 0,
                candidate: RefinementCandidate::split(SplitKind::Isotropic, vec![1, 1, 2, 2]),
            },
        ];
        apply_refinements(&mut disc, &decisions).unwrap();

        let mesh = disc.mesh(0);
        assert_eq!(mesh.num_active_elements(), 2);
        let children = mesh.elements[0].children.clone();
        assert_eq!(disc.space(0).order(children[0]), 1);
        assert_eq!(disc.space(0).order(children[1]), 2);
        assert_eq!(disc.space(1).order(children[0]), 2);
        assert_eq!(disc.space(1).order(children[1]), 2);
    }

    #[test]
    fn test_same_orders() {
        let mut disc = Discretization::single_mesh(unit_square_quads(1), 2, SpaceKind::H1, 2);
        disc.space_mut(1).set_order(0, 4);
        sync_orders(&mut disc);
        assert_eq!(disc.space(0).order(0), 4);
        assert_eq!(disc.space(1).order(0), 4);
    }

    #[test]
    fn test_unrefine_restores_parents() {
        let mut driver = AdaptationDriver::new(AdaptivityConfig::default()).unwrap();
        let mut disc = Discretization::single_mesh(unit_square_quads(1), 1, SpaceKind::H1, 2);
        let children = disc.meshes[0].split_element(0, SplitKind::Isotropic).unwrap();
        for (k, &c) in children.iter().enumerate() {
            disc.space_mut(0).set_order(c, 1 + k);
        }

        let estimate = ErrorEstimate::default();
        assert_eq!(driver.unrefine(&mut disc, &estimate, 1e-6).unwrap(), 1);
        assert_eq!(disc.mesh(0).active_elements(), vec![0]);
        assert_eq!(disc.space(0).order(0), 4);
        assert!(driver.unrefine(&mut disc, &estimate, -1.0).is_err());
    }

    #[test]
    fn test_cache_too_small() {
        let cache = Arc::new(OrthonormalBasisCache::new(3));
        let err = AdaptationDriver::with_cache(AdaptivityConfig::default(), cache).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_history_json() {
        let mut history = ConvergenceHistory::new();
        history.push(9, 12.5);
        history.push(25, 3.0);
        let json = history.to_json().unwrap();
        let back: ConvergenceHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, history);
        assert_eq!(back.last().unwrap().step, 1);
    }
}
