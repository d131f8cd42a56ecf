//! Element-wise error estimation from coarse/reference solution pairs
//!
//! For every component `i` and every form term (i, j), the error of an
//! element of component `i`'s mesh is `B_ij(e_i, e_j)` with
//! `e = coarse - fine`, integrated with a composite rule over the element's
//! reference split so the piecewise fine solution is integrated exactly.
//! The norm is the same sum taken over the fine solutions alone.

use super::forms::{FormRegistry, FormTerm};
use crate::error::{AdaptError, Result};
use crate::mesh::{ElementType, Point};
use crate::quadrature::{QuadratureRule, degree_for_h1_product};
use crate::solution::{FunctionValue, MeshFunction};
use crate::space::Discretization;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Coarse solution of a component and its reference counterpart
#[derive(Clone, Copy)]
pub struct SolutionPair<'a> {
    pub coarse: &'a dyn MeshFunction,
    pub fine: &'a dyn MeshFunction,
}

impl<'a> SolutionPair<'a> {
    pub fn new(coarse: &'a dyn MeshFunction, fine: &'a dyn MeshFunction) -> Self {
        Self { coarse, fine }
    }
}

/// How per-element errors are scaled in [`ElementErrorRecord::relative`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorNormalization {
    /// Divide by the total norm of the reference solution
    #[default]
    Relative,
    /// Keep the raw energy
    Absolute,
}

/// Error attributed to one element of one component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementErrorRecord {
    pub component: usize,
    pub element: usize,
    /// |sum of the element's error integrals|
    pub error: f64,
    /// `error` scaled per [`ErrorNormalization`]
    pub relative: f64,
}

/// Result of one error evaluation
#[derive(Debug, Clone, Default)]
pub struct ErrorEstimate {
    /// One record per active element, ordered by (component, element)
    pub records: Vec<ElementErrorRecord>,
    /// Sum of the element errors
    pub total_error: f64,
    /// Energy of the reference solutions
    pub total_norm: f64,
    /// Scaling applied to the records and to the stop number
    pub normalization: ErrorNormalization,
}

impl ErrorEstimate {
    /// The stop number: sqrt(total_error / total_norm) under relative
    /// normalization, sqrt(total_error) under absolute normalization or for
    /// a zero norm
    pub fn relative_error(&self) -> f64 {
        match self.normalization {
            ErrorNormalization::Relative if self.total_norm > 0.0 => {
                (self.total_error / self.total_norm).sqrt()
            }
            _ => self.total_error.sqrt(),
        }
    }

    pub fn relative_error_percent(&self) -> f64 {
        100.0 * self.relative_error()
    }

    /// Error of an element, if it was evaluated
    pub fn element_error(&self, component: usize, element: usize) -> Option<f64> {
        self.records
            .binary_search_by(|r| (r.component, r.element).cmp(&(component, element)))
            .ok()
            .map(|i| self.records[i].error)
    }

    /// (component, element) pairs by descending error, ties by component then id
    pub fn sorted_elements(&self) -> Vec<(usize, usize)> {
        let mut sorted: Vec<&ElementErrorRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| {
            b.relative
                .total_cmp(&a.relative)
                .then(a.component.cmp(&b.component))
                .then(a.element.cmp(&b.element))
        });
        sorted.iter().map(|r| (r.component, r.element)).collect()
    }

    /// Number of active elements over all components
    pub fn total_active_elements(&self) -> usize {
        self.records.len()
    }

    /// Sum of the element errors of one component
    pub fn component_error(&self, component: usize) -> f64 {
        self.records
            .iter()
            .filter(|r| r.component == component)
            .map(|r| r.error)
            .sum()
    }

    pub fn max_relative(&self) -> f64 {
        self.records.iter().map(|r| r.relative).fold(0.0, f64::max)
    }
}

/// Integrates error forms over the active elements of a discretization
#[derive(Debug, Clone, Copy)]
pub struct ErrorEvaluator {
    /// Order increase between the coarse and the reference space
    pub order_increase: usize,
    pub normalization: ErrorNormalization,
}

impl Default for ErrorEvaluator {
    fn default() -> Self {
        Self {
            order_increase: 1,
            normalization: ErrorNormalization::Relative,
        }
    }
}

/// Element quadrature in physical coordinates
struct ElementQuadrature {
    points: Vec<Point>,
    weights: Vec<f64>,
}

struct ElementIntegral {
    error: f64,
    norm: f64,
}

fn sample(
    f: &dyn MeshFunction,
    points: &[Point],
    component: usize,
    element: usize,
) -> Result<Vec<FunctionValue>> {
    let values = f.evaluate(points).map_err(|e| match e {
        AdaptError::EvaluationFailure { reason, .. } => AdaptError::EvaluationFailure {
            component,
            element,
            reason,
        },
        other => other,
    })?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AdaptError::EvaluationFailure {
            component,
            element,
            reason: "solution is not finite at a quadrature point".to_string(),
        });
    }
    Ok(values)
}

impl ErrorEvaluator {
    pub fn new(order_increase: usize, normalization: ErrorNormalization) -> Self {
        Self {
            order_increase,
            normalization,
        }
    }

    /// Error of a single component measured with the (0, 0) form
    pub fn calc_error(
        &self,
        disc: &Discretization,
        coarse: &dyn MeshFunction,
        fine: &dyn MeshFunction,
        forms: &FormRegistry,
    ) -> Result<ErrorEstimate> {
        self.evaluate(disc, &[SolutionPair::new(coarse, fine)], forms)
    }

    /// Error of two coupled components
    pub fn calc_error_2(
        &self,
        disc: &Discretization,
        coarse: [&dyn MeshFunction; 2],
        fine: [&dyn MeshFunction; 2],
        forms: &FormRegistry,
    ) -> Result<ErrorEstimate> {
        self.evaluate(
            disc,
            &[
                SolutionPair::new(coarse[0], fine[0]),
                SolutionPair::new(coarse[1], fine[1]),
            ],
            forms,
        )
    }

    /// Check the solution pairs against the discretization
    pub fn validate(&self, disc: &Discretization, pairs: &[SolutionPair<'_>], forms: &FormRegistry) -> Result<()> {
        let n = disc.num_components();
        if pairs.len() != n {
            return Err(AdaptError::ComponentCountMismatch {
                expected: n,
                got: pairs.len(),
            });
        }
        forms.validate(n)?;

        for (c, pair) in pairs.iter().enumerate() {
            let signature = disc.signature(c);
            if let Some(s) = pair.coarse.space_signature() {
                if s != signature {
                    return Err(AdaptError::IncompatibleSolutionPair {
                        component: c,
                        reason: "coarse solution was computed on a different space".to_string(),
                    });
                }
            }
            if pair.fine.space_signature() == Some(signature) {
                return Err(AdaptError::IncompatibleSolutionPair {
                    component: c,
                    reason: "fine solution lives on the coarse space".to_string(),
                });
            }
            if let Some(r) = pair.fine.reference_of() {
                if r != signature {
                    return Err(AdaptError::IncompatibleSolutionPair {
                        component: c,
                        reason: "fine solution is the reference of another space".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluate element errors of every component
    pub fn evaluate(
        &self,
        disc: &Discretization,
        pairs: &[SolutionPair<'_>],
        forms: &FormRegistry,
    ) -> Result<ErrorEstimate> {
        self.validate(disc, pairs, forms)?;

        let mut records = Vec::new();
        let mut total_error = 0.0;
        let mut total_norm = 0.0;

        for component in 0..disc.num_components() {
            let terms = forms.terms_for(component);
            let integrals = self.integrate_component(disc, pairs, component, &terms)?;
            for (element, integral) in integrals {
                total_error += integral.error;
                total_norm += integral.norm;
                records.push(ElementErrorRecord {
                    component,
                    element,
                    error: integral.error,
                    relative: integral.error,
                });
            }
        }

        let total_norm = total_norm.abs();
        if self.normalization == ErrorNormalization::Relative && total_norm > 0.0 {
            for r in &mut records {
                r.relative = r.error / total_norm;
            }
        }

        log::debug!(
            "error estimate: {} elements, total error {:.3e}, norm {:.3e}",
            records.len(),
            total_error,
            total_norm
        );

        Ok(ErrorEstimate {
            records,
            total_error,
            total_norm,
            normalization: self.normalization,
        })
    }

    fn integrate_component(
        &self,
        disc: &Discretization,
        pairs: &[SolutionPair<'_>],
        component: usize,
        terms: &[FormTerm],
    ) -> Result<Vec<(usize, ElementIntegral)>> {
        let mesh = disc.mesh(component);
        let space = disc.space(component);
        let active = mesh.active_elements();

        let mut rules: HashMap<(ElementType, usize), QuadratureRule> = HashMap::new();
        for &id in &active {
            let shape = mesh.elements[id].element_type;
            let degree = degree_for_h1_product(space.order(id) + self.order_increase);
            if let std::collections::hash_map::Entry::Vacant(slot) = rules.entry((shape, degree)) {
                slot.insert(QuadratureRule::composite(shape, degree)?);
            }
        }

        let integrate = |&id: &usize| -> Result<(usize, ElementIntegral)> {
            let shape = mesh.elements[id].element_type;
            let degree = degree_for_h1_product(space.order(id) + self.order_increase);
            let rule = &rules[&(shape, degree)];
            let quad = element_quadrature(disc, component, id, rule)?;

            let mut values: HashMap<usize, (Vec<FunctionValue>, Vec<FunctionValue>)> = HashMap::new();
            for c in std::iter::once(component).chain(terms.iter().map(|t| t.other)) {
                if let std::collections::hash_map::Entry::Vacant(slot) = values.entry(c) {
                    let coarse = sample(pairs[c].coarse, &quad.points, component, id)?;
                    let fine = sample(pairs[c].fine, &quad.points, component, id)?;
                    let err: Vec<FunctionValue> =
                        coarse.iter().zip(&fine).map(|(&a, &b)| a - b).collect();
                    slot.insert((err, fine));
                }
            }

            let (err_i, fine_i) = &values[&component];
            let mut error = 0.0;
            let mut norm = 0.0;
            for term in terms {
                let (err_j, fine_j) = &values[&term.other];
                error += term.form.integrate(&quad.points, &quad.weights, err_i, err_j);
                norm += term.form.integrate(&quad.points, &quad.weights, fine_i, fine_j);
            }

            if !(error.is_finite() && norm.is_finite()) {
                return Err(AdaptError::EvaluationFailure {
                    component,
                    element: id,
                    reason: "error integral is not finite".to_string(),
                });
            }
            Ok((
                id,
                ElementIntegral {
                    error: error.abs(),
                    norm,
                },
            ))
        };

        #[cfg(feature = "parallel")]
        let results: Vec<Result<(usize, ElementIntegral)>> = active.par_iter().map(integrate).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Result<(usize, ElementIntegral)>> = active.iter().map(integrate).collect();

        results.into_iter().collect()
    }
}

/// Map a reference rule onto an element, with |det J| folded into the weights
fn element_quadrature(
    disc: &Discretization,
    component: usize,
    element: usize,
    rule: &QuadratureRule,
) -> Result<ElementQuadrature> {
    let map = disc
        .mesh(component)
        .refmap(element)
        .map_err(|e| e.for_component(component))?;

    let mut points = Vec::with_capacity(rule.num_points());
    let mut weights = Vec::with_capacity(rule.num_points());
    for qp in rule.iter() {
        let det = map.jacobian(qp.xi(), qp.eta()).det;
        if !(det.is_finite() && det > 0.0) {
            return Err(AdaptError::EvaluationFailure {
                component,
                element,
                reason: format!("degenerate reference map (det J = {det})"),
            });
        }
        points.push(map.map(qp.xi(), qp.eta()));
        weights.push(qp.weight * det);
    }

    Ok(ElementQuadrature { points, weights })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::forms::{H1Form, L2Form};
    use crate::basis::OrthonormalBasisCache;
    use crate::mesh::unit_square_quads;
    use crate::solution::{ExactSolution, ProjectedSolution};
    use crate::space::SpaceKind;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn constant(c: f64) -> ExactSolution {
        ExactSolution::new(move |_, _| FunctionValue::new(c, 0.0, 0.0))
    }

    fn linear() -> ExactSolution {
        ExactSolution::new(|x, _| FunctionValue::new(x, 1.0, 0.0))
    }

    #[test]
    fn test_constant_difference() {
        // e = 1 everywhere: H1 error equals the area, norm of the zero fine solution is 0
        let disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 1);
        let forms = FormRegistry::with_defaults(&disc);
        let est = ErrorEvaluator::default()
            .calc_error(&disc, &constant(1.0), &constant(0.0), &forms)
            .unwrap();

        assert_eq!(est.total_active_elements(), 4);
        assert_relative_eq!(est.total_error, 1.0, epsilon = 1e-12);
        for r in &est.records {
            assert_relative_eq!(r.error, 0.25, epsilon = 1e-12);
        }
        assert_eq!(est.total_norm, 0.0);
    }

    #[test]
    fn test_norm_and_relative_error() {
        let disc = Discretization::single_mesh(unit_square_quads(1), 1, SpaceKind::H1, 1);
        let forms = FormRegistry::with_defaults(&disc);
        // fine = x: ||x||^2_H1 = 1/3 + 1; coarse = 0
        let est = ErrorEvaluator::default()
            .calc_error(&disc, &constant(0.0), &linear(), &forms)
            .unwrap();

        assert_relative_eq!(est.total_norm, 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(est.relative_error(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(est.relative_error_percent(), 100.0, epsilon = 1e-9);
        assert_relative_eq!(est.records[0].relative, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_absolute_normalization_drives_stop_number() {
        let disc = Discretization::single_mesh(unit_square_quads(1), 1, SpaceKind::H1, 1);
        let forms = FormRegistry::with_defaults(&disc);
        // coarse = 0, fine = x: error = norm = 4/3
        let est = ErrorEvaluator::new(1, ErrorNormalization::Absolute)
            .calc_error(&disc, &constant(0.0), &linear(), &forms)
            .unwrap();

        assert_eq!(est.normalization, ErrorNormalization::Absolute);
        assert_relative_eq!(est.total_norm, 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(est.records[0].relative, 4.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(est.relative_error(), (4.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_missing_diagonal_form() {
        let disc = Discretization::single_mesh(unit_square_quads(1), 2, SpaceKind::H1, 1);
        let mut forms = FormRegistry::new();
        forms.set(0, 0, Arc::new(H1Form));
        let (a, b) = (constant(1.0), constant(0.0));
        let err = ErrorEvaluator::default()
            .calc_error_2(&disc, [&a, &a], [&b, &b], &forms)
            .unwrap_err();
        assert!(matches!(err, AdaptError::MissingErrorForm { i: 1, j: 1 }));
    }

    #[test]
    fn test_component_count_mismatch() {
        let disc = Discretization::single_mesh(unit_square_quads(1), 2, SpaceKind::H1, 1);
        let forms = FormRegistry::with_defaults(&disc);
        let err = ErrorEvaluator::default()
            .calc_error(&disc, &constant(1.0), &constant(0.0), &forms)
            .unwrap_err();
        assert!(matches!(
            err,
            AdaptError::ComponentCountMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_reference_pair_validation() {
        let disc = Discretization::single_mesh(unit_square_quads(2), 1, SpaceKind::H1, 1);
        let forms = FormRegistry::with_defaults(&disc);
        let cache = OrthonormalBasisCache::new(4);
        let f = ExactSolution::new(|x, y| FunctionValue::new(x * x * y, 2.0 * x * y, x * x));

        let coarse = ProjectedSolution::for_component(&disc, 0, &cache, &f).unwrap();
        let evaluator = ErrorEvaluator::default();

        // Coarse used as its own reference
        let err = evaluator.calc_error(&disc, &coarse, &coarse, &forms).unwrap_err();
        assert!(matches!(err, AdaptError::IncompatibleSolutionPair { component: 0, .. }));

        // Reference of a different coarse space
        let mut other = disc.clone();
        other.space_mut(0).set_order(0, 2);
        let foreign = ProjectedSolution::for_component(&other.reference(1).unwrap(), 0, &cache, &f).unwrap();
        let err = evaluator.calc_error(&disc, &coarse, &foreign, &forms).unwrap_err();
        assert!(matches!(err, AdaptError::IncompatibleSolutionPair { .. }));

        let fine = ProjectedSolution::for_component(&disc.reference(1).unwrap(), 0, &cache, &f).unwrap();
        let est = evaluator.calc_error(&disc, &coarse, &fine, &forms).unwrap();
        assert!(est.total_error > 0.0);
    }

    #[test]
    fn test_additivity_and_idempotence() {
        let disc = Discretization::single_mesh(unit_square_quads(2), 2, SpaceKind::H1, 1);
        let mut forms = FormRegistry::with_defaults(&disc);
        forms.set_symmetric(0, 1, Arc::new(L2Form));
        let cache = OrthonormalBasisCache::new(4);
        let f = ExactSolution::new(|x, y| FunctionValue::new((x * y).sin(), y * (x * y).cos(), x * (x * y).cos()));
        let g = ExactSolution::new(|x, y| FunctionValue::new(x * x - y, 2.0 * x, -1.0));

        let fine_disc = disc.reference(1).unwrap();
        let c0 = ProjectedSolution::for_component(&disc, 0, &cache, &f).unwrap();
        let c1 = ProjectedSolution::for_component(&disc, 1, &cache, &g).unwrap();
        let f0 = ProjectedSolution::for_component(&fine_disc, 0, &cache, &f).unwrap();
        let f1 = ProjectedSolution::for_component(&fine_disc, 1, &cache, &g).unwrap();

        let evaluator = ErrorEvaluator::default();
        let a = evaluator.calc_error_2(&disc, [&c0, &c1], [&f0, &f1], &forms).unwrap();
        let b = evaluator.calc_error_2(&disc, [&c0, &c1], [&f0, &f1], &forms).unwrap();

        let sum: f64 = a.records.iter().map(|r| r.error).sum();
        assert_relative_eq!(sum, a.total_error, epsilon = 1e-14);
        assert!(a.records.iter().all(|r| r.error >= 0.0));
        assert_eq!(a.total_active_elements(), 8);
        for (x, y) in a.records.iter().zip(&b.records) {
            assert_eq!(x.error.to_bits(), y.error.to_bits());
        }
        assert_eq!(
            a.element_error(1, 2),
            Some(a.records[6].error)
        );
        assert_eq!(a.sorted_elements().len(), 8);
    }
}
