//! Bilinear forms used to measure errors
//!
//! A form sees one element at a time: quadrature points in physical
//! coordinates, weights that already include |det J|, and the two functions
//! sampled at those points. The registry maps component pairs (i, j) to forms.

use crate::error::{AdaptError, Result};
use crate::mesh::Point;
use crate::solution::FunctionValue;
use crate::space::{Discretization, SpaceKind};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Element integral of a bilinear functional
pub trait BilinearForm: Send + Sync {
    fn integrate(
        &self,
        points: &[Point],
        weights: &[f64],
        u: &[FunctionValue],
        v: &[FunctionValue],
    ) -> f64;
}

/// Full H1 inner product: u v + grad u . grad v
#[derive(Debug, Clone, Copy, Default)]
pub struct H1Form;

impl BilinearForm for H1Form {
    fn integrate(&self, _points: &[Point], weights: &[f64], u: &[FunctionValue], v: &[FunctionValue]) -> f64 {
        weights
            .iter()
            .zip(u.iter().zip(v))
            .map(|(w, (a, b))| w * (a.value * b.value + a.dx * b.dx + a.dy * b.dy))
            .sum()
    }
}

/// L2 inner product
#[derive(Debug, Clone, Copy, Default)]
pub struct L2Form;

impl BilinearForm for L2Form {
    fn integrate(&self, _points: &[Point], weights: &[f64], u: &[FunctionValue], v: &[FunctionValue]) -> f64 {
        weights
            .iter()
            .zip(u.iter().zip(v))
            .map(|(w, (a, b))| w * a.value * b.value)
            .sum()
    }
}

/// Energy form `a grad u . grad v + c u v` of a diffusion-reaction operator
#[derive(Debug, Clone, Copy)]
pub struct GradForm {
    pub diffusion: f64,
    pub reaction: f64,
}

impl GradForm {
    pub fn new(diffusion: f64, reaction: f64) -> Self {
        Self {
            diffusion,
            reaction,
        }
    }
}

impl Default for GradForm {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl BilinearForm for GradForm {
    fn integrate(&self, _points: &[Point], weights: &[f64], u: &[FunctionValue], v: &[FunctionValue]) -> f64 {
        weights
            .iter()
            .zip(u.iter().zip(v))
            .map(|(w, (a, b))| {
                w * (self.diffusion * (a.dx * b.dx + a.dy * b.dy) + self.reaction * a.value * b.value)
            })
            .sum()
    }
}

type FormFn = dyn Fn(&[Point], &[f64], &[FunctionValue], &[FunctionValue]) -> f64 + Send + Sync;

/// Closure-backed form
pub struct FnForm {
    f: Box<FormFn>,
}

impl FnForm {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Point], &[f64], &[FunctionValue], &[FunctionValue]) -> f64 + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl BilinearForm for FnForm {
    fn integrate(&self, points: &[Point], weights: &[f64], u: &[FunctionValue], v: &[FunctionValue]) -> f64 {
        (self.f)(points, weights, u, v)
    }
}

/// A registered form and whether it also stands for its transpose
#[derive(Clone)]
pub struct FormEntry {
    pub form: Arc<dyn BilinearForm>,
    pub symmetric: bool,
}

impl std::fmt::Debug for FormEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormEntry")
            .field("symmetric", &self.symmetric)
            .finish_non_exhaustive()
    }
}

/// One contribution to the error of a component's elements
#[derive(Clone)]
pub(crate) struct FormTerm {
    pub form: Arc<dyn BilinearForm>,
    /// Component paired with the one whose elements are integrated
    pub other: usize,
}

/// Sparse map (i, j) -> bilinear form
#[derive(Clone, Default, Debug)]
pub struct FormRegistry {
    entries: BTreeMap<(usize, usize), FormEntry>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the form for pair (i, j)
    pub fn set(&mut self, i: usize, j: usize, form: Arc<dyn BilinearForm>) -> &mut Self {
        self.entries.insert(
            (i, j),
            FormEntry {
                form,
                symmetric: false,
            },
        );
        self
    }

    /// Register a symmetric off-diagonal form once for both (i, j) and (j, i)
    pub fn set_symmetric(&mut self, i: usize, j: usize, form: Arc<dyn BilinearForm>) -> &mut Self {
        self.entries.insert(
            (i, j),
            FormEntry {
                form,
                symmetric: true,
            },
        );
        self
    }

    /// H1 spaces get `H1Form` on the diagonal, L2 spaces `L2Form`
    pub fn with_defaults(disc: &Discretization) -> Self {
        let mut registry = Self::new();
        for c in 0..disc.num_components() {
            let form: Arc<dyn BilinearForm> = match disc.space(c).kind() {
                SpaceKind::H1 => Arc::new(H1Form),
                SpaceKind::L2 => Arc::new(L2Form),
            };
            registry.set(c, c, form);
        }
        registry
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&FormEntry> {
        self.entries.get(&(i, j))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, usize), &FormEntry)> {
        self.entries.iter()
    }

    /// Every diagonal must be present and every index must name a component
    pub fn validate(&self, components: usize) -> Result<()> {
        if let Some(&(i, j)) = self.entries.keys().find(|&&(i, j)| i >= components || j >= components) {
            return Err(AdaptError::InvalidConfig(format!(
                "error form ({i}, {j}) refers to a component beyond {components}"
            )));
        }
        for i in 0..components {
            if !self.entries.contains_key(&(i, i)) {
                return Err(AdaptError::MissingErrorForm { i, j: i });
            }
        }
        Ok(())
    }

    /// Terms integrated over the elements of `component`.
    ///
    /// A symmetric (j, i) entry contributes its mirror here unless an explicit
    /// (i, j) entry exists.
    pub(crate) fn terms_for(&self, component: usize) -> Vec<FormTerm> {
        let mut terms = Vec::new();
        for (&(i, j), entry) in &self.entries {
            if i == component {
                terms.push(FormTerm {
                    form: Arc::clone(&entry.form),
                    other: j,
                });
            } else if j == component && entry.symmetric && !self.entries.contains_key(&(j, i)) {
                terms.push(FormTerm {
                    form: Arc::clone(&entry.form),
                    other: i,
                });
            }
        }
        terms
    }
}
