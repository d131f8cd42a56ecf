//! Refinement candidates of a single element

use super::config::AdaptType;
use crate::mesh::{ElementType, SplitKind};
use serde::{Deserialize, Serialize};

/// A local refinement: a split and the orders of the resulting children
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefinementCandidate {
    pub split: SplitKind,
    /// One order per child (a single order for `SplitKind::None`)
    pub orders: Vec<usize>,
}

impl RefinementCandidate {
    /// Order change without a split
    pub fn p(order: usize) -> Self {
        Self {
            split: SplitKind::None,
            orders: vec![order],
        }
    }

    pub fn split(split: SplitKind, orders: Vec<usize>) -> Self {
        Self { split, orders }
    }

    pub fn is_split(&self) -> bool {
        self.split.is_split()
    }

    pub fn max_order(&self) -> usize {
        self.orders.iter().copied().max().unwrap_or(0)
    }

    /// Tie-break rank: none < isotropic < horizontal < vertical
    pub fn priority(&self) -> u8 {
        match self.split {
            SplitKind::None => 0,
            SplitKind::Isotropic => 1,
            SplitKind::AnisoHorizontal => 2,
            SplitKind::AnisoVertical => 3,
        }
    }
}

/// Every assignment of {q, q + 1} to `n` children, lowest orders first
fn order_combinations(q: usize, n: usize) -> Vec<Vec<usize>> {
    (0..1usize << n)
        .map(|mask| (0..n).map(|k| q + ((mask >> k) & 1)).collect())
        .collect()
}

/// Candidates for an element of order `p`, before any pruning.
///
/// Split children start from `q = max(1, (p + 1) / 2)` so that the patch has
/// roughly the DOFs of the element it replaces.
pub fn generate_candidates(
    shape: ElementType,
    p: usize,
    adapt_type: AdaptType,
    iso_only: bool,
) -> Vec<RefinementCandidate> {
    let mut candidates = Vec::new();

    if adapt_type != AdaptType::H {
        candidates.push(RefinementCandidate::p(p + 1));
        candidates.push(RefinementCandidate::p(p + 2));
    }
    if adapt_type == AdaptType::P {
        return candidates;
    }

    let q = ((p + 1) / 2).max(1);
    for &split in SplitKind::available(shape, iso_only) {
        let n = split.num_children();
        match adapt_type {
            AdaptType::H => candidates.push(RefinementCandidate::split(split, vec![p; n])),
            _ => candidates.extend(
                order_combinations(q, n)
                    .into_iter()
                    .map(|orders| RefinementCandidate::split(split, orders)),
            ),
        }
    }

    candidates
}
