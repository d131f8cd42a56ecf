//! Element ranking: which elements get refined
//!
//! Elements are walked by descending error and included until the strategy's
//! stop rule fires. Elements whose error is negligible next to the largest
//! one are never selected.

use super::estimator::{ElementErrorRecord, ErrorEstimate};
use crate::error::{AdaptError, Result};
use serde::{Deserialize, Serialize};

/// Errors below this fraction of the largest error are treated as zero
pub const NEGLIGIBLE_FRACTION: f64 = 1e-12;

/// Relative difference under which two consecutive errors count as tied
pub const TIE_TOLERANCE: f64 = 1e-3;

/// Stop rule of the element ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefinementStrategy {
    /// Include elements until their cumulative error exceeds
    /// `sqrt(threshold)` of the total, keeping ties together
    #[default]
    Cumulative = 0,
    /// Include elements with error >= threshold x largest error
    RelativeToMax = 1,
    /// Include elements with error >= threshold
    Absolute = 2,
}

impl TryFrom<u8> for RefinementStrategy {
    type Error = AdaptError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RefinementStrategy::Cumulative),
            1 => Ok(RefinementStrategy::RelativeToMax),
            2 => Ok(RefinementStrategy::Absolute),
            other => Err(AdaptError::InvalidConfig(format!(
                "unknown refinement strategy {other}"
            ))),
        }
    }
}

/// Records by descending scaled error; ties by component, then element id
fn sorted_records(estimate: &ErrorEstimate) -> Vec<&ElementErrorRecord> {
    let mut sorted: Vec<&ElementErrorRecord> = estimate.records.iter().collect();
    sorted.sort_by(|a, b| {
        b.relative
            .total_cmp(&a.relative)
            .then(a.component.cmp(&b.component))
            .then(a.element.cmp(&b.element))
    });
    sorted
}

/// Select the (component, element) pairs to refine.
///
/// `fraction_cutoff` in (0, 1] caps the selection at
/// `ceil(fraction_cutoff x active elements)`; 0 disables the cap.
pub fn select(
    estimate: &ErrorEstimate,
    strategy: RefinementStrategy,
    threshold: f64,
    fraction_cutoff: f64,
) -> Result<Vec<(usize, usize)>> {
    if !(threshold.is_finite() && threshold >= 0.0) {
        return Err(AdaptError::InvalidConfig(format!(
            "refinement threshold must be finite and non-negative, got {threshold}"
        )));
    }
    if !(0.0..=1.0).contains(&fraction_cutoff) {
        return Err(AdaptError::InvalidConfig(format!(
            "fraction cutoff must lie in [0, 1], got {fraction_cutoff}"
        )));
    }

    let sorted = sorted_records(estimate);
    let Some(max) = sorted.first().map(|r| r.relative) else {
        return Ok(Vec::new());
    };
    if max <= 0.0 {
        return Ok(Vec::new());
    }

    let floor = NEGLIGIBLE_FRACTION * max;
    let total: f64 = sorted.iter().map(|r| r.relative).sum();
    let cap = if fraction_cutoff > 0.0 {
        (fraction_cutoff * sorted.len() as f64).ceil() as usize
    } else {
        sorted.len()
    };

    let mut selected = Vec::new();
    let mut processed = 0.0;
    let mut previous: Option<f64> = None;

    for r in sorted {
        let err = r.relative;
        if selected.len() >= cap || err <= floor {
            break;
        }
        let include = match strategy {
            RefinementStrategy::Cumulative => match previous {
                Some(err0) => {
                    processed <= threshold.sqrt() * total
                        || ((err - err0) / err0).abs() <= TIE_TOLERANCE
                }
                None => true,
            },
            RefinementStrategy::RelativeToMax => err >= threshold * max,
            RefinementStrategy::Absolute => err >= threshold,
        };
        if !include {
            break;
        }
        selected.push((r.component, r.element));
        processed += err;
        previous = Some(err);
    }

    log::debug!(
        "ranking ({:?}, threshold {}): {} of {} elements selected",
        strategy,
        threshold,
        selected.len(),
        estimate.records.len()
    );
    Ok(selected)
}
