//! Adaptivity configuration

use super::estimator::ErrorNormalization;
use super::ranking::RefinementStrategy;
use crate::error::{AdaptError, Result};
use serde::{Deserialize, Serialize};

/// Which refinements the selector may propose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdaptType {
    /// Order increases, geometric splits and their combinations
    #[default]
    Hp = 0,
    /// Geometric splits keeping the element's order
    H = 1,
    /// Order increases only
    P = 2,
}

impl TryFrom<u8> for AdaptType {
    type Error = AdaptError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AdaptType::Hp),
            1 => Ok(AdaptType::H),
            2 => Ok(AdaptType::P),
            other => Err(AdaptError::InvalidConfig(format!("unknown adapt type {other}"))),
        }
    }
}

/// Parameters of an adaptivity run; fixed for the whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptivityConfig {
    /// Ranking threshold, interpreted by `strategy`
    pub threshold: f64,
    pub strategy: RefinementStrategy,
    pub adapt_type: AdaptType,
    /// Never propose anisotropic splits
    pub iso_only: bool,
    /// Largest hanging-node level allowed; `None` leaves it unbounded
    pub mesh_regularity: Option<usize>,
    /// Largest polynomial order a refinement may assign
    pub max_order: usize,
    /// Give all components sharing a mesh identical orders
    pub same_orders: bool,
    /// Cap on the refined share of elements per step; 0 disables it
    pub fraction_cutoff: f64,
    /// Stop once the relative error (in percent) falls below this
    pub error_stop_percent: f64,
    /// Stop once the total DOF count reaches this
    pub dof_cap: usize,
    /// Order increase between a coarse space and its reference space
    pub order_increase: usize,
    pub normalization: ErrorNormalization,
}

impl Default for AdaptivityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            strategy: RefinementStrategy::Cumulative,
            adapt_type: AdaptType::Hp,
            iso_only: false,
            mesh_regularity: None,
            max_order: 10,
            same_orders: false,
            fraction_cutoff: 0.0,
            error_stop_percent: 1.0,
            dof_cap: 100_000,
            order_increase: 1,
            normalization: ErrorNormalization::Relative,
        }
    }
}

impl AdaptivityConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AdaptError::InvalidConfig(format!("cannot parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AdaptError::InvalidConfig(format!("cannot serialise configuration: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold >= 0.0) {
            return Err(AdaptError::InvalidConfig(format!(
                "threshold must be finite and non-negative, got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.fraction_cutoff) {
            return Err(AdaptError::InvalidConfig(format!(
                "fraction_cutoff must lie in [0, 1], got {}",
                self.fraction_cutoff
            )));
        }
        if self.mesh_regularity == Some(0) {
            return Err(AdaptError::InvalidConfig(
                "mesh_regularity must be at least 1 (or absent for no bound)".to_string(),
            ));
        }
        if self.max_order == 0 {
            return Err(AdaptError::InvalidConfig("max_order must be at least 1".to_string()));
        }
        if !(self.error_stop_percent.is_finite() && self.error_stop_percent >= 0.0) {
            return Err(AdaptError::InvalidConfig(format!(
                "error_stop_percent must be finite and non-negative, got {}",
                self.error_stop_percent
            )));
        }
        Ok(())
    }
}
