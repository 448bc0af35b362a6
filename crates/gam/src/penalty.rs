//! Soft mean-zero identifiability penalty.
//!
//! The intercept and the mean level of the shared smooth `f(k)` are only jointly
//! identified. Adding `-lambda * (sum_i intercept + A_i * beta + f(k_i))^2` to the log
//! density nudges the combined effect towards a zero sum over the observations.
//! This is a regularization heuristic: it only approximately enforces the constraint,
//! the sum being exactly zero only in the limit of an infinite `lambda`.

use linfa::Float;
use ndarray::{ArrayBase, Data, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Quadratic penalty on the sum of the combined intercept, linear and shared smooth effect
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MeanZeroPenalty<F: Float> {
    lambda: F,
}

impl<F: Float> MeanZeroPenalty<F> {
    /// Penalty of strength `lambda` (expected non negative)
    pub fn new(lambda: F) -> Self {
        MeanZeroPenalty { lambda }
    }

    /// Strength of the penalty
    pub fn lambda(&self) -> F {
        self.lambda
    }

    /// Log density contribution `-lambda * total^2`
    pub fn log_penalty(&self, total: F) -> F {
        -self.lambda * total * total
    }

    /// Log density contribution given the per observation combined effect
    /// `intercept + A_i * beta + f(k_i)`
    pub fn value(&self, effect: &ArrayBase<impl Data<Elem = F>, Ix1>) -> F {
        self.log_penalty(effect.sum())
    }

    /// Variance of the equivalent gaussian pseudo observation `0 ~ Normal(total, 1 / (2 lambda))`
    pub(crate) fn pseudo_variance(&self) -> F {
        F::one() / (F::cast(2.) * self.lambda)
    }
}
