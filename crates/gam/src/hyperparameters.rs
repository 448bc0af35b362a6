//! Hyperparameters of the GP smooth terms.
//!
//! Each hyperparameter is either given (config mode) or estimated under a prior
//! (parameter-estimation mode), so the same model definition serves both uses.

use crate::errors::{GamError, Result};
use crate::utils::into_f64;
use linfa::Float;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prior distribution of a strictly positive scalar
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Prior<F: Float> {
    /// Normal(0, scale) truncated to positive values
    HalfNormal {
        /// Scale of the underlying normal
        scale: F,
    },
    /// exp(Normal(mu, sigma))
    LogNormal {
        /// Mean of log value
        mu: F,
        /// Standard deviation of log value
        sigma: F,
    },
    /// Inverse gamma, density proportional to `x^-(shape+1) exp(-scale / x)`
    InvGamma {
        /// Shape parameter
        shape: F,
        /// Scale parameter
        scale: F,
    },
}

impl<F: Float> Prior<F> {
    /// Log probability density at `x`, `-inf` when `x <= 0`
    pub fn ln_pdf(&self, x: F) -> F {
        if x <= F::zero() || !x.is_finite() {
            return F::neg_infinity();
        }
        let ln_sqrt_2pi = F::cast(0.5 * (2. * std::f64::consts::PI).ln());
        match *self {
            Prior::HalfNormal { scale } => {
                let z = x / scale;
                F::cast(2.).ln() - ln_sqrt_2pi - scale.ln() - F::cast(0.5) * z * z
            }
            Prior::LogNormal { mu, sigma } => {
                let z = (x.ln() - mu) / sigma;
                -x.ln() - sigma.ln() - ln_sqrt_2pi - F::cast(0.5) * z * z
            }
            Prior::InvGamma { shape, scale } => {
                shape * scale.ln() - F::cast(libm::lgamma(into_f64(shape)))
                    - (shape + F::one()) * x.ln()
                    - scale / x
            }
        }
    }

    fn check(&self, name: &str) -> Result<()> {
        let (a, b) = match *self {
            Prior::HalfNormal { scale } => (F::one(), scale),
            Prior::LogNormal { mu, sigma } => {
                if !mu.is_finite() {
                    return Err(GamError::InvalidValue(format!(
                        "`{name}` log normal prior mu should be finite"
                    )));
                }
                (F::one(), sigma)
            }
            Prior::InvGamma { shape, scale } => (shape, scale),
        };
        if !(a > F::zero() && b > F::zero() && a.is_finite() && b.is_finite()) {
            return Err(GamError::InvalidValue(format!(
                "`{name}` prior parameters should be strictly positive, got {self}"
            )));
        }
        Ok(())
    }
}

impl<F: Float> fmt::Display for Prior<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Prior::HalfNormal { scale } => write!(f, "HalfNormal({scale})"),
            Prior::LogNormal { mu, sigma } => write!(f, "LogNormal({mu}, {sigma})"),
            Prior::InvGamma { shape, scale } => write!(f, "InvGamma({shape}, {scale})"),
        }
    }
}

/// A strictly positive scalar hyperparameter, either fixed or estimated
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Hyperparameter<F: Float> {
    /// Constant value (ie given not estimated)
    Fixed(F),
    /// Value estimated under the given prior, optimization starting from `init`
    /// and searched between `bounds` (lower, upper)
    Estimated {
        /// Prior distribution
        prior: Prior<F>,
        /// Initial guess
        init: F,
        /// Search bounds (lower, upper)
        bounds: (F, F),
    },
}

impl<F: Float> Hyperparameter<F> {
    /// Default search bounds for estimated hyperparameters
    pub const DEFAULT_BOUNDS: (f64, f64) = (1e-2, 1e2);

    /// Estimated hyperparameter with default bounds and given prior and initial guess
    pub fn estimated(prior: Prior<F>, init: F) -> Self {
        Hyperparameter::Estimated {
            prior,
            init,
            bounds: (
                F::cast(Self::DEFAULT_BOUNDS.0),
                F::cast(Self::DEFAULT_BOUNDS.1),
            ),
        }
    }

    /// Get fixed value or initial guess
    pub fn init(&self) -> F {
        match self {
            Hyperparameter::Fixed(v) => *v,
            Hyperparameter::Estimated { init, .. } => *init,
        }
    }

    /// Get search bounds, `None` when fixed
    pub fn bounds(&self) -> Option<(F, F)> {
        match self {
            Hyperparameter::Fixed(_) => None,
            Hyperparameter::Estimated { bounds, .. } => Some(*bounds),
        }
    }

    /// Get prior, `None` when fixed
    pub fn prior(&self) -> Option<&Prior<F>> {
        match self {
            Hyperparameter::Fixed(_) => None,
            Hyperparameter::Estimated { prior, .. } => Some(prior),
        }
    }

    /// Whether the value is given
    pub fn is_fixed(&self) -> bool {
        matches!(self, Hyperparameter::Fixed(_))
    }

    /// Log prior density at `x`, 0 when fixed
    pub fn ln_prior(&self, x: F) -> F {
        self.prior().map_or(F::zero(), |p| p.ln_pdf(x))
    }

    pub(crate) fn check(&self, name: &str) -> Result<()> {
        match self {
            Hyperparameter::Fixed(v) => {
                if !(*v > F::zero() && v.is_finite()) {
                    return Err(GamError::InvalidValue(format!(
                        "`{name}` should be strictly positive, got {v}"
                    )));
                }
            }
            Hyperparameter::Estimated {
                prior,
                init,
                bounds: (lo, up),
            } => {
                prior.check(name)?;
                if !(*lo > F::zero() && lo < up && up.is_finite()) {
                    return Err(GamError::InvalidValue(format!(
                        "`{name}` bounds should satisfy 0 < lower < upper, got ({lo}, {up})"
                    )));
                }
                if !(init.is_finite() && lo <= init && init <= up) {
                    return Err(GamError::InvalidValue(format!(
                        "`{name}` initial guess {init} is outside bounds ({lo}, {up})"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Names of the four GP hyperparameters of the additive model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HyperparameterKind {
    /// Length scale of the shared smooth `f(k)`
    LengthScaleK,
    /// Output scale of the shared smooth `f(k)`
    OutputScaleK,
    /// Length scale of the per site smooth `f(k, site)`
    LengthScaleKSite,
    /// Output scale of the per site smooth `f(k, site)`
    OutputScaleKSite,
}

impl HyperparameterKind {
    /// All hyperparameters in layout order
    pub const ALL: [HyperparameterKind; 4] = [
        HyperparameterKind::LengthScaleK,
        HyperparameterKind::OutputScaleK,
        HyperparameterKind::LengthScaleKSite,
        HyperparameterKind::OutputScaleKSite,
    ];

    /// Option name
    pub fn name(&self) -> &'static str {
        match self {
            HyperparameterKind::LengthScaleK => "length_scale_k",
            HyperparameterKind::OutputScaleK => "output_scale_k",
            HyperparameterKind::LengthScaleKSite => "length_scale_k_site",
            HyperparameterKind::OutputScaleKSite => "output_scale_k_site",
        }
    }
}

impl fmt::Display for HyperparameterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hyperparameter configuration of the two GP smooth terms
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct GpHyperparameters<F: Float> {
    /// Length scale of `f(k)`
    pub length_scale_k: Hyperparameter<F>,
    /// Output scale of `f(k)`
    pub output_scale_k: Hyperparameter<F>,
    /// Length scale of `f(k, site)`
    pub length_scale_k_site: Hyperparameter<F>,
    /// Output scale of `f(k, site)`
    pub output_scale_k_site: Hyperparameter<F>,
}

impl<F: Float> Default for GpHyperparameters<F> {
    /// All estimated: InvGamma(5, 5) prior on length scales, HalfNormal(1) prior on output scales
    fn default() -> Self {
        let length_scale = Hyperparameter::estimated(
            Prior::InvGamma {
                shape: F::cast(5.),
                scale: F::cast(5.),
            },
            F::one(),
        );
        let output_scale =
            Hyperparameter::estimated(Prior::HalfNormal { scale: F::one() }, F::one());
        GpHyperparameters {
            length_scale_k: length_scale,
            output_scale_k: output_scale,
            length_scale_k_site: length_scale,
            output_scale_k_site: output_scale,
        }
    }
}

impl<F: Float> GpHyperparameters<F> {
    /// All four hyperparameters given as data
    pub fn fixed(
        length_scale_k: F,
        output_scale_k: F,
        length_scale_k_site: F,
        output_scale_k_site: F,
    ) -> Self {
        GpHyperparameters {
            length_scale_k: Hyperparameter::Fixed(length_scale_k),
            output_scale_k: Hyperparameter::Fixed(output_scale_k),
            length_scale_k_site: Hyperparameter::Fixed(length_scale_k_site),
            output_scale_k_site: Hyperparameter::Fixed(output_scale_k_site),
        }
    }

    /// Get hyperparameter by name
    pub fn get(&self, kind: HyperparameterKind) -> &Hyperparameter<F> {
        match kind {
            HyperparameterKind::LengthScaleK => &self.length_scale_k,
            HyperparameterKind::OutputScaleK => &self.output_scale_k,
            HyperparameterKind::LengthScaleKSite => &self.length_scale_k_site,
            HyperparameterKind::OutputScaleKSite => &self.output_scale_k_site,
        }
    }

    /// Names of the estimated hyperparameters in layout order
    pub fn estimated(&self) -> Vec<HyperparameterKind> {
        HyperparameterKind::ALL
            .into_iter()
            .filter(|kind| !self.get(*kind).is_fixed())
            .collect()
    }

    /// Fixed values or initial guesses
    pub fn init(&self) -> ResolvedHyperparameters<F> {
        ResolvedHyperparameters {
            length_scale_k: self.length_scale_k.init(),
            output_scale_k: self.output_scale_k.init(),
            length_scale_k_site: self.length_scale_k_site.init(),
            output_scale_k_site: self.output_scale_k_site.init(),
        }
    }

    /// Sum of log prior densities of the estimated hyperparameters at `values`
    pub fn ln_prior(&self, values: &ResolvedHyperparameters<F>) -> F {
        HyperparameterKind::ALL
            .into_iter()
            .fold(F::zero(), |acc, kind| {
                acc + self.get(kind).ln_prior(values.get(kind))
            })
    }

    /// Check every hyperparameter
    pub fn check(&self) -> Result<()> {
        for kind in HyperparameterKind::ALL {
            self.get(kind).check(kind.name())?;
        }
        Ok(())
    }
}

/// Concrete values of the four GP hyperparameters
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ResolvedHyperparameters<F: Float> {
    /// Length scale of `f(k)`
    pub length_scale_k: F,
    /// Output scale of `f(k)`
    pub output_scale_k: F,
    /// Length scale of `f(k, site)`
    pub length_scale_k_site: F,
    /// Output scale of `f(k, site)`
    pub output_scale_k_site: F,
}

impl<F: Float> ResolvedHyperparameters<F> {
    /// Get value by name
    pub fn get(&self, kind: HyperparameterKind) -> F {
        match kind {
            HyperparameterKind::LengthScaleK => self.length_scale_k,
            HyperparameterKind::OutputScaleK => self.output_scale_k,
            HyperparameterKind::LengthScaleKSite => self.length_scale_k_site,
            HyperparameterKind::OutputScaleKSite => self.output_scale_k_site,
        }
    }

    /// Set value by name
    pub fn set(&mut self, kind: HyperparameterKind, value: F) {
        match kind {
            HyperparameterKind::LengthScaleK => self.length_scale_k = value,
            HyperparameterKind::OutputScaleK => self.output_scale_k = value,
            HyperparameterKind::LengthScaleKSite => self.length_scale_k_site = value,
            HyperparameterKind::OutputScaleKSite => self.output_scale_k_site = value,
        }
    }

    /// Whether every value is strictly positive and finite
    pub fn is_valid(&self) -> bool {
        HyperparameterKind::ALL.into_iter().all(|kind| {
            let v = self.get(kind);
            v > F::zero() && v.is_finite()
        })
    }
}

impl<F: Float> fmt::Display for ResolvedHyperparameters<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "rho_k={}, alpha_k={}, rho_ks={}, alpha_ks={}",
            self.length_scale_k,
            self.output_scale_k,
            self.length_scale_k_site,
            self.output_scale_k_site
        )
    }
}
