use crate::errors::{GamError, Result};
use crate::hyperparameters::{GpHyperparameters, Hyperparameter, HyperparameterKind, Prior};
use crate::kernels::Kernel;
use crate::penalty::MeanZeroPenalty;
use crate::{
    GAM_COBYLA_MAX_EVAL, GAM_COBYLA_MIN_EVAL, GAM_DEFAULT_COEF_PRIOR_SCALE, GAM_DEFAULT_SEED,
    GAM_OPTIM_N_START,
};
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A set of validated additive GP model parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, K: Serialize",
        deserialize = "F: Deserialize<'de>, K: Deserialize<'de>"
    ))
)]
pub struct GamValidParams<F: Float, K: Kernel<F>> {
    /// Kernel of both smooth terms f(k) and f(k, site)
    pub(crate) kernel: K,
    /// Length and output scales of the smooth terms
    pub(crate) hyperparameters: GpHyperparameters<F>,
    /// Observation noise standard deviation
    pub(crate) noise: Hyperparameter<F>,
    /// Strength of the soft mean-zero penalty, None or 0 disables it
    pub(crate) mean_zero_penalty: Option<F>,
    /// Scale of the Normal(0, scale) prior of intercept and linear coefficient
    pub(crate) coef_prior_scale: F,
    /// Diagonal jitter added to prior covariances, relative to the output variance
    pub(crate) nugget: F,
    /// Number of sites when fitting from a dataset, inferred from labels when None
    pub(crate) n_sites: Option<usize>,
    /// Number of internal hyperparameter optimization restart
    pub(crate) n_start: usize,
    /// Max number of internal marginal likelihood evaluation during one optimization
    pub(crate) max_eval: usize,
    /// Seed of the random generator drawing optimization starting points
    pub(crate) seed: u64,
}

impl<F: Float, K: Kernel<F>> Default for GamValidParams<F, K> {
    fn default() -> GamValidParams<F, K> {
        GamValidParams {
            kernel: K::default(),
            hyperparameters: GpHyperparameters::default(),
            noise: GamValidParams::<F, K>::default_noise(),
            mean_zero_penalty: None,
            coef_prior_scale: F::cast(GAM_DEFAULT_COEF_PRIOR_SCALE),
            nugget: F::cast(100.0) * F::epsilon(),
            n_sites: None,
            n_start: GAM_OPTIM_N_START,
            max_eval: GAM_COBYLA_MAX_EVAL,
            seed: GAM_DEFAULT_SEED,
        }
    }
}

impl<F: Float, K: Kernel<F>> GamValidParams<F, K> {
    fn default_noise() -> Hyperparameter<F> {
        Hyperparameter::Estimated {
            prior: Prior::HalfNormal { scale: F::one() },
            init: F::cast(0.5),
            bounds: (F::cast(1e-4), F::cast(1e2)),
        }
    }

    /// Get kernel
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Get smooth terms hyperparameters
    pub fn hyperparameters(&self) -> &GpHyperparameters<F> {
        &self.hyperparameters
    }

    /// Get noise standard deviation setting
    pub fn noise(&self) -> &Hyperparameter<F> {
        &self.noise
    }

    /// Get active mean-zero penalty if any (lambda > 0)
    pub fn mean_zero_penalty(&self) -> Option<MeanZeroPenalty<F>> {
        self.mean_zero_penalty
            .filter(|lambda| *lambda > F::zero())
            .map(MeanZeroPenalty::new)
    }

    /// Get scale of the intercept and linear coefficient prior
    pub fn coef_prior_scale(&self) -> F {
        self.coef_prior_scale
    }

    /// Get nugget
    pub fn nugget(&self) -> F {
        self.nugget
    }

    /// Get declared number of sites
    pub fn n_sites(&self) -> Option<usize> {
        self.n_sites
    }

    /// Get the number of internal optimization restart
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of internal likelihood evaluations during one optimization
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get seed of multistart random generator
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of parameters that can be specified for the definition and fitting
/// of the [additive GP model](crate::AdditiveGpModel).
pub struct GamParams<F: Float, K: Kernel<F>>(GamValidParams<F, K>);

impl<F: Float, K: Kernel<F>> Default for GamParams<F, K> {
    fn default() -> Self {
        GamParams(GamValidParams::default())
    }
}

impl<F: Float, K: Kernel<F>> GamParams<F, K> {
    /// A constructor for model parameters given the kernel of the smooth terms
    pub fn new(kernel: K) -> GamParams<F, K> {
        Self(GamValidParams {
            kernel,
            ..Default::default()
        })
    }

    /// A constructor for model parameters from validated parameters
    pub fn new_from_valid(params: &GamValidParams<F, K>) -> Self {
        Self(params.clone())
    }

    /// Set kernel.
    pub fn kernel(mut self, kernel: K) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set the four smooth term hyperparameters.
    pub fn hyperparameters(mut self, hyperparameters: GpHyperparameters<F>) -> Self {
        self.0.hyperparameters = hyperparameters;
        self
    }

    /// Set one smooth term hyperparameter.
    pub fn hyperparameter(mut self, kind: HyperparameterKind, value: Hyperparameter<F>) -> Self {
        let hp = &mut self.0.hyperparameters;
        match kind {
            HyperparameterKind::LengthScaleK => hp.length_scale_k = value,
            HyperparameterKind::OutputScaleK => hp.output_scale_k = value,
            HyperparameterKind::LengthScaleKSite => hp.length_scale_k_site = value,
            HyperparameterKind::OutputScaleKSite => hp.output_scale_k_site = value,
        }
        self
    }

    /// Set observation noise standard deviation, fixed or estimated.
    pub fn noise(mut self, noise: Hyperparameter<F>) -> Self {
        self.0.noise = noise;
        self
    }

    /// Set strength `lambda` of the soft mean-zero penalty
    /// `-lambda * (sum_i intercept + A_i * beta + f(k_i))^2`.
    ///
    /// The penalty only nudges the combined effect towards a zero sum,
    /// larger values enforce it more strictly. `None` or 0 disables it.
    pub fn mean_zero_penalty(mut self, lambda: Option<F>) -> Self {
        self.0.mean_zero_penalty = lambda;
        self
    }

    /// Set scale of the Normal(0, scale) prior of the intercept and linear coefficient.
    pub fn coef_prior_scale(mut self, scale: F) -> Self {
        self.0.coef_prior_scale = scale;
        self
    }

    /// Set nugget.
    ///
    /// Nugget is used to improve numerical stability, it is added to the diagonal
    /// of prior covariances after scaling by the output variance.
    pub fn nugget(mut self, nugget: F) -> Self {
        self.0.nugget = nugget;
        self
    }

    /// Set number of sites used when fitting from a dataset.
    pub fn n_sites(mut self, n_sites: Option<usize>) -> Self {
        self.0.n_sites = n_sites;
        self
    }

    /// Set the number of internal hyperparameter optimization restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of internal likelihood evaluations during one optimization
    /// Given max_eval has to be greater than [crate::GAM_COBYLA_MIN_EVAL] otherwise
    /// max_eval is set to [crate::GAM_COBYLA_MIN_EVAL].
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = GAM_COBYLA_MIN_EVAL.max(max_eval);
        self
    }

    /// Set seed of the random generator drawing optimization starting points
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, K: Kernel<F>> From<GamValidParams<F, K>> for GamParams<F, K> {
    fn from(valid: GamValidParams<F, K>) -> Self {
        GamParams(valid)
    }
}

impl<F: Float, K: Kernel<F>> ParamGuard for GamParams<F, K> {
    type Checked = GamValidParams<F, K>;
    type Error = GamError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        self.0.hyperparameters.check()?;
        self.0.noise.check("noise")?;
        if let Some(lambda) = self.0.mean_zero_penalty {
            if !(lambda >= F::zero() && lambda.is_finite()) {
                return Err(GamError::InvalidValue(format!(
                    "`mean_zero_penalty` should be a non negative finite value, got {lambda}"
                )));
            }
        }
        let scale = self.0.coef_prior_scale;
        if !(scale > F::zero() && scale.is_finite()) {
            return Err(GamError::InvalidValue(format!(
                "`coef_prior_scale` should be strictly positive, got {scale}"
            )));
        }
        if !(self.0.nugget >= F::zero() && self.0.nugget.is_finite()) {
            return Err(GamError::InvalidValue(format!(
                "`nugget` should be a non negative finite value, got {}",
                self.0.nugget
            )));
        }
        if self.0.n_sites == Some(0) {
            return Err(GamError::InvalidValue(
                "`n_sites` cannot be 0!".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ExpQuadKernel;

    type Params = GamParams<f64, ExpQuadKernel>;

    #[test]
    fn test_default_params_are_valid() {
        let params = Params::default().check().expect("valid defaults");
        assert_eq!(params.n_start(), GAM_OPTIM_N_START);
        assert!(params.mean_zero_penalty().is_none());
        assert!(!params.noise().is_fixed());
    }

    #[test]
    fn test_mean_zero_penalty_zero_disables() {
        let params = Params::default()
            .mean_zero_penalty(Some(0.))
            .check()
            .unwrap();
        assert!(params.mean_zero_penalty().is_none());
        let params = Params::default()
            .mean_zero_penalty(Some(1e-4))
            .check()
            .unwrap();
        assert_eq!(params.mean_zero_penalty().map(|p| p.lambda()), Some(1e-4));
    }

    #[test]
    fn test_invalid_params() {
        assert!(Params::default().mean_zero_penalty(Some(-1.)).check().is_err());
        assert!(Params::default().coef_prior_scale(0.).check().is_err());
        assert!(Params::default().nugget(-1e-3).check().is_err());
        assert!(Params::default().n_sites(Some(0)).check().is_err());
        assert!(Params::default()
            .noise(Hyperparameter::Fixed(0.))
            .check()
            .is_err());
        assert!(Params::default()
            .hyperparameter(HyperparameterKind::LengthScaleKSite, Hyperparameter::Fixed(-1.))
            .check()
            .is_err());
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_serialize_params() {
        let params = Params::default()
            .mean_zero_penalty(Some(1e-4))
            .hyperparameter(HyperparameterKind::OutputScaleK, Hyperparameter::Fixed(2.))
            .check()
            .unwrap();
        let json = serde_json::to_string(&params).expect("serialized");
        assert!(json.contains("\"ExpQuad\""));
        let back: GamValidParams<f64, ExpQuadKernel> =
            serde_json::from_str(&json).expect("deserialized");
        assert_eq!(back, params);
    }

    #[test]
    fn test_max_eval_lower_bound() {
        let params = Params::default().max_eval(3).check().unwrap();
        assert_eq!(params.max_eval(), GAM_COBYLA_MIN_EVAL);
    }
}
