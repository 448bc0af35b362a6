//! Additive GP model definition and its unnormalized log density.
//!
//! ```text
//! y_i       ~ Normal(intercept + A_i * beta + f_k[i] + f_site[s_i][p_i], sigma)
//! f_k       ~ MultiNormal(0, K(k, k; alpha_k, rho_k))
//! f_site[s] ~ MultiNormal(0, K(k_s, k_s; alpha_ks, rho_ks))      for each site s
//! intercept, beta ~ Normal(0, coef_prior_scale)
//! ```
//!
//! where `k_s` are the covariate values of the observations of site `s` and `p_i` is the
//! position of observation `i` among them. The per site smooth is thus represented by
//! one vector per site sized to its number of observations.
//!
//! The model is stateless once built: it evaluates the log density of any draw
//! of the latent variables, leaving their exploration to an external sampler
//! through the [`LogDensity`] trait.

use crate::covariance::{covariance_matrix, CovarianceFactor};
use crate::data::GamData;
use crate::errors::{CovarianceBlock, GamError, Result};
use crate::hyperparameters::{HyperparameterKind, ResolvedHyperparameters};
use crate::kernels::Kernel;
use crate::parameters::GamValidParams;
use crate::utils::{first_duplicate, into_f64};

use finitediff::FiniteDiff;
use linfa::Float;
use log::{debug, warn};
use ndarray::Array1;
use std::borrow::Cow;
use std::fmt;

/// One value of every random quantity of the model
#[derive(Clone, Debug, PartialEq)]
pub struct ModelDraw<F: Float> {
    /// Intercept
    pub intercept: F,
    /// Coefficient of the linear covariate A
    pub beta: F,
    /// Observation noise standard deviation
    pub sigma: F,
    /// Shared smooth f(k) at each observation (n_obs,)
    pub f_k: Array1<F>,
    /// Per site smooth f(k, site), one vector per site sized to its observation count
    pub f_site: Vec<Array1<F>>,
    /// Length and output scales of the smooth terms
    pub hyperparameters: ResolvedHyperparameters<F>,
}

/// Layout of the flat unconstrained parameter vector:
/// `[intercept, beta, ln sigma?, ln hyperparameter..., f_k..., f_site[0]..., f_site[1]..., ...]`
/// where log transformed entries are present only for estimated quantities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamLayout {
    n_obs: usize,
    site_sizes: Vec<usize>,
    noise_estimated: bool,
    estimated: Vec<HyperparameterKind>,
}

impl ParamLayout {
    /// Total number of unconstrained parameters
    pub fn dim(&self) -> usize {
        self.f_k_offset() + self.n_obs + self.site_sizes.iter().sum::<usize>()
    }

    /// Offset of `ln sigma` when estimated
    pub fn sigma_offset(&self) -> Option<usize> {
        self.noise_estimated.then_some(2)
    }

    /// Offset of the log of an estimated hyperparameter
    pub fn hyperparameter_offset(&self, kind: HyperparameterKind) -> Option<usize> {
        self.estimated
            .iter()
            .position(|k| *k == kind)
            .map(|p| 2 + self.noise_estimated as usize + p)
    }

    /// Offset of the f_k block
    pub fn f_k_offset(&self) -> usize {
        2 + self.noise_estimated as usize + self.estimated.len()
    }

    /// Offset of the f_site block of site `s` (0-based)
    pub fn site_offset(&self, s: usize) -> usize {
        self.f_k_offset() + self.n_obs + self.site_sizes[..s].iter().sum::<usize>()
    }

    /// Estimated hyperparameters in layout order
    pub fn estimated(&self) -> &[HyperparameterKind] {
        &self.estimated
    }
}

/// Interface of a differentiable log density over an unconstrained real vector,
/// as consumed by gradient based samplers.
pub trait LogDensity: Sync {
    /// Dimension of the parameter vector
    fn dim(&self) -> usize;

    /// Unnormalized log density at `x`
    fn log_density(&self, x: &[f64]) -> Result<f64>;

    /// Gradient of the log density at `x`, by central finite differences
    fn grad_log_density(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.log_density(x)?;
        let f = |x: &Vec<f64>| self.log_density(x).unwrap_or(f64::NAN);
        let grad = x.to_vec().central_diff(&f);
        if grad.iter().any(|g| g.is_nan()) {
            return Err(GamError::InvalidValue(
                "log density is not finite in the neighbourhood of x".to_string(),
            ));
        }
        Ok(grad)
    }
}

/// Additive GP regression model bound to an observation set.
///
/// Built with [`GamValidParams::build`]. Prior covariances whose hyperparameters are
/// fixed are factorized once at build time, so numerical failures surface before
/// any inference.
#[derive(Clone, Debug)]
pub struct AdditiveGpModel<F: Float, K: Kernel<F>> {
    data: GamData<F>,
    params: GamValidParams<F, K>,
    layout: ParamLayout,
    shared_factor: Option<CovarianceFactor<F>>,
    site_factors: Option<Vec<CovarianceFactor<F>>>,
}

impl<F: Float, K: Kernel<F>> fmt::Display for AdditiveGpModel<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "AdditiveGp(kernel={}, {}, estimated={:?}, mean_zero_penalty={:?})",
            self.params.kernel(),
            self.data,
            self.layout.estimated,
            self.params.mean_zero_penalty().map(|p| p.lambda()),
        )
    }
}

impl<F: Float, K: Kernel<F>> GamValidParams<F, K> {
    /// Bind the model definition to an observation set
    pub fn build(&self, data: &GamData<F>) -> Result<AdditiveGpModel<F, K>> {
        AdditiveGpModel::new(self.clone(), data.clone())
    }
}

impl<F: Float, K: Kernel<F>> AdditiveGpModel<F, K> {
    /// Bind validated parameters to a validated observation set
    pub fn new(params: GamValidParams<F, K>, data: GamData<F>) -> Result<Self> {
        let mut model = Self::unfactorized(params, data);
        let hp = model.params.hyperparameters();
        let shared_fixed = hp.length_scale_k.is_fixed() && hp.output_scale_k.is_fixed();
        let site_fixed = hp.length_scale_k_site.is_fixed() && hp.output_scale_k_site.is_fixed();
        let init = hp.init();
        if shared_fixed {
            model.shared_factor = Some(model.compute_shared_factor(&init)?);
        }
        if site_fixed {
            model.site_factors = Some(model.compute_site_factors(&init)?);
        }
        debug!("Built {model}");
        Ok(model)
    }

    /// Model whose prior covariances are factorized on demand only
    pub(crate) fn unfactorized(params: GamValidParams<F, K>, data: GamData<F>) -> Self {
        let layout = ParamLayout {
            n_obs: data.n_obs(),
            site_sizes: data.site_index().sizes(),
            noise_estimated: !params.noise().is_fixed(),
            estimated: params.hyperparameters().estimated(),
        };
        if let Some(v) = first_duplicate(data.k()) {
            warn!(
                "k value {} is observed several times, f(k) covariance relies on nugget={}",
                into_f64(v),
                params.nugget()
            );
        }
        AdditiveGpModel {
            data,
            params,
            layout,
            shared_factor: None,
            site_factors: None,
        }
    }

    /// Observation set
    pub fn data(&self) -> &GamData<F> {
        &self.data
    }

    /// Model parameters
    pub fn params(&self) -> &GamValidParams<F, K> {
        &self.params
    }

    /// Flat unconstrained parameter layout
    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    /// Replace the entries of `values` whose hyperparameter is fixed by the fixed value
    pub fn resolve(&self, values: &ResolvedHyperparameters<F>) -> ResolvedHyperparameters<F> {
        let hp = self.params.hyperparameters();
        let mut resolved = *values;
        for kind in HyperparameterKind::ALL {
            if hp.get(kind).is_fixed() {
                resolved.set(kind, hp.get(kind).init());
            }
        }
        resolved
    }

    fn resolve_sigma(&self, sigma: F) -> F {
        if self.params.noise().is_fixed() {
            self.params.noise().init()
        } else {
            sigma
        }
    }

    pub(crate) fn compute_shared_factor(
        &self,
        hp: &ResolvedHyperparameters<F>,
    ) -> Result<CovarianceFactor<F>> {
        let cov = covariance_matrix(
            self.params.kernel(),
            self.data.k(),
            hp.output_scale_k,
            hp.length_scale_k,
            self.params.nugget(),
        );
        CovarianceFactor::new(&cov, CovarianceBlock::Shared)
    }

    pub(crate) fn compute_site_factors(
        &self,
        hp: &ResolvedHyperparameters<F>,
    ) -> Result<Vec<CovarianceFactor<F>>> {
        (0..self.data.n_sites())
            .map(|s| {
                let cov = covariance_matrix(
                    self.params.kernel(),
                    &self.data.site_k(s),
                    hp.output_scale_k_site,
                    hp.length_scale_k_site,
                    self.params.nugget(),
                );
                CovarianceFactor::new(&cov, CovarianceBlock::Site(s))
            })
            .collect()
    }

    fn shared_factor(
        &self,
        hp: &ResolvedHyperparameters<F>,
    ) -> Result<Cow<'_, CovarianceFactor<F>>> {
        match &self.shared_factor {
            Some(factor) => Ok(Cow::Borrowed(factor)),
            None => Ok(Cow::Owned(self.compute_shared_factor(hp)?)),
        }
    }

    fn site_factors(
        &self,
        hp: &ResolvedHyperparameters<F>,
    ) -> Result<Cow<'_, [CovarianceFactor<F>]>> {
        match &self.site_factors {
            Some(factors) => Ok(Cow::Borrowed(factors.as_slice())),
            None => Ok(Cow::Owned(self.compute_site_factors(hp)?)),
        }
    }

    fn check_shapes(&self, draw: &ModelDraw<F>) -> Result<()> {
        if draw.f_k.len() != self.data.n_obs() {
            return Err(GamError::InvalidValue(format!(
                "f_k should have {} values, got {}",
                self.data.n_obs(),
                draw.f_k.len()
            )));
        }
        let sizes = self.data.site_index().sizes();
        if draw.f_site.len() != sizes.len() {
            return Err(GamError::InvalidValue(format!(
                "f_site should have {} site vectors, got {}",
                sizes.len(),
                draw.f_site.len()
            )));
        }
        for (s, (f, size)) in draw.f_site.iter().zip(sizes).enumerate() {
            if f.len() != size {
                return Err(GamError::InvalidValue(format!(
                    "f_site of site {} should have {} values, got {}",
                    s + 1,
                    size,
                    f.len()
                )));
            }
        }
        Ok(())
    }

    /// Combined intercept, linear and shared smooth effect `intercept + A_i * beta + f_k[i]`
    pub fn mean_effect(&self, draw: &ModelDraw<F>) -> Array1<F> {
        self.data.a().mapv(|a| draw.intercept + a * draw.beta) + &draw.f_k
    }

    /// Mean of each observation `intercept + A_i * beta + f_k[i] + f_site[s_i][p_i]`
    pub fn linear_predictor(&self, draw: &ModelDraw<F>) -> Result<Array1<F>> {
        self.check_shapes(draw)?;
        Ok(self.mean_effect(draw) + self.data.site_index().site_effect(&draw.f_site))
    }

    /// Unnormalized log density of a draw on the constrained scale.
    ///
    /// Entries of the draw which are fixed by the model parameters (noise or
    /// hyperparameters) are ignored in favour of the fixed values. Non positive
    /// scales give a `-inf` density.
    pub fn log_density_draw(&self, draw: &ModelDraw<F>) -> Result<F> {
        self.check_shapes(draw)?;
        let hp = self.resolve(&draw.hyperparameters);
        let sigma = self.resolve_sigma(draw.sigma);
        if !(sigma > F::zero() && sigma.is_finite()) || !hp.is_valid() {
            return Ok(F::neg_infinity());
        }

        let scale = self.params.coef_prior_scale();
        let mut lp = normal_ln_pdf(draw.intercept, F::zero(), scale)
            + normal_ln_pdf(draw.beta, F::zero(), scale)
            + self.params.noise().ln_prior(sigma)
            + self.params.hyperparameters().ln_prior(&hp);

        lp += self.shared_factor(&hp)?.log_density(&draw.f_k)?;
        for (factor, f) in self.site_factors(&hp)?.iter().zip(draw.f_site.iter()) {
            lp += factor.log_density(f)?;
        }

        let effect = self.mean_effect(draw);
        let mu = &effect + &self.data.site_index().site_effect(&draw.f_site);
        lp += self
            .data
            .y()
            .iter()
            .zip(mu.iter())
            .fold(F::zero(), |acc, (y, m)| acc + normal_ln_pdf(*y, *m, sigma));

        if let Some(penalty) = self.params.mean_zero_penalty() {
            lp += penalty.value(&effect);
        }
        Ok(lp)
    }

    /// Map an unconstrained vector to a draw
    pub fn unpack(&self, x: &[f64]) -> Result<ModelDraw<F>> {
        let layout = &self.layout;
        if x.len() != layout.dim() {
            return Err(GamError::InvalidValue(format!(
                "expected {} parameters, got {}",
                layout.dim(),
                x.len()
            )));
        }
        let sigma = match layout.sigma_offset() {
            Some(o) => F::cast(x[o].exp()),
            None => self.params.noise().init(),
        };
        let mut hyperparameters = self.params.hyperparameters().init();
        for kind in layout.estimated() {
            if let Some(o) = layout.hyperparameter_offset(*kind) {
                hyperparameters.set(*kind, F::cast(x[o].exp()));
            }
        }
        let off = layout.f_k_offset();
        let f_k = x[off..off + layout.n_obs].iter().map(|v| F::cast(*v)).collect();
        let f_site = (0..layout.site_sizes.len())
            .map(|s| {
                let o = layout.site_offset(s);
                x[o..o + layout.site_sizes[s]]
                    .iter()
                    .map(|v| F::cast(*v))
                    .collect()
            })
            .collect();
        Ok(ModelDraw {
            intercept: F::cast(x[0]),
            beta: F::cast(x[1]),
            sigma,
            f_k,
            f_site,
            hyperparameters,
        })
    }

    /// Map a draw to an unconstrained vector
    pub fn pack(&self, draw: &ModelDraw<F>) -> Result<Vec<f64>> {
        self.check_shapes(draw)?;
        let layout = &self.layout;
        let mut x = Vec::with_capacity(layout.dim());
        x.push(into_f64(draw.intercept));
        x.push(into_f64(draw.beta));
        if layout.noise_estimated {
            x.push(into_f64(draw.sigma).ln());
        }
        for kind in layout.estimated() {
            x.push(into_f64(draw.hyperparameters.get(*kind)).ln());
        }
        x.extend(draw.f_k.iter().map(|v| into_f64(*v)));
        for f in draw.f_site.iter() {
            x.extend(f.iter().map(|v| into_f64(*v)));
        }
        Ok(x)
    }

    /// Starting point for samplers: zero coefficients and latent values,
    /// initial guesses for estimated scales
    pub fn initial_point(&self) -> Vec<f64> {
        let mut x = vec![0.; self.layout.dim()];
        if let Some(o) = self.layout.sigma_offset() {
            x[o] = into_f64(self.params.noise().init()).ln();
        }
        let init = self.params.hyperparameters().init();
        for kind in self.layout.estimated() {
            if let Some(o) = self.layout.hyperparameter_offset(*kind) {
                x[o] = into_f64(init.get(*kind)).ln();
            }
        }
        x
    }
}

impl<F: Float, K: Kernel<F>> LogDensity for AdditiveGpModel<F, K> {
    fn dim(&self) -> usize {
        self.layout.dim()
    }

    /// Log density on the unconstrained scale, including the log jacobian
    /// of the exponential transforms of the estimated scales
    fn log_density(&self, x: &[f64]) -> Result<f64> {
        let draw = self.unpack(x)?;
        let lp = into_f64(self.log_density_draw(&draw)?);
        let log_jacobian: f64 = self
            .layout
            .sigma_offset()
            .into_iter()
            .chain(
                self.layout
                    .estimated()
                    .iter()
                    .filter_map(|kind| self.layout.hyperparameter_offset(*kind)),
            )
            .map(|o| x[o])
            .sum();
        Ok(lp + log_jacobian)
    }
}

/// Log density of Normal(mu, sd) at x
pub(crate) fn normal_ln_pdf<F: Float>(x: F, mu: F, sd: F) -> F {
    let z = (x - mu) / sd;
    F::cast(-0.5 * (2. * std::f64::consts::PI).ln()) - sd.ln() - F::cast(0.5) * z * z
}
