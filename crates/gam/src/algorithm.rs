use crate::covariance::{covariance_matrix, cross_covariance, site_covariances, CovarianceFactor};
use crate::data::{site_labels, GamData};
use crate::errors::{CovarianceBlock, GamError, Result};
use crate::hyperparameters::{Hyperparameter, ResolvedHyperparameters};
use crate::kernels::{ExpQuadKernel, Kernel};
use crate::model::{AdditiveGpModel, ModelDraw};
use crate::optimization::{
    optimize_params, prepare_multistart, CobylaParams, OptimResult, OptimStatus,
};
use crate::parameters::{GamParams, GamValidParams};
use crate::utils::into_f64;

use linfa::prelude::{DatasetBase, Fit, Float, PredictInplace};
use linfa_linalg::{cholesky::*, eigh::*};
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rayon::prelude::*;
use std::fmt;
use std::time::Instant;

/// Default number of multistart for hyperparameters optimization
pub const GAM_OPTIM_N_START: usize = 10;
/// Minimum number of marginal likelihood evaluations during one optimization
pub const GAM_COBYLA_MIN_EVAL: usize = 25;
/// Maximum number of marginal likelihood evaluations during one optimization
pub const GAM_COBYLA_MAX_EVAL: usize = 1000;
/// Default scale of the Normal(0, scale) prior of intercept and linear coefficient
pub const GAM_DEFAULT_COEF_PRIOR_SCALE: f64 = 10.;
/// Default seed of the multistart random generator
pub const GAM_DEFAULT_SEED: u64 = 42;

/// Latent variables `z = (intercept, beta, f_k, f_site)` conditioned on the observations
/// (and on the mean-zero pseudo observation when the penalty is active) for given
/// hyperparameters and noise.
///
/// The penalty `-lambda * t^2` on the combined effect total `t` is the log density of
/// the pseudo observation `0 ~ Normal(t, 1 / (2 lambda))` up to a constant, hence the
/// model is jointly gaussian in `z`.
#[derive(Clone, Debug)]
struct Conditioning<F: Float> {
    /// Prior variance of intercept and beta
    coef_var: F,
    /// Prior covariance of f_k
    shared: Array2<F>,
    /// Prior covariances of f_site, one per site
    sites: Vec<Array2<F>>,
    /// Prior covariance between z and the (pseudo) observations, (dim, m)
    cross: Array2<F>,
    /// Cholesky factor of the marginal covariance of the (pseudo) observations
    marginal: CovarianceFactor<F>,
    /// Marginal covariance inverse times the (pseudo) observations
    alpha: Array1<F>,
    /// Log marginal likelihood of the (pseudo) observations
    log_likelihood: F,
}

impl<F: Float> Conditioning<F> {
    fn dim(&self) -> usize {
        self.cross.nrows()
    }

    fn prior_var(&self) -> Array1<F> {
        let mut var = vec![self.coef_var; 2];
        var.extend(self.shared.diag().iter().cloned());
        for cov in self.sites.iter() {
            var.extend(cov.diag().iter().cloned());
        }
        Array1::from_vec(var)
    }

    fn prior_covariance(&self) -> Array2<F> {
        let mut cov = Array2::zeros((self.dim(), self.dim()));
        cov[[0, 0]] = self.coef_var;
        cov[[1, 1]] = self.coef_var;
        let mut offset = 2;
        for block in std::iter::once(&self.shared).chain(self.sites.iter()) {
            let n = block.nrows();
            cov.slice_mut(s![offset..offset + n, offset..offset + n])
                .assign(block);
            offset += n;
        }
        cov
    }

    fn posterior_mean(&self) -> Array1<F> {
        self.cross.dot(&self.alpha)
    }

    /// Posterior variances `diag(P) - colsum((L^-1.H.P)^2)`
    fn posterior_var(&self) -> Result<Array1<F>> {
        let v = self.marginal.solve_lower(&self.cross.t())?;
        let var = self.prior_var() - v.mapv(|x| x * x).sum_axis(Axis(0));
        Ok(var.mapv(|x| x.max(F::zero())))
    }

    fn posterior_covariance(&self) -> Result<Array2<F>> {
        let v = self.marginal.solve_lower(&self.cross.t())?;
        let cov = self.prior_covariance() - v.t().dot(&v);
        Ok((&cov + &cov.t()).mapv(|x| x * F::cast(0.5)))
    }
}

impl<F: Float, K: Kernel<F>> AdditiveGpModel<F, K> {
    /// Condition the latent variables on the data given hyperparameters and noise
    fn condition(&self, hp: &ResolvedHyperparameters<F>, sigma: F) -> Result<Conditioning<F>> {
        let data = self.data();
        let params = self.params();
        let kernel = params.kernel();
        let nugget = params.nugget();
        let penalty = params.mean_zero_penalty();

        let n = data.n_obs();
        let m = n + penalty.is_some() as usize;
        let dim = 2 + 2 * n;
        let coef_var = params.coef_prior_scale() * params.coef_prior_scale();
        let a = data.a();
        let sum_a = a.sum();

        let shared = covariance_matrix(
            kernel,
            data.k(),
            hp.output_scale_k,
            hp.length_scale_k,
            nugget,
        );
        let sites = site_covariances(
            kernel,
            data,
            hp.output_scale_k_site,
            hp.length_scale_k_site,
            nugget,
        );

        // P.H^t: column i is the prior covariance of z with observation i
        let mut cross = Array2::zeros((dim, m));
        cross.slice_mut(s![0, ..n]).fill(coef_var);
        cross
            .slice_mut(s![1, ..n])
            .assign(&a.mapv(|v| coef_var * v));
        cross.slice_mut(s![2..2 + n, ..n]).assign(&shared);
        let index = data.site_index();
        let mut starts = Vec::with_capacity(data.n_sites());
        let mut offset = 2 + n;
        for (members, cov) in index.iter().zip(sites.iter()) {
            starts.push(offset);
            for p in 0..members.len() {
                for (q, &j) in members.iter().enumerate() {
                    cross[[offset + p, j]] = cov[[p, q]];
                }
            }
            offset += members.len();
        }
        if penalty.is_some() {
            cross[[0, n]] = coef_var * F::cast(n);
            cross[[1, n]] = coef_var * sum_a;
            cross
                .slice_mut(s![2..2 + n, n])
                .assign(&shared.sum_axis(Axis(1)));
        }

        // H.P.H^t + R
        let mut marginal = Array2::zeros((m, m));
        for i in 0..n {
            let slot = starts[index.site_of(i)] + index.position(i);
            let row = &cross.row(0)
                + &cross.row(1).mapv(|v| v * a[i])
                + cross.row(2 + i)
                + cross.row(slot);
            marginal.row_mut(i).assign(&row);
            marginal[[i, i]] += sigma * sigma;
        }
        if let Some(penalty) = penalty {
            let row = cross.row(0).mapv(|v| v * F::cast(n))
                + cross.row(1).mapv(|v| v * sum_a)
                + cross.slice(s![2..2 + n, ..]).sum_axis(Axis(0));
            marginal.row_mut(n).assign(&row);
            marginal[[n, n]] += penalty.pseudo_variance();
        }

        let mut y = Array1::zeros(m);
        y.slice_mut(s![..n]).assign(data.y());
        let marginal = CovarianceFactor::new(&marginal, CovarianceBlock::Marginal)?;
        let alpha = marginal.solve_vec(&y)?;
        let ln_2pi = F::cast((2. * std::f64::consts::PI).ln());
        let log_likelihood =
            F::cast(-0.5) * (F::cast(m) * ln_2pi + marginal.log_det() + y.dot(&alpha));

        Ok(Conditioning {
            coef_var,
            shared,
            sites,
            cross,
            marginal,
            alpha,
            log_likelihood,
        })
    }
}

/// Hyperparameter optimization report
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FitDiagnostics {
    /// Number of optimization starting points, 0 when nothing is estimated
    pub n_starts: usize,
    /// Number of starts which did not produce a finite objective
    pub n_failed: usize,
    /// Number of starts stopped early by an optimizer error, their last point being kept
    pub n_interrupted: usize,
    /// Whether the retained start stopped on the evaluation limit
    pub max_eval_reached: bool,
}

impl FitDiagnostics {
    /// Whether the retained hyperparameters come from a converged optimization
    pub fn converged(&self) -> bool {
        !self.max_eval_reached
    }
}

/// Additive GP model fitted to an observation set.
///
/// Estimated scales (noise, length and output scales) are set to their maximum a
/// posteriori value under the marginal likelihood of the observations. The latent
/// variables are then exactly gaussian: means, standard deviations and draws below
/// are conditional on those scales.
#[derive(Clone, Debug)]
pub struct AdditiveGp<F: Float, K: Kernel<F>> {
    model: AdditiveGpModel<F, K>,
    hyperparameters: ResolvedHyperparameters<F>,
    sigma: F,
    conditioning: Conditioning<F>,
    mean: Array1<F>,
    std: Array1<F>,
    diagnostics: FitDiagnostics,
}

/// Additive GP with exponentiated quadratic kernel
pub type ExpQuadAdditiveGp<F> = AdditiveGp<F, ExpQuadKernel>;

impl<F: Float, K: Kernel<F>> fmt::Display for AdditiveGp<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "AdditiveGp(kernel={}, {}, sigma={}, intercept={}, beta={}, likelihood={})",
            self.model.params().kernel(),
            self.hyperparameters,
            self.sigma,
            self.intercept(),
            self.beta(),
            self.conditioning.log_likelihood,
        )
    }
}

impl<F: Float, K: Kernel<F>> AdditiveGp<F, K> {
    /// Additive GP parameters builder
    pub fn params<NewK: Kernel<F>>(kernel: NewK) -> GamParams<F, NewK> {
        GamParams::new(kernel)
    }

    /// Underlying model definition
    pub fn model(&self) -> &AdditiveGpModel<F, K> {
        &self.model
    }

    /// Fitted length and output scales
    pub fn hyperparameters(&self) -> &ResolvedHyperparameters<F> {
        &self.hyperparameters
    }

    /// Fitted noise standard deviation
    pub fn sigma(&self) -> F {
        self.sigma
    }

    /// Log marginal likelihood of the observations at the fitted scales,
    /// including the mean-zero pseudo observation when the penalty is active
    pub fn log_marginal_likelihood(&self) -> F {
        self.conditioning.log_likelihood
    }

    /// Hyperparameter optimization report
    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    /// Posterior mean of the intercept
    pub fn intercept(&self) -> F {
        self.mean[0]
    }

    /// Posterior mean of the linear coefficient
    pub fn beta(&self) -> F {
        self.mean[1]
    }

    /// Posterior mean of f(k) at the observations
    pub fn f_k(&self) -> Array1<F> {
        let n = self.model.data().n_obs();
        self.mean.slice(s![2..2 + n]).to_owned()
    }

    /// Posterior mean of f(k, site), one vector per site
    pub fn f_site(&self) -> Vec<Array1<F>> {
        self.split_sites(&self.mean.view())
    }

    /// Posterior standard deviation of the intercept
    pub fn intercept_std(&self) -> F {
        self.std[0]
    }

    /// Posterior standard deviation of the linear coefficient
    pub fn beta_std(&self) -> F {
        self.std[1]
    }

    /// Posterior standard deviation of f(k) at the observations
    pub fn f_k_std(&self) -> Array1<F> {
        let n = self.model.data().n_obs();
        self.std.slice(s![2..2 + n]).to_owned()
    }

    /// Posterior standard deviation of f(k, site), one vector per site
    pub fn f_site_std(&self) -> Vec<Array1<F>> {
        self.split_sites(&self.std.view())
    }

    /// Posterior mean of all latent variables at the fitted scales
    pub fn posterior_mean(&self) -> ModelDraw<F> {
        self.to_draw(&self.mean.view())
    }

    /// Posterior mean of the response mean at the observations
    pub fn fitted(&self) -> Result<Array1<F>> {
        self.model.linear_predictor(&self.posterior_mean())
    }

    fn split_sites(&self, z: &ArrayView1<F>) -> Vec<Array1<F>> {
        let n = self.model.data().n_obs();
        let mut offset = 2 + n;
        self.model
            .data()
            .site_index()
            .sizes()
            .into_iter()
            .map(|size| {
                let f = z.slice(s![offset..offset + size]).to_owned();
                offset += size;
                f
            })
            .collect()
    }

    fn to_draw(&self, z: &ArrayView1<F>) -> ModelDraw<F> {
        ModelDraw {
            intercept: z[0],
            beta: z[1],
            sigma: self.sigma,
            f_k: z.slice(s![2..2 + self.model.data().n_obs()]).to_owned(),
            f_site: self.split_sites(z),
            hyperparameters: self.hyperparameters,
        }
    }

    /// Prior covariance between the response mean at new points and the (pseudo)
    /// observations, along with the prior variance at the new points
    fn predictive_cross(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix1>,
        k: &ArrayBase<impl Data<Elem = F>, Ix1>,
        site: &[i64],
    ) -> Result<(Array2<F>, Array1<F>)> {
        let data = self.model.data();
        let params = self.model.params();
        let n_sites = data.n_sites();
        if a.len() != k.len() || a.len() != site.len() {
            return Err(GamError::InvalidData(format!(
                "a, k and site should have the same length, got {}, {} and {}",
                a.len(),
                k.len(),
                site.len()
            )));
        }
        if a.iter().chain(k.iter()).any(|v| !v.is_finite()) {
            return Err(GamError::InvalidData(
                "a and k should be finite".to_string(),
            ));
        }
        if let Some((index, &label)) = site
            .iter()
            .enumerate()
            .find(|&(_, &l)| l < 1 || l as usize > n_sites)
        {
            return Err(GamError::SiteOutOfRange {
                index,
                label,
                n_sites,
            });
        }

        let hp = &self.hyperparameters;
        let kernel = params.kernel();
        let n = data.n_obs();
        let m = self.conditioning.alpha.len();
        let coef_var = self.conditioning.coef_var;
        let sum_a = data.a().sum();

        let shared = cross_covariance(kernel, k, data.k(), hp.output_scale_k, hp.length_scale_k);
        let mut cross = Array2::zeros((a.len(), m));
        for (r, &label) in site.iter().enumerate() {
            let s = (label - 1) as usize;
            let mut row = data.a().mapv(|v| coef_var * (F::one() + a[r] * v)) + shared.row(r);
            let site_cross = cross_covariance(
                kernel,
                &k.slice(s![r..r + 1]),
                &data.site_k(s),
                hp.output_scale_k_site,
                hp.length_scale_k_site,
            );
            for (q, &j) in data.site_index().members(s).iter().enumerate() {
                row[j] += site_cross[[0, q]];
            }
            cross.slice_mut(s![r, ..n]).assign(&row);
            if m > n {
                cross[[r, n]] = coef_var * (F::cast(n) + a[r] * sum_a) + shared.row(r).sum();
            }
        }

        let smooth_var = (hp.output_scale_k * hp.output_scale_k
            + hp.output_scale_k_site * hp.output_scale_k_site)
            * (F::one() + params.nugget());
        let prior_var = a.mapv(|v| coef_var * (F::one() + v * v) + smooth_var);
        Ok((cross, prior_var))
    }

    /// Posterior mean of the response mean `intercept + a * beta + f(k) + f(k, site)`
    /// at new points. Site labels are 1-based and must refer to a fitted site.
    pub fn predict(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix1>,
        k: &ArrayBase<impl Data<Elem = F>, Ix1>,
        site: &[i64],
    ) -> Result<Array1<F>> {
        let (cross, _) = self.predictive_cross(a, k, site)?;
        Ok(cross.dot(&self.conditioning.alpha))
    }

    /// Posterior variance of the response mean at new points (observation noise excluded)
    pub fn predict_var(
        &self,
        a: &ArrayBase<impl Data<Elem = F>, Ix1>,
        k: &ArrayBase<impl Data<Elem = F>, Ix1>,
        site: &[i64],
    ) -> Result<Array1<F>> {
        let (cross, prior_var) = self.predictive_cross(a, k, site)?;
        let v = self.conditioning.marginal.solve_lower(&cross.t())?;
        let var = prior_var - v.mapv(|x| x * x).sum_axis(Axis(0));
        // Negative variance is not a valid result and it is an effect of numerical errors
        Ok(var.mapv(|x| x.max(F::zero())))
    }

    /// Predict from `(n, 3)` records `[A, k, site]`
    pub fn predict_records(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        if x.ncols() != 3 {
            return Err(GamError::InvalidData(format!(
                "expected 3 record columns [A, k, site], got {}",
                x.ncols()
            )));
        }
        let site = site_labels(&x.column(2))?;
        self.predict(&x.column(0), &x.column(1), &site)
    }

    /// Draw `n_draws` joint samples of the latent variables from their gaussian posterior
    /// at the fitted scales.
    ///
    /// The posterior covariance is Cholesky factorized, an eigen decomposition is used
    /// instead when it is numerically singular.
    pub fn sample_posterior<R: Rng>(
        &self,
        n_draws: usize,
        rng: &mut R,
    ) -> Result<Vec<ModelDraw<F>>> {
        let cov = self.conditioning.posterior_covariance()?;
        let c = match cov.cholesky() {
            Ok(c) if c.iter().all(|v| v.is_finite()) => c,
            _ => {
                debug!(
                    "Posterior covariance not positive definite, sample with eigen decomposition"
                );
                let (v, w) = cov.eigh_into()?;
                let v = v.mapv(|x| {
                    // Lower bound eigenvalues at 1e-9
                    if x < F::cast(1e-9) {
                        return F::zero();
                    }
                    x.sqrt()
                });
                w * &v
            }
        };
        let ary = Array2::<f64>::random_using((self.mean.len(), n_draws), StandardNormal, rng)
            .mapv(|v| F::cast(v));
        let draws = c.dot(&ary) + self.mean.view().insert_axis(Axis(1));
        Ok(draws.columns().into_iter().map(|z| self.to_draw(&z)).collect())
    }
}

impl<F, D, K> PredictInplace<ArrayBase<D, Ix2>, Array1<F>> for AdditiveGp<F, K>
where
    F: Float,
    D: Data<Elem = F>,
    K: Kernel<F>,
{
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<F>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        match self.predict_records(x) {
            Ok(values) => *y = values,
            Err(err) => {
                warn!("Additive GP prediction failed: {err}");
                y.fill(F::nan());
            }
        }
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<F> {
        Array1::zeros(x.nrows())
    }
}

impl<F: Float, K: Kernel<F>> GamValidParams<F, K> {
    /// Fit the model to a validated observation set.
    ///
    /// Estimated noise and hyperparameters are optimized (see [`FitDiagnostics`]),
    /// fixed ones are used as given.
    pub fn fit_data(&self, data: &GamData<F>) -> Result<AdditiveGp<F, K>> {
        // only the marginal covariance, noise included, has to be factorized
        let model = AdditiveGpModel::unfactorized(self.clone(), data.clone());
        let estimated = self.hyperparameters().estimated();
        let noise_estimated = !self.noise().is_fixed();

        let (hyperparameters, sigma, diagnostics) = if estimated.is_empty() && !noise_estimated {
            debug!("No estimated scales, skip optimization");
            (
                self.hyperparameters().init(),
                self.noise().init(),
                FitDiagnostics::default(),
            )
        } else {
            self.optimize_scales(&model)?
        };

        let conditioning = model.condition(&hyperparameters, sigma)?;
        let mean = conditioning.posterior_mean();
        let std = conditioning.posterior_var()?.mapv(|v| v.sqrt());
        let gam = AdditiveGp {
            model,
            hyperparameters,
            sigma,
            conditioning,
            mean,
            std,
            diagnostics,
        };
        info!("Fitted {gam}");
        Ok(gam)
    }

    /// Maximize the log marginal likelihood plus log priors of the estimated scales
    /// over their log10 values
    fn optimize_scales(
        &self,
        model: &AdditiveGpModel<F, K>,
    ) -> Result<(ResolvedHyperparameters<F>, F, FitDiagnostics)> {
        let estimated = self.hyperparameters().estimated();
        let noise_estimated = !self.noise().is_fixed();
        let settings: Vec<&Hyperparameter<F>> = estimated
            .iter()
            .map(|kind| self.hyperparameters().get(*kind))
            .chain(noise_estimated.then_some(self.noise()))
            .collect();
        let theta0 = Array1::from_iter(settings.iter().map(|h| h.init()));
        let bounds: Vec<(F, F)> = settings.iter().filter_map(|h| h.bounds()).collect();

        let base: f64 = 10.;
        let resolve = |x: &[f64]| -> (ResolvedHyperparameters<F>, F) {
            let mut values = self.hyperparameters().init();
            for (kind, v) in estimated.iter().zip(x.iter()) {
                values.set(*kind, F::cast(base.powf(*v)));
            }
            let sigma = if noise_estimated {
                F::cast(base.powf(x[x.len() - 1]))
            } else {
                self.noise().init()
            };
            (values, sigma)
        };
        let objfn = |x: &[f64], _gr: Option<&mut [f64]>, _params: &mut ()| -> f64 {
            let (values, sigma) = resolve(x);
            match model.condition(&values, sigma) {
                Ok(c) => {
                    let lp = c.log_likelihood
                        + self.hyperparameters().ln_prior(&values)
                        + self.noise().ln_prior(sigma);
                    -into_f64(lp)
                }
                Err(_) => f64::INFINITY,
            }
        };

        let (starts, bounds) = prepare_multistart(self.n_start(), &theta0, &bounds, self.seed());
        debug!("Optimize with multistart log10 theta = {starts:?} and bounds = {bounds:?}");
        let now = Instant::now();
        let results: Vec<OptimResult> = (0..starts.nrows())
            .into_par_iter()
            .map(|i| {
                optimize_params(
                    &objfn,
                    &starts.row(i).to_owned(),
                    &bounds,
                    CobylaParams {
                        maxeval: self.max_eval(),
                        ..CobylaParams::default()
                    },
                )
            })
            .collect();
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());

        let n_starts = results.len();
        let n_failed = results
            .iter()
            .filter(|r| r.status == OptimStatus::Failed)
            .count();
        let n_interrupted = results
            .iter()
            .filter(|r| r.status == OptimStatus::Interrupted)
            .count();
        let best = results
            .into_iter()
            .filter(|r| r.fval.is_finite())
            .min_by(|a, b| a.fval.total_cmp(&b.fval))
            .ok_or_else(|| {
                GamError::OptimizationFailed(format!(
                    "all {n_starts} starts failed to evaluate the marginal likelihood"
                ))
            })?;
        if n_failed > 0 {
            warn!("{n_failed} of {n_starts} hyperparameter optimization starts failed");
        }
        if n_interrupted > 0 {
            warn!("{n_interrupted} of {n_starts} hyperparameter optimization starts interrupted");
        }
        let max_eval_reached = best.status == OptimStatus::MaxEvalReached;
        if max_eval_reached {
            warn!(
                "Hyperparameter optimization stopped after max_eval={} evaluations \
                 without converging",
                self.max_eval()
            );
        }
        debug!("opt_params = {}, fval = {}", best.x, best.fval);

        let (values, sigma) = resolve(&best.x.to_vec());
        Ok((
            values,
            sigma,
            FitDiagnostics {
                n_starts,
                n_failed,
                n_interrupted,
                max_eval_reached,
            },
        ))
    }
}

impl<F: Float, K: Kernel<F>, D: Data<Elem = F>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GamError>
    for GamValidParams<F, K>
{
    type Object = AdditiveGp<F, K>;

    /// Fit the model from `(n_obs, 3)` records `[A, k, site]` and `y` targets
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let records = dataset.records();
        let n_sites = match self.n_sites() {
            Some(n_sites) => n_sites,
            None if records.ncols() == 3 => {
                let largest = site_labels(&records.column(2))?
                    .into_iter()
                    .max()
                    .unwrap_or(1);
                // a label larger than the number of observations implies an empty site anyway
                largest.clamp(1, records.nrows().max(1) as i64) as usize
            }
            None => 1,
        };
        let data = GamData::from_dataset(dataset, n_sites)?;
        self.fit_data(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::{GpHyperparameters, Prior};
    use crate::kernels::Matern52Kernel;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use linfa::ParamGuard;
    use ndarray::{concatenate, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::{Normal, Uniform};
    use rand_xoshiro::Xoshiro256Plus;

    fn init_log() {
        let env = env_logger::Env::new().filter_or("GPGAM_LOG", "info");
        let mut builder = env_logger::Builder::from_env(env);
        let builder = builder.is_test(true);
        builder.try_init().ok();
    }

    /// y = 1 + 2 A + sin(k) / 2 + 0.05 noise at 2 sites, k distinct within each site
    fn trend_data(n: usize) -> GamData<f64> {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let a = Array::random_using(n, Uniform::new(0., 1.), &mut rng);
        let k = Array::linspace(0., 5., n);
        let noise = Array::random_using(n, Normal::new(0., 0.05).unwrap(), &mut rng);
        let y = a.mapv(|v| 1. + 2. * v) + k.mapv(|v: f64| 0.5 * v.sin()) + noise;
        let site: Vec<i64> = (0..n).map(|i| 1 + (i % 2) as i64).collect();
        GamData::new(y, a, k, &site, 2).expect("valid data")
    }

    fn fixed_params() -> GamValidParams<f64, ExpQuadKernel> {
        GamParams::new(ExpQuadKernel())
            .hyperparameters(GpHyperparameters::fixed(1., 0.5, 1., 0.1))
            .noise(Hyperparameter::Fixed(0.05))
            .check()
            .expect("valid params")
    }

    #[test]
    fn test_fit_recovers_linear_trend() {
        init_log();
        let gam = fixed_params().fit_data(&trend_data(40)).expect("fit");
        assert_abs_diff_eq!(gam.beta(), 2., epsilon = 0.1);
        assert!(gam.beta_std() > 0. && gam.beta_std() < 0.1);
        assert_eq!(gam.diagnostics(), &FitDiagnostics::default());
        assert_eq!(gam.sigma(), 0.05);

        let fitted = gam.fitted().unwrap();
        let resid = gam.model().data().y() - &fitted;
        let rmse = (resid.mapv(|v| v * v).mean().unwrap()).sqrt();
        assert!(rmse < 0.1, "rmse = {rmse}");
        assert_eq!(gam.f_site().len(), 2);
        assert_eq!(gam.f_site()[1].len(), 20);
        assert_eq!(gam.f_site_std()[0].len(), 20);
        assert!(gam.f_k_std().iter().all(|v| *v >= 0.));
    }

    #[test]
    fn test_predict_at_training_inputs_equals_fitted() {
        let data = trend_data(20);
        let gam = fixed_params().fit_data(&data).unwrap();
        let site: Vec<i64> = data.sites().iter().map(|s| *s as i64 + 1).collect();
        let pred = gam.predict(data.a(), data.k(), &site).unwrap();
        assert_abs_diff_eq!(pred, gam.fitted().unwrap(), epsilon = 1e-6);

        let var = gam.predict_var(data.a(), data.k(), &site).unwrap();
        assert!(var.iter().all(|v| *v >= 0. && *v < 0.05 * 0.05 * 4.));
        let far = gam
            .predict_var(&ndarray::array![0.5], &ndarray::array![100.], &[1])
            .unwrap();
        assert!(far[0] > var[0]);
    }

    #[test]
    fn test_predict_rejects_unknown_site() {
        let gam = fixed_params().fit_data(&trend_data(10)).unwrap();
        let err = gam
            .predict(&ndarray::array![0.], &ndarray::array![1.], &[3])
            .unwrap_err();
        assert!(matches!(err, GamError::SiteOutOfRange { label: 3, .. }));
        assert!(gam
            .predict(&ndarray::array![0., 1.], &ndarray::array![1.], &[1])
            .is_err());
    }

    #[test]
    fn test_penalty_pulls_combined_effect_sum_toward_zero() {
        let data = trend_data(30);
        let total = |gam: &AdditiveGp<f64, ExpQuadKernel>| {
            gam.model().mean_effect(&gam.posterior_mean()).sum()
        };
        let free = fixed_params().fit_data(&data).unwrap();
        let penalized = GamParams::new_from_valid(&fixed_params())
            .mean_zero_penalty(Some(1.))
            .check()
            .unwrap()
            .fit_data(&data)
            .unwrap();
        assert!(total(&penalized).abs() < total(&free).abs());

        let weak = GamParams::new_from_valid(&fixed_params())
            .mean_zero_penalty(Some(1e-8))
            .check()
            .unwrap()
            .fit_data(&data)
            .unwrap();
        assert_abs_diff_eq!(total(&weak), total(&free), epsilon = 1e-2);
    }

    #[test]
    fn test_fit_estimated_scales() {
        init_log();
        let params = GamParams::new(Matern52Kernel())
            .n_start(2)
            .max_eval(50)
            .check()
            .unwrap();
        let gam = params.fit_data(&trend_data(20)).unwrap();
        let diag = gam.diagnostics();
        assert_eq!(diag.n_starts, 3);
        assert!(diag.n_failed < 3);
        assert!(gam.sigma() > 0. && gam.sigma().is_finite());
        assert!(gam.hyperparameters().is_valid());
        assert!(gam.log_marginal_likelihood().is_finite());
        let (lo, up) = params.hyperparameters().length_scale_k.bounds().unwrap();
        let rho = gam.hyperparameters().length_scale_k;
        assert!(lo * 0.999 <= rho && rho <= up * 1.001);
    }

    #[test]
    fn test_fit_only_noise_estimated() {
        let params = GamParams::new_from_valid(&fixed_params())
            .noise(Hyperparameter::estimated(Prior::HalfNormal { scale: 1. }, 0.5))
            .n_start(1)
            .check()
            .unwrap();
        let gam = params.fit_data(&trend_data(30)).unwrap();
        assert_eq!(gam.hyperparameters(), &fixed_params().hyperparameters().init());
        assert!(gam.sigma() < 0.5);
        let diag = gam.diagnostics();
        assert_eq!(diag.n_starts, 2);
        assert_eq!(diag.n_failed, 0);
        assert!(gam.log_marginal_likelihood().is_finite());
    }

    #[test]
    fn test_sample_posterior() {
        let gam = fixed_params().fit_data(&trend_data(20)).unwrap();
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let draws = gam.sample_posterior(500, &mut rng).unwrap();
        assert_eq!(draws.len(), 500);
        assert_eq!(draws[0].f_k.len(), 20);
        assert_eq!(draws[0].f_site[0].len(), 10);
        let mean_beta = draws.iter().map(|d| d.beta).sum::<f64>() / 500.;
        assert!((mean_beta - gam.beta()).abs() < 0.5 * gam.beta_std());
        for d in draws.iter().take(5) {
            assert_eq!(d.sigma, gam.sigma());
            assert_eq!(d.f_site[1].len(), 10);
            assert_eq!(gam.model().linear_predictor(d).unwrap().len(), 20);
        }
    }

    #[test]
    fn test_fit_dataset() {
        let data = trend_data(20);
        let sites = Array1::from_iter(data.sites().iter().map(|s| (s + 1) as f64));
        let records = concatenate![
            Axis(1),
            data.a().clone().insert_axis(Axis(1)),
            data.k().clone().insert_axis(Axis(1)),
            sites.insert_axis(Axis(1))
        ];
        let dataset = Dataset::new(records.clone(), data.y().clone());
        let gam = fixed_params().fit(&dataset).expect("fit");
        assert_eq!(gam.model().data().n_sites(), 2);
        let mut pred = Array1::zeros(5);
        gam.predict_inplace(&records.slice(s![..5, ..]), &mut pred);
        assert_abs_diff_eq!(pred, gam.fitted().unwrap().slice(s![..5]), epsilon = 1e-6);

        let err = GamParams::new_from_valid(&fixed_params())
            .n_sites(Some(1))
            .check()
            .unwrap()
            .fit(&dataset)
            .unwrap_err();
        assert!(matches!(err, GamError::SiteOutOfRange { label: 2, .. }));
        assert!(err.is_validation());
    }
}
