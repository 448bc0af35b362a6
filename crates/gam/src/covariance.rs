//! Prior covariance construction of the smooth terms and gaussian log densities.

use crate::data::GamData;
use crate::errors::{CovarianceBlock, GamError, Result};
use crate::kernels::Kernel;
use crate::utils::pairwise_differences;
use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

/// Compute the `(n, n)` covariance matrix of a kernel at the points `x`.
///
/// Entry `(i, j)` is `alpha^2 * r(x_i - x_j; rho)` and `nugget * alpha^2` is added
/// to the diagonal.
pub fn covariance_matrix<F: Float, K: Kernel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    output_scale: F,
    length_scale: F,
    nugget: F,
) -> Array2<F> {
    let d = pairwise_differences(x, x);
    let mut cov = kernel.value(&d, output_scale, length_scale);
    let jitter = nugget * output_scale * output_scale;
    cov.diag_mut().mapv_inplace(|v| v + jitter);
    cov
}

/// Compute the `(m, n)` cross covariance matrix between points `x_new` and `x`
pub fn cross_covariance<F: Float, K: Kernel<F>>(
    kernel: &K,
    x_new: &ArrayBase<impl Data<Elem = F>, Ix1>,
    x: &ArrayBase<impl Data<Elem = F>, Ix1>,
    output_scale: F,
    length_scale: F,
) -> Array2<F> {
    kernel.value(&pairwise_differences(x_new, x), output_scale, length_scale)
}

/// Compute the covariance matrix of the `f(k, site)` smooth of every site,
/// each one built on the `k` values of the site observations only.
pub fn site_covariances<F: Float, K: Kernel<F>>(
    kernel: &K,
    data: &GamData<F>,
    output_scale: F,
    length_scale: F,
    nugget: F,
) -> Vec<Array2<F>> {
    (0..data.n_sites())
        .map(|s| covariance_matrix(kernel, &data.site_k(s), output_scale, length_scale, nugget))
        .collect()
}

/// Cholesky factor `L` of a covariance matrix `C = L.L^t`
#[derive(Clone, Debug)]
pub struct CovarianceFactor<F: Float> {
    chol: Array2<F>,
    block: CovarianceBlock,
}

impl<F: Float> CovarianceFactor<F> {
    /// Factorize `cov`, failing with the `block` context when it is not positive definite
    pub fn new(cov: &ArrayBase<impl Data<Elem = F>, Ix2>, block: CovarianceBlock) -> Result<Self> {
        let chol = cov
            .cholesky()
            .map_err(|source| GamError::NotPositiveDefinite { block, source })?;
        // NaN entries go through the factorization unnoticed
        if chol.diag().iter().any(|v| !(*v > F::zero() && v.is_finite())) {
            return Err(GamError::NotPositiveDefinite {
                block,
                source: linfa_linalg::LinalgError::NotPositiveDefinite,
            });
        }
        Ok(CovarianceFactor { chol, block })
    }

    /// Lower triangular factor
    pub fn lower(&self) -> &Array2<F> {
        &self.chol
    }

    /// Which covariance matrix was factorized
    pub fn block(&self) -> CovarianceBlock {
        self.block
    }

    /// Dimension of the covariance matrix
    pub fn dim(&self) -> usize {
        self.chol.nrows()
    }

    /// Log determinant of the covariance matrix
    pub fn log_det(&self) -> F {
        // The determinant of C is equal to the squared product of
        // the diagonal elements of its Cholesky decomposition
        self.chol.diag().mapv(|v| v.ln()).sum() * F::cast(2.)
    }

    /// Solve `L.x = b`
    pub fn solve_lower(&self, b: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        Ok(self.chol.solve_triangular(b, UPLO::Lower)?)
    }

    /// Solve `C.x = b`
    pub fn solve(&self, b: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array2<F>> {
        let z = self.solve_lower(b)?;
        Ok(self.chol.t().solve_triangular_into(z, UPLO::Upper)?)
    }

    /// Solve `C.x = b` for a vector `b`
    pub fn solve_vec(&self, b: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<Array1<F>> {
        let x = self.solve(&b.to_owned().insert_axis(Axis(1)))?;
        Ok(x.remove_axis(Axis(1)))
    }

    /// Log density of `Normal(0, C)` at `f`
    pub fn log_density(&self, f: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        if f.len() != self.dim() {
            return Err(GamError::InvalidValue(format!(
                "{} expects a vector of length {}, got {}",
                self.block,
                self.dim(),
                f.len()
            )));
        }
        let z = self.solve_lower(&f.to_owned().insert_axis(Axis(1)))?;
        let n = F::cast(self.dim());
        let ln_2pi = F::cast((2. * std::f64::consts::PI).ln());
        Ok(F::cast(-0.5) * (n * ln_2pi + self.log_det() + z.mapv(|v| v * v).sum()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{ExpQuadKernel, Matern52Kernel};
    use approx::assert_abs_diff_eq;
    use linfa_linalg::eigh::*;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn min_eigenvalue(cov: &Array2<f64>) -> f64 {
        let (vals, _) = cov.to_owned().eigh_into().expect("eigen decomposition");
        vals.iter().cloned().fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_four_points_unit_scales() {
        let k = array![0., 1., 2., 3.];
        let cov = covariance_matrix(&ExpQuadKernel(), &k, 1., 1., 0.);
        assert_eq!(cov.dim(), (4, 4));
        assert_abs_diff_eq!(cov[[0, 1]], (-0.5f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 1]], 0.6065, epsilon = 1e-4);
        assert_abs_diff_eq!(cov[[0, 2]], (-2f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(cov[[0, 2]], 0.1353, epsilon = 1e-4);
    }

    #[test]
    fn test_symmetric_psd_with_exact_diagonal() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array::random_using(30, Uniform::new(-5., 5.), &mut rng);
        for (alpha, rho) in [(1., 1.), (2.5, 0.3), (0.2, 4.)] {
            let cov = covariance_matrix(&ExpQuadKernel(), &x, alpha, rho, 0.);
            assert_abs_diff_eq!(cov, cov.t(), epsilon = 0.);
            for v in cov.diag() {
                assert_eq!(*v, alpha * alpha);
            }
            assert!(min_eigenvalue(&cov) >= -1e-8 * alpha * alpha);
        }
        let cov = covariance_matrix(&Matern52Kernel(), &x, 1.3, 0.8, 0.);
        assert!(min_eigenvalue(&cov) >= -1e-8);
    }

    #[test]
    fn test_length_scale_limits() {
        let x = array![0., 0.7, 1.9, 3.2];
        let alpha = 1.7;
        let alpha2 = alpha * alpha;
        let smooth = covariance_matrix(&ExpQuadKernel(), &x, alpha, 1e6, 0.);
        assert_abs_diff_eq!(smooth, Array2::from_elem((4, 4), alpha2), epsilon = 1e-9);
        let rough = covariance_matrix(&ExpQuadKernel(), &x, alpha, 1e-3, 0.);
        assert_abs_diff_eq!(
            rough,
            Array2::from_diag(&Array1::from_elem(4, alpha2)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_nugget_on_diagonal() {
        let x = array![0., 1.];
        let cov = covariance_matrix(&ExpQuadKernel(), &x, 2., 1., 1e-6);
        assert_abs_diff_eq!(cov[[0, 0]], 4. * (1. + 1e-6), epsilon = 1e-15);
        assert_abs_diff_eq!(cov[[0, 1]], 4. * (-0.5f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_cross_covariance() {
        let cross = cross_covariance(&ExpQuadKernel(), &array![0.5], &array![0., 1., 2.5], 1., 1.);
        assert_eq!(cross.dim(), (1, 3));
        assert_abs_diff_eq!(cross[[0, 0]], cross[[0, 1]]);
        assert_abs_diff_eq!(cross[[0, 2]], (-2f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_log_density_matches_closed_form() {
        // 2d normal with covariance [[1, r], [r, 1]]
        let r = (-0.5f64).exp();
        let cov = covariance_matrix(&ExpQuadKernel(), &array![0., 1.], 1., 1., 0.);
        let factor = CovarianceFactor::new(&cov, CovarianceBlock::Shared).expect("factor");
        let f = array![0.3, -0.2];
        let det = 1. - r * r;
        let quad = (f[0] * f[0] - 2. * r * f[0] * f[1] + f[1] * f[1]) / det;
        let expected = -(2. * std::f64::consts::PI).ln() - 0.5 * det.ln() - 0.5 * quad;
        assert_abs_diff_eq!(factor.log_density(&f).unwrap(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(factor.log_det(), det.ln(), epsilon = 1e-12);

        let x = factor.solve_vec(&f).unwrap();
        assert_abs_diff_eq!(cov.dot(&x), f, epsilon = 1e-12);
        assert!(factor.log_density(&array![1.]).is_err());
    }

    #[test]
    fn test_singular_covariance_reports_block() {
        // duplicated point without nugget
        let cov = covariance_matrix(&ExpQuadKernel(), &array![0.5, 0.5, 1.], 1., 1., 0.);
        let err = CovarianceFactor::new(&cov, CovarianceBlock::Site(2)).unwrap_err();
        match err {
            GamError::NotPositiveDefinite { block, .. } => {
                assert_eq!(block, CovarianceBlock::Site(2));
            }
            other => panic!("unexpected error {other}"),
        }

        let cov = array![[1., 2.], [2., 1.]];
        let err = CovarianceFactor::new(&cov, CovarianceBlock::Site(0)).unwrap_err();
        assert!(err.to_string().contains("site 1"));
        assert!(!err.is_validation());
    }
}
