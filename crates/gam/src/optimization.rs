use crate::utils::into_f64;
use linfa::Float;
use ndarray::{arr1, s, Array, Array1, Array2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Outcome of one local optimization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OptimStatus {
    Converged,
    MaxEvalReached,
    /// Stopped by an optimizer error at a point with a finite objective
    Interrupted,
    Failed,
}

#[derive(Clone, Debug)]
pub(crate) struct OptimResult {
    pub fval: f64,
    pub x: Array1<f64>,
    pub status: OptimStatus,
}

/// Starting points of the hyperparameter optimization on log10 scale:
/// the initial guess first, then `n_start` points drawn uniformly within bounds.
pub(crate) fn prepare_multistart<F: Float>(
    n_start: usize,
    theta0: &Array1<F>,
    bounds: &[(F, F)],
    seed: u64,
) -> (Array2<F>, Vec<(F, F)>) {
    // Use log10 theta as optimization parameter
    let bounds: Vec<(F, F)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut theta0s = Array2::zeros((n_start + 1, theta0.len()));
    theta0s.row_mut(0).assign(&theta0.mapv(|v| F::log10(v)));

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    Zip::from(theta0s.slice_mut(s![1.., ..]).rows_mut()).for_each(|mut theta| {
        let vals = bounds
            .iter()
            .map(|(a, b)| if a < b { rng.gen_range(*a..*b) } else { *a })
            .collect();
        theta.assign(&Array::from_vec(vals))
    });
    (theta0s, bounds)
}

/// Optimize hyperparameters given an initial guess and bounds with cobyla
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    cobyla: CobylaParams,
) -> OptimResult
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    use cobyla::{minimize, FailStatus, Func, StopTols, SuccessStatus};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0: Vec<f64> = param0.iter().map(|v| into_f64(*v)).collect();

    let bounds: Vec<_> = bounds
        .iter()
        .map(|(lo, up)| (into_f64(*lo), into_f64(*up)))
        .collect();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        &bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((status, x_opt, fval)) => {
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            let status = if fval.is_infinite() {
                OptimStatus::Failed
            } else if matches!(status, SuccessStatus::MaxEvalReached) {
                OptimStatus::MaxEvalReached
            } else {
                OptimStatus::Converged
            };
            OptimResult {
                fval,
                x: arr1(&x_opt),
                status,
            }
        }
        Err((status, x_opt, _)) => {
            let fval = objfn(&x_opt, None, &mut ());
            let status = if !fval.is_finite() {
                log::warn!("Cobyla optimizer failed on hyperparameters status={status:?}");
                OptimStatus::Failed
            } else if matches!(status, FailStatus::RoundoffLimited) {
                log::debug!("Cobyla optimizer stopped on roundoff, fval={fval}");
                OptimStatus::Converged
            } else {
                log::warn!("Cobyla optimizer interrupted status={status:?}, keep fval={fval}");
                OptimStatus::Interrupted
            };
            OptimResult {
                fval: if fval.is_finite() { fval } else { f64::INFINITY },
                x: arr1(&x_opt),
                status,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_multistart_within_log_bounds() {
        let bounds = [(1e-2, 1e2), (1e-4, 1.)];
        let (starts, log_bounds) = prepare_multistart(5, &array![1., 0.5], &bounds, 42);
        assert_eq!(starts.dim(), (6, 2));
        assert_abs_diff_eq!(log_bounds[0].0, -2., epsilon = 1e-12);
        assert_abs_diff_eq!(starts[[0, 1]], 0.5f64.log10(), epsilon = 1e-12);
        for row in starts.rows() {
            for (v, (lo, up)) in row.iter().zip(log_bounds.iter()) {
                assert!(lo <= v && v <= up);
            }
        }
        let (again, _) = prepare_multistart(5, &array![1., 0.5], &bounds, 42);
        assert_eq!(starts, again);
    }

    #[test]
    fn test_optimize_quadratic() {
        let objfn = |x: &[f64], _: Option<&mut [f64]>, _: &mut ()| -> f64 {
            (x[0] - 0.3).powi(2) + (x[1] + 0.2).powi(2)
        };
        let res = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-1., 1.), (-1., 1.)],
            CobylaParams {
                maxeval: 500,
                ftol_rel: 1e-10,
                ..CobylaParams::default()
            },
        );
        assert_ne!(res.status, OptimStatus::Failed);
        assert_abs_diff_eq!(res.x, array![0.3, -0.2], epsilon = 1e-3);
    }

    #[test]
    fn test_optimize_single_variable_tight_tolerance() {
        // a tight tolerance on a flat 1-d objective ends on roundoff
        let objfn = |x: &[f64], _: Option<&mut [f64]>, _: &mut ()| -> f64 {
            1. + 1e-3 * (x[0] - 0.25).powi(2)
        };
        let res = optimize_params(
            objfn,
            &array![-1.],
            &[(-2., 2.)],
            CobylaParams {
                maxeval: 500,
                ftol_rel: 1e-15,
                ..CobylaParams::default()
            },
        );
        assert!(matches!(
            res.status,
            OptimStatus::Converged | OptimStatus::MaxEvalReached
        ));
        assert!(res.fval.is_finite());
        assert_abs_diff_eq!(
            res.fval,
            objfn(res.x.as_slice().unwrap(), None, &mut ()),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(res.x[0], 0.25, epsilon = 1e-2);
    }
}
