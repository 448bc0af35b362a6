use std::fmt;
use thiserror::Error;

/// A result type for additive GP model definition and fitting
pub type Result<T> = std::result::Result<T, GamError>;

/// Identifies which covariance matrix a numerical failure comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CovarianceBlock {
    /// The `N x N` prior covariance of the shared smooth `f(k)`
    Shared,
    /// The prior covariance of the smooth `f(k, site)` restricted to a site (0-based index)
    Site(usize),
    /// The marginal covariance of the observations used when fitting
    Marginal,
    /// The posterior covariance of the latent effects used when sampling
    Posterior,
}

impl fmt::Display for CovarianceBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CovarianceBlock::Shared => write!(f, "shared f(k) covariance"),
            CovarianceBlock::Site(s) => write!(f, "f(k, site) covariance of site {}", s + 1),
            CovarianceBlock::Marginal => write!(f, "marginal covariance of y"),
            CovarianceBlock::Posterior => write!(f, "posterior covariance of latent effects"),
        }
    }
}

/// An error when defining, evaluating or fitting an [`AdditiveGpModel`](crate::AdditiveGpModel)
#[derive(Error, Debug)]
pub enum GamError {
    /// When the observation set is malformed (sizes, non finite values)
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// When a site label is not in `[1, n_sites]`
    #[error("Site label {label} of observation {index} is outside [1, {n_sites}]")]
    SiteOutOfRange {
        /// Observation index (0-based)
        index: usize,
        /// Offending label as given
        label: i64,
        /// Declared number of sites
        n_sites: usize,
    },
    /// When a declared site owns no observation
    #[error("Site {site} has no observation")]
    EmptySite {
        /// Site label (1-based)
        site: usize,
    },
    /// When the same covariate value appears twice inside one site
    #[error("Duplicate k value {value} in site {site} makes its covariance singular")]
    DuplicateCovariate {
        /// Site label (1-based)
        site: usize,
        /// Repeated covariate value
        value: f64,
    },
    /// When a covariance matrix cannot be Cholesky factorized
    #[error("The {block} is not positive definite: {source}")]
    NotPositiveDefinite {
        /// Which matrix failed
        block: CovarianceBlock,
        /// Underlying factorization error
        #[source]
        source: linfa_linalg::LinalgError,
    },
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When hyperparameter estimation does not produce any usable value
    #[error("Optimization error: {0}")]
    OptimizationFailed(String),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
}

impl GamError {
    /// Whether the error was raised by input or configuration validation,
    /// i.e. before any numerical work took place
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GamError::InvalidData(_)
                | GamError::SiteOutOfRange { .. }
                | GamError::EmptySite { .. }
                | GamError::DuplicateCovariate { .. }
                | GamError::InvalidValue(_)
        )
    }
}
