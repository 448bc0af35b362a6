//! This library implements a Bayesian generalized additive model whose smooth terms are
//! [Gaussian processes](https://en.wikipedia.org/wiki/Gaussian_process):
//!
//! ```text
//! y_i ~ Normal(intercept + A_i * beta + f(k_i) + f(k_i, site_i), sigma)
//! ```
//!
//! where `f(k)` is a smooth of the covariate `k` shared by all observations and `f(k, site)`
//! a smooth of `k` specific to each site, both with the exponentiated quadratic covariance
//! `alpha^2 * exp(-(k - k')^2 / (2 rho^2))` by default (see [kernels]).
//!
//! The model definition [AdditiveGpModel] is parameterized by [GamParams] and bound to a
//! validated observation set [GamData]. It evaluates the unnormalized log density of any
//! draw of its random quantities, directly or through the [LogDensity] trait on a flat
//! unconstrained vector for an external sampler.
//!
//! [GamValidParams] also implements linfa `Fit`, producing an [AdditiveGp] whose scales
//! are estimated by maximizing their marginal posterior, the latent smooth values
//! being then exactly gaussian.
//!
//! An optional soft mean-zero penalty (see [MeanZeroPenalty]) nudges the combined
//! intercept, linear and shared smooth effect towards a zero sum over the observations.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod covariance;
mod data;
mod errors;
mod hyperparameters;
pub mod kernels;
mod model;
mod parameters;
mod penalty;
mod utils;

mod optimization;

pub use algorithm::*;
pub use data::*;
pub use errors::*;
pub use hyperparameters::*;
pub use kernels::{ExpQuadKernel, Kernel, Matern52Kernel};
pub use model::*;
pub use parameters::*;
pub use penalty::*;
pub use utils::pairwise_differences;
