//! Bayesian generalized additive models with Gaussian process smooth terms.
//!
//! The response is modeled as an intercept, a linear effect of a covariate `A`, a smooth
//! effect of a covariate `k` shared by every observation and a smooth effect of `k`
//! specific to each site:
//!
//! ```text
//! y_i ~ Normal(intercept + A_i * beta + f(k_i) + f(k_i, site_i), sigma)
//! ```
//!
//! Smooth terms are Gaussian processes whose length and output scales are either given
//! or estimated, see [GpHyperparameters].
//!
//! # Example
//!
//! ```
//! use gpgam::{ExpQuadKernel, GamData, GamParams, GpHyperparameters, Hyperparameter};
//! use linfa::ParamGuard;
//! use ndarray::array;
//!
//! let data = GamData::new(
//!     array![1.1f64, 2.0, 3.2, 3.9, 1.0, 2.1],
//!     array![0., 0.5, 1., 1.5, 0., 0.5],
//!     array![0., 1., 2., 3., 0.5, 1.5],
//!     &[1, 1, 1, 1, 2, 2],
//!     2,
//! )?;
//!
//! let params = GamParams::new(ExpQuadKernel())
//!     .hyperparameters(GpHyperparameters::fixed(1., 1., 1., 0.5))
//!     .noise(Hyperparameter::Fixed(0.1))
//!     .mean_zero_penalty(Some(1e-4))
//!     .check()?;
//!
//! // log density of a draw, the entry point of an external sampler
//! let model = params.build(&data)?;
//! let draw = model.unpack(&model.initial_point())?;
//! assert!(model.log_density_draw(&draw)?.is_finite());
//!
//! // or fit the model directly
//! let gam = params.fit_data(&data)?;
//! let pred = gam.predict(&array![0.25], &array![0.5], &[1])?;
//! assert_eq!(pred.len(), 1);
//! # Ok::<(), gpgam::GamError>(())
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub use gpgam_model::*;
