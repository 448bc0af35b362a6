//! A module for stationary covariance kernels of the smooth terms of the additive model.
//!
//! Kernels are defined on a scalar covariate and parameterized by a length scale `rho`
//! and an output scale `alpha`, the covariance between two points at distance `d` being
//! `alpha^2 * r(d; rho)` where `r` is the correlation function of the kernel.
//!
//! The following kernels are implemented:
//! * exponentiated quadratic (aka squared exponential),
//! * matern 5/2.

use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for using a stationary kernel as GP prior covariance of a smooth term
pub trait Kernel<F: Float>: Clone + Copy + Default + fmt::Display + Send + Sync {
    /// Correlation `r(d; rho)` between two points at distance `d` given the length scale `rho`.
    /// Equals 1 at `d = 0`.
    fn correlation(&self, d: F, length_scale: F) -> F;

    /// Covariance `alpha^2 * r(d; rho)` between two points at distance `d`
    fn covariance(&self, d: F, output_scale: F, length_scale: F) -> F {
        output_scale * output_scale * self.correlation(d, length_scale)
    }

    /// Covariance values for a matrix of differences `d` (any shape)
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        output_scale: F,
        length_scale: F,
    ) -> Array2<F> {
        d.mapv(|v| self.covariance(v, output_scale, length_scale))
    }
}

/// Exponentiated quadratic kernel `alpha^2 * exp(-d^2 / (2 rho^2))`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ExpQuadKernel();

impl From<ExpQuadKernel> for String {
    fn from(_item: ExpQuadKernel) -> String {
        "ExpQuad".to_string()
    }
}

impl TryFrom<String> for ExpQuadKernel {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "ExpQuad" {
            Ok(Self::default())
        } else {
            Err("Bad string value for ExpQuadKernel, should be \'ExpQuad\'")
        }
    }
}

impl<F: Float> Kernel<F> for ExpQuadKernel {
    /// exp( - d^2 / (2 * rho^2) )
    fn correlation(&self, d: F, length_scale: F) -> F {
        let z = d / length_scale;
        F::exp(F::cast(-0.5) * z * z)
    }
}

impl fmt::Display for ExpQuadKernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExpQuad")
    }
}

/// Matern 5/2 kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct Matern52Kernel();

impl From<Matern52Kernel> for String {
    fn from(_item: Matern52Kernel) -> String {
        "Matern52".to_string()
    }
}

impl TryFrom<String> for Matern52Kernel {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "Matern52" {
            Ok(Self::default())
        } else {
            Err("Bad string value for Matern52Kernel, should be \'Matern52\'")
        }
    }
}

impl<F: Float> Kernel<F> for Matern52Kernel {
    /// (1 + sqrt(5) * |d| / rho + 5 * d^2 / (3 * rho^2)) * exp( - sqrt(5) * |d| / rho )
    fn correlation(&self, d: F, length_scale: F) -> F {
        let z = F::cast(5.).sqrt() * d.abs() / length_scale;
        (F::one() + z + z * z / F::cast(3.)) * F::exp(-z)
    }
}

impl fmt::Display for Matern52Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern52")
    }
}
