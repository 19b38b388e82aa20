//! Channel statistics that reduce an activation to a saliency field.
//!
//! Every map takes a `(batch, channels, height, width)` activation and
//! removes the channel axis, yielding `(batch, height, width)`.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use smoe_core::{activation_shape, Result, SaliencyError};

/// Additive guard against `log(0)` and division by a vanishing survival term.
pub const EPSILON: f32 = 1e-7;

/// `1 / sqrt(2π)`
const INV_SQRT_2PI: f32 = 0.398_942_28;
/// `sqrt(2πe)`
const SQRT_2PI_E: f32 = 4.132_731_4;

/// Reduce the channels of an activation to one entropy-like statistic.
pub trait ScaleMap<B: Backend>: Send + Sync {
    /// Compute the saliency field of shape (batch, height, width).
    ///
    /// # Errors
    ///
    /// Returns [`SaliencyError::InvalidShape`] if the activation has fewer
    /// than two channels or no spatial extent.
    fn compute(&self, activation: Tensor<B, 4>) -> Result<Tensor<B, 3>>;

    /// Get the name of this statistic for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Every statistic needs a non-empty activation with at least two channels.
fn check_activation<B: Backend>(activation: &Tensor<B, 4>) -> Result<()> {
    let shape = activation_shape(activation);
    if shape.batch() == 0 || !shape.spatial().is_valid() {
        return Err(SaliencyError::InvalidShape {
            expected: "non-empty (batch, channels, height, width)".to_string(),
            got: shape.to_string(),
        });
    }
    if shape.channels() < 2 {
        return Err(SaliencyError::InvalidShape {
            expected: "at least 2 channels".to_string(),
            got: shape.to_string(),
        });
    }
    Ok(())
}

/// Mean and unbiased standard deviation along `dim`, keeping the dimension.
pub(crate) fn mean_std<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    dim: usize,
) -> (Tensor<B, D>, Tensor<B, D>) {
    let n = x.dims()[dim];
    let mean = x.clone().mean_dim(dim);
    let centered = x - mean.clone();
    let var = (centered.clone() * centered).sum_dim(dim) / (n as f32 - 1.0);
    (mean, var.sqrt())
}

/// SMOE scale: `(log2(mean(x)) - mean(log2(x))) * mean(x)` over channels.
///
/// The difference between the log of the arithmetic mean and the mean of
/// the logs is non-negative and grows with channel dispersion. Inputs must
/// be non-negative, i.e. taken after a ReLU; set `relu` to clamp here
/// instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoeScale {
    /// Clamp the activation at zero before computing the statistic.
    #[serde(default)]
    pub relu: bool,
}

impl SmoeScale {
    /// Create a SMOE scale map that expects non-negative input.
    #[must_use]
    pub const fn new() -> Self {
        Self { relu: false }
    }

    /// Clamp negative activations to zero first.
    #[must_use]
    pub const fn with_relu(mut self, relu: bool) -> Self {
        self.relu = relu;
        self
    }
}

impl<B: Backend> ScaleMap<B> for SmoeScale {
    fn compute(&self, activation: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
        check_activation(&activation)?;

        let x = if self.relu {
            activation.clamp_min(0.0)
        } else {
            activation
        };
        let x = x + EPSILON;

        let ln2 = std::f32::consts::LN_2;
        let m = x.clone().mean_dim(1);
        let mean_log = (x.log() / ln2).mean_dim(1);
        let k = m.clone().log() / ln2 - mean_log;

        Ok((k * m).squeeze::<3>(1))
    }

    fn name(&self) -> &str {
        "SmoeScale"
    }
}

/// Plain unbiased standard deviation over channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdMap;

impl<B: Backend> ScaleMap<B> for StdMap {
    fn compute(&self, activation: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
        check_activation(&activation)?;
        let (_, std) = mean_std(activation, 1);
        Ok(std.squeeze::<3>(1))
    }

    fn name(&self) -> &str {
        "StdMap"
    }
}

/// Differential entropy of a normal distribution truncated below at zero.
///
/// Each pixel's channel vector is treated as draws from `N(m, s²)` truncated
/// at 0. With `α = -m / s` and survival `Z = 1 - Φ(α) + ε` the entropy is
/// `ln(sqrt(2πe) · s · Z) + α·φ(α) / (2Z)`.
///
/// Unlike [`SmoeScale`] this expects pre-ReLU activations and accepts any
/// real value. Channels with zero spread produce non-finite values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncNormalEntropy;

impl TruncNormalEntropy {
    fn pdf<B: Backend>(eta: Tensor<B, 3>) -> Tensor<B, 3> {
        (eta.clone() * eta * -0.5).exp() * INV_SQRT_2PI
    }

    fn cdf<B: Backend>(eta: Tensor<B, 3>) -> Tensor<B, 3> {
        ((eta / std::f32::consts::SQRT_2).erf() + 1.0) * 0.5
    }
}

impl<B: Backend> ScaleMap<B> for TruncNormalEntropy {
    fn compute(&self, activation: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
        check_activation(&activation)?;

        let (m, s) = mean_std(activation, 1);
        let m = m.squeeze::<3>(1);
        let s = s.squeeze::<3>(1);

        let alpha = m.neg() / s.clone();
        let pdf = Self::pdf(alpha.clone());
        let z = (Self::cdf(alpha.clone()).neg() + 1.0) + EPSILON;

        let t1 = (s * SQRT_2PI_E * z.clone()).log();
        let t2 = alpha * pdf / (z * 2.0);

        Ok(t1 + t2)
    }

    fn name(&self) -> &str {
        "TruncNormalEntropy"
    }
}

/// Selects one of the channel statistics by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    /// [`SmoeScale`].
    SmoeScale(SmoeScale),
    /// [`StdMap`].
    Std,
    /// [`TruncNormalEntropy`].
    TruncNormalEntropy,
}

impl Default for ScaleMethod {
    fn default() -> Self {
        Self::SmoeScale(SmoeScale::new())
    }
}

impl<B: Backend> ScaleMap<B> for ScaleMethod {
    fn compute(&self, activation: Tensor<B, 4>) -> Result<Tensor<B, 3>> {
        match self {
            Self::SmoeScale(map) => map.compute(activation),
            Self::Std => StdMap.compute(activation),
            Self::TruncNormalEntropy => TruncNormalEntropy.compute(activation),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::SmoeScale(_) => "SmoeScale",
            Self::Std => "StdMap",
            Self::TruncNormalEntropy => "TruncNormalEntropy",
        }
    }
}
