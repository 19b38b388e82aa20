//! Squash unbounded saliency fields into `[0, 1]`.

use burn::prelude::*;

use smoe_core::{Result, SaliencyError};

use crate::scale::mean_std;

/// Per-sample normal CDF rescaling of a saliency field.
///
/// Each batch element is flattened, its own mean `m` and unbiased standard
/// deviation `s` are taken, and every value is mapped through
/// `0.5 · (1 + erf((x - m) / (s·√2)))`. Values at the sample mean land on
/// 0.5; outliers saturate towards 0 or 1.
///
/// A sample whose values are all equal has `s = 0` and yields NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalize2d;

impl Normalize2d {
    /// Create the normalizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Normalize a field of shape (batch, height, width).
    ///
    /// # Errors
    ///
    /// Returns [`SaliencyError::InvalidShape`] if a sample holds fewer than
    /// two values, where the standard deviation is undefined.
    pub fn apply<B: Backend>(&self, field: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let [batch, height, width] = field.dims();
        let n = height * width;
        if batch == 0 || n < 2 {
            return Err(SaliencyError::InvalidShape {
                expected: "at least 2 values per sample".to_string(),
                got: format!("{:?}", [batch, height, width]),
            });
        }

        let flat = field.reshape([batch, n]);
        let (m, s) = mean_std(flat.clone(), 1);

        let z = (flat - m) / (s * std::f32::consts::SQRT_2);
        let out = (z.erf() + 1.0) * 0.5;

        Ok(out.reshape([batch, height, width]))
    }
}
