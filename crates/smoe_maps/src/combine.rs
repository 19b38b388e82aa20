//! Fusion of per-layer saliency maps into one weighted map.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use smoe_core::{MapSize, Result, SaliencyError};

use crate::resize::{resize_field, ResizeMode};

/// Per-layer weights for [`CombineSaliencyMaps`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerWeights {
    /// Every layer weighs 1.0.
    #[default]
    Uniform,
    /// One weight broadcast to every layer.
    Scalar(f32),
    /// One weight per layer, in observation order.
    PerLayer(Vec<f32>),
}

impl LayerWeights {
    /// Expand into exactly `layers` weights.
    ///
    /// # Errors
    ///
    /// Fails if `layers` is zero, a weight is not finite and positive, or a
    /// per-layer list has the wrong length. A one-element list is not
    /// broadcast; use [`LayerWeights::Scalar`] for that.
    pub fn resolve(&self, layers: usize) -> Result<Vec<f32>> {
        if layers == 0 {
            return Err(SaliencyError::config("at least one layer is required"));
        }

        let weights = match self {
            Self::Uniform => vec![1.0; layers],
            Self::Scalar(w) => vec![*w; layers],
            Self::PerLayer(ws) => {
                if ws.len() != layers {
                    return Err(SaliencyError::LayerCountMismatch {
                        expected: layers,
                        got: ws.len(),
                    });
                }
                ws.clone()
            }
        };

        if let Some(bad) = weights.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(SaliencyError::config(format!(
                "layer weights must be finite and positive, got {bad}"
            )));
        }

        Ok(weights)
    }
}

impl From<f32> for LayerWeights {
    fn from(weight: f32) -> Self {
        Self::Scalar(weight)
    }
}

impl From<Vec<f32>> for LayerWeights {
    fn from(weights: Vec<f32>) -> Self {
        Self::PerLayer(weights)
    }
}

/// Configuration for [`CombineSaliencyMaps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombineConfig {
    /// Resolution of the combined map.
    pub output_size: MapSize,
    /// Number of layer maps combined per call.
    pub layers: usize,
    /// Weight of each layer in the combined map.
    pub weights: LayerWeights,
    /// Interpolation used when resizing layer maps.
    pub resize_mode: ResizeMode,
    /// Square each resized map before weighting.
    pub magnitude: bool,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            output_size: MapSize::default(),
            layers: 5,
            weights: LayerWeights::Uniform,
            resize_mode: ResizeMode::Bilinear,
            magnitude: false,
        }
    }
}

impl CombineConfig {
    /// Create a config for `layers` maps combined at `output_size`.
    #[must_use]
    pub fn new(output_size: MapSize, layers: usize) -> Self {
        Self {
            output_size,
            layers,
            ..Default::default()
        }
    }

    /// Set the layer weights.
    #[must_use]
    pub fn with_weights(mut self, weights: impl Into<LayerWeights>) -> Self {
        self.weights = weights.into();
        self
    }

    /// Set the resize mode.
    #[must_use]
    pub fn with_resize_mode(mut self, mode: ResizeMode) -> Self {
        self.resize_mode = mode;
        self
    }

    /// Square layer maps before fusion.
    #[must_use]
    pub fn with_magnitude(mut self, magnitude: bool) -> Self {
        self.magnitude = magnitude;
        self
    }

    /// Build the combiner, validating sizes and weights.
    ///
    /// # Errors
    ///
    /// See [`CombineSaliencyMaps::new`].
    pub fn init(self) -> Result<CombineSaliencyMaps> {
        CombineSaliencyMaps::new(self)
    }
}

/// Output of one [`CombineSaliencyMaps::combine`] call.
#[derive(Debug, Clone)]
pub struct CombinedMaps<B: Backend> {
    /// Weighted fusion, shape (batch, height, width).
    pub combined: Tensor<B, 3>,
    /// Resized (and, in magnitude mode, squared) layer maps before
    /// weighting, shape (batch, layers, height, width).
    pub stacked: Tensor<B, 4>,
}

/// Resizes layer maps to one resolution and fuses them by weighted mean.
#[derive(Debug, Clone)]
pub struct CombineSaliencyMaps {
    config: CombineConfig,
    weights: Vec<f32>,
    weight_sum: f32,
}

impl CombineSaliencyMaps {
    /// Create a combiner.
    ///
    /// # Errors
    ///
    /// Fails for an empty output size or invalid weights.
    pub fn new(config: CombineConfig) -> Result<Self> {
        if !config.output_size.is_valid() {
            return Err(SaliencyError::config(format!(
                "output size must be positive, got {}",
                config.output_size
            )));
        }
        let weights = config.weights.resolve(config.layers)?;
        let weight_sum = weights.iter().sum();

        Ok(Self {
            config,
            weights,
            weight_sum,
        })
    }

    /// Combine one map per layer.
    ///
    /// # Arguments
    ///
    /// * `maps` - Layer maps, each (batch, height_i, width_i); resolutions may
    ///   differ but the batch size must not.
    ///
    /// # Errors
    ///
    /// Fails if the number of maps differs from the configured layer count or
    /// the batch sizes disagree.
    pub fn combine<B: Backend>(&self, maps: Vec<Tensor<B, 3>>) -> Result<CombinedMaps<B>> {
        if maps.len() != self.config.layers {
            return Err(SaliencyError::LayerCountMismatch {
                expected: self.config.layers,
                got: maps.len(),
            });
        }

        let batch = maps[0].dims()[0];
        if let Some(other) = maps.iter().map(|m| m.dims()[0]).find(|&b| b != batch) {
            return Err(SaliencyError::ShapeMismatch(format!(
                "layer maps disagree on batch size: {batch} vs {other}"
            )));
        }

        let size = self.config.output_size;
        let device = maps[0].device();
        let mut combined = Tensor::<B, 3>::zeros([batch, size.height, size.width], &device);
        let mut resized = Vec::with_capacity(maps.len());

        for (map, &weight) in maps.into_iter().zip(&self.weights) {
            let mut w = resize_field(map, size, self.config.resize_mode)?;
            if self.config.magnitude {
                w = w.clone() * w;
            }
            combined = combined + w.clone() * weight;
            resized.push(w);
        }

        Ok(CombinedMaps {
            combined: combined / self.weight_sum,
            stacked: Tensor::stack(resized, 1),
        })
    }
}
