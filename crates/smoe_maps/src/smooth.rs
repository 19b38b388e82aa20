//! SmoothGrad-style averaging of saliency maps over noisy inputs.
//!
//! Each iteration perturbs the same base input with Gaussian noise, runs one
//! observed forward pass, turns every observed activation into a normalized
//! saliency field, and fuses the fields with
//! [`CombineSaliencyMaps`](crate::combine::CombineSaliencyMaps). The
//! per-iteration maps are then averaged, or returned one by one as a trace.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use smoe_core::{from_host_vec, value_range, MapSize, Result, SaliencyError, Seed};

use crate::activation::{ActivationObserver, ActivationRecorder};
use crate::combine::{CombineConfig, CombinedMaps, LayerWeights};
use crate::model::ObservedModel;
use crate::normalize::Normalize2d;
use crate::resize::ResizeMode;
use crate::scale::{ScaleMap, ScaleMethod};

/// Configuration for [`SmoothGrad`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothGradConfig {
    /// Number of noisy forward passes.
    pub iters: usize,
    /// Average the squares of the per-iteration maps instead of the maps.
    ///
    /// No square root is taken afterwards; the result is a mean of squares.
    pub magnitude: bool,
    /// Noise standard deviation as a fraction of the input's value range.
    pub stdev_spread: f32,
    /// Square layer maps inside the combiner before weighting.
    pub maps_magnitude: bool,
    /// Channel statistic applied to every observed activation.
    pub scale: ScaleMethod,
    /// Interpolation used to bring layer maps to the input resolution.
    pub resize_mode: ResizeMode,
    /// Noise seed; a time-based seed is used when absent.
    pub seed: Option<u64>,
}

impl Default for SmoothGradConfig {
    fn default() -> Self {
        Self {
            iters: 15,
            magnitude: true,
            stdev_spread: 0.15,
            maps_magnitude: false,
            scale: ScaleMethod::default(),
            resize_mode: ResizeMode::Bilinear,
            seed: None,
        }
    }
}

impl SmoothGradConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`SaliencyError::InvalidConfig`] if `iters` is zero or
    /// `stdev_spread` is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.iters == 0 {
            return Err(SaliencyError::config("iters must be at least 1"));
        }
        if !(self.stdev_spread.is_finite() && self.stdev_spread >= 0.0) {
            return Err(SaliencyError::config(format!(
                "stdev_spread must be finite and non-negative, got {}",
                self.stdev_spread
            )));
        }
        Ok(())
    }

    /// Load a config from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid JSON, or holds an
    /// invalid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the config as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Build the aggregator.
    ///
    /// # Errors
    ///
    /// Fails if [`validate`](Self::validate) does.
    pub fn init(self) -> Result<SmoothGrad> {
        SmoothGrad::new(self)
    }
}

/// Averaged result of [`SmoothGrad::explain`].
#[derive(Debug, Clone)]
pub struct SmoothGradResult<B: Backend> {
    /// Mean combined map (or mean of squares), shape (batch, height, width).
    pub combined: Tensor<B, 3>,
    /// Mean per-layer maps, shape (batch, layers, height, width).
    pub stacked: Tensor<B, 4>,
    /// Standard deviation of the noise that was added.
    pub noise_std: f32,
}

/// Per-iteration record produced by [`SmoothGrad::trace`].
#[derive(Debug, Clone)]
pub struct SmoothGradTrace<B: Backend> {
    /// The perturbed inputs fed to the model.
    pub inputs: Vec<Tensor<B, 4>>,
    /// Combined map of each iteration.
    pub combined: Vec<Tensor<B, 3>>,
    /// Stacked layer maps of each iteration.
    pub stacked: Vec<Tensor<B, 4>>,
    /// Standard deviation of the noise that was added.
    pub noise_std: f32,
}

/// Running sums owned by one `explain` call.
struct Accumulator<B: Backend> {
    combined: Tensor<B, 3>,
    stacked: Tensor<B, 4>,
    squared: bool,
    count: usize,
}

impl<B: Backend> Accumulator<B> {
    fn new(batch: usize, layers: usize, size: MapSize, squared: bool, device: &B::Device) -> Self {
        Self {
            combined: Tensor::zeros([batch, size.height, size.width], device),
            stacked: Tensor::zeros([batch, layers, size.height, size.width], device),
            squared,
            count: 0,
        }
    }

    fn add(&mut self, maps: CombinedMaps<B>) {
        let CombinedMaps { combined, stacked } = maps;
        let (combined, stacked) = if self.squared {
            (combined.clone() * combined, stacked.clone() * stacked)
        } else {
            (combined, stacked)
        };
        self.combined = self.combined.clone() + combined;
        self.stacked = self.stacked.clone() + stacked;
        self.count += 1;
    }

    fn finalize(self, noise_std: f32) -> SmoothGradResult<B> {
        let n = self.count.max(1) as f32;
        SmoothGradResult {
            combined: self.combined / n,
            stacked: self.stacked / n,
            noise_std,
        }
    }
}

/// Noise-averaged saliency maps over a set of observed layers.
///
/// # Example
///
/// ```rust,ignore
/// use smoe_maps::{ActivationCapture, LayerWeights, SmoothGradConfig};
///
/// let smooth = SmoothGradConfig { seed: Some(7), ..Default::default() }.init()?;
/// let mut capture = ActivationCapture::new()
///     .observe_output("layer1")
///     .observe_output("layer2");
///
/// let result = smooth.explain(&image, &model, &mut capture, &LayerWeights::Uniform)?;
/// ```
#[derive(Debug, Clone)]
pub struct SmoothGrad {
    config: SmoothGradConfig,
    normalize: Normalize2d,
}

impl SmoothGrad {
    /// Create the aggregator from a validated config.
    ///
    /// # Errors
    ///
    /// Fails if the config does not pass [`SmoothGradConfig::validate`].
    pub fn new(config: SmoothGradConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            normalize: Normalize2d::new(),
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &SmoothGradConfig {
        &self.config
    }

    /// Average saliency maps over `iters` noisy passes.
    ///
    /// # Arguments
    ///
    /// * `input` - Unperturbed input batch (batch, channels, height, width)
    /// * `model` - Model that reports the designated layers to `observer`
    /// * `observer` - Capture for the layers whose maps are combined
    /// * `weights` - Per-layer weights for the combiner
    ///
    /// # Errors
    ///
    /// Fails on invalid shapes or weights, when a designated layer produced no
    /// activation in some pass, or when a statistic rejects an activation.
    pub fn explain<B, M, O>(
        &self,
        input: &Tensor<B, 4>,
        model: &M,
        observer: &mut O,
        weights: &LayerWeights,
    ) -> Result<SmoothGradResult<B>>
    where
        B: Backend,
        M: ObservedModel<B>,
        O: ActivationObserver<B> + ActivationRecorder<B>,
    {
        let [batch, _, height, width] = input.dims();
        let layers = observer.layers().len();
        let mut acc = Accumulator::new(
            batch,
            layers,
            MapSize::new(height, width),
            self.config.magnitude,
            &input.device(),
        );

        let noise_std = self.run(input, model, observer, weights, |_, maps| acc.add(maps))?;

        let result = acc.finalize(noise_std);
        tracing::info!(
            iters = self.config.iters,
            layers,
            noise_std,
            "smoothgrad maps aggregated"
        );
        Ok(result)
    }

    /// Run the same passes as [`explain`](Self::explain) but keep every
    /// iteration's input and maps instead of averaging them.
    ///
    /// # Errors
    ///
    /// Same conditions as [`explain`](Self::explain).
    pub fn trace<B, M, O>(
        &self,
        input: &Tensor<B, 4>,
        model: &M,
        observer: &mut O,
        weights: &LayerWeights,
    ) -> Result<SmoothGradTrace<B>>
    where
        B: Backend,
        M: ObservedModel<B>,
        O: ActivationObserver<B> + ActivationRecorder<B>,
    {
        let iters = self.config.iters;
        let mut inputs = Vec::with_capacity(iters);
        let mut combined = Vec::with_capacity(iters);
        let mut stacked = Vec::with_capacity(iters);

        let noise_std = self.run(input, model, observer, weights, |noisy, maps| {
            inputs.push(noisy);
            combined.push(maps.combined);
            stacked.push(maps.stacked);
        })?;

        Ok(SmoothGradTrace {
            inputs,
            combined,
            stacked,
            noise_std,
        })
    }

    /// [`explain`](Self::explain) for a model on an autodiff backend.
    ///
    /// The model is converted with [`AutodiffModule::valid`] and the input
    /// with [`Tensor::inner`], so no computation graph is built.
    ///
    /// # Errors
    ///
    /// Same conditions as [`explain`](Self::explain).
    pub fn explain_autodiff<B, M, O>(
        &self,
        input: &Tensor<B, 4>,
        model: &M,
        observer: &mut O,
        weights: &LayerWeights,
    ) -> Result<SmoothGradResult<B::InnerBackend>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        M::InnerModule: ObservedModel<B::InnerBackend>,
        O: ActivationObserver<B::InnerBackend> + ActivationRecorder<B::InnerBackend>,
    {
        let inner_model = model.valid();
        let inner_input = input.clone().inner();
        self.explain(&inner_input, &inner_model, observer, weights)
    }

    /// Drive the perturb/forward/score loop, handing each iteration's noisy
    /// input and maps to `sink`. Returns the noise standard deviation.
    fn run<B, M, O, F>(
        &self,
        input: &Tensor<B, 4>,
        model: &M,
        observer: &mut O,
        weights: &LayerWeights,
        mut sink: F,
    ) -> Result<f32>
    where
        B: Backend,
        M: ObservedModel<B>,
        O: ActivationObserver<B> + ActivationRecorder<B>,
        F: FnMut(Tensor<B, 4>, CombinedMaps<B>),
    {
        let dims = input.dims();
        let [batch, channels, height, width] = dims;
        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(SaliencyError::InvalidShape {
                expected: "non-empty (batch, channels, height, width) input".to_string(),
                got: format!("{dims:?}"),
            });
        }

        let layers = observer.layers();
        let combiner = CombineConfig::new(MapSize::new(height, width), layers.len())
            .with_weights(weights.clone())
            .with_resize_mode(self.config.resize_mode)
            .with_magnitude(self.config.maps_magnitude)
            .init()?;

        let (min, max) = value_range(input);
        let noise_std = self.config.stdev_spread * (max - min);
        if noise_std == 0.0 && self.config.stdev_spread > 0.0 {
            tracing::warn!(min, max, "input has zero value range, no noise is added");
        }
        let normal = Normal::new(0.0f32, noise_std)
            .map_err(|e| SaliencyError::config(format!("noise distribution: {e}")))?;

        let seed = Seed::or_entropy(self.config.seed);
        let mut rng = seed.to_rng();
        let device = input.device();
        let numel = dims.iter().product::<usize>();

        tracing::info!(
            iters = self.config.iters,
            layers = layers.len(),
            scale = ScaleMap::<B>::name(&self.config.scale),
            noise_std,
            seed = seed.value(),
            "starting smoothgrad"
        );

        for iter in 0..self.config.iters {
            let noise: Vec<f32> = (0..numel).map(|_| normal.sample(&mut rng)).collect();
            let noisy = input.clone() + from_host_vec::<B, 4>(noise, dims, &device)?;

            observer.begin_pass();
            let _ = model.forward_observed(noisy.clone(), &mut *observer);

            let mut fields = Vec::with_capacity(layers.len());
            for layer in &layers {
                let activation = observer.require(layer)?;
                let field = self.config.scale.compute(activation)?;
                fields.push(self.normalize.apply(field)?);
            }

            let maps = combiner.combine(fields)?;
            tracing::debug!(iter, "smoothgrad iteration done");
            sink(noisy, maps);
        }

        Ok(noise_std)
    }
}
