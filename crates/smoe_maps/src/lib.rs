//! # smoe_maps
//!
//! Gradient-free saliency maps for convolutional networks.
//!
//! This crate provides:
//! - Activation capture for designated layers ([`ActivationCapture`])
//! - Channel statistics: SMOE scale, standard deviation and truncated-normal
//!   entropy ([`ScaleMap`])
//! - Normal-CDF range normalization ([`Normalize2d`])
//! - Resizing and weighted fusion of layer maps ([`CombineSaliencyMaps`])
//! - SmoothGrad-style averaging over noisy inputs ([`SmoothGrad`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use smoe_maps::{ActivationCapture, LayerWeights, SmoothGradConfig};
//!
//! let mut capture = ActivationCapture::new()
//!     .observe_output("layer1")
//!     .observe_output("layer2")
//!     .observe_output("layer3");
//!
//! let smooth = SmoothGradConfig::default().init()?;
//! let result = smooth.explain(&image, &model, &mut capture, &LayerWeights::Uniform)?;
//! // result.combined: (batch, height, width)
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod activation;
mod combine;
mod model;
mod normalize;
mod resize;
mod scale;
mod smooth;

pub use activation::{
    ActivationCapture, ActivationObserver, ActivationRecorder, CaptureSide, DevicePolicy,
};
pub use combine::{CombineConfig, CombineSaliencyMaps, CombinedMaps, LayerWeights};
pub use model::ObservedModel;
pub use normalize::Normalize2d;
pub use resize::{resize_field, ResizeMode};
pub use scale::{ScaleMap, ScaleMethod, SmoeScale, StdMap, TruncNormalEntropy, EPSILON};
pub use smooth::{SmoothGrad, SmoothGradConfig, SmoothGradResult, SmoothGradTrace};
