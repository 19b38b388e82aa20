//! Activation capture for designated layers.
//!
//! A model reports layer inputs and outputs to an [`ActivationRecorder`]
//! while it runs; the saliency pipeline reads them back through
//! [`ActivationObserver`] once the pass has finished. [`ActivationCapture`]
//! implements both sides and only ever holds the most recent pass.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use smoe_core::{Result, SaliencyError};

/// Which side of a layer is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSide {
    /// The tensors passed into the layer, one per argument position.
    Input,
    /// The tensor the layer produced.
    Output,
}

/// What to do when a layer runs on a device the observer does not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePolicy {
    /// Ignore the recording. Used when replicas of one model run on
    /// several devices and only one of them is of interest.
    #[default]
    Skip,
    /// Remember the mismatch and fail when the layer is read.
    Error,
}

/// Write side of the observer boundary, handed to the model during a pass.
pub trait ActivationRecorder<B: Backend> {
    /// Whether the recorder keeps anything for this layer and side.
    ///
    /// Models may use this to avoid cloning tensors nobody reads.
    fn wants(&self, layer: &str, side: CaptureSide) -> bool;

    /// Record the output of `layer`.
    fn record_output(&mut self, layer: &str, output: &Tensor<B, 4>);

    /// Record the inputs of `layer`, in argument order.
    fn record_inputs(&mut self, layer: &str, inputs: &[Tensor<B, 4>]);
}

/// Read side of the observer boundary.
pub trait ActivationObserver<B: Backend> {
    /// One key per designated tap, in the order their maps are combined.
    ///
    /// Keys are unique per tap and are what [`latest`](Self::latest) and
    /// [`require`](Self::require) accept.
    fn layers(&self) -> Vec<String>;

    /// Drop everything captured so far. Called before each forward pass.
    fn begin_pass(&mut self);

    /// Most recently captured tensor for the tap keyed `layer`, or `None`
    /// if the layer was never invoked in this pass or its recording was
    /// rejected.
    fn latest(&self, layer: &str) -> Option<Tensor<B, 4>>;

    /// Like [`latest`](Self::latest) but treats absence as an error.
    fn require(&self, layer: &str) -> Result<Tensor<B, 4>> {
        self.latest(layer)
            .ok_or_else(|| SaliencyError::MissingActivation {
                layer: layer.to_string(),
            })
    }
}

#[derive(Debug, Clone)]
struct LayerTap<B: Backend> {
    name: String,
    /// Unique read-back key, see [`ActivationCapture::observe_input`].
    key: String,
    side: CaptureSide,
    /// Argument position read back for input-side taps.
    position: usize,
    captured: Vec<Tensor<B, 4>>,
    /// Debug name of the last device rejected in this pass.
    rejected: Option<String>,
}

/// Captured activations from designated model layers.
///
/// # Example
///
/// ```rust,ignore
/// use smoe_maps::{ActivationCapture, DevicePolicy};
///
/// let mut capture = ActivationCapture::<NdArray>::new()
///     .observe_output("layer1")
///     .observe_output("layer2")
///     .observe_input("fc", 0)
///     .with_device(device, DevicePolicy::Error);
/// ```
#[derive(Debug, Clone)]
pub struct ActivationCapture<B: Backend> {
    taps: Vec<LayerTap<B>>,
    device: Option<B::Device>,
    policy: DevicePolicy,
}

impl<B: Backend> ActivationCapture<B> {
    /// Create a capture with no designated layers that accepts any device.
    pub fn new() -> Self {
        Self {
            taps: Vec::new(),
            device: None,
            policy: DevicePolicy::default(),
        }
    }

    /// Designate the output of `layer`.
    #[must_use]
    pub fn observe_output(self, layer: impl Into<String>) -> Self {
        self.observe(layer, CaptureSide::Output, 0)
    }

    /// Designate input argument `position` of `layer`.
    ///
    /// The tap is read back under the key `"{layer}:in{position}"`, so the
    /// input and output of one layer can be observed side by side.
    #[must_use]
    pub fn observe_input(self, layer: impl Into<String>, position: usize) -> Self {
        self.observe(layer, CaptureSide::Input, position)
    }

    fn observe(mut self, layer: impl Into<String>, side: CaptureSide, position: usize) -> Self {
        let name = layer.into();
        let key = match side {
            CaptureSide::Output => name.clone(),
            CaptureSide::Input => format!("{name}:in{position}"),
        };
        self.taps.push(LayerTap {
            name,
            key,
            side,
            position,
            captured: Vec::new(),
            rejected: None,
        });
        self
    }

    /// Only accept tensors living on `device`, handling others per `policy`.
    #[must_use]
    pub fn with_device(mut self, device: B::Device, policy: DevicePolicy) -> Self {
        self.device = Some(device);
        self.policy = policy;
        self
    }

    /// Number of designated layers.
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    /// Check whether no layer is designated.
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Clear all stored activations, keeping the designations.
    pub fn clear(&mut self) {
        for tap in &mut self.taps {
            tap.captured.clear();
            tap.rejected = None;
        }
    }

    fn accepts(&self, device: &B::Device) -> bool {
        self.device.as_ref().map_or(true, |d| d == device)
    }

    fn store(&mut self, layer: &str, side: CaptureSide, tensors: &[Tensor<B, 4>]) {
        let Some(first) = tensors.first() else {
            return;
        };
        let device = first.device();
        let foreign = (!self.accepts(&device)).then(|| format!("{device:?}"));
        self.store_with(layer, side, tensors, foreign);
    }

    /// Store `tensors`, or mark the tap rejected when `foreign` names the
    /// device they came from.
    fn store_with(
        &mut self,
        layer: &str,
        side: CaptureSide,
        tensors: &[Tensor<B, 4>],
        foreign: Option<String>,
    ) {
        let policy = self.policy;
        for tap in self
            .taps
            .iter_mut()
            .filter(|t| t.name == layer && t.side == side)
        {
            match &foreign {
                None => {
                    tap.captured = tensors.to_vec();
                    tap.rejected = None;
                }
                Some(device) => {
                    tracing::debug!(
                        layer,
                        device = device.as_str(),
                        ?policy,
                        "rejected capture from foreign device"
                    );
                    tap.rejected = Some(device.clone());
                }
            }
        }
    }

    fn tap(&self, key: &str) -> Option<&LayerTap<B>> {
        self.taps.iter().find(|t| t.key == key)
    }
}

impl<B: Backend> Default for ActivationCapture<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ActivationRecorder<B> for ActivationCapture<B> {
    fn wants(&self, layer: &str, side: CaptureSide) -> bool {
        self.taps.iter().any(|t| t.name == layer && t.side == side)
    }

    fn record_output(&mut self, layer: &str, output: &Tensor<B, 4>) {
        self.store(layer, CaptureSide::Output, std::slice::from_ref(output));
    }

    fn record_inputs(&mut self, layer: &str, inputs: &[Tensor<B, 4>]) {
        self.store(layer, CaptureSide::Input, inputs);
    }
}

impl<B: Backend> ActivationObserver<B> for ActivationCapture<B> {
    fn layers(&self) -> Vec<String> {
        self.taps.iter().map(|t| t.key.clone()).collect()
    }

    fn begin_pass(&mut self) {
        self.clear();
    }

    fn latest(&self, layer: &str) -> Option<Tensor<B, 4>> {
        let tap = self.tap(layer)?;
        let index = match tap.side {
            CaptureSide::Output => 0,
            CaptureSide::Input => tap.position,
        };
        tap.captured.get(index).cloned()
    }

    fn require(&self, layer: &str) -> Result<Tensor<B, 4>> {
        if self.policy == DevicePolicy::Error {
            let rejected = self.tap(layer).and_then(|t| t.rejected.clone());
            if let Some(got) = rejected {
                return Err(SaliencyError::DeviceMismatch {
                    layer: layer.to_string(),
                    expected: format!("{:?}", self.device),
                    got,
                });
            }
        }

        self.latest(layer)
            .ok_or_else(|| SaliencyError::MissingActivation {
                layer: layer.to_string(),
            })
    }
}
