//! Model boundary for observed forward passes.

use burn::prelude::*;

use crate::activation::ActivationRecorder;

/// A model whose forward pass reports designated layer activations.
///
/// The saliency pipeline never looks at the model's output; it only needs
/// the pass to run so that the recorder sees each observed layer.
///
/// # Example
///
/// ```rust,ignore
/// impl<B: Backend> ObservedModel<B> for MyNet<B> {
///     type Output = Tensor<B, 2>;
///
///     fn forward_observed(
///         &self,
///         x: Tensor<B, 4>,
///         recorder: &mut dyn ActivationRecorder<B>,
///     ) -> Tensor<B, 2> {
///         let x = relu(self.conv1.forward(x));
///         recorder.record_output("conv1", &x);
///         self.head.forward(x.flatten(1, 3))
///     }
/// }
/// ```
pub trait ObservedModel<B: Backend> {
    /// Whatever the model produces; ignored by the saliency pipeline.
    type Output;

    /// Run one forward pass, reporting layer activations to `recorder`.
    ///
    /// # Arguments
    ///
    /// * `input` - Image batch of shape (batch, channels, height, width)
    /// * `recorder` - Sink for the designated layers' tensors
    fn forward_observed(
        &self,
        input: Tensor<B, 4>,
        recorder: &mut dyn ActivationRecorder<B>,
    ) -> Self::Output;
}
