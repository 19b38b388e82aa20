//! Built-in probe network and synthetic inputs for the CLI.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;
use rand::Rng;

use smoe_core::{from_host_vec, Result, Seed};
use smoe_maps::{ActivationRecorder, CaptureSide, ObservedModel};

/// Names of the probe's convolution stages, shallow to deep.
pub const STAGES: [&str; 3] = ["conv1", "conv2", "conv3"];

/// Three-stage CNN halving the resolution after the first stage.
///
/// Each stage reports its post-ReLU output as `convN` and its
/// pre-activation as `convN.pre`.
#[derive(Module, Debug)]
pub struct ProbeNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
}

impl<B: Backend> ProbeNet<B> {
    /// Create a randomly initialized probe for RGB input.
    pub fn new(device: &B::Device) -> Self {
        let stage = |channels: [usize; 2], stride: usize| {
            Conv2dConfig::new(channels, [3, 3])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device)
        };
        Self {
            conv1: stage([3, 16], 1),
            conv2: stage([16, 32], 2),
            conv3: stage([32, 64], 2),
        }
    }
}

fn report<B: Backend>(
    recorder: &mut dyn ActivationRecorder<B>,
    name: &str,
    pre: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let pre_name = format!("{name}.pre");
    if recorder.wants(&pre_name, CaptureSide::Output) {
        recorder.record_output(&pre_name, &pre);
    }
    let out = relu(pre);
    recorder.record_output(name, &out);
    out
}

impl<B: Backend> ObservedModel<B> for ProbeNet<B> {
    type Output = Tensor<B, 4>;

    fn forward_observed(
        &self,
        input: Tensor<B, 4>,
        recorder: &mut dyn ActivationRecorder<B>,
    ) -> Tensor<B, 4> {
        let x = report(recorder, STAGES[0], self.conv1.forward(input));
        let x = report(recorder, STAGES[1], self.conv2.forward(x));
        report(recorder, STAGES[2], self.conv3.forward(x))
    }
}

/// An RGB batch of one image: a bright Gaussian blob on a noisy background.
///
/// Values are normalized with the ImageNet channel statistics, like a
/// photograph prepared for a pretrained classifier.
pub fn blob_image<B: Backend>(
    height: usize,
    width: usize,
    center: (f32, f32),
    seed: Seed,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
    const STD: [f32; 3] = [0.229, 0.224, 0.225];

    let mut rng = seed.to_rng();
    let (cy, cx) = (center.0 * height as f32, center.1 * width as f32);
    let sigma = 0.12 * height.min(width) as f32;

    let mut values = Vec::with_capacity(3 * height * width);
    for c in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let d2 = (y as f32 - cy).powi(2) + (x as f32 - cx).powi(2);
                let blob = (-d2 / (2.0 * sigma * sigma)).exp();
                let pixel = (0.2 + 0.7 * blob + rng.gen_range(-0.05..0.05)).clamp(0.0, 1.0);
                values.push((pixel - MEAN[c]) / STD[c]);
            }
        }
    }

    from_host_vec(values, [1, 3, height, width], device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use smoe_maps::{ActivationCapture, ActivationObserver};

    #[test]
    fn test_probe_reports_every_stage() {
        let device = Default::default();
        let model = ProbeNet::<NdArray>::new(&device);
        let mut capture = ActivationCapture::new()
            .observe_output("conv1")
            .observe_output("conv2.pre")
            .observe_output("conv3");

        let input = blob_image::<NdArray>(16, 16, (0.5, 0.5), Seed::new(1), &device).unwrap();
        let out = model.forward_observed(input, &mut capture);

        assert_eq!(out.dims(), [1, 64, 4, 4]);
        assert_eq!(capture.latest("conv1").unwrap().dims(), [1, 16, 16, 16]);
        assert_eq!(capture.latest("conv2.pre").unwrap().dims(), [1, 32, 8, 8]);
        assert_eq!(capture.latest("conv3").unwrap().dims(), [1, 64, 4, 4]);
    }

    #[test]
    fn test_blob_image_is_brightest_at_center() {
        let device = Default::default();
        let image = blob_image::<NdArray>(9, 9, (0.5, 0.5), Seed::new(2), &device).unwrap();
        let values = smoe_core::to_host_vec(image).unwrap();

        let red = &values[..81];
        let center = red[4 * 9 + 4];
        let corner = red[0];
        assert!(center > corner);
    }
}
