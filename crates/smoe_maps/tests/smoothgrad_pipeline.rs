//! Integration tests for the noise-averaged saliency pipeline.
//!
//! These tests drive full SmoothGrad runs over small deterministic models.

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use smoe_core::{from_host_vec, to_host_vec, MapSize};
use smoe_maps::{
    ActivationCapture, ActivationRecorder, CaptureSide, CombineConfig, LayerWeights, Normalize2d,
    ObservedModel, ScaleMap, ScaleMethod, SmoeScale, SmoothGradConfig,
};

type TestBackend = NdArray;

/// Parameter-free model with two observed layers at different resolutions.
///
/// `features` is `exp(x)` at full resolution, `pooled` is `exp(2x)` on the
/// top-left quarter, and `head` receives both as inputs.
struct FixedFeatures;

impl ObservedModel<TestBackend> for FixedFeatures {
    type Output = Tensor<TestBackend, 4>;

    fn forward_observed(
        &self,
        input: Tensor<TestBackend, 4>,
        recorder: &mut dyn ActivationRecorder<TestBackend>,
    ) -> Tensor<TestBackend, 4> {
        let [batch, channels, height, width] = input.dims();

        let features = input.clone().exp();
        recorder.record_output("features", &features);

        let pooled = (input * 2.0)
            .slice([0..batch, 0..channels, 0..height / 2, 0..width / 2])
            .exp();
        recorder.record_output("pooled", &pooled);

        if recorder.wants("head", CaptureSide::Input) {
            recorder.record_inputs("head", &[features.clone(), pooled.clone()]);
        }
        pooled
    }
}

fn synthetic_input(batch: usize, seed: u64) -> Tensor<TestBackend, 4> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let dims = [batch, 4, 8, 8];
    let values: Vec<f32> = (0..dims.iter().product::<usize>())
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    from_host_vec(values, dims, &Default::default()).unwrap()
}

fn capture() -> ActivationCapture<TestBackend> {
    ActivationCapture::new()
        .observe_output("features")
        .observe_output("pooled")
}

fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "index {i}: {a} vs {e}");
    }
}

#[test]
fn test_single_noiseless_pass_matches_static_pipeline() {
    let input = synthetic_input(1, 1);
    let weights = LayerWeights::PerLayer(vec![1.0, 2.0]);

    let smooth = SmoothGradConfig {
        iters: 1,
        stdev_spread: 0.0,
        magnitude: false,
        seed: Some(5),
        ..Default::default()
    }
    .init()
    .unwrap();
    let result = smooth
        .explain(&input, &FixedFeatures, &mut capture(), &weights)
        .unwrap();

    // The same computation by hand.
    let scale = SmoeScale::new();
    let normalize = Normalize2d::new();
    let features = input.clone().exp();
    let pooled = (input * 2.0).slice([0..1, 0..4, 0..4, 0..4]).exp();
    let fields = vec![
        normalize.apply(scale.compute(features).unwrap()).unwrap(),
        normalize.apply(scale.compute(pooled).unwrap()).unwrap(),
    ];
    let expected = CombineConfig::new(MapSize::new(8, 8), 2)
        .with_weights(weights)
        .init()
        .unwrap()
        .combine(fields)
        .unwrap();

    assert_eq!(result.noise_std, 0.0);
    assert_eq!(result.combined.dims(), [1, 8, 8]);
    assert_eq!(result.stacked.dims(), [1, 2, 8, 8]);
    assert_close(
        &to_host_vec(result.combined).unwrap(),
        &to_host_vec(expected.combined).unwrap(),
        1e-6,
    );
    assert_close(
        &to_host_vec(result.stacked).unwrap(),
        &to_host_vec(expected.stacked).unwrap(),
        1e-6,
    );
}

#[test]
fn test_linear_aggregation_is_mean_of_iterations() {
    let input = synthetic_input(1, 2);
    let config = SmoothGradConfig {
        iters: 4,
        magnitude: false,
        seed: Some(42),
        ..Default::default()
    };
    let smooth = config.init().unwrap();

    let result = smooth
        .explain(&input, &FixedFeatures, &mut capture(), &LayerWeights::Uniform)
        .unwrap();
    let trace = smooth
        .trace(&input, &FixedFeatures, &mut capture(), &LayerWeights::Uniform)
        .unwrap();

    assert_eq!(trace.combined.len(), 4);
    let mean = Tensor::stack::<4>(trace.combined, 0).mean_dim(0).squeeze::<3>(0);
    assert_close(
        &to_host_vec(result.combined).unwrap(),
        &to_host_vec(mean).unwrap(),
        1e-5,
    );
}

#[test]
fn test_magnitude_aggregation_is_mean_of_squares() {
    let input = synthetic_input(1, 3);
    let config = SmoothGradConfig {
        iters: 3,
        magnitude: true,
        seed: Some(9),
        ..Default::default()
    };
    let smooth = config.init().unwrap();

    let result = smooth
        .explain(&input, &FixedFeatures, &mut capture(), &LayerWeights::Uniform)
        .unwrap();
    let trace = smooth
        .trace(&input, &FixedFeatures, &mut capture(), &LayerWeights::Uniform)
        .unwrap();

    let squares: Vec<_> = trace.stacked.into_iter().map(|s| s.clone() * s).collect();
    let mean_sq = Tensor::stack::<5>(squares, 0).mean_dim(0).squeeze::<4>(0);
    assert_close(
        &to_host_vec(result.stacked).unwrap(),
        &to_host_vec(mean_sq).unwrap(),
        1e-5,
    );
}

#[test]
fn test_trace_keeps_every_iteration() {
    let input = synthetic_input(2, 4);
    let smooth = SmoothGradConfig {
        iters: 3,
        stdev_spread: 0.2,
        seed: Some(1),
        ..Default::default()
    }
    .init()
    .unwrap();

    let trace = smooth
        .trace(&input, &FixedFeatures, &mut capture(), &LayerWeights::Scalar(0.5))
        .unwrap();

    assert_eq!(trace.inputs.len(), 3);
    assert_eq!(trace.stacked.len(), 3);
    assert_eq!(trace.combined[0].dims(), [2, 8, 8]);
    assert_eq!(trace.stacked[0].dims(), [2, 2, 8, 8]);

    let (min, max) = smoe_core::value_range(&input);
    assert!((trace.noise_std - 0.2 * (max - min)).abs() < 1e-6);

    // Perturbations are independent draws around the same base input.
    let base = to_host_vec(input).unwrap();
    let first = to_host_vec(trace.inputs[0].clone()).unwrap();
    let second = to_host_vec(trace.inputs[1].clone()).unwrap();
    assert_ne!(first, base);
    assert_ne!(first, second);
}

#[test]
fn test_fixed_seed_is_reproducible() {
    let input = synthetic_input(1, 5);
    let run = |seed| {
        let smooth = SmoothGradConfig {
            iters: 2,
            seed: Some(seed),
            ..Default::default()
        }
        .init()
        .unwrap();
        let result = smooth
            .explain(&input, &FixedFeatures, &mut capture(), &LayerWeights::Uniform)
            .unwrap();
        to_host_vec(result.combined).unwrap()
    };

    assert_eq!(run(17), run(17));
    assert_ne!(run(17), run(18));
}

#[test]
fn test_linear_maps_stay_in_unit_range() {
    let input = synthetic_input(2, 6);
    let smooth = SmoothGradConfig {
        iters: 2,
        magnitude: false,
        seed: Some(3),
        ..Default::default()
    }
    .init()
    .unwrap();

    let result = smooth
        .explain(
            &input,
            &FixedFeatures,
            &mut capture(),
            &LayerWeights::PerLayer(vec![3.0, 1.0]),
        )
        .unwrap();

    for v in to_host_vec(result.combined).unwrap() {
        assert!((-1e-6..=1.0 + 1e-6).contains(&v), "out of range: {v}");
    }
}

#[test]
fn test_input_side_capture_feeds_the_pipeline() {
    let input = synthetic_input(1, 7);
    let mut capture = ActivationCapture::new().observe_input("head", 1);
    let smooth = SmoothGradConfig {
        iters: 1,
        stdev_spread: 0.0,
        magnitude: false,
        scale: ScaleMethod::Std,
        seed: Some(0),
        ..Default::default()
    }
    .init()
    .unwrap();

    let result = smooth
        .explain(&input, &FixedFeatures, &mut capture, &LayerWeights::Uniform)
        .unwrap();

    // The second head input is the 4x4 map, upsampled to the input size.
    assert_eq!(result.stacked.dims(), [1, 1, 8, 8]);
}

#[test]
fn test_wrong_weight_count_is_rejected() {
    let input = synthetic_input(1, 8);
    let smooth = SmoothGradConfig::default().init().unwrap();

    let result = smooth.explain(
        &input,
        &FixedFeatures,
        &mut capture(),
        &LayerWeights::PerLayer(vec![1.0, 1.0, 1.0]),
    );

    assert!(result.is_err());
}

/// Small convolutional model, generic over the backend.
#[derive(Module, Debug)]
struct TinyConv<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> TinyConv<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            conv1: Conv2dConfig::new([3, 8], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            conv2: Conv2dConfig::new([8, 8], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
        }
    }
}

impl<B: Backend> ObservedModel<B> for TinyConv<B> {
    type Output = Tensor<B, 4>;

    fn forward_observed(
        &self,
        input: Tensor<B, 4>,
        recorder: &mut dyn ActivationRecorder<B>,
    ) -> Tensor<B, 4> {
        let x = relu(self.conv1.forward(input));
        recorder.record_output("conv1", &x);
        let x = relu(self.conv2.forward(x));
        recorder.record_output("conv2", &x);
        x
    }
}

#[test]
fn test_autodiff_model_runs_on_inner_backend() {
    type AdBackend = Autodiff<TestBackend>;

    let device = Default::default();
    let model = TinyConv::<AdBackend>::new(&device);
    let mut rng = ChaCha8Rng::seed_from_u64(10);
    let values: Vec<f32> = (0..3 * 16 * 16).map(|_| rng.gen_range(0.0..1.0)).collect();
    let input: Tensor<AdBackend, 4> = from_host_vec(values, [1, 3, 16, 16], &device).unwrap();

    let mut capture = ActivationCapture::<TestBackend>::new()
        .observe_output("conv1")
        .observe_output("conv2");
    let smooth = SmoothGradConfig {
        iters: 2,
        seed: Some(4),
        ..Default::default()
    }
    .init()
    .unwrap();

    let result = smooth
        .explain_autodiff(&input, &model, &mut capture, &LayerWeights::Uniform)
        .unwrap();

    assert_eq!(result.combined.dims(), [1, 16, 16]);
    assert_eq!(result.stacked.dims(), [1, 2, 16, 16]);
}
