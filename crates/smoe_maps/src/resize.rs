//! Spatial resampling of saliency fields.
//!
//! Resizing is separable, so it is expressed as two small interpolation
//! matrices: `out = R_h · field · R_wᵀ`. Sample positions follow the
//! half-pixel convention (no corner alignment).

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use smoe_core::{from_host_vec, MapSize, Result, SaliencyError};

/// Interpolation used to bring layer maps to the output resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Bilinear interpolation with half-pixel centres, edges clamped.
    #[default]
    Bilinear,
    /// Nearest neighbour, `src = floor(dst · in / out)`.
    Nearest,
}

/// Row-major `(out_len, in_len)` matrix resampling a line of `in_len` samples.
pub(crate) fn interpolation_weights(in_len: usize, out_len: usize, mode: ResizeMode) -> Vec<f32> {
    let mut weights = vec![0.0f32; out_len * in_len];
    let scale = in_len as f64 / out_len as f64;
    let last = in_len - 1;

    for dst in 0..out_len {
        let row = &mut weights[dst * in_len..(dst + 1) * in_len];
        match mode {
            ResizeMode::Bilinear => {
                let src = ((dst as f64 + 0.5) * scale - 0.5).max(0.0);
                let i0 = (src.floor() as usize).min(last);
                let i1 = (i0 + 1).min(last);
                let lambda = (src - i0 as f64) as f32;
                row[i0] += 1.0 - lambda;
                row[i1] += lambda;
            }
            ResizeMode::Nearest => {
                let src = ((dst as f64 * scale).floor() as usize).min(last);
                row[src] = 1.0;
            }
        }
    }

    weights
}

/// Resize every sample of a (batch, height, width) field to `size`.
///
/// # Errors
///
/// Returns [`SaliencyError::InvalidShape`] if the field or the target size
/// has a zero dimension.
pub fn resize_field<B: Backend>(
    field: Tensor<B, 3>,
    size: MapSize,
    mode: ResizeMode,
) -> Result<Tensor<B, 3>> {
    let [batch, height, width] = field.dims();
    if batch == 0 || height == 0 || width == 0 || !size.is_valid() {
        return Err(SaliencyError::InvalidShape {
            expected: "non-zero source and target sizes".to_string(),
            got: format!("{:?} -> {size}", [batch, height, width]),
        });
    }
    if [height, width] == size.as_array() {
        return Ok(field);
    }

    let device = field.device();
    let rows: Tensor<B, 2> = from_host_vec(
        interpolation_weights(height, size.height, mode),
        [size.height, height],
        &device,
    )?;
    let cols: Tensor<B, 2> = from_host_vec(
        interpolation_weights(width, size.width, mode),
        [size.width, width],
        &device,
    )?;

    let rows = rows.unsqueeze::<3>().repeat_dim(0, batch);
    let cols = cols.transpose().unsqueeze::<3>().repeat_dim(0, batch);

    Ok(rows.matmul(field).matmul(cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoe_core::backend::NdArray;
    use smoe_core::to_host_vec;

    type TestBackend = NdArray;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_bilinear_upsample_weights() {
        // [a, b] -> [a, 0.75a + 0.25b, 0.25a + 0.75b, b]
        let w = interpolation_weights(2, 4, ResizeMode::Bilinear);
        assert_close(&w, &[1.0, 0.0, 0.75, 0.25, 0.25, 0.75, 0.0, 1.0]);
    }

    #[test]
    fn test_bilinear_downsample_averages_pairs() {
        let w = interpolation_weights(4, 2, ResizeMode::Bilinear);
        assert_close(&w, &[0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_nearest_weights() {
        let w = interpolation_weights(2, 4, ResizeMode::Nearest);
        assert_close(&w, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_bilinear_rows_sum_to_one() {
        for (i, o) in [(7, 224), (224, 7), (3, 5), (1, 4)] {
            let w = interpolation_weights(i, o, ResizeMode::Bilinear);
            for row in w.chunks(i) {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_resize_field_upsamples() {
        let device = Default::default();
        let field =
            from_host_vec::<TestBackend, 3>(vec![0.0, 1.0, 2.0, 3.0], [1, 2, 2], &device).unwrap();

        let out = resize_field(field, MapSize::new(4, 4), ResizeMode::Bilinear).unwrap();

        assert_eq!(out.dims(), [1, 4, 4]);
        let out = to_host_vec(out).unwrap();
        // First row interpolates 0 -> 1, last row 2 -> 3.
        assert_close(&out[0..4], &[0.0, 0.25, 0.75, 1.0]);
        assert_close(&out[12..16], &[2.0, 2.25, 2.75, 3.0]);
    }

    #[test]
    fn test_resize_field_same_size_is_identity() {
        let device = Default::default();
        let values: Vec<f32> = (0..18).map(|i| (i as f32).sin()).collect();
        let field = from_host_vec::<TestBackend, 3>(values.clone(), [2, 3, 3], &device).unwrap();

        let out = resize_field(field, MapSize::new(3, 3), ResizeMode::Bilinear).unwrap();

        assert_eq!(to_host_vec(out).unwrap(), values);
    }

    #[test]
    fn test_resize_field_keeps_batches_apart() {
        let device = Default::default();
        let values = vec![1.0; 4].into_iter().chain(vec![5.0; 4]).collect::<Vec<f32>>();
        let field = from_host_vec::<TestBackend, 3>(values, [2, 2, 2], &device).unwrap();

        let resized = resize_field(field, MapSize::new(3, 5), ResizeMode::Bilinear).unwrap();
        let out = to_host_vec(resized).unwrap();

        assert_close(&out[..15], &[1.0; 15]);
        assert_close(&out[15..], &[5.0; 15]);
    }

    #[test]
    fn test_resize_field_rejects_empty_target() {
        let device = Default::default();
        let field = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        assert!(resize_field(field, MapSize::new(0, 2), ResizeMode::Nearest).is_err());
    }
}
