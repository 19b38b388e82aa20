//! Small helpers for moving burn tensors to and from host memory.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{Result, SaliencyError};
use crate::shape::ActivationShape;

/// Shape metadata of a 4D activation tensor.
pub fn activation_shape<B: Backend>(tensor: &Tensor<B, 4>) -> ActivationShape {
    ActivationShape::from(tensor.dims())
}

/// Read a tensor of any rank back into a flat row-major `Vec<f32>`.
///
/// # Errors
///
/// Returns [`SaliencyError::DataError`] if the backend data cannot be
/// converted to `f32`.
pub fn to_host_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SaliencyError::DataError(format!("{e:?}")))
}

/// Upload a flat row-major buffer as a tensor of the given shape.
///
/// # Errors
///
/// Returns [`SaliencyError::InvalidShape`] if `values.len()` does not match
/// the element count of `shape`.
pub fn from_host_vec<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Result<Tensor<B, D>> {
    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(SaliencyError::InvalidShape {
            expected: format!("{expected} elements for {shape:?}"),
            got: format!("{} elements", values.len()),
        });
    }
    Ok(Tensor::from_data(TensorData::new(values, shape), device))
}

/// Largest and smallest element of a tensor as `f32`.
pub fn value_range<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> (f32, f32) {
    let min: f32 = tensor.clone().min().into_scalar().elem();
    let max: f32 = tensor.clone().max().into_scalar().elem();
    (min, max)
}
