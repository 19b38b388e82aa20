//! # smoe_core
//!
//! Core types shared by the smoe-rs crates.
//!
//! This crate provides:
//! - [`SaliencyError`] and the crate-wide [`Result`] alias
//! - [`Seed`] for reproducible noise perturbations
//! - [`ActivationShape`] and [`MapSize`] shape metadata
//! - Host read/write helpers for burn tensors
//!
//! ## Shape Convention
//!
//! Activations follow `(B, C, H, W)` and saliency fields `(B, H, W)`:
//! - `B`: Batch size
//! - `C`: Channels of the observed layer
//! - `H`, `W`: Spatial extent

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod seed;
mod shape;
mod tensor;

pub use error::{Result, SaliencyError};
pub use seed::Seed;
pub use shape::{ActivationShape, MapSize};
pub use tensor::{activation_shape, from_host_vec, to_host_vec, value_range};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;
}
