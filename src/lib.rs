//! Convolution and max-pooling kernels for convolutional neural networks
//!
//! This library provides the forward and backward passes of the two spatial
//! primitives of a CNN, plus the small amount of plumbing needed to use them
//! as layers.
//!
//! # Modules
//!
//! - `tensor`: Dense 4-D tensors stored as a flat buffer
//! - `layers`: Layer trait, convolution and max-pooling kernels
//! - `config`: Typed kernel parameters and JSON configuration loading
//! - `architecture`: Sequential conv/pool stacks described in JSON
//! - `utils`: RNG and finite-difference gradient checking
//! - `error`: Error type shared by every fallible operation

pub mod architecture;
pub mod config;
pub mod error;
pub mod layers;
pub mod tensor;
pub mod utils;

pub use error::{KernelError, KernelResult};
pub use tensor::{Shape4, Tensor};
