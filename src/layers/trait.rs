//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that the convolution and pooling
//! layers implement. Forward returns the values backward needs as an explicit
//! cache, which the caller hands back unmodified.

use crate::error::KernelResult;
use crate::tensor::{Shape4, Tensor};

/// Core trait for neural network layers.
///
/// # Example
///
/// ```ignore
/// // Forward pass through a layer
/// let (output, cache) = layer.forward(&input)?;
///
/// // Backward pass consumes the cache and returns the input gradient
/// let grad_input = layer.backward(&grad_output, cache)?;
/// layer.update_parameters(0.01);
/// ```
pub trait Layer {
    /// Values captured by `forward` and required by `backward`.
    type Cache;

    /// Forward propagation through the layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the input shape is incompatible with the layer.
    fn forward(&self, input: &Tensor) -> KernelResult<(Tensor, Self::Cache)>;

    /// Backward propagation through the layer.
    ///
    /// Computes the gradient with respect to the layer input. Parameter
    /// gradients are accumulated internally and applied by
    /// `update_parameters`.
    ///
    /// # Errors
    ///
    /// Returns an error if `grad_output` does not match the output shape
    /// implied by `cache`.
    fn backward(&mut self, grad_output: &Tensor, cache: Self::Cache) -> KernelResult<Tensor>;

    /// Apply accumulated gradients with plain gradient descent and clear them:
    /// `param = param - learning_rate * gradient`.
    fn update_parameters(&mut self, learning_rate: f64);

    /// Output shape produced for an input of shape `input`.
    fn output_shape(&self, input: Shape4) -> KernelResult<Shape4>;

    /// Number of trainable parameters.
    fn parameter_count(&self) -> usize;
}
