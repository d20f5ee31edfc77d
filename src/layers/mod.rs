//! Layer abstractions for convolutional networks
//!
//! This module provides the convolution and max-pooling kernels as free
//! functions, the `Layer` trait, and layer types wrapping each kernel.

mod r#trait;
pub mod conv2d;
pub mod pooling;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use conv2d::{conv_backward, conv_forward, Conv2DLayer, ConvCache, ConvGrads};
pub use pooling::{max_pool_backward, max_pool_forward, MaxPoolLayer, PoolCache};
