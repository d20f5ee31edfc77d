//! Max pooling kernel and layer
//!
//! Each output element is the maximum of one `pool_height × pool_width`
//! window of its input plane; there is no padding. On the backward pass the
//! upstream gradient goes to every position of the window that equals the
//! maximum, so tied maxima each receive the full gradient. A window holding a
//! NaN has a NaN maximum and routes no gradient.

use crate::config::PoolParams;
use crate::error::{KernelError, KernelResult};
use crate::layers::Layer;
use crate::tensor::{Shape4, Tensor};

/// Values from `max_pool_forward` required by `max_pool_backward`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolCache {
    pub x: Tensor,
    pub params: PoolParams,
}

/// Forward pass of a max pooling layer.
///
/// * `x` - Input of shape (N, C, H, W)
///
/// Returns the output of shape (N, C, H', W') with
/// `H' = 1 + (H - pool_height) / stride` and `W' = 1 + (W - pool_width) / stride`.
///
/// # Errors
///
/// Returns `InvalidParameter` if the window does not fit the input.
///
/// # Example
///
/// ```
/// use rust_cnn_kernels::config::PoolParams;
/// use rust_cnn_kernels::layers::max_pool_forward;
/// use rust_cnn_kernels::tensor::{Shape4, Tensor};
///
/// let x = Tensor::from_vec(Shape4::new(1, 1, 2, 2), vec![1.0, 4.0, 3.0, 2.0]).unwrap();
/// let (out, _) = max_pool_forward(&x, PoolParams::new(2, 2, 2).unwrap()).unwrap();
/// assert_eq!(out.data(), &[4.0]);
/// ```
pub fn max_pool_forward(x: &Tensor, params: PoolParams) -> KernelResult<(Tensor, PoolCache)> {
    let xs = x.shape();
    let (out_h, out_w) = params.output_dims(xs.height, xs.width)?;

    tracing::debug!(
        input = %xs,
        pool_height = params.pool_height(),
        pool_width = params.pool_width(),
        stride = params.stride(),
        "max_pool_forward"
    );

    let mut out = Tensor::zeros(Shape4::new(xs.batch, xs.channels, out_h, out_w));
    for n in 0..xs.batch {
        for c in 0..xs.channels {
            let plane = x.plane(n, c);
            let out_plane = out.plane_mut(n, c);
            for i in 0..out_h {
                for j in 0..out_w {
                    let window = Window::at(&params, xs.width, i, j);
                    out_plane[i * out_w + j] = window.max(plane);
                }
            }
        }
    }

    let cache = PoolCache {
        x: x.clone(),
        params,
    };
    Ok((out, cache))
}

/// Backward pass of a max pooling layer.
///
/// * `dout` - Upstream gradient of shape (N, C, H', W')
/// * `cache` - Cache returned by the matching `max_pool_forward`
///
/// Returns the gradient with respect to the input. Positions selected by
/// several overlapping windows receive the sum of their gradients.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `dout` does not have the output shape implied
/// by the cache.
pub fn max_pool_backward(dout: &Tensor, cache: PoolCache) -> KernelResult<Tensor> {
    let PoolCache { x, params } = cache;
    let xs = x.shape();
    let (out_h, out_w) = params.output_dims(xs.height, xs.width)?;
    let expected = Shape4::new(xs.batch, xs.channels, out_h, out_w);
    if dout.shape() != expected {
        return Err(KernelError::shape_mismatch(
            "max_pool_backward",
            expected,
            dout.shape(),
        ));
    }

    tracing::debug!(grad_output = %expected, input = %xs, "max_pool_backward");

    let mut dx = Tensor::zeros(xs);
    for n in 0..xs.batch {
        for c in 0..xs.channels {
            let plane = x.plane(n, c);
            let grad_plane = dout.plane(n, c);
            let dx_plane = dx.plane_mut(n, c);
            for i in 0..out_h {
                for j in 0..out_w {
                    let window = Window::at(&params, xs.width, i, j);
                    let max = window.max(plane);
                    let g = grad_plane[i * out_w + j];
                    for offset in window.offsets() {
                        if plane[offset] == max {
                            dx_plane[offset] += g;
                        }
                    }
                }
            }
        }
    }
    Ok(dx)
}

// One pooling window inside a row-major plane.
struct Window {
    top: usize,
    left: usize,
    height: usize,
    width: usize,
    row_stride: usize,
}

impl Window {
    fn at(params: &PoolParams, plane_width: usize, i: usize, j: usize) -> Self {
        Self {
            top: i * params.stride(),
            left: j * params.stride(),
            height: params.pool_height(),
            width: params.pool_width(),
            row_stride: plane_width,
        }
    }

    fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (self.top..self.top + self.height).flat_map(move |h| {
            let row = h * self.row_stride;
            row + self.left..row + self.left + self.width
        })
    }

    // NaN anywhere in the window makes the maximum NaN.
    fn max(&self, plane: &[f64]) -> f64 {
        self.offsets()
            .map(|offset| plane[offset])
            .fold(f64::NEG_INFINITY, |max, value| {
                if max.is_nan() || value.is_nan() {
                    f64::NAN
                } else {
                    max.max(value)
                }
            })
    }
}

/// Parameter-free layer wrapping the max pooling kernel.
///
/// # Example
///
/// ```
/// use rust_cnn_kernels::config::PoolParams;
/// use rust_cnn_kernels::layers::{Layer, MaxPoolLayer};
/// use rust_cnn_kernels::tensor::Shape4;
///
/// let layer = MaxPoolLayer::new(PoolParams::new(2, 2, 2).unwrap());
/// let out = layer.output_shape(Shape4::new(8, 16, 28, 28)).unwrap();
/// assert_eq!(out, Shape4::new(8, 16, 14, 14));
/// assert_eq!(layer.parameter_count(), 0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MaxPoolLayer {
    params: PoolParams,
}

impl MaxPoolLayer {
    pub fn new(params: PoolParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> PoolParams {
        self.params
    }
}

impl Layer for MaxPoolLayer {
    type Cache = PoolCache;

    fn forward(&self, input: &Tensor) -> KernelResult<(Tensor, PoolCache)> {
        max_pool_forward(input, self.params)
    }

    fn backward(&mut self, grad_output: &Tensor, cache: PoolCache) -> KernelResult<Tensor> {
        max_pool_backward(grad_output, cache)
    }

    fn update_parameters(&mut self, _learning_rate: f64) {
        // No parameters to update
    }

    fn output_shape(&self, input: Shape4) -> KernelResult<Shape4> {
        let (out_h, out_w) = self.params.output_dims(input.height, input.width)?;
        Ok(Shape4::new(input.batch, input.channels, out_h, out_w))
    }

    fn parameter_count(&self) -> usize {
        0
    }
}
