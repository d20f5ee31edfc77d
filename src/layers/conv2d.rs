//! 2D convolution kernel and layer
//!
//! `conv_forward` cross-correlates a batch of multi-channel images with a bank
//! of filters (no kernel flipping), after zero-padding height and width.
//! `conv_backward` returns the gradients with respect to the input, the
//! filters and the biases. `Conv2DLayer` owns a filter bank and wraps both.

use crate::config::ConvParams;
use crate::error::{KernelError, KernelResult};
use crate::layers::Layer;
use crate::tensor::{Shape4, Tensor};
use crate::utils::SimpleRng;

/// Values from `conv_forward` required by `conv_backward`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvCache {
    /// Unpadded input, (N, C, H, W)
    pub x: Tensor,
    /// Filters, (F, C, HH, WW)
    pub w: Tensor,
    /// Biases, (F)
    pub b: Vec<f64>,
    pub params: ConvParams,
}

/// Gradients returned by `conv_backward`, shaped like (x, w, b).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvGrads {
    pub dx: Tensor,
    pub dw: Tensor,
    pub db: Vec<f64>,
}

/// Forward pass of a convolutional layer.
///
/// * `x` - Input of shape (N, C, H, W)
/// * `w` - Filters of shape (F, C, HH, WW)
/// * `b` - Biases of length F
///
/// Returns the output of shape (N, F, H', W') with
/// `H' = 1 + (H + 2*pad - HH) / stride` and `W' = 1 + (W + 2*pad - WW) / stride`,
/// together with the cache for `conv_backward`.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the filter depth differs from the input channel
/// count or `b` does not have one entry per filter, and `InvalidParameter` if
/// a filter does not fit the padded input.
///
/// # Example
///
/// ```
/// use rust_cnn_kernels::config::ConvParams;
/// use rust_cnn_kernels::layers::conv_forward;
/// use rust_cnn_kernels::tensor::{Shape4, Tensor};
///
/// let x = Tensor::filled(Shape4::new(2, 3, 8, 8), 1.0);
/// let w = Tensor::filled(Shape4::new(4, 3, 3, 3), 0.5);
/// let b = vec![0.0; 4];
/// let (out, _cache) = conv_forward(&x, &w, &b, ConvParams::new(1, 1).unwrap()).unwrap();
/// assert_eq!(out.shape(), Shape4::new(2, 4, 8, 8));
/// ```
pub fn conv_forward(
    x: &Tensor,
    w: &Tensor,
    b: &[f64],
    params: ConvParams,
) -> KernelResult<(Tensor, ConvCache)> {
    let xs = x.shape();
    let ws = w.shape();
    if ws.channels != xs.channels {
        return Err(KernelError::shape_mismatch(
            "conv_forward",
            format!("filters with {} channels", xs.channels),
            format!("filters of shape {}", ws),
        ));
    }
    if b.len() != ws.batch {
        return Err(KernelError::shape_mismatch(
            "conv_forward",
            format!("{} biases", ws.batch),
            format!("{} biases", b.len()),
        ));
    }
    let (out_h, out_w) = params.output_dims(xs.height, xs.width, ws.height, ws.width)?;
    let stride = params.stride();

    tracing::debug!(
        input = %xs,
        filters = %ws,
        stride,
        pad = params.pad(),
        "conv_forward"
    );

    let x_pad = x.pad_spatial(params.pad());
    let padded_w = x_pad.shape().width;
    let mut out = Tensor::zeros(Shape4::new(xs.batch, ws.batch, out_h, out_w));

    for n in 0..xs.batch {
        for f in 0..ws.batch {
            let out_plane = out.plane_mut(n, f);
            for i in 0..out_h {
                for j in 0..out_w {
                    let mut acc = 0.0;
                    for c in 0..xs.channels {
                        let input = x_pad.plane(n, c);
                        let filter = w.plane(f, c);
                        for kh in 0..ws.height {
                            let row = (i * stride + kh) * padded_w + j * stride;
                            let frow = kh * ws.width;
                            acc += input[row..row + ws.width]
                                .iter()
                                .zip(&filter[frow..frow + ws.width])
                                .map(|(a, b)| a * b)
                                .sum::<f64>();
                        }
                    }
                    out_plane[i * out_w + j] = acc + b[f];
                }
            }
        }
    }

    let cache = ConvCache {
        x: x.clone(),
        w: w.clone(),
        b: b.to_vec(),
        params,
    };
    Ok((out, cache))
}

/// Backward pass of a convolutional layer.
///
/// * `dout` - Upstream gradient of shape (N, F, H', W')
/// * `cache` - Cache returned by the matching `conv_forward`
///
/// Gradients from overlapping windows accumulate additively.
///
/// # Errors
///
/// Returns `ShapeMismatch` if `dout` does not have the output shape implied
/// by the cache.
pub fn conv_backward(dout: &Tensor, cache: ConvCache) -> KernelResult<ConvGrads> {
    let ConvCache { x, w, b, params } = cache;
    let xs = x.shape();
    let ws = w.shape();
    let (out_h, out_w) = params.output_dims(xs.height, xs.width, ws.height, ws.width)?;
    let expected = Shape4::new(xs.batch, ws.batch, out_h, out_w);
    if dout.shape() != expected {
        return Err(KernelError::shape_mismatch(
            "conv_backward",
            expected,
            dout.shape(),
        ));
    }
    let stride = params.stride();

    tracing::debug!(grad_output = %expected, input = %xs, "conv_backward");

    let x_pad = x.pad_spatial(params.pad());
    let padded_w = x_pad.shape().width;
    let mut dx_pad = Tensor::zeros(x_pad.shape());
    let mut dw = Tensor::zeros(ws);
    let mut db = vec![0.0; b.len()];

    for n in 0..xs.batch {
        for f in 0..ws.batch {
            let grad_plane = dout.plane(n, f);
            db[f] += grad_plane.iter().sum::<f64>();

            for i in 0..out_h {
                for j in 0..out_w {
                    let g = grad_plane[i * out_w + j];
                    for c in 0..xs.channels {
                        let input = x_pad.plane(n, c);
                        let filter = w.plane(f, c);
                        let dw_plane = dw.plane_mut(f, c);
                        for kh in 0..ws.height {
                            let row = (i * stride + kh) * padded_w + j * stride;
                            let frow = kh * ws.width;
                            for (acc, &value) in dw_plane[frow..frow + ws.width]
                                .iter_mut()
                                .zip(&input[row..row + ws.width])
                            {
                                *acc += value * g;
                            }
                        }

                        let dx_plane = dx_pad.plane_mut(n, c);
                        for kh in 0..ws.height {
                            let row = (i * stride + kh) * padded_w + j * stride;
                            let frow = kh * ws.width;
                            for (acc, &weight) in dx_plane[row..row + ws.width]
                                .iter_mut()
                                .zip(&filter[frow..frow + ws.width])
                            {
                                *acc += weight * g;
                            }
                        }
                    }
                }
            }
        }
    }

    let dx = dx_pad.crop_spatial(params.pad())?;
    Ok(ConvGrads { dx, dw, db })
}

/// 2D Convolutional layer with learnable filters.
///
/// # Fields
///
/// * `weights` - Filters (out_channels × in_channels × kernel_height × kernel_width)
/// * `biases` - Bias for each output channel (out_channels)
/// * `params` - Stride and zero-padding
/// * `grad_weights`, `grad_biases` - Gradients accumulated by `backward`
///
/// # Example
///
/// ```
/// use rust_cnn_kernels::config::ConvParams;
/// use rust_cnn_kernels::layers::{Conv2DLayer, Layer};
/// use rust_cnn_kernels::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// // 1 input channel (grayscale), 8 output channels, 3x3 kernel, padding=1
/// let layer = Conv2DLayer::new(1, 8, 3, 3, ConvParams::new(1, 1).unwrap(), &mut rng);
/// assert_eq!(layer.out_channels(), 8);
/// assert_eq!(layer.parameter_count(), 80);
/// ```
#[derive(Debug, Clone)]
pub struct Conv2DLayer {
    weights: Tensor,
    biases: Vec<f64>,
    params: ConvParams,
    grad_weights: Tensor,
    grad_biases: Vec<f64>,
}

impl Conv2DLayer {
    /// Create a new Conv2DLayer with Xavier initialization.
    ///
    /// Weights are sampled uniformly from [-limit, limit] where
    /// `limit = sqrt(6 / (fan_in + fan_out))`,
    /// `fan_in = in_channels × kernel area` and `fan_out = out_channels × kernel area`.
    /// Biases are initialized to zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_height: usize,
        kernel_width: usize,
        params: ConvParams,
        rng: &mut SimpleRng,
    ) -> Self {
        let area = kernel_height * kernel_width;
        let fan_in = (in_channels * area) as f64;
        let fan_out = (out_channels * area) as f64;
        let limit = (6.0 / (fan_in + fan_out).max(1.0)).sqrt();

        let shape = Shape4::new(out_channels, in_channels, kernel_height, kernel_width);
        let weights = Tensor::random(shape, -limit, limit, rng);

        Self {
            weights,
            biases: vec![0.0; out_channels],
            params,
            grad_weights: Tensor::zeros(shape),
            grad_biases: vec![0.0; out_channels],
        }
    }

    /// Create a layer from explicit filters and biases.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `biases` does not have one entry per filter.
    pub fn from_parts(weights: Tensor, biases: Vec<f64>, params: ConvParams) -> KernelResult<Self> {
        let shape = weights.shape();
        if biases.len() != shape.batch {
            return Err(KernelError::shape_mismatch(
                "Conv2DLayer::from_parts",
                format!("{} biases", shape.batch),
                format!("{} biases", biases.len()),
            ));
        }
        Ok(Self {
            grad_weights: Tensor::zeros(shape),
            grad_biases: vec![0.0; biases.len()],
            weights,
            biases,
            params,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.weights.shape().channels
    }

    pub fn out_channels(&self) -> usize {
        self.weights.shape().batch
    }

    /// Kernel size as (height, width).
    pub fn kernel_size(&self) -> (usize, usize) {
        let shape = self.weights.shape();
        (shape.height, shape.width)
    }

    pub fn params(&self) -> ConvParams {
        self.params
    }

    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    pub fn grad_weights(&self) -> &Tensor {
        &self.grad_weights
    }

    pub fn grad_biases(&self) -> &[f64] {
        &self.grad_biases
    }
}

impl Layer for Conv2DLayer {
    type Cache = ConvCache;

    fn forward(&self, input: &Tensor) -> KernelResult<(Tensor, ConvCache)> {
        conv_forward(input, &self.weights, &self.biases, self.params)
    }

    fn backward(&mut self, grad_output: &Tensor, cache: ConvCache) -> KernelResult<Tensor> {
        let grads = conv_backward(grad_output, cache)?;
        if grads.dw.shape() != self.weights.shape() {
            return Err(KernelError::shape_mismatch(
                "Conv2DLayer::backward",
                self.weights.shape(),
                grads.dw.shape(),
            ));
        }

        for (acc, g) in self.grad_weights.data_mut().iter_mut().zip(grads.dw.data()) {
            *acc += g;
        }
        for (acc, g) in self.grad_biases.iter_mut().zip(&grads.db) {
            *acc += g;
        }
        Ok(grads.dx)
    }

    fn update_parameters(&mut self, learning_rate: f64) {
        for (w, g) in self
            .weights
            .data_mut()
            .iter_mut()
            .zip(self.grad_weights.data_mut().iter_mut())
        {
            *w -= learning_rate * *g;
            *g = 0.0;
        }
        for (b, g) in self.biases.iter_mut().zip(self.grad_biases.iter_mut()) {
            *b -= learning_rate * *g;
            *g = 0.0;
        }
    }

    fn output_shape(&self, input: Shape4) -> KernelResult<Shape4> {
        let ws = self.weights.shape();
        if input.channels != ws.channels {
            return Err(KernelError::shape_mismatch(
                "Conv2DLayer::output_shape",
                format!("{} input channels", ws.channels),
                format!("{} input channels", input.channels),
            ));
        }
        let (out_h, out_w) = self
            .params
            .output_dims(input.height, input.width, ws.height, ws.width)?;
        Ok(Shape4::new(input.batch, ws.batch, out_h, out_w))
    }

    fn parameter_count(&self) -> usize {
        self.weights.shape().volume() + self.biases.len()
    }
}
