//! Architecture configuration and sequential conv/pool stacks
//!
//! This module describes a stack of convolution and max-pooling layers in
//! JSON, validates every layer and the spatial shape chain once at load time,
//! and builds a `Network` that runs the kernels in sequence.

use crate::config::{ConvParams, PoolParams};
use crate::error::{KernelError, KernelResult};
use crate::layers::{Conv2DLayer, ConvCache, Layer, MaxPoolLayer, PoolCache};
use crate::tensor::{Shape4, Tensor};
use crate::utils::SimpleRng;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Kind of layer named by `layer_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Conv,
    MaxPool,
}

impl FromStr for LayerKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conv" | "conv2d" => Ok(LayerKind::Conv),
            "max_pool" | "maxpool" => Ok(LayerKind::MaxPool),
            _ => Err(KernelError::InvalidMode {
                context: "layer_type",
                value: s.to_string(),
                expected: "conv, conv2d, max_pool, maxpool".to_string(),
            }),
        }
    }
}

/// Configuration for a single layer.
///
/// - **conv**: Requires `out_channels` and either `kernel_size` (square) or
///   both `kernel_height` and `kernel_width`; optional `stride` (default 1)
///   and `pad` (default 0)
/// - **max_pool**: Requires `pool_height`, `pool_width` and `stride`
///
/// # Examples
///
/// ```json
/// { "layer_type": "conv", "out_channels": 8, "kernel_size": 3, "pad": 1 }
/// ```
///
/// ```json
/// { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2, "stride": 2 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    /// Type of layer: "conv" or "max_pool"
    pub layer_type: String,

    /// Number of filters for a conv layer
    pub out_channels: Option<usize>,
    /// Square kernel size for a conv layer
    pub kernel_size: Option<usize>,
    pub kernel_height: Option<usize>,
    pub kernel_width: Option<usize>,
    /// Zero-padding for a conv layer (default: 0)
    pub pad: Option<usize>,

    /// Stride for either layer type
    pub stride: Option<usize>,

    pub pool_height: Option<usize>,
    pub pool_width: Option<usize>,
}

/// Configuration for a whole stack.
///
/// # Example
///
/// ```json
/// {
///   "input_channels": 1,
///   "input_height": 28,
///   "input_width": 28,
///   "layers": [
///     { "layer_type": "conv", "out_channels": 8, "kernel_size": 3, "pad": 1 },
///     { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2, "stride": 2 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ArchitectureConfig {
    pub input_channels: usize,
    pub input_height: usize,
    pub input_width: usize,
    /// Layers in the order they are applied
    pub layers: Vec<LayerConfig>,
}

/// A layer description after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSpec {
    Conv {
        out_channels: usize,
        kernel_height: usize,
        kernel_width: usize,
        params: ConvParams,
    },
    MaxPool(PoolParams),
}

impl LayerConfig {
    /// Validate this layer and convert it to a `LayerSpec`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMode` for an unknown `layer_type`, `InvalidConfig` for
    /// missing or zero-sized fields and `InvalidParameter` for a zero stride
    /// or pooling window.
    pub fn to_spec(&self, index: usize) -> KernelResult<LayerSpec> {
        let require = |value: Option<usize>, name: &str| {
            value.ok_or_else(|| {
                KernelError::InvalidConfig(format!(
                    "Layer {}: {} layer requires '{}'",
                    index, self.layer_type, name
                ))
            })
        };

        match self.layer_type.parse::<LayerKind>()? {
            LayerKind::Conv => {
                let out_channels = require(self.out_channels, "out_channels")?;
                let (kernel_height, kernel_width) =
                    match (self.kernel_height, self.kernel_width, self.kernel_size) {
                        (Some(h), Some(w), _) => (h, w),
                        (None, None, Some(size)) => (size, size),
                        _ => (
                            require(self.kernel_height.or(self.kernel_size), "kernel_height")?,
                            require(self.kernel_width.or(self.kernel_size), "kernel_width")?,
                        ),
                    };
                for (name, value) in [
                    ("out_channels", out_channels),
                    ("kernel_height", kernel_height),
                    ("kernel_width", kernel_width),
                ] {
                    if value == 0 {
                        return Err(KernelError::InvalidConfig(format!(
                            "Layer {}: {} must be greater than 0",
                            index, name
                        )));
                    }
                }
                let params = ConvParams::new(self.stride.unwrap_or(1), self.pad.unwrap_or(0))?;
                Ok(LayerSpec::Conv {
                    out_channels,
                    kernel_height,
                    kernel_width,
                    params,
                })
            }
            LayerKind::MaxPool => {
                let params = PoolParams::new(
                    require(self.pool_height, "pool_height")?,
                    require(self.pool_width, "pool_width")?,
                    require(self.stride, "stride")?,
                )?;
                Ok(LayerSpec::MaxPool(params))
            }
        }
    }
}

impl LayerSpec {
    /// Output shape for an input of shape `input`.
    fn output_shape(&self, input: Shape4) -> KernelResult<Shape4> {
        match self {
            LayerSpec::Conv {
                out_channels,
                kernel_height,
                kernel_width,
                params,
            } => {
                let (h, w) =
                    params.output_dims(input.height, input.width, *kernel_height, *kernel_width)?;
                Ok(Shape4::new(input.batch, *out_channels, h, w))
            }
            LayerSpec::MaxPool(params) => {
                let (h, w) = params.output_dims(input.height, input.width)?;
                Ok(Shape4::new(input.batch, input.channels, h, w))
            }
        }
    }
}

impl ArchitectureConfig {
    /// Shape of a single input sample, (1, C, H, W).
    pub fn input_shape(&self) -> Shape4 {
        Shape4::new(1, self.input_channels, self.input_height, self.input_width)
    }

    /// Validated layer specs in order.
    pub fn layer_specs(&self) -> KernelResult<Vec<LayerSpec>> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| layer.to_spec(i))
            .collect()
    }

    /// Shape of a single output sample, following the shape chain.
    ///
    /// # Errors
    ///
    /// Returns the first layer error encountered, prefixed with the layer index.
    pub fn output_shape(&self) -> KernelResult<Shape4> {
        let mut shape = self.input_shape();
        for (i, spec) in self.layer_specs()?.iter().enumerate() {
            shape = spec.output_shape(shape).map_err(|err| {
                KernelError::InvalidConfig(format!(
                    "Layer {}: does not fit input {}: {}",
                    i, shape, err
                ))
            })?;
        }
        Ok(shape)
    }
}

/// Loads an architecture configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_cnn_kernels::architecture::load_architecture;
///
/// let arch = load_architecture("config/architectures/conv_pool.json").unwrap();
/// assert!(!arch.layers.is_empty());
/// ```
pub fn load_architecture<P: AsRef<Path>>(path: P) -> KernelResult<ArchitectureConfig> {
    let contents = fs::read_to_string(path)?;
    parse_architecture(&contents)
}

/// Parses and validates an architecture from a JSON string.
///
/// Checks that:
/// - The input geometry is non-empty
/// - There is at least one layer
/// - Each layer has a known type and the fields it requires
/// - Every layer fits the output of the previous one
pub fn parse_architecture(json: &str) -> KernelResult<ArchitectureConfig> {
    let config: ArchitectureConfig = serde_json::from_str(json)?;
    validate_architecture(&config)?;
    Ok(config)
}

fn validate_architecture(config: &ArchitectureConfig) -> KernelResult<()> {
    if config.input_channels == 0 || config.input_height == 0 || config.input_width == 0 {
        return Err(KernelError::InvalidConfig(
            "input_channels, input_height and input_width must be greater than 0".to_string(),
        ));
    }
    if config.layers.is_empty() {
        return Err(KernelError::InvalidConfig(
            "Architecture must have at least one layer".to_string(),
        ));
    }
    config.output_shape()?;
    Ok(())
}

/// A layer of a `Network`.
#[derive(Debug, Clone)]
pub enum NetworkLayer {
    Conv(Conv2DLayer),
    MaxPool(MaxPoolLayer),
}

/// Cache produced by one layer of a `Network` forward pass.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerCache {
    Conv(ConvCache),
    MaxPool(PoolCache),
}

impl NetworkLayer {
    fn kind(&self) -> &'static str {
        match self {
            NetworkLayer::Conv(_) => "conv",
            NetworkLayer::MaxPool(_) => "max_pool",
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            NetworkLayer::Conv(layer) => layer.parameter_count(),
            NetworkLayer::MaxPool(layer) => layer.parameter_count(),
        }
    }
}

/// Sequential stack of convolution and max-pooling layers.
#[derive(Debug, Clone)]
pub struct Network {
    input_shape: Shape4,
    layers: Vec<NetworkLayer>,
}

impl Network {
    pub fn layers(&self) -> &[NetworkLayer] {
        &self.layers
    }

    /// Per-sample input shape, (1, C, H, W).
    pub fn input_shape(&self) -> Shape4 {
        self.input_shape
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(NetworkLayer::parameter_count).sum()
    }

    /// Run every layer in order.
    ///
    /// Returns the final output and one cache per layer, to be handed back to
    /// `backward` unmodified.
    pub fn forward(&self, input: &Tensor) -> KernelResult<(Tensor, Vec<LayerCache>)> {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut activation = input.clone();
        for layer in &self.layers {
            activation = match layer {
                NetworkLayer::Conv(conv) => {
                    let (out, cache) = conv.forward(&activation)?;
                    caches.push(LayerCache::Conv(cache));
                    out
                }
                NetworkLayer::MaxPool(pool) => {
                    let (out, cache) = pool.forward(&activation)?;
                    caches.push(LayerCache::MaxPool(cache));
                    out
                }
            };
        }
        Ok((activation, caches))
    }

    /// Backpropagate `grad_output` through every layer in reverse.
    ///
    /// Convolution gradients are accumulated inside each layer; the returned
    /// tensor is the gradient with respect to the network input.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the number of caches differs from the number
    /// of layers and `CacheMismatch` if a cache belongs to another layer type.
    pub fn backward(&mut self, grad_output: &Tensor, caches: Vec<LayerCache>) -> KernelResult<Tensor> {
        if caches.len() != self.layers.len() {
            return Err(KernelError::shape_mismatch(
                "Network::backward",
                format!("{} caches", self.layers.len()),
                format!("{} caches", caches.len()),
            ));
        }

        let mut grad = grad_output.clone();
        for (index, (layer, cache)) in self
            .layers
            .iter_mut()
            .zip(caches)
            .enumerate()
            .rev()
        {
            grad = match (layer, cache) {
                (NetworkLayer::Conv(conv), LayerCache::Conv(cache)) => conv.backward(&grad, cache)?,
                (NetworkLayer::MaxPool(pool), LayerCache::MaxPool(cache)) => {
                    pool.backward(&grad, cache)?
                }
                (layer, _) => {
                    return Err(KernelError::CacheMismatch {
                        index,
                        expected: format!("{} cache", layer.kind()),
                    })
                }
            };
        }
        Ok(grad)
    }

    /// Apply and clear the accumulated gradients of every layer.
    pub fn update_parameters(&mut self, learning_rate: f64) {
        for layer in &mut self.layers {
            match layer {
                NetworkLayer::Conv(conv) => conv.update_parameters(learning_rate),
                NetworkLayer::MaxPool(pool) => pool.update_parameters(learning_rate),
            }
        }
    }
}

/// Build a network from a validated architecture configuration.
///
/// Convolution layers are Xavier-initialized from `rng`; their input channel
/// count follows from the previous layer.
///
/// # Examples
///
/// ```
/// use rust_cnn_kernels::architecture::{build_network, parse_architecture};
/// use rust_cnn_kernels::utils::SimpleRng;
///
/// let config = parse_architecture(r#"{
///     "input_channels": 1, "input_height": 8, "input_width": 8,
///     "layers": [
///         { "layer_type": "conv", "out_channels": 4, "kernel_size": 3, "pad": 1 },
///         { "layer_type": "max_pool", "pool_height": 2, "pool_width": 2, "stride": 2 }
///     ]
/// }"#).unwrap();
/// let mut rng = SimpleRng::new(42);
/// let network = build_network(&config, &mut rng).unwrap();
/// assert_eq!(network.layers().len(), 2);
/// assert_eq!(network.parameter_count(), 4 * 9 + 4);
/// ```
pub fn build_network(config: &ArchitectureConfig, rng: &mut SimpleRng) -> KernelResult<Network> {
    validate_architecture(config)?;

    let mut shape = config.input_shape();
    let mut layers = Vec::with_capacity(config.layers.len());
    for spec in config.layer_specs()? {
        let layer = match spec {
            LayerSpec::Conv {
                out_channels,
                kernel_height,
                kernel_width,
                params,
            } => NetworkLayer::Conv(Conv2DLayer::new(
                shape.channels,
                out_channels,
                kernel_height,
                kernel_width,
                params,
                rng,
            )),
            LayerSpec::MaxPool(params) => NetworkLayer::MaxPool(MaxPoolLayer::new(params)),
        };
        shape = spec.output_shape(shape)?;
        layers.push(layer);
    }

    let network = Network {
        input_shape: config.input_shape(),
        layers,
    };
    tracing::info!(
        layers = network.layers.len(),
        parameters = network.parameter_count(),
        output = %shape,
        "built network"
    );
    Ok(network)
}
