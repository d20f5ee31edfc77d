//! Kernel parameters and configuration loading
//!
//! `ConvParams` and `PoolParams` are the typed, validated parameter records
//! consumed by the kernels. They can only be built through their constructors,
//! so a value in hand is always valid.
//!
//! Parameters can also be read from JSON files shaped like the classic
//! `conv_param` / `pool_param` bags:
//!
//! ```json
//! {
//!   "conv_param": { "stride": 1, "pad": 1 },
//!   "pool_param": { "pool_height": 2, "pool_width": 2, "stride": 2 }
//! }
//! ```

use crate::error::{KernelError, KernelResult};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Stride and zero-padding of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvParams {
    stride: usize,
    pad: usize,
}

impl ConvParams {
    /// Create validated convolution parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `stride` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_cnn_kernels::config::ConvParams;
    ///
    /// let params = ConvParams::new(2, 1).unwrap();
    /// assert_eq!(params.stride(), 2);
    /// assert_eq!(params.pad(), 1);
    /// assert!(ConvParams::new(0, 1).is_err());
    /// ```
    pub fn new(stride: usize, pad: usize) -> KernelResult<Self> {
        if stride == 0 {
            return Err(KernelError::invalid_parameter(
                "ConvParams",
                "stride",
                "must be greater than 0",
            ));
        }
        Ok(Self { stride, pad })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    /// Output spatial dimensions for an input of `height × width` and a filter
    /// of `kernel_height × kernel_width`.
    ///
    /// Calculated as `1 + (size + 2*pad - kernel) / stride`, floored. When the
    /// stride does not tile the padded input evenly the trailing rows or
    /// columns are never visited.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the filter is empty or larger than the
    /// padded input.
    pub fn output_dims(
        &self,
        height: usize,
        width: usize,
        kernel_height: usize,
        kernel_width: usize,
    ) -> KernelResult<(usize, usize)> {
        let out_h = window_count(
            "conv_forward",
            "filter height",
            self.padded_extent(height)?,
            kernel_height,
            self.stride,
        )?;
        let out_w = window_count(
            "conv_forward",
            "filter width",
            self.padded_extent(width)?,
            kernel_width,
            self.stride,
        )?;
        Ok((out_h, out_w))
    }

    // `size + 2 * pad`, rejecting padding that overflows.
    fn padded_extent(&self, size: usize) -> KernelResult<usize> {
        self.pad
            .checked_mul(2)
            .and_then(|border| size.checked_add(border))
            .ok_or_else(|| {
                KernelError::invalid_parameter(
                    "conv_forward",
                    "pad",
                    format!("padding {} overflows input extent {}", self.pad, size),
                )
            })
    }
}

impl Default for ConvParams {
    fn default() -> Self {
        Self { stride: 1, pad: 0 }
    }
}

/// Window size and stride of a max-pooling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolParams {
    pool_height: usize,
    pool_width: usize,
    stride: usize,
}

impl PoolParams {
    /// Create validated pooling parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if any value is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_cnn_kernels::config::PoolParams;
    ///
    /// let params = PoolParams::new(2, 2, 2).unwrap();
    /// assert_eq!(params.output_dims(28, 28).unwrap(), (14, 14));
    /// ```
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> KernelResult<Self> {
        for (parameter, value) in [
            ("pool_height", pool_height),
            ("pool_width", pool_width),
            ("stride", stride),
        ] {
            if value == 0 {
                return Err(KernelError::invalid_parameter(
                    "PoolParams",
                    parameter,
                    "must be greater than 0",
                ));
            }
        }
        Ok(Self {
            pool_height,
            pool_width,
            stride,
        })
    }

    pub fn pool_height(&self) -> usize {
        self.pool_height
    }

    pub fn pool_width(&self) -> usize {
        self.pool_width
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Output spatial dimensions: `1 + (size - window) / stride`, floored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the window is larger than the input.
    pub fn output_dims(&self, height: usize, width: usize) -> KernelResult<(usize, usize)> {
        let out_h = window_count(
            "max_pool_forward",
            "pool_height",
            height,
            self.pool_height,
            self.stride,
        )?;
        let out_w = window_count(
            "max_pool_forward",
            "pool_width",
            width,
            self.pool_width,
            self.stride,
        )?;
        Ok((out_h, out_w))
    }
}

// Number of whole windows of `window` that fit in `extent` at `stride`.
fn window_count(
    operation: &'static str,
    parameter: &'static str,
    extent: usize,
    window: usize,
    stride: usize,
) -> KernelResult<usize> {
    if window == 0 {
        return Err(KernelError::invalid_parameter(
            operation,
            parameter,
            "must be greater than 0",
        ));
    }
    if window > extent {
        return Err(KernelError::invalid_parameter(
            operation,
            parameter,
            format!("window of {} does not fit input extent {}", window, extent),
        ));
    }
    let span = extent - window;
    if span % stride != 0 {
        tracing::debug!(
            operation,
            extent,
            window,
            stride,
            dropped = span % stride,
            "stride does not tile input evenly; trailing positions are skipped"
        );
    }
    Ok(1 + span / stride)
}

/// `conv_param` block of a kernel configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvParamConfig {
    /// Stride between adjacent receptive fields (default: 1)
    pub stride: Option<usize>,
    /// Zero-padding on each spatial side (default: 0)
    pub pad: Option<usize>,
}

/// `pool_param` block of a kernel configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolParamConfig {
    pub pool_height: Option<usize>,
    pub pool_width: Option<usize>,
    pub stride: Option<usize>,
}

/// Kernel configuration as read from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KernelConfig {
    pub conv_param: Option<ConvParamConfig>,
    pub pool_param: Option<PoolParamConfig>,
}

impl KernelConfig {
    /// Validated convolution parameters; defaults apply when the block or a
    /// field is absent.
    pub fn conv_params(&self) -> KernelResult<ConvParams> {
        let block = self.conv_param.clone().unwrap_or_default();
        ConvParams::new(block.stride.unwrap_or(1), block.pad.unwrap_or(0))
    }

    /// Validated pooling parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the `pool_param` block or one of its fields
    /// is missing, `InvalidParameter` if a value is zero.
    pub fn pool_params(&self) -> KernelResult<PoolParams> {
        let block = self
            .pool_param
            .as_ref()
            .ok_or_else(|| KernelError::InvalidConfig("missing 'pool_param'".to_string()))?;
        let require = |value: Option<usize>, name: &str| {
            value.ok_or_else(|| {
                KernelError::InvalidConfig(format!("pool_param requires '{}'", name))
            })
        };
        PoolParams::new(
            require(block.pool_height, "pool_height")?,
            require(block.pool_width, "pool_width")?,
            require(block.stride, "stride")?,
        )
    }
}

/// Loads a kernel configuration from a JSON file.
///
/// Every block present in the file is validated before returning.
///
/// # Examples
///
/// ```no_run
/// use rust_cnn_kernels::config::load_config;
///
/// let cfg = load_config("config/kernels.json").unwrap();
/// assert_eq!(cfg.conv_params().unwrap().pad(), 1);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> KernelResult<KernelConfig> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parses and validates a kernel configuration from a JSON string.
pub fn parse_config(json: &str) -> KernelResult<KernelConfig> {
    let config: KernelConfig = serde_json::from_str(json)?;
    if config.conv_param.is_some() {
        config.conv_params()?;
    }
    if config.pool_param.is_some() {
        config.pool_params()?;
    }
    Ok(config)
}
