//! Dense 4-D tensors
//!
//! A `Tensor` is a flat, row-major `Vec<f64>` plus a `Shape4`. Images and
//! feature maps use the (batch, channels, height, width) layout; filter banks
//! reuse the same layout as (filters, channels, height, width).
//!
//! Each (n, c) pair addresses one contiguous `height × width` plane, which is
//! the unit the kernels iterate over.

use crate::error::{KernelError, KernelResult};
use crate::utils::SimpleRng;
use std::fmt;

/// Shape of a 4-D tensor in (batch, channels, height, width) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape4 {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Shape4 {
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Total number of elements.
    pub fn volume(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }

    /// Number of elements in one spatial plane.
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    /// Flat offset of element (n, c, h, w).
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        debug_assert!(n < self.batch && c < self.channels && h < self.height && w < self.width);
        ((n * self.channels + c) * self.height + h) * self.width + w
    }
}

impl fmt::Display for Shape4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.batch, self.channels, self.height, self.width
        )
    }
}

/// Dense 4-D tensor of `f64` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape4,
    data: Vec<f64>,
}

impl Tensor {
    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Shape4) -> Self {
        Self::filled(shape, 0.0)
    }

    /// Create a tensor with every element set to `value`.
    pub fn filled(shape: Shape4, value: f64) -> Self {
        Self {
            shape,
            data: vec![value; shape.volume()],
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `data.len()` differs from the shape's volume.
    pub fn from_vec(shape: Shape4, data: Vec<f64>) -> KernelResult<Self> {
        if data.len() != shape.volume() {
            return Err(KernelError::shape_mismatch(
                "Tensor::from_vec",
                format!("{} elements for shape {}", shape.volume(), shape),
                format!("{} elements", data.len()),
            ));
        }
        Ok(Self { shape, data })
    }

    /// Build a tensor by evaluating `f(n, c, h, w)` for every element.
    pub fn from_fn<F>(shape: Shape4, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(shape.volume());
        for n in 0..shape.batch {
            for c in 0..shape.channels {
                for h in 0..shape.height {
                    for w in 0..shape.width {
                        data.push(f(n, c, h, w));
                    }
                }
            }
        }
        Self { shape, data }
    }

    /// Uniform random tensor in [low, high).
    pub fn random(shape: Shape4, low: f64, high: f64, rng: &mut SimpleRng) -> Self {
        let data = (0..shape.volume())
            .map(|_| rng.gen_range_f64(low, high))
            .collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> Shape4 {
        self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Element at (n, c, h, w).
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f64 {
        self.data[self.shape.offset(n, c, h, w)]
    }

    /// Contiguous `height × width` plane for sample `n`, channel `c`.
    pub fn plane(&self, n: usize, c: usize) -> &[f64] {
        let len = self.shape.plane_len();
        let start = (n * self.shape.channels + c) * len;
        &self.data[start..start + len]
    }

    /// Mutable plane for sample `n`, channel `c`.
    pub fn plane_mut(&mut self, n: usize, c: usize) -> &mut [f64] {
        let len = self.shape.plane_len();
        let start = (n * self.shape.channels + c) * len;
        &mut self.data[start..start + len]
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Element-wise product summed over all elements.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the shapes differ.
    pub fn dot(&self, other: &Tensor) -> KernelResult<f64> {
        if self.shape != other.shape {
            return Err(KernelError::shape_mismatch(
                "Tensor::dot",
                self.shape,
                other.shape,
            ));
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Zero-pad height and width by `pad` on every side.
    ///
    /// Batch and channel dimensions are left untouched.
    pub fn pad_spatial(&self, pad: usize) -> Tensor {
        if pad == 0 {
            return self.clone();
        }
        let src = self.shape;
        let dst = Shape4::new(
            src.batch,
            src.channels,
            src.height + 2 * pad,
            src.width + 2 * pad,
        );
        let mut padded = Tensor::zeros(dst);
        for n in 0..src.batch {
            for c in 0..src.channels {
                let from = self.plane(n, c);
                let to = padded.plane_mut(n, c);
                for (h, row) in from.chunks_exact(src.width.max(1)).enumerate() {
                    let start = (h + pad) * dst.width + pad;
                    to[start..start + row.len()].copy_from_slice(row);
                }
            }
        }
        padded
    }

    /// Strip a `pad` border from height and width, the inverse of `pad_spatial`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the tensor is too small to hold the border.
    pub fn crop_spatial(&self, pad: usize) -> KernelResult<Tensor> {
        let src = self.shape;
        if src.height < 2 * pad || src.width < 2 * pad {
            return Err(KernelError::shape_mismatch(
                "Tensor::crop_spatial",
                format!("height and width of at least {}", 2 * pad),
                src,
            ));
        }
        if pad == 0 {
            return Ok(self.clone());
        }
        let dst = Shape4::new(
            src.batch,
            src.channels,
            src.height - 2 * pad,
            src.width - 2 * pad,
        );
        let mut cropped = Tensor::zeros(dst);
        for n in 0..src.batch {
            for c in 0..src.channels {
                let from = self.plane(n, c);
                let to = cropped.plane_mut(n, c);
                for h in 0..dst.height {
                    let start = (h + pad) * src.width + pad;
                    to[h * dst.width..(h + 1) * dst.width]
                        .copy_from_slice(&from[start..start + dst.width]);
                }
            }
        }
        Ok(cropped)
    }
}
