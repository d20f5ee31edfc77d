//! Numerical gradient checking using centred finite differences.
//!
//! For a function `f` producing a tensor and an upstream gradient `dout`, the
//! scalar loss is `L(x) = Σ f(x) · dout`, so `∂L/∂x_i` is exactly what a
//! backward pass returns for `x`. Each input element is nudged by `±h` and
//! the loss difference is divided by `2h`.

use crate::error::{KernelError, KernelResult};
use crate::tensor::Tensor;

/// Estimate `∂(Σ f(x) · dout) / ∂x` element by element.
///
/// `f` receives the perturbed buffer and must return the forward output.
///
/// # Errors
///
/// Propagates any error from `f`, and `ShapeMismatch` if `f`'s output shape
/// differs from `dout`.
///
/// # Example
///
/// ```
/// use rust_cnn_kernels::tensor::{Shape4, Tensor};
/// use rust_cnn_kernels::utils::numerical_gradient;
///
/// let shape = Shape4::new(1, 1, 1, 3);
/// let dout = Tensor::filled(shape, 1.0);
/// // f(x) = 2x, so the gradient of Σ f(x) is 2 everywhere
/// let grad = numerical_gradient(
///     |v| Tensor::from_vec(shape, v.iter().map(|x| 2.0 * x).collect()),
///     &[1.0, -1.0, 0.5],
///     &dout,
///     1e-5,
/// )
/// .unwrap();
/// assert!(grad.iter().all(|g| (g - 2.0).abs() < 1e-8));
/// ```
pub fn numerical_gradient<F>(mut f: F, x: &[f64], dout: &Tensor, h: f64) -> KernelResult<Vec<f64>>
where
    F: FnMut(&[f64]) -> KernelResult<Tensor>,
{
    let mut probe = x.to_vec();
    let mut grad = vec![0.0; x.len()];

    for i in 0..x.len() {
        let original = probe[i];

        probe[i] = original + h;
        let loss_plus = f(&probe)?.dot(dout)?;
        probe[i] = original - h;
        let loss_minus = f(&probe)?.dot(dout)?;
        probe[i] = original;

        grad[i] = (loss_plus - loss_minus) / (2.0 * h);
    }

    Ok(grad)
}

/// Relative error between two gradient buffers: `‖a − b‖ / (‖a‖ + ‖b‖)`.
///
/// Two all-zero buffers compare as 0.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the buffers have different lengths.
pub fn relative_error(a: &[f64], b: &[f64]) -> KernelResult<f64> {
    if a.len() != b.len() {
        return Err(KernelError::shape_mismatch(
            "relative_error",
            format!("{} elements", a.len()),
            format!("{} elements", b.len()),
        ));
    }

    let diff = l2_norm(a.iter().zip(b).map(|(x, y)| x - y));
    let scale = l2_norm(a.iter().copied()) + l2_norm(b.iter().copied());

    Ok(diff / scale.max(1e-12))
}

fn l2_norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|x| x * x).sum::<f64>().sqrt()
}
