//! Activations shared by the scene fields and the compositor.

use burn::tensor::{activation, backend::Backend, Tensor};

/// The overshoot of [`sigmoid_bounded`] on both sides of `[0, 1]`.
pub const SIGMOID_BOUNDED_EPSILON: f64 = 1e-3;

/// Sigmoid rescaled to `(-eps, 1 + eps)`.
///
/// `sigmoid(input) * (1 + 2 * eps) - eps`
///
/// The outputs can reach `0.0` and `1.0` with finite logits.
///
/// ## Example
///
/// ```rust
/// use burn::{backend::NdArray, tensor::Tensor};
/// use radiance_field_renderer::function::sigmoid_bounded;
///
/// let device = Default::default();
/// let input = Tensor::<NdArray<f32>, 1>::from_floats([0.0], &device);
/// let output = sigmoid_bounded(input, 1e-3).into_scalar();
///
/// assert!((output - 0.5).abs() < 1e-6);
/// ```
#[inline]
pub fn sigmoid_bounded<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    eps: f64,
) -> Tensor<B, D> {
    activation::sigmoid(input)
        .mul_scalar(1.0 + 2.0 * eps)
        .sub_scalar(eps)
}

/// `log(1 + exp(input))` without overflow.
///
/// `relu(input) + log1p(exp(-|input|))`
#[inline]
pub fn softplus<B: Backend, const D: usize>(
    input: Tensor<B, D>
) -> Tensor<B, D> {
    let tail = input.to_owned().abs().neg().exp().log1p();
    activation::relu(input) + tail
}

/// `softplus(input - 1)`
#[inline]
pub fn softplus_shifted<B: Backend, const D: usize>(
    input: Tensor<B, D>
) -> Tensor<B, D> {
    softplus(input.sub_scalar(1.0))
}

/// The euclidean norm along `dim`, keeping the dimension.
#[inline]
pub fn norm_l2<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    dim: usize,
) -> Tensor<B, D> {
    input.powf_scalar(2.0).sum_dim(dim).sqrt()
}

/// Scale to unit euclidean norm along `dim`.
///
/// Vectors shorter than `1e-12` are scaled by `1e12` instead.
#[inline]
pub fn normalize_l2<B: Backend, const D: usize>(
    input: Tensor<B, D>,
    dim: usize,
) -> Tensor<B, D> {
    let norm = norm_l2(input.to_owned(), dim).clamp_min(1e-12);
    input / norm
}
