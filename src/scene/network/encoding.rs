//! Positional encoding.

pub use super::*;

use std::f64::consts::PI;

/// Frequency encoding of the last dimension.
///
/// `[x, sin(2^0 * pi * x), cos(2^0 * pi * x), ..., sin(2^(L - 1) * pi * x), cos(2^(L - 1) * pi * x)]`
#[derive(Clone, Copy, Debug, Default, Module)]
pub struct PositionalEncoder {
    /// `L`
    pub frequency_count: usize,
}

impl PositionalEncoder {
    /// Initialize the encoder.
    #[inline]
    pub const fn init(frequency_count: usize) -> Self {
        Self { frequency_count }
    }

    /// The output width for the input width `dim_input`.
    #[inline]
    pub const fn dim_output(
        &self,
        dim_input: usize,
    ) -> usize {
        dim_input * (1 + 2 * self.frequency_count)
    }

    /// ## Shapes
    ///
    /// * `input` - `[..., C]`
    /// * `output` - `[..., C * (1 + 2 * L)]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.frequency_count == 0 {
            return input;
        }

        let mut encodings = Vec::with_capacity(1 + 2 * self.frequency_count);
        encodings.push(input.to_owned());
        for level in 0..self.frequency_count {
            let phases = input.to_owned().mul_scalar(PI * (1_u64 << level) as f64);
            encodings.push(phases.to_owned().sin());
            encodings.push(phases.cos());
        }
        Tensor::cat(encodings, D - 1)
    }
}
