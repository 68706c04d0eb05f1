//! Gated update operator.

pub use super::*;
pub use burn::nn::Linear;

use burn::nn::{Initializer, LinearConfig};
use burn::tensor::activation;

/// The configuration for [`GatedUpdate`].
#[derive(Config, Copy, Debug)]
pub struct GatedUpdateConfig {
    /// Input dimension.
    pub dim_input: usize,
    /// Output dimension.
    pub dim_output: usize,
    /// Hidden state dimension.
    #[config(default = 32)]
    pub dim_hidden: usize,
}

/// A single gated recurrent update whose initial state is projected from the input.
///
/// ```plaintext
/// h_0 = tanh(W_s * x)
/// z   = sigmoid(W_z * [x, h_0])
/// r   = sigmoid(W_r * [x, h_0])
/// q   = tanh(W_q * [x, r * h_0])
/// h_1 = (1 - z) * h_0 + z * q
/// y   = W_o * h_1
/// ```
///
/// The output layer starts at zero.
#[derive(Debug, Module)]
pub struct GatedUpdate<B: Backend> {
    pub state: Linear<B>,
    pub update: Linear<B>,
    pub reset: Linear<B>,
    pub candidate: Linear<B>,
    pub output: Linear<B>,
}

impl GatedUpdateConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> GatedUpdate<B> {
        let dim_joint = self.dim_input + self.dim_hidden;
        GatedUpdate {
            state: LinearConfig::new(self.dim_input, self.dim_hidden).init(device),
            update: LinearConfig::new(dim_joint, self.dim_hidden).init(device),
            reset: LinearConfig::new(dim_joint, self.dim_hidden).init(device),
            candidate: LinearConfig::new(dim_joint, self.dim_hidden).init(device),
            output: LinearConfig::new(self.dim_hidden, self.dim_output)
                .with_initializer(Initializer::Zeros)
                .init(device),
        }
    }
}

impl<B: Backend> GatedUpdate<B> {
    /// ## Shapes
    ///
    /// * `input` - [`[..., dim_input]`](GatedUpdateConfig::dim_input)
    /// * `output` - [`[..., dim_output]`](GatedUpdateConfig::dim_output)
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let state = self.state.forward(input.to_owned()).tanh();
        let joint = Tensor::cat(vec![input.to_owned(), state.to_owned()], D - 1);

        let update = activation::sigmoid(self.update.forward(joint.to_owned()));
        let reset = activation::sigmoid(self.reset.forward(joint));
        let candidate = self
            .candidate
            .forward(Tensor::cat(vec![input, reset * state.to_owned()], D - 1))
            .tanh();

        let state = update.to_owned().neg().add_scalar(1.0) * state + update * candidate;
        self.output.forward(state)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn forward_starts_at_zero() {
        use super::*;
        use burn::{backend::NdArray, tensor::Distribution};

        type B = NdArray<f32>;
        let device = &Default::default();

        let net = GatedUpdateConfig::new(4, 3).init::<B>(device);
        let input = Tensor::<B, 3>::random([2, 5, 4], Distribution::Default, device);
        let output = net.forward(input);
        output
            .into_data()
            .assert_eq(&Tensor::<B, 3>::zeros([2, 5, 3], device).into_data(), true);
    }
}
