//! Multi-layer perceptron with a skip connection.

pub use super::*;
pub use burn::nn::Linear;

use crate::function::softplus;
use burn::nn::{Initializer, LinearConfig};
use burn::tensor::activation;

/// Hidden activation of [`Mlp`].
#[derive(Config, Copy, Debug, PartialEq)]
pub enum MlpActivation {
    Relu,
    Softplus,
}

/// The configuration for [`Mlp`].
#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Input dimension before encoding.
    pub dim_input: usize,
    /// Output dimension.
    pub dim_output: usize,
    /// Latent dimension concatenated after encoding.
    #[config(default = 0)]
    pub dim_latent: usize,
    /// Hidden dimension.
    #[config(default = 64)]
    pub dim_hidden: usize,
    /// Hidden layer count.
    #[config(default = 4)]
    pub layer_count: usize,
    /// Frequency count of the [`PositionalEncoder`].
    #[config(default = 0)]
    pub frequency_count: usize,
    #[config(default = "MlpActivation::Relu")]
    pub activation: MlpActivation,
    /// Initialize the output layer with zeros.
    #[config(default = false)]
    pub is_output_zeroed: bool,
}

/// Multi-layer perceptron.
///
/// The encoded input and the latent are concatenated to the first hidden layer,
/// and again to the middle hidden layer.
#[derive(Debug, Module)]
pub struct Mlp<B: Backend> {
    /// The input encoder.
    pub encoder: PositionalEncoder,
    /// The hidden layers.
    pub layers: Vec<Linear<B>>,
    /// The output layer.
    pub output: Linear<B>,
    /// The index of the hidden layer receiving the skip connection, or `0` for none.
    pub skip_index: usize,
    pub dim_latent: usize,
    pub is_softplus: bool,
}

impl MlpConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Mlp<B> {
        let encoder = PositionalEncoder::init(self.frequency_count);
        let dim_first = encoder.dim_output(self.dim_input) + self.dim_latent;
        let layer_count = self.layer_count.max(1);
        let skip_index = layer_count / 2;

        let layers = (0..layer_count)
            .map(|index| {
                let dim_input = match index {
                    0 => dim_first,
                    _ if index == skip_index => self.dim_hidden + dim_first,
                    _ => self.dim_hidden,
                };
                LinearConfig::new(dim_input, self.dim_hidden).init(device)
            })
            .collect();

        let mut output = LinearConfig::new(self.dim_hidden, self.dim_output);
        if self.is_output_zeroed {
            output = output.with_initializer(Initializer::Zeros);
        }
        let output = output.init(device);

        let mlp = Mlp {
            encoder,
            layers,
            output,
            skip_index,
            dim_latent: self.dim_latent,
            is_softplus: self.activation == MlpActivation::Softplus,
        };

        #[cfg(debug_assertions)]
        log::debug!(
            target: "radiance_field_renderer::scene",
            "Mlp::init > size ({})",
            mlp.size_readable(),
        );

        mlp
    }
}

impl<B: Backend> Mlp<B> {
    /// Applies the forward pass on the input tensor.
    ///
    /// ## Shapes
    ///
    /// * `input` - [`[..., dim_input]`](MlpConfig::dim_input)
    /// * `latent` - [`[..., dim_latent]`](MlpConfig::dim_latent)
    /// * `output` - [`[..., dim_output]`](MlpConfig::dim_output)
    #[inline]
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
        latent: Option<Tensor<B, D>>,
    ) -> Tensor<B, D> {
        self.forward_with_hidden(input, latent).0
    }

    /// Applies the forward pass and returns the last hidden activation as well.
    ///
    /// ## Shapes
    ///
    /// * `output.1` - [`[..., dim_hidden]`](MlpConfig::dim_hidden)
    pub fn forward_with_hidden<const D: usize>(
        &self,
        input: Tensor<B, D>,
        latent: Option<Tensor<B, D>>,
    ) -> (Tensor<B, D>, Tensor<B, D>) {
        debug_assert_eq!(
            latent.as_ref().map_or(0, |latent| latent.dims()[D - 1]),
            self.dim_latent,
            "The latent width should match the declared one",
        );

        let input = self.encoder.forward(input);
        let first = match latent {
            Some(latent) => Tensor::cat(vec![input, latent], D - 1),
            None => input,
        };

        let mut hidden = first.to_owned();
        for (index, layer) in self.layers.iter().enumerate() {
            if index != 0 && index == self.skip_index {
                hidden = Tensor::cat(vec![hidden, first.to_owned()], D - 1);
            }
            hidden = self.activate(layer.forward(hidden));
        }

        (self.output.forward(hidden.to_owned()), hidden)
    }

    #[inline]
    fn activate<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.is_softplus {
            softplus(input)
        } else {
            activation::relu(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn forward_shapes() {
        let device = &Default::default();

        let mlp = MlpConfig::new(3, 5)
            .with_dim_latent(2)
            .with_dim_hidden(16)
            .with_layer_count(4)
            .with_frequency_count(3)
            .init::<B>(device);
        assert_eq!(mlp.layers.len(), 4);
        assert_eq!(mlp.skip_index, 2);

        let input = Tensor::<B, 3>::zeros([2, 7, 3], device);
        let latent = Tensor::<B, 3>::ones([2, 7, 2], device);
        let (output, hidden) = mlp.forward_with_hidden(input, Some(latent));
        assert_eq!(output.dims(), [2, 7, 5]);
        assert_eq!(hidden.dims(), [2, 7, 16]);
    }

    #[test]
    fn output_zeroed() {
        let device = &Default::default();

        let mlp = MlpConfig::new(4, 3)
            .with_layer_count(1)
            .with_activation(MlpActivation::Softplus)
            .with_is_output_zeroed(true)
            .init::<B>(device);
        let input = Tensor::<B, 2>::ones([6, 4], device);
        let output = mlp.forward(input, None);
        output
            .into_data()
            .assert_eq(&Tensor::<B, 2>::zeros([6, 3], device).into_data(), true);
    }
}
