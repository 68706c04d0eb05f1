//! The evaluation contract shared by every scene field.

pub use crate::{
    error::Error,
    render::ray::{Rays, RaySamples},
    scene::latent::LatentConfig,
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::function::{elevation_azimuth, sigmoid_bounded, SIGMOID_BOUNDED_EPSILON};
use burn::tensor::{Distribution, Shape};
use std::fmt;

/// Maps sample points and their latent context to opacities and features.
pub trait SceneField<B: Backend>: fmt::Debug + Send {
    /// `C`, the width of [`FieldOutput::features`].
    fn feature_dim(&self) -> usize;

    /// The width of [`FieldQuery::latent`] the field expects.
    fn latent_dim(&self) -> usize;

    /// Replace the placement of the sampler.
    ///
    /// By default, it keeps `samples`.
    #[inline]
    fn place_samples(
        &self,
        rays: &Rays<B>,
        samples: RaySamples<B>,
    ) -> Result<RaySamples<B>, Error> {
        let _ = rays;
        Ok(samples)
    }

    /// The gradient regularizers requested by the field.
    #[inline]
    fn regularizers(&self) -> Regularizers {
        Regularizers::default()
    }

    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error>;
}

/// The input of [`SceneField::evaluate`].
#[derive(Clone, Debug)]
pub struct FieldQuery<B: Backend> {
    pub samples: RaySamples<B>,
    /// `[R, N, L]`
    ///
    /// `None` means `L == 0`.
    pub latent: Option<Tensor<B, 3>>,
    /// `[R, 1]`
    pub times: Option<Tensor<B, 2>>,
    pub is_training: bool,
}

/// The output of [`SceneField::evaluate`].
#[derive(Clone, Debug)]
pub struct FieldOutput<B: Backend> {
    pub opacity: Opacity<B>,
    /// `[R, N, C]`
    pub features: Tensor<B, 3>,
    pub penalties: Penalties<B>,
}

/// Per-sample opacity predicted by a field.
#[derive(Clone, Debug)]
pub enum Opacity<B: Backend> {
    /// Raw density before the non-negative mapping. `[R, N]`
    Density(Tensor<B, 2>),
    /// Alpha in `[0, 1]`. `[R, N]`
    Alpha(Tensor<B, 2>),
}

/// Side-channel penalties computed during evaluation.
#[derive(Clone, Debug)]
pub struct Penalties<B: Backend> {
    /// The mean squared norm of the encoding. `[1]`
    pub encoding: Option<Tensor<B, 1>>,
    /// The smoothness of the deformation. `[1]`
    pub deformation: Option<Tensor<B, 1>>,
}

/// The gradient regularizers a field requests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Regularizers {
    /// `(|d density / d point| - 1)^2`
    pub eikonal: bool,
    /// The variation of `d alpha / d point`.
    pub smoothness: bool,
}

/// The activation mapping feature logits to the output range.
#[derive(Config, Copy, Debug, PartialEq)]
pub enum FeatureActivation {
    /// `(0, 1)`
    Sigmoid,
    /// `(-eps, 1 + eps)`
    SigmoidBounded,
}

/// The configuration shared by the field variants.
#[derive(Config, Debug)]
pub struct FieldConfig {
    /// `C`
    #[config(default = 3)]
    pub dim_feature: usize,
    #[config(default = "LatentConfig::new()")]
    pub latent: LatentConfig,
    #[config(default = "FeatureActivation::SigmoidBounded")]
    pub feature_activation: FeatureActivation,
    /// The standard deviation of density noise while training.
    #[config(default = 1e-2)]
    pub density_noise_std: f64,
    #[config(default = false)]
    pub is_eikonal: bool,
    #[config(default = false)]
    pub is_smoothness: bool,
    /// The width of the feature passed between stages.
    #[config(default = 32)]
    pub dim_intermediate: usize,
    /// The width of the autoencoded encoding.
    #[config(default = 32)]
    pub dim_encoding: usize,
    /// Normalize the autoencoded encoding to unit length.
    #[config(default = true)]
    pub is_encoding_normalized: bool,
    /// The hidden width of the positional networks.
    #[config(default = 128)]
    pub dim_hidden: usize,
    /// The hidden layer count of the positional networks.
    #[config(default = 6)]
    pub layer_count: usize,
    /// The hidden width of the view-conditioned heads.
    #[config(default = 64)]
    pub dim_hidden_head: usize,
    /// The hidden layer count of the view-conditioned heads.
    #[config(default = 5)]
    pub layer_count_head: usize,
    /// The frequency count of the positional encoding.
    #[config(default = 6)]
    pub frequency_count: usize,
}

impl FieldConfig {
    /// The total latent width.
    #[inline]
    pub fn dim_latent(&self) -> usize {
        self.latent.dim()
    }

    #[inline]
    pub fn regularizers(&self) -> Regularizers {
        Regularizers {
            eikonal: self.is_eikonal,
            smoothness: self.is_smoothness,
        }
    }
}

impl FeatureActivation {
    /// The overshoot stored by the fields.
    #[inline]
    pub fn epsilon(&self) -> f64 {
        match self {
            Self::Sigmoid => 0.0,
            Self::SigmoidBounded => SIGMOID_BOUNDED_EPSILON,
        }
    }
}

impl<B: Backend> FieldQuery<B> {
    /// A query without latent or times.
    #[inline]
    pub fn new(samples: RaySamples<B>) -> Self {
        Self {
            samples,
            latent: None,
            times: None,
            is_training: false,
        }
    }

    #[inline]
    pub fn with_latent(
        mut self,
        latent: Option<Tensor<B, 3>>,
    ) -> Self {
        self.latent = latent;
        self
    }

    #[inline]
    pub fn with_times(
        mut self,
        times: Option<Tensor<B, 2>>,
    ) -> Self {
        self.times = times;
        self
    }

    #[inline]
    pub fn with_is_training(
        mut self,
        is_training: bool,
    ) -> Self {
        self.is_training = is_training;
        self
    }

    /// Check the latent against the declared width.
    pub fn check_latent(
        &self,
        dim_latent: usize,
    ) -> Result<(), Error> {
        let ray_count = self.samples.ray_count();
        let sample_count = self.samples.sample_count();
        match &self.latent {
            None if dim_latent == 0 => Ok(()),
            None => Err(Error::Shape(
                "latent".into(),
                format!("[{ray_count}, {sample_count}, {dim_latent}]"),
                "None".into(),
            )),
            Some(latent) if latent.dims() == [ray_count, sample_count, dim_latent] => {
                Ok(())
            },
            Some(latent) => Err(Error::Shape(
                "latent".into(),
                format!("[{ray_count}, {sample_count}, {dim_latent}]"),
                format!("{:?}", latent.dims()),
            )),
        }
    }

    /// The viewing direction as elevation and azimuth for every sample.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, N, 2]`
    pub fn view_directions(&self) -> Result<Tensor<B, 3>, Error> {
        let ray_count = self.samples.ray_count();
        let sample_count = self.samples.sample_count();
        Ok(elevation_azimuth(self.samples.directions.to_owned())?
            .unsqueeze_dim::<3>(1)
            .expand(Shape::new([ray_count, sample_count, 2])))
    }
}

impl<B: Backend> FieldOutput<B> {
    #[inline]
    pub fn new(
        opacity: Opacity<B>,
        features: Tensor<B, 3>,
    ) -> Self {
        Self {
            opacity,
            features,
            penalties: Penalties::default(),
        }
    }
}

impl<B: Backend> Opacity<B> {
    /// `[R, N]`
    #[inline]
    pub fn values(&self) -> &Tensor<B, 2> {
        match self {
            Self::Density(values) | Self::Alpha(values) => values,
        }
    }
}

impl<B: Backend> Penalties<B> {
    /// Keep the penalties of `self` and fill the missing ones from `other`.
    pub fn merge(
        self,
        other: Self,
    ) -> Self {
        Self {
            encoding: self.encoding.or(other.encoding),
            deformation: self.deformation.or(other.deformation),
        }
    }
}

impl<B: Backend> Default for Penalties<B> {
    #[inline]
    fn default() -> Self {
        Self {
            encoding: None,
            deformation: None,
        }
    }
}

impl Default for FieldConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Map feature logits with the bounded sigmoid of overshoot `epsilon`.
#[inline]
pub fn activate_features<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    epsilon: f64,
) -> Tensor<B, D> {
    sigmoid_bounded(logits, epsilon)
}

/// Split `[R, N, 1 + C]` into the first channel `[R, N]` and the rest `[R, N, C]`.
pub fn split_first<B: Backend>(
    output: Tensor<B, 3>
) -> (Tensor<B, 2>, Tensor<B, 3>) {
    let [ray_count, sample_count, channel_count] = output.dims();
    let first = output
        .to_owned()
        .slice([0..ray_count, 0..sample_count, 0..1])
        .squeeze::<2>(2);
    let rest = output.slice([0..ray_count, 0..sample_count, 1..channel_count]);
    (first, rest)
}

/// Add Gaussian noise of `std` to the densities.
pub fn perturb_density<B: Backend>(
    densities: Tensor<B, 2>,
    std: f64,
) -> Tensor<B, 2> {
    if std <= 0.0 {
        return densities;
    }
    let noise = Tensor::random(
        densities.shape(),
        Distribution::Normal(0.0, std),
        &densities.device(),
    );
    densities + noise
}

/// Concatenate optional tensors along the last dimension.
pub fn cat_optional<B: Backend, const D: usize>(
    tensors: Vec<Option<Tensor<B, D>>>
) -> Option<Tensor<B, D>> {
    let mut tensors = tensors.into_iter().flatten().collect::<Vec<_>>();
    match tensors.len() {
        0 => None,
        1 => tensors.pop(),
        _ => Some(Tensor::cat(tensors, D - 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::{Int, TensorData}};

    type B = NdArray<f32>;

    fn samples(
        ray_count: usize,
        sample_count: usize,
    ) -> RaySamples<B> {
        let device = &Default::default();
        let rays = Rays::new(
            Tensor::zeros([ray_count, 3], device),
            Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0]], device)
                .repeat_dim(0, ray_count),
        )
        .unwrap();
        let depths = Tensor::<B, 1, Int>::arange(0..sample_count as i64, device)
            .float()
            .unsqueeze::<2>();
        RaySamples::new(&rays, depths)
    }

    #[test]
    fn check_latent() {
        let device = &Default::default();

        let query = FieldQuery::new(samples(2, 4));
        query.check_latent(0).unwrap();
        assert!(matches!(query.check_latent(3), Err(Error::Shape(..))));

        let query = query.with_latent(Some(Tensor::zeros([2, 4, 3], device)));
        query.check_latent(3).unwrap();
        assert!(matches!(query.check_latent(2), Err(Error::Shape(..))));

        let query = query.with_latent(Some(Tensor::zeros([2, 3, 3], device)));
        assert!(matches!(query.check_latent(3), Err(Error::Shape(..))));
    }

    #[test]
    fn view_directions() {
        let query = FieldQuery::new(samples(3, 5));
        let output = query.view_directions().unwrap();
        assert_eq!(output.dims(), [3, 5, 2]);

        let elevation = output.slice([0..3, 0..5, 0..1]).into_data();
        elevation.assert_approx_eq(
            &TensorData::new(vec![std::f32::consts::FRAC_PI_2; 15], [3, 5, 1]),
            5,
        );
    }

    #[test]
    fn split_first() {
        let device = &Default::default();

        let output = Tensor::<B, 1, Int>::arange(0..24, device)
            .float()
            .reshape([2, 3, 4]);
        let (first, rest) = super::split_first(output);
        assert_eq!(first.dims(), [2, 3]);
        assert_eq!(rest.dims(), [2, 3, 3]);
        first.into_data().assert_eq(
            &TensorData::from([[0.0f32, 4.0, 8.0], [12.0, 16.0, 20.0]]),
            true,
        );
    }

    #[test]
    fn perturb_density_without_noise() {
        let device = &Default::default();

        let densities = Tensor::<B, 2>::ones([2, 3], device);
        let output = perturb_density(densities.to_owned(), 0.0);
        output.into_data().assert_eq(&densities.into_data(), true);
    }

    #[test]
    fn feature_activation_epsilon() {
        assert_eq!(FeatureActivation::Sigmoid.epsilon(), 0.0);
        assert_eq!(
            FeatureActivation::SigmoidBounded.epsilon(),
            SIGMOID_BOUNDED_EPSILON
        );
    }
}
