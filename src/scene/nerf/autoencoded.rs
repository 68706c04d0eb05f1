//! A compact per-point encoding decoded into density and features.

pub use super::*;

use crate::function::normalize_l2;

/// `(point, latent) -> encoding`, then
/// `encoding -> density` and `(view, encoding) -> feature`.
///
/// The encoding can be shifted between [`Self::encode`] and [`Self::decode`].
#[derive(Debug, Module)]
pub struct AutoencodedField<B: Backend> {
    pub encoder: Mlp<B>,
    pub density: Mlp<B>,
    pub feature: Mlp<B>,
    pub dim_feature: usize,
    pub dim_latent: usize,
    pub dim_encoding: usize,
    pub feature_epsilon: f64,
    pub density_noise_std: f64,
    pub is_encoding_normalized: bool,
    pub is_eikonal: bool,
    pub is_smoothness: bool,
}

impl FieldConfig {
    /// Initialize an [`AutoencodedField`].
    pub fn init_autoencoded<B: Backend>(
        &self,
        device: &B::Device,
    ) -> AutoencodedField<B> {
        let dim_latent = self.dim_latent();
        let encoder = MlpConfig::new(3, self.dim_encoding)
            .with_dim_latent(dim_latent)
            .with_dim_hidden(self.dim_hidden)
            .with_layer_count(self.layer_count)
            .with_frequency_count(self.frequency_count)
            .init(device);
        let density = MlpConfig::new(self.dim_encoding, 1)
            .with_dim_hidden(self.dim_hidden_head)
            .with_layer_count(self.layer_count_head)
            .init(device);
        let feature = MlpConfig::new(2, self.dim_feature)
            .with_dim_latent(self.dim_encoding)
            .with_dim_hidden(self.dim_hidden_head)
            .with_layer_count(self.layer_count_head)
            .init(device);

        AutoencodedField {
            encoder,
            density,
            feature,
            dim_feature: self.dim_feature,
            dim_latent,
            dim_encoding: self.dim_encoding,
            feature_epsilon: self.feature_activation.epsilon(),
            density_noise_std: self.density_noise_std,
            is_encoding_normalized: self.is_encoding_normalized,
            is_eikonal: self.is_eikonal,
            is_smoothness: self.is_smoothness,
        }
    }
}

impl<B: Backend> AutoencodedField<B> {
    /// Encode the sample points.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, N, E]`, before normalization
    pub fn encode(
        &self,
        query: &FieldQuery<B>,
    ) -> Result<Tensor<B, 3>, Error> {
        query.check_latent(self.dim_latent)?;

        Ok(self.encoder.forward(
            query.samples.points.to_owned(),
            query.latent.to_owned(),
        ))
    }

    /// Decode the encodings into opacities and features.
    ///
    /// ## Shapes
    ///
    /// * `encodings` - `[R, N, E]`, before normalization
    pub fn decode(
        &self,
        encodings: Tensor<B, 3>,
        query: &FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        let [ray_count, sample_count, dim_encoding] = encodings.dims();
        if dim_encoding != self.dim_encoding
            || ray_count != query.samples.ray_count()
            || sample_count != query.samples.sample_count()
        {
            return Err(Error::Shape(
                "encodings".into(),
                format!(
                    "[{}, {}, {}]",
                    query.samples.ray_count(),
                    query.samples.sample_count(),
                    self.dim_encoding
                ),
                format!("{:?}", encodings.dims()),
            ));
        }

        let encodings = if self.is_encoding_normalized {
            normalize_l2(encodings, 2)
        } else {
            encodings
        };

        let mut densities = self
            .density
            .forward(encodings.to_owned(), None)
            .squeeze::<2>(2);
        if query.is_training {
            densities = perturb_density(densities, self.density_noise_std);
        }

        let features = self
            .feature
            .forward(query.view_directions()?, Some(encodings));
        let features = activate_features(features, self.feature_epsilon);

        Ok(FieldOutput::new(Opacity::Density(densities), features))
    }

    /// The mean squared norm of the encodings.
    ///
    /// ## Shapes
    ///
    /// * `encodings` - `[R, N, E]`
    /// * `output` - `[1]`
    #[inline]
    pub fn encoding_penalty(encodings: Tensor<B, 3>) -> Tensor<B, 1> {
        encodings.powf_scalar(2.0).sum_dim(2).mean()
    }
}

impl<B: Backend> SceneField<B> for AutoencodedField<B> {
    #[inline]
    fn feature_dim(&self) -> usize {
        self.dim_feature
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        self.dim_latent
    }

    #[inline]
    fn regularizers(&self) -> Regularizers {
        Regularizers {
            eikonal: self.is_eikonal,
            smoothness: self.is_smoothness,
        }
    }

    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        let encodings = self.encode(&query)?;
        let penalty = query
            .is_training
            .then(|| Self::encoding_penalty(encodings.to_owned()));

        let mut output = self.decode(encodings, &query)?;
        output.penalties.encoding = penalty;
        Ok(output)
    }
}
