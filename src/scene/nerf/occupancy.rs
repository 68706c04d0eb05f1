//! Alpha predicted directly, without density or distances.

pub use super::*;

use burn::tensor::activation;

/// `(point, latent) -> (alpha, intermediate)`, then
/// `(view, intermediate, latent) -> feature`.
///
/// The weights are composited with the same exclusive transmittance
/// as the density-based fields.
#[derive(Debug, Module)]
pub struct OccupancyField<B: Backend> {
    pub first: Mlp<B>,
    pub second: Mlp<B>,
    pub dim_feature: usize,
    pub dim_latent: usize,
    pub feature_epsilon: f64,
    pub is_eikonal: bool,
    pub is_smoothness: bool,
}

impl FieldConfig {
    /// Initialize an [`OccupancyField`].
    pub fn init_occupancy<B: Backend>(
        &self,
        device: &B::Device,
    ) -> OccupancyField<B> {
        let dim_latent = self.dim_latent();
        let first = MlpConfig::new(3, 1 + self.dim_intermediate)
            .with_dim_latent(dim_latent)
            .with_dim_hidden(self.dim_hidden)
            .with_layer_count(self.layer_count)
            .with_frequency_count(self.frequency_count)
            .init(device);
        let second = MlpConfig::new(2, self.dim_feature)
            .with_dim_latent(self.dim_intermediate + dim_latent)
            .with_dim_hidden(self.dim_hidden_head)
            .with_layer_count(self.layer_count_head)
            .init(device);

        OccupancyField {
            first,
            second,
            dim_feature: self.dim_feature,
            dim_latent,
            feature_epsilon: self.feature_activation.epsilon(),
            is_eikonal: self.is_eikonal,
            is_smoothness: self.is_smoothness,
        }
    }
}

impl<B: Backend> SceneField<B> for OccupancyField<B> {
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
        query.check_latent(self.dim_latent)?;
        let views = query.view_directions()?;

        let output = self
            .first
            .forward(query.samples.points, query.latent.to_owned());
        let (logits, intermediates) = split_first(output);
        // A plain sigmoid keeps alpha within [0, 1]
        let alphas = activation::sigmoid(logits);

        let latent = cat_optional(vec![Some(intermediates), query.latent]);
        let features = self.second.forward(views, latent);
        let features = activate_features(features, self.feature_epsilon);

        Ok(FieldOutput::new(Opacity::Alpha(alphas), features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn evaluate_alpha_in_unit_range() {
        let device = &Default::default();

        let field = FieldConfig::new()
            .with_feature_activation(FeatureActivation::Sigmoid)
            .with_dim_intermediate(4)
            .with_dim_hidden(16)
            .with_layer_count(2)
            .with_dim_hidden_head(8)
            .with_layer_count_head(1)
            .init_occupancy::<B>(device);
        assert_eq!(field.feature_epsilon, 0.0);

        let samples = samples_along_z::<B>(4, 8, device);
        let output = field.evaluate(FieldQuery::new(samples)).unwrap();
        let alphas = match output.opacity {
            Opacity::Alpha(alphas) => alphas,
            Opacity::Density(_) => panic!("It should predict alpha"),
        };
        assert_eq!(alphas.dims(), [4, 8]);
        assert!(alphas.to_owned().min().into_scalar() >= 0.0);
        assert!(alphas.max().into_scalar() <= 1.0);
    }
}
