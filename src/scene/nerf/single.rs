//! A single network predicting density and features jointly.

pub use super::*;

/// `(point, latent) -> (density, feature)`
#[derive(Debug, Module)]
pub struct SingleStageField<B: Backend> {
    pub network: Mlp<B>,
    pub dim_feature: usize,
    pub dim_latent: usize,
    pub feature_epsilon: f64,
    pub is_eikonal: bool,
    pub is_smoothness: bool,
}

impl FieldConfig {
    /// Initialize a [`SingleStageField`].
    pub fn init_single_stage<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SingleStageField<B> {
        let network = MlpConfig::new(3, 1 + self.dim_feature)
            .with_dim_latent(self.dim_latent())
            .with_dim_hidden(self.dim_hidden)
            .with_layer_count(self.layer_count)
            .with_frequency_count(self.frequency_count)
            .init(device);

        SingleStageField {
            network,
            dim_feature: self.dim_feature,
            dim_latent: self.dim_latent(),
            feature_epsilon: self.feature_activation.epsilon(),
            is_eikonal: self.is_eikonal,
            is_smoothness: self.is_smoothness,
        }
    }
}

impl<B: Backend> SceneField<B> for SingleStageField<B> {
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

        let output = self.network.forward(query.samples.points, query.latent);
        let (densities, features) = split_first(output);
        let features = activate_features(features, self.feature_epsilon);

        Ok(FieldOutput::new(Opacity::Density(densities), features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::SIGMOID_BOUNDED_EPSILON;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn evaluate_shapes() {
        let device = &Default::default();

        let field = FieldConfig::new()
            .with_dim_feature(4)
            .with_latent(LatentConfig::new().with_dim_per_point(2))
            .with_dim_hidden(16)
            .with_layer_count(2)
            .init_single_stage::<B>(device);
        assert_eq!(SceneField::<B>::feature_dim(&field), 4);
        assert_eq!(SceneField::<B>::latent_dim(&field), 2);

        let samples = samples_along_z::<B>(3, 5, device);
        let latent = Tensor::<B, 3>::ones([3, 5, 2], device);
        let output = field
            .evaluate(FieldQuery::new(samples).with_latent(Some(latent)))
            .unwrap();

        assert!(matches!(&output.opacity, Opacity::Density(_)));
        assert_eq!(output.opacity.values().dims(), [3, 5]);
        assert_eq!(output.features.dims(), [3, 5, 4]);
        assert!(output.penalties.encoding.is_none());

        let eps = SIGMOID_BOUNDED_EPSILON as f32;
        let min = output.features.to_owned().min().into_scalar();
        let max = output.features.max().into_scalar();
        assert!(min >= -eps && max <= 1.0 + eps, "{min} {max}");
    }

    #[test]
    fn evaluate_missing_latent() {
        let device = &Default::default();

        let field = FieldConfig::new()
            .with_latent(LatentConfig::new().with_dim_per_instance(3))
            .with_dim_hidden(8)
            .with_layer_count(1)
            .init_single_stage::<B>(device);
        let samples = samples_along_z::<B>(2, 4, device);
        let output = field.evaluate(FieldQuery::new(samples));
        assert!(matches!(output, Err(Error::Shape(..))));
    }
}
