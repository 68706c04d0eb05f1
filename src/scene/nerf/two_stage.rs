//! Density first, then view-conditioned features.

pub use super::*;

/// `(point, latent) -> (density, intermediate)`, then
/// `(view, intermediate, latent) -> feature`.
#[derive(Debug, Module)]
pub struct TwoStageField<B: Backend> {
    pub first: Mlp<B>,
    pub second: Mlp<B>,
    pub dim_feature: usize,
    pub dim_latent: usize,
    pub feature_epsilon: f64,
    pub density_noise_std: f64,
    pub is_eikonal: bool,
    pub is_smoothness: bool,
}

impl FieldConfig {
    /// Initialize a [`TwoStageField`].
    pub fn init_two_stage<B: Backend>(
        &self,
        device: &B::Device,
    ) -> TwoStageField<B> {
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

        TwoStageField {
            first,
            second,
            dim_feature: self.dim_feature,
            dim_latent,
            feature_epsilon: self.feature_activation.epsilon(),
            density_noise_std: self.density_noise_std,
            is_eikonal: self.is_eikonal,
            is_smoothness: self.is_smoothness,
        }
    }
}

impl<B: Backend> SceneField<B> for TwoStageField<B> {
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
        let (mut densities, intermediates) = split_first(output);
        if query.is_training {
            densities = perturb_density(densities, self.density_noise_std);
        }

        let latent = cat_optional(vec![Some(intermediates), query.latent]);
        let features = self.second.forward(views, latent);
        let features = activate_features(features, self.feature_epsilon);

        Ok(FieldOutput::new(Opacity::Density(densities), features))
    }
}
