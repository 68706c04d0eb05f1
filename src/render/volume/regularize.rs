//! Gradient regularizers of the scene fields.

pub use super::*;
pub use burn::tensor::backend::AutodiffBackend;

use crate::{
    function::{gradient, norm_l2},
    scene::field::FieldOutput,
};
use burn::tensor::Distribution;

/// The output of [`VolumeRenderer::regularize`].
#[derive(Clone, Debug)]
pub struct Regularization<B: Backend> {
    /// `mean((|d density / d point| - 1)^2)`. `[1]`
    pub eikonal: Option<Tensor<B, 1>>,
    /// `mean(|d alpha / d point - d alpha / d (point + noise)|^2)`. `[1]`
    pub smoothness: Option<Tensor<B, 1>>,
}

impl<AB: AutodiffBackend, F: SceneField<AB>> VolumeRenderer<AB, F> {
    /// Compute the gradient regularizers requested by the field.
    ///
    /// The rays are sampled as in training.
    /// The sample points are detached and tracked,
    /// so the graph of any earlier render is untouched.
    pub fn regularize<R: Rng + ?Sized>(
        &self,
        rays: &Rays<AB>,
        latents: &Latents<AB>,
        rng: &mut R,
    ) -> Result<Regularization<AB::InnerBackend>, Error> {
        #[cfg(debug_assertions)]
        log::debug!(
            target: "radiance_field_renderer::render::volume",
            "VolumeRenderer::regularize > regularizers ({:?})",
            self.field.regularizers(),
        );

        let regularizers = self.field.regularizers();
        if !regularizers.eikonal && !regularizers.smoothness {
            return Ok(Regularization::default());
        }

        let query = self.query(rays, latents, true, rng)?;
        let points = query.samples.points.to_owned().detach();

        let eikonal = if regularizers.eikonal {
            let points = points.to_owned().require_grad();
            let output = self.evaluate_at(&query, points.to_owned())?;
            match output.opacity {
                Opacity::Density(densities) => {
                    Some(eikonal_penalty(gradient(&points, densities)?))
                },
                Opacity::Alpha(_) => None,
            }
        } else {
            None
        };

        let smoothness = if regularizers.smoothness {
            let noise = Tensor::random(
                points.shape(),
                Distribution::Normal(0.0, self.smoothness_step),
                &points.device(),
            );
            let gradients = self.alpha_gradient(&query, points.to_owned())?;
            let gradients_perturbed = self.alpha_gradient(&query, points + noise)?;
            Some(
                (gradients - gradients_perturbed)
                    .powf_scalar(2.0)
                    .sum_dim(2)
                    .mean(),
            )
        } else {
            None
        };

        Ok(Regularization {
            eikonal,
            smoothness,
        })
    }

    fn evaluate_at(
        &self,
        query: &FieldQuery<AB>,
        points: Tensor<AB, 3>,
    ) -> Result<FieldOutput<AB>, Error> {
        let samples = query.samples.to_owned().with_points(points);
        self.field.evaluate(FieldQuery {
            samples,
            ..query.to_owned()
        })
    }

    /// `d sum(alpha) / d point`
    fn alpha_gradient(
        &self,
        query: &FieldQuery<AB>,
        points: Tensor<AB, 3>,
    ) -> Result<Tensor<AB::InnerBackend, 3>, Error> {
        let points = points.detach().require_grad();
        let output = self.evaluate_at(query, points.to_owned())?;
        let Composite { alphas, .. } = self.composite(output.opacity, &query.samples);
        gradient(&points, alphas)
    }
}

/// `mean((|gradient| - 1)^2)` over the last dimension.
///
/// It is zero for the gradients of an exact distance field.
#[inline]
pub fn eikonal_penalty<B: Backend, const D: usize>(
    gradients: Tensor<B, D>
) -> Tensor<B, 1> {
    norm_l2(gradients, D - 1)
        .sub_scalar(1.0)
        .powf_scalar(2.0)
        .mean()
}

impl<B: Backend> Default for Regularization<B> {
    #[inline]
    fn default() -> Self {
        Self {
            eikonal: None,
            smoothness: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::Autodiff,
        scene::{
            field::{FieldConfig, Regularizers},
            latent::LatentConfig,
            sdf::{SignedDistanceField, SphereSdf},
        },
    };
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    type AB = Autodiff<NdArray<f32>>;

    /// A field whose density is the depth coordinate.
    #[derive(Debug)]
    struct SlopeField;

    impl<B: Backend> SceneField<B> for SlopeField {
        fn feature_dim(&self) -> usize {
            1
        }

        fn latent_dim(&self) -> usize {
            0
        }

        fn regularizers(&self) -> Regularizers {
            Regularizers {
                eikonal: true,
                smoothness: true,
            }
        }

        fn evaluate(
            &self,
            query: FieldQuery<B>,
        ) -> Result<FieldOutput<B>, Error> {
            let points = query.samples.points;
            let [ray_count, sample_count, _] = points.dims();
            let densities = points
                .to_owned()
                .slice([0..ray_count, 0..sample_count, 2..3])
                .squeeze::<2>(2);
            let features = points.slice([0..ray_count, 0..sample_count, 0..1]);
            Ok(FieldOutput::new(Opacity::Density(densities), features))
        }
    }

    fn rays(device: &<AB as Backend>::Device) -> Rays<AB> {
        Rays::from_tensor(Tensor::from_floats(
            [[0.0, 0.0, 0.0, 0.0, 0.0, 1.0], [0.5, 0.5, 0.0, 0.6, 0.0, 0.8]],
            device,
        ))
        .unwrap()
    }

    #[test]
    fn eikonal_penalty_of_sphere_is_zero() {
        let device = &Default::default();

        let sdf = SphereSdf::new([0.1, -0.2, 0.3], 0.5);
        let points = Tensor::<NdArray<f32>, 2>::from_floats(
            [[1.0, 2.0, 3.0], [-1.0, 0.0, 0.5], [0.1, 0.2, 0.3]],
            device,
        );
        let normals = SignedDistanceField::<NdArray<f32>>::normal(&sdf, points);
        let output = eikonal_penalty(normals).into_scalar();
        assert!(output.abs() < 1e-6, "{output}");
    }

    #[test]
    fn regularize_slope_field() {
        let device = &Default::default();

        let renderer = VolumeRendererConfig::new()
            .with_sampler(RaySamplerConfig::new().with_step_count(8))
            .init::<AB, _>(SlopeField, device)
            .unwrap();
        let output = renderer
            .regularize(
                &rays(device),
                &Latents::new(LatentConfig::new()),
                &mut StdRng::seed_from_u64(0),
            )
            .unwrap();

        let eikonal = output.eikonal.unwrap().into_scalar();
        assert!(eikonal.abs() < 1e-6, "{eikonal}");

        let smoothness = output.smoothness.unwrap().into_scalar();
        assert!(smoothness.is_finite() && smoothness >= 0.0, "{smoothness}");
    }

    #[test]
    fn regularize_nothing_requested() {
        let device = &Default::default();

        let field = FieldConfig::new()
            .with_dim_hidden(8)
            .with_layer_count(1)
            .init_single_stage::<AB>(device);
        let renderer = VolumeRendererConfig::new().init(field, device).unwrap();
        let output = renderer
            .regularize(
                &rays(device),
                &Latents::new(LatentConfig::new()),
                &mut StdRng::seed_from_u64(0),
            )
            .unwrap();
        assert!(output.eikonal.is_none());
        assert!(output.smoothness.is_none());
    }

    #[test]
    fn regularize_single_stage_field() {
        let device = &Default::default();

        let field = FieldConfig::new()
            .with_is_eikonal(true)
            .with_is_smoothness(true)
            .with_dim_hidden(8)
            .with_layer_count(2)
            .init_single_stage::<AB>(device);
        let renderer = VolumeRendererConfig::new()
            .with_sampler(RaySamplerConfig::new().with_step_count(6))
            .init(field, device)
            .unwrap();
        let output = renderer
            .regularize(
                &rays(device),
                &Latents::new(LatentConfig::new()),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();

        let eikonal = output.eikonal.unwrap().into_scalar();
        assert!(eikonal.is_finite() && eikonal >= 0.0);
        let smoothness = output.smoothness.unwrap().into_scalar();
        assert!(smoothness.is_finite() && smoothness >= 0.0);
    }
}
