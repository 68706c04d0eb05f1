//! Rendering of scene fields by sampling and compositing rays.

pub mod regularize;

pub use crate::{
    error::Error,
    render::{
        composite::Composite,
        ray::{RaySampler, RaySamplerConfig, RaySamples, Rays},
    },
    scene::{
        field::{FieldQuery, Opacity, Penalties, SceneField},
        latent::{IntervalEncoder, Latents},
        network::{Mlp, MlpConfig},
    },
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
pub use regularize::*;

use crate::{
    function::{elevation_azimuth, sigmoid_bounded, SIGMOID_BOUNDED_EPSILON},
    render::composite,
};
use rand::Rng;

/// The configuration for [`VolumeRenderer`].
#[derive(Config, Debug)]
pub struct VolumeRendererConfig {
    #[config(default = "RaySamplerConfig::new()")]
    pub sampler: RaySamplerConfig,
    /// Composite the residual transmittance onto white.
    #[config(default = false)]
    pub is_background_white: bool,
    /// Composite the residual transmittance onto a color predicted from the view direction.
    ///
    /// It is exclusive with [`Self::is_background_white`].
    #[config(default = false)]
    pub is_background_learned: bool,
    /// Map the densities with `softplus(x - 1)` instead of `relu(x)`.
    #[config(default = true)]
    pub is_softplus_shifted: bool,
    #[config(default = true)]
    pub is_depth_recorded: bool,
    /// The hidden width of the learned background.
    #[config(default = 32)]
    pub dim_hidden_background: usize,
    /// The hidden layer count of the learned background.
    #[config(default = 2)]
    pub layer_count_background: usize,
    /// The standard deviation of the point perturbation of the smoothness term.
    #[config(default = 1e-2)]
    pub smoothness_step: f64,
}

/// The color behind the scene.
#[derive(Debug)]
pub enum Background<B: Backend> {
    None,
    White,
    /// `(elevation, azimuth) -> color`
    Learned(Mlp<B>),
}

/// Renders a scene field.
#[derive(Debug)]
pub struct VolumeRenderer<B: Backend, F> {
    pub field: F,
    pub sampler: RaySampler,
    pub background: Background<B>,
    pub interval_encoder: Option<Box<dyn IntervalEncoder<B>>>,
    pub is_softplus_shifted: bool,
    pub is_depth_recorded: bool,
    pub smoothness_step: f64,
}

/// The output of [`VolumeRenderer::render`].
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    /// `[R, C]`
    pub features: Tensor<B, 2>,
    /// The maximum alpha. `[R, 1]`
    pub accumulation: Tensor<B, 2>,
    /// The expected depth. `[R, 1]`
    pub depth: Option<Tensor<B, 2>>,
    /// `[R, N]`
    pub alphas: Tensor<B, 2>,
    /// `[R, N]`
    pub weights: Tensor<B, 2>,
    pub penalties: Penalties<B>,
}

impl VolumeRendererConfig {
    /// Initialize a renderer of `field`.
    pub fn init<B: Backend, F: SceneField<B>>(
        &self,
        field: F,
        device: &B::Device,
    ) -> Result<VolumeRenderer<B, F>, Error> {
        if self.is_background_white && self.is_background_learned {
            return Err(Error::Config(
                "the white and the learned backgrounds are exclusive".into(),
            ));
        }

        let sampler = self.sampler.init()?;
        let background = if self.is_background_learned {
            Background::Learned(
                MlpConfig::new(2, field.feature_dim())
                    .with_dim_hidden(self.dim_hidden_background)
                    .with_layer_count(self.layer_count_background)
                    .init(device),
            )
        } else if self.is_background_white {
            Background::White
        } else {
            Background::None
        };

        Ok(VolumeRenderer {
            field,
            sampler,
            background,
            interval_encoder: None,
            is_softplus_shifted: self.is_softplus_shifted,
            is_depth_recorded: self.is_depth_recorded,
            smoothness_step: self.smoothness_step,
        })
    }
}

impl<B: Backend, F: SceneField<B>> VolumeRenderer<B, F> {
    /// Supply the interval encoding of the latent context.
    #[inline]
    pub fn with_interval_encoder(
        mut self,
        encoder: Box<dyn IntervalEncoder<B>>,
    ) -> Self {
        self.interval_encoder = Some(encoder);
        self
    }

    /// Render the rays.
    ///
    /// The sampler jitter and the field noise apply only if `is_training` is `true`.
    pub fn render<R: Rng + ?Sized>(
        &self,
        rays: &Rays<B>,
        latents: &Latents<B>,
        is_training: bool,
        rng: &mut R,
    ) -> Result<RenderOutput<B>, Error> {
        #[cfg(debug_assertions)]
        log::debug!(
            target: "radiance_field_renderer::render::volume",
            "VolumeRenderer::render > ray_count ({}), step_count ({})",
            rays.ray_count(),
            self.sampler.step_count(),
        );

        let query = self.query(rays, latents, is_training, rng)?;
        let samples = query.samples.to_owned();
        let output = self.field.evaluate(query)?;

        let Composite { alphas, weights } = self.composite(output.opacity, &samples);
        let mut features =
            composite::volumetric_integrate(weights.to_owned(), output.features);
        if let Some(colors) = self.background(rays)? {
            features = features
                + composite::transmittance_residual(weights.to_owned()) * colors;
        }

        let accumulation = composite::accumulation(alphas.to_owned());
        let depth = self
            .is_depth_recorded
            .then(|| composite::depth(weights.to_owned(), samples.depths));

        Ok(RenderOutput {
            features,
            accumulation,
            depth,
            alphas,
            weights,
            penalties: output.penalties,
        })
    }

    /// Sample the rays and assemble the latent context.
    pub fn query<R: Rng + ?Sized>(
        &self,
        rays: &Rays<B>,
        latents: &Latents<B>,
        is_training: bool,
        rng: &mut R,
    ) -> Result<FieldQuery<B>, Error> {
        if latents.dim() != self.field.latent_dim() {
            return Err(Error::Shape(
                "latent width".into(),
                self.field.latent_dim().to_string(),
                latents.dim().to_string(),
            ));
        }

        let samples = self.sampler.sample(rays, is_training, rng);
        let samples = self.field.place_samples(rays, samples)?;
        let latent = latents.assemble(&samples, self.interval_encoder.as_deref())?;

        Ok(FieldQuery {
            samples,
            latent,
            times: rays.times.to_owned(),
            is_training,
        })
    }

    /// Convert the opacities into alphas and weights.
    pub fn composite(
        &self,
        opacity: Opacity<B>,
        samples: &RaySamples<B>,
    ) -> Composite<B> {
        match opacity {
            Opacity::Density(densities) => composite::alpha_from_density(
                densities,
                samples.depths.to_owned(),
                samples.directions.to_owned(),
                self.is_softplus_shifted,
            ),
            Opacity::Alpha(alphas) => Composite {
                weights: composite::weights_from_alpha(alphas.to_owned()),
                alphas,
            },
        }
    }

    /// The background colors of the rays.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, C]`
    pub fn background(
        &self,
        rays: &Rays<B>,
    ) -> Result<Option<Tensor<B, 2>>, Error> {
        Ok(match &self.background {
            Background::None => None,
            Background::White => Some(Tensor::ones(
                [rays.ray_count(), self.field.feature_dim()],
                &rays.device(),
            )),
            Background::Learned(network) => {
                let views = elevation_azimuth(rays.directions.to_owned())?;
                Some(sigmoid_bounded(
                    network.forward(views, None),
                    SIGMOID_BOUNDED_EPSILON,
                ))
            },
        })
    }
}
