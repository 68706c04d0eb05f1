//! Latent context concatenated to the field inputs.

pub use crate::render::ray::RaySamples;
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::{error::Error, render::composite};
use burn::tensor::Shape;
use std::fmt;

/// Declared widths of the latent context.
#[derive(Config, Copy, Debug, PartialEq)]
pub struct LatentConfig {
    /// `L_p`, the width of per-point latents.
    #[config(default = 0)]
    pub dim_per_point: usize,
    /// `L_x`, the width of per-pixel latents.
    #[config(default = 0)]
    pub dim_per_pixel: usize,
    /// `L_i`, the width of per-instance latents.
    #[config(default = 0)]
    pub dim_per_instance: usize,
    /// `L_m`, the width of the interval encoding.
    #[config(default = 0)]
    pub dim_interval: usize,
}

/// Latents supplied for one evaluation.
#[derive(Clone)]
pub struct Latents<B: Backend> {
    pub config: LatentConfig,
    /// `[R, N, L_p]`
    per_point: Option<Tensor<B, 3>>,
    /// `[R, L_x]`
    per_pixel: Option<Tensor<B, 2>>,
    /// `[1 | R, L_i]`
    per_instance: Option<Tensor<B, 2>>,
}

/// A source of per-pixel features, e.g., an image encoder.
pub trait PixelFeatureSampler<B: Backend> {
    /// `L_x`
    fn dim(&self) -> usize;

    /// ## Shapes
    ///
    /// * `uvs` - Image coordinates. `[R, 2]`
    /// * `output` - `[R, L_x]`
    fn sample(
        &self,
        uvs: Tensor<B, 2>,
    ) -> Tensor<B, 2>;
}

/// A pre-filtered encoding of the interval `[t_i, t_(i + 1)]` around every sample.
pub trait IntervalEncoder<B: Backend>: fmt::Debug + Send + Sync {
    /// `L_m`
    fn dim(&self) -> usize;

    /// ## Shapes
    ///
    /// * `output` - `[R, N, L_m]`
    fn encode(
        &self,
        samples: &RaySamples<B>,
    ) -> Tensor<B, 3>;
}

/// The configuration for [`ConicalFrustumEncoder`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct ConicalFrustumEncoderConfig {
    /// `L`
    #[config(default = 8)]
    pub frequency_count: usize,
    /// The cone radius at unit depth, usually the pixel footprint.
    #[config(default = 1e-3)]
    pub radius: f64,
}

/// Integrated positional encoding of each sample interval.
///
/// Every interval is approximated by an isotropic Gaussian with
/// - mean `o + d * (t_0 + t_1) / 2`
/// - variance `|d|^2 * (t_1 - t_0)^2 / 12 + (radius * (t_0 + t_1) / 2)^2`
///
/// For the frequency `2^l`, it encodes `sin(2^l * mean) * exp(-4^l * variance / 2)`
/// and the cosine counterpart, so the width is `6 * L`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConicalFrustumEncoder {
    pub frequency_count: usize,
    pub radius: f64,
}

impl<B: Backend> Latents<B> {
    /// No latents.
    pub fn new(config: LatentConfig) -> Self {
        Self {
            config,
            per_point: None,
            per_pixel: None,
            per_instance: None,
        }
    }

    /// ## Shapes
    ///
    /// * `latent` - `[R, N, L_p]`
    pub fn set_per_point(
        &mut self,
        latent: Tensor<B, 3>,
    ) -> Result<&mut Self, Error> {
        check_width("per_point", &latent.dims(), self.config.dim_per_point)?;
        self.per_point = Some(latent);
        Ok(self)
    }

    /// ## Shapes
    ///
    /// * `latent` - `[R, L_x]`
    pub fn set_per_pixel(
        &mut self,
        latent: Tensor<B, 2>,
    ) -> Result<&mut Self, Error> {
        check_width("per_pixel", &latent.dims(), self.config.dim_per_pixel)?;
        self.per_pixel = Some(latent);
        Ok(self)
    }

    /// Sample the per-pixel latents at the image coordinates.
    ///
    /// ## Shapes
    ///
    /// * `uvs` - `[R, 2]`
    pub fn set_per_pixel_sampled<S: PixelFeatureSampler<B>>(
        &mut self,
        sampler: &S,
        uvs: Tensor<B, 2>,
    ) -> Result<&mut Self, Error> {
        if sampler.dim() != self.config.dim_per_pixel {
            return Err(Error::Shape(
                "pixel feature sampler width".into(),
                self.config.dim_per_pixel.to_string(),
                sampler.dim().to_string(),
            ));
        }
        self.set_per_pixel(sampler.sample(uvs))
    }

    /// ## Shapes
    ///
    /// * `latent` - `[1 | R, L_i]`
    pub fn set_per_instance(
        &mut self,
        latent: Tensor<B, 2>,
    ) -> Result<&mut Self, Error> {
        check_width("per_instance", &latent.dims(), self.config.dim_per_instance)?;
        self.per_instance = Some(latent);
        Ok(self)
    }

    /// The total width `L_p + L_x + L_i + L_m`.
    #[inline]
    pub fn dim(&self) -> usize {
        self.config.dim()
    }

    /// Concatenate the latents for every sample.
    ///
    /// It returns `None` if the total width is zero.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, N, L_p + L_x + L_i + L_m]`
    pub fn assemble(
        &self,
        samples: &RaySamples<B>,
        interval_encoder: Option<&dyn IntervalEncoder<B>>,
    ) -> Result<Option<Tensor<B, 3>>, Error> {
        let ray_count = samples.ray_count();
        let sample_count = samples.sample_count();
        let mut parts = Vec::with_capacity(4);

        if self.config.dim_per_point != 0 {
            let latent = required("per_point", self.per_point.as_ref())?;
            let dims = latent.dims();
            if dims[0] != ray_count || dims[1] != sample_count {
                return Err(Error::Shape(
                    "per_point latent".into(),
                    format!("[{ray_count}, {sample_count}, {}]", dims[2]),
                    format!("{dims:?}"),
                ));
            }
            parts.push(latent.to_owned());
        }

        if self.config.dim_per_pixel != 0 {
            let latent = required("per_pixel", self.per_pixel.as_ref())?;
            let [row_count, dim] = latent.dims();
            if row_count != ray_count {
                return Err(Error::Shape(
                    "per_pixel latent".into(),
                    format!("[{ray_count}, {dim}]"),
                    format!("{:?}", latent.dims()),
                ));
            }
            parts.push(
                latent
                    .to_owned()
                    .unsqueeze_dim::<3>(1)
                    .expand(Shape::new([ray_count, sample_count, dim])),
            );
        }

        if self.config.dim_per_instance != 0 {
            let latent = required("per_instance", self.per_instance.as_ref())?;
            let [row_count, dim] = latent.dims();
            if row_count != 1 && row_count != ray_count {
                return Err(Error::Shape(
                    "per_instance latent".into(),
                    format!("[1 or {ray_count}, {dim}]"),
                    format!("{:?}", latent.dims()),
                ));
            }
            parts.push(
                latent
                    .to_owned()
                    .unsqueeze_dim::<3>(1)
                    .expand(Shape::new([ray_count, sample_count, dim])),
            );
        }

        if self.config.dim_interval != 0 {
            let encoder = interval_encoder.ok_or_else(|| {
                Error::Validation(
                    "interval encoder".into(),
                    format!("provided for the width {}", self.config.dim_interval),
                )
            })?;
            if encoder.dim() != self.config.dim_interval {
                return Err(Error::Shape(
                    "interval encoder width".into(),
                    self.config.dim_interval.to_string(),
                    encoder.dim().to_string(),
                ));
            }
            parts.push(encoder.encode(samples));
        }

        Ok(match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Tensor::cat(parts, 2)),
        })
    }
}

impl LatentConfig {
    /// The total width `L_p + L_x + L_i + L_m`.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim_per_point
            + self.dim_per_pixel
            + self.dim_per_instance
            + self.dim_interval
    }
}

impl ConicalFrustumEncoderConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> ConicalFrustumEncoder {
        ConicalFrustumEncoder {
            frequency_count: self.frequency_count,
            radius: self.radius,
        }
    }
}

impl<B: Backend> IntervalEncoder<B> for ConicalFrustumEncoder {
    #[inline]
    fn dim(&self) -> usize {
        self.frequency_count * 6
    }

    fn encode(
        &self,
        samples: &RaySamples<B>,
    ) -> Tensor<B, 3> {
        let starts = samples.depths.to_owned();
        let deltas = composite::distances(starts.to_owned());
        let centers = starts + deltas.to_owned().mul_scalar(0.5);

        // [R, N, 3]
        let means = samples.origins.to_owned().unsqueeze_dim::<3>(1)
            + centers.to_owned().unsqueeze_dim::<3>(2)
                * samples.directions.to_owned().unsqueeze_dim::<3>(1);
        // [R, 1]
        let direction_norms_squared = samples
            .directions
            .to_owned()
            .powf_scalar(2.0)
            .sum_dim(1);
        // [R, N, 1]
        let variances = (deltas.powf_scalar(2.0).div_scalar(12.0)
            * direction_norms_squared
            + centers.mul_scalar(self.radius).powf_scalar(2.0))
        .unsqueeze_dim::<3>(2);

        let encodings = (0..self.frequency_count)
            .flat_map(|level| {
                let scale = (1_u64 << level) as f64;
                let means = means.to_owned().mul_scalar(scale);
                let attenuations = variances
                    .to_owned()
                    .mul_scalar(-0.5 * scale * scale)
                    .exp();
                [
                    means.to_owned().sin() * attenuations.to_owned(),
                    means.cos() * attenuations,
                ]
            })
            .collect();

        Tensor::cat(encodings, 2)
    }
}

impl<B: Backend> fmt::Debug for Latents<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct(&format!("Latents<{}>", B::name()))
            .field("config", &self.config)
            .field("per_point.dims()", &self.per_point.as_ref().map(Tensor::dims))
            .field("per_pixel.dims()", &self.per_pixel.as_ref().map(Tensor::dims))
            .field(
                "per_instance.dims()",
                &self.per_instance.as_ref().map(Tensor::dims),
            )
            .finish()
    }
}

impl Default for LatentConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ConicalFrustumEncoderConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

fn check_width<const D: usize>(
    name: &str,
    dims: &[usize; D],
    dim_expected: usize,
) -> Result<(), Error> {
    if dims[D - 1] != dim_expected {
        return Err(Error::Shape(
            format!("{name} latent width"),
            dim_expected.to_string(),
            format!("{} in {dims:?}", dims[D - 1]),
        ));
    }
    Ok(())
}

fn required<'a, T>(
    name: &str,
    latent: Option<&'a T>,
) -> Result<&'a T, Error> {
    latent.ok_or_else(|| {
        Error::Validation(format!("{name} latent"), "set before evaluation".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ray::{RaySamplerConfig, Rays};
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, SeedableRng};

    type B = NdArray<f32>;

    fn samples(
        ray_count: usize,
        step_count: usize,
    ) -> RaySamples<B> {
        let device = &Default::default();
        let rays = Rays::<B>::new(
            Tensor::zeros([ray_count, 3], device),
            Tensor::ones([ray_count, 3], device),
        )
        .unwrap();
        RaySamplerConfig::new()
            .with_step_count(step_count)
            .init()
            .unwrap()
            .sample(&rays, false, &mut StdRng::seed_from_u64(0))
    }

    #[test]
    fn assemble_order_and_shape() {
        let device = &Default::default();
        let config = LatentConfig::new()
            .with_dim_per_point(1)
            .with_dim_per_pixel(2)
            .with_dim_per_instance(3);
        let mut latents = Latents::<B>::new(config);
        latents
            .set_per_point(Tensor::full([2, 4, 1], 1.0, device))
            .unwrap()
            .set_per_pixel(Tensor::full([2, 2], 2.0, device))
            .unwrap()
            .set_per_instance(Tensor::full([1, 3], 3.0, device))
            .unwrap();

        let output = latents.assemble(&samples(2, 4), None).unwrap().unwrap();
        assert_eq!(output.dims(), [2, 4, 6]);
        output.slice([1..2, 3..4, 0..6]).into_data().assert_eq(
            &Tensor::<B, 3>::from_floats([[[1.0, 2.0, 2.0, 3.0, 3.0, 3.0]]], device)
                .into_data(),
            true,
        );
    }

    #[test]
    fn assemble_empty() {
        let latents = Latents::<B>::new(LatentConfig::new());
        assert!(latents.assemble(&samples(3, 2), None).unwrap().is_none());
    }

    #[test]
    fn width_mismatch() {
        let device = &Default::default();
        let mut latents =
            Latents::<B>::new(LatentConfig::new().with_dim_per_pixel(4));

        let result = latents.set_per_pixel(Tensor::zeros([2, 3], device));
        assert!(matches!(result, Err(Error::Shape(..))));

        let result = latents.set_per_point(Tensor::zeros([2, 4, 1], device));
        assert!(matches!(result, Err(Error::Shape(..))));

        let result = latents.assemble(&samples(2, 4), None);
        assert!(matches!(result, Err(Error::Validation(..))));

        latents.set_per_pixel(Tensor::zeros([5, 4], device)).unwrap();
        let result = latents.assemble(&samples(2, 4), None);
        assert!(matches!(result, Err(Error::Shape(..))));
    }

    #[test]
    fn pixel_sampler() {
        struct ConstantSampler;

        impl PixelFeatureSampler<B> for ConstantSampler {
            fn dim(&self) -> usize {
                2
            }

            fn sample(
                &self,
                uvs: Tensor<B, 2>,
            ) -> Tensor<B, 2> {
                uvs.mul_scalar(2.0)
            }
        }

        let device = &Default::default();
        let mut latents =
            Latents::<B>::new(LatentConfig::new().with_dim_per_pixel(2));
        latents
            .set_per_pixel_sampled(
                &ConstantSampler,
                Tensor::from_floats([[0.5, 0.25]], device),
            )
            .unwrap();

        let output = latents.assemble(&samples(1, 3), None).unwrap().unwrap();
        output.into_data().assert_eq(
            &Tensor::<B, 3>::from_floats([[[1.0, 0.5], [1.0, 0.5], [1.0, 0.5]]], device)
                .into_data(),
            true,
        );

        let mut latents =
            Latents::<B>::new(LatentConfig::new().with_dim_per_pixel(3));
        let result = latents.set_per_pixel_sampled(
            &ConstantSampler,
            Tensor::zeros([1, 2], device),
        );
        assert!(matches!(result, Err(Error::Shape(..))));
    }

    #[test]
    fn conical_frustum_encoder() {
        let encoder = ConicalFrustumEncoderConfig::new()
            .with_frequency_count(4)
            .init();
        let samples = samples(2, 5);
        let config = LatentConfig::new().with_dim_interval(24);
        let latents = Latents::<B>::new(config);

        let result = latents.assemble(&samples, None);
        assert!(matches!(result, Err(Error::Validation(..))));

        let output = latents
            .assemble(&samples, Some(&encoder))
            .unwrap()
            .unwrap();
        assert_eq!(output.dims(), [2, 5, 24]);
        assert!(!output.to_owned().is_nan().any().into_scalar());
        let magnitude_max = output.abs().max().into_scalar();
        assert!(magnitude_max <= 1.0 + 1e-6);
    }
}
