//! Sphere marching of rays against a signed distance field.

pub use crate::{
    error::Error,
    render::ray::Rays,
    scene::sdf::SignedDistanceField,
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Bool, Tensor},
};

use burn::tensor::ElementConversion;

/// The configuration for [`SurfaceMarcher`].
#[derive(Config, Debug, PartialEq)]
pub struct SurfaceMarcherConfig {
    /// The iteration budget.
    #[config(default = 64)]
    pub iteration_count: usize,
    /// The distance below which a ray hits the surface.
    #[config(default = 1e-4)]
    pub epsilon: f64,
    #[config(default = 0.0)]
    pub near: f64,
    #[config(default = 1.0)]
    pub far: f64,
}

/// Intersects rays with the zero level set of a signed distance field.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceMarcher {
    pub iteration_count: usize,
    pub epsilon: f64,
    pub near: f64,
    pub far: f64,
}

/// The result of [`SurfaceMarcher::march`].
#[derive(Clone, Debug)]
pub struct SurfaceHit<B: Backend> {
    /// `[R, 3]`
    pub points: Tensor<B, 2>,
    /// `[R, 1]`
    pub hits: Tensor<B, 2, Bool>,
    /// `[R, 1]`
    pub distances: Tensor<B, 2>,
    /// The iterations actually used.
    pub iteration_count: usize,
}

impl SurfaceMarcherConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> Result<SurfaceMarcher, Error> {
        if !(self.near.is_finite() && self.far.is_finite() && self.near <= self.far)
        {
            return Err(Error::Config(format!(
                "near ({}) should be no more than far ({})",
                self.near, self.far
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(Error::Config(format!(
                "epsilon ({}) should be positive",
                self.epsilon
            )));
        }

        Ok(SurfaceMarcher {
            iteration_count: self.iteration_count,
            epsilon: self.epsilon,
            near: self.near,
            far: self.far,
        })
    }
}

impl SurfaceMarcher {
    /// March every ray from `near` along its direction.
    ///
    /// A ray hits once its signed distance falls below `epsilon` within `[near, far]`.
    /// The marched distance of a hit ray stays fixed afterwards.
    /// Unresolved rays keep their last distance.
    pub fn march<B: Backend, S: SignedDistanceField<B> + ?Sized>(
        &self,
        sdf: &S,
        rays: &Rays<B>,
    ) -> SurfaceHit<B> {
        #[cfg(debug_assertions)]
        log::debug!(
            target: "radiance_field_renderer::render::march",
            "SurfaceMarcher::march > ray_count ({})",
            rays.ray_count(),
        );

        let device = &rays.device();
        let ray_count = rays.ray_count();
        let point_at = |distances: Tensor<B, 2>| {
            rays.origins.to_owned() + rays.directions.to_owned() * distances
        };

        // 0.0 or 1.0
        let mut hits = Tensor::<B, 2>::zeros([ray_count, 1], device);
        let mut distances = Tensor::<B, 2>::full([ray_count, 1], self.near, device);
        let mut iteration_count = 0;

        for _ in 0..self.iteration_count {
            let values = sdf.distance(point_at(distances.to_owned()));
            let is_within = distances.to_owned().greater_equal_elem(self.near).float()
                * distances.to_owned().lower_equal_elem(self.far).float();
            let is_close = values.to_owned().lower_elem(self.epsilon).float();

            hits = (hits + is_close * is_within).clamp_max(1.0);
            distances = distances + values * hits.to_owned().neg().add_scalar(1.0);
            iteration_count += 1;

            if hits.to_owned().min().into_scalar().elem::<f64>() >= 1.0 {
                #[cfg(debug_assertions)]
                log::trace!(
                    target: "radiance_field_renderer::render::march",
                    "SurfaceMarcher::march > all hit at iteration ({iteration_count})",
                );
                break;
            }
        }

        SurfaceHit {
            points: point_at(distances.to_owned()),
            hits: hits.greater_elem(0.5),
            distances,
            iteration_count,
        }
    }
}

impl<B: Backend> SurfaceHit<B> {
    /// The silhouette, `1.0` for hits and `0.0` otherwise.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, 1]`
    #[inline]
    pub fn coverage(&self) -> Tensor<B, 2> {
        self.hits.to_owned().float()
    }
}

impl Default for SurfaceMarcherConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
