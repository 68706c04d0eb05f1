//! Ray batches and depth sampling along them.

pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::error::Error;
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// The smallest `near` used by [`Spacing::InverseDepth`].
pub const INVERSE_DEPTH_NEAR_MIN: f64 = 1e-10;

/// A batch of rays.
#[derive(Clone, Debug)]
pub struct Rays<B: Backend> {
    /// `[R, 3]`
    pub origins: Tensor<B, 2>,
    /// `[R, 3]`
    ///
    /// The magnitude scales the travel distance, so it is never normalized.
    pub directions: Tensor<B, 2>,
    /// `[R, 1]`
    pub times: Option<Tensor<B, 2>>,
}

/// Spacing of the base depths.
#[derive(Config, Copy, Debug, PartialEq)]
pub enum Spacing {
    /// Evenly spaced in depth.
    Linear,
    /// Evenly spaced in inverse depth, denser near the camera.
    InverseDepth,
}

/// The configuration for [`RaySampler`].
#[derive(Config, Debug, PartialEq)]
pub struct RaySamplerConfig {
    /// The depth of the first sample.
    #[config(default = 0.0)]
    pub near: f64,
    /// The depth of the last sample.
    #[config(default = 1.0)]
    pub far: f64,
    /// `N`
    #[config(default = 64)]
    pub step_count: usize,
    #[config(default = "Spacing::Linear")]
    pub spacing: Spacing,
    /// Stratified jitter strength in `[0, 1]`, applied while training.
    #[config(default = 1.0)]
    pub jitter: f64,
}

/// Places `N` ordered samples along every ray.
#[derive(Clone, Debug, PartialEq)]
pub struct RaySampler {
    pub near: f64,
    pub far: f64,
    pub spacing: Spacing,
    pub jitter: f64,
    /// `[N]`
    depths_base: Vec<f64>,
}

/// Samples along a batch of rays.
#[derive(Clone, Debug)]
pub struct RaySamples<B: Backend> {
    /// `[1 | R, N]`
    pub depths: Tensor<B, 2>,
    /// `[R, N, 3]`
    pub points: Tensor<B, 3>,
    /// `[R, 3]`
    pub origins: Tensor<B, 2>,
    /// `[R, 3]`
    pub directions: Tensor<B, 2>,
}

impl<B: Backend> Rays<B> {
    /// ## Shapes
    ///
    /// * `origins` - `[R, 3]`
    /// * `directions` - `[R, 3]`
    pub fn new(
        origins: Tensor<B, 2>,
        directions: Tensor<B, 2>,
    ) -> Result<Self, Error> {
        let [ray_count, channel_count] = origins.dims();
        if channel_count != 3 {
            return Err(Error::Shape(
                "origins".into(),
                "[R, 3]".into(),
                format!("{:?}", origins.dims()),
            ));
        }
        if directions.dims() != [ray_count, 3] {
            return Err(Error::Shape(
                "directions".into(),
                format!("[{ray_count}, 3]"),
                format!("{:?}", directions.dims()),
            ));
        }

        Ok(Self {
            origins,
            directions,
            times: None,
        })
    }

    /// Split the batched `[origin, direction]` 6-tuples.
    ///
    /// ## Shapes
    ///
    /// * `rays` - `[R, 6]`
    pub fn from_tensor(rays: Tensor<B, 2>) -> Result<Self, Error> {
        let [ray_count, channel_count] = rays.dims();
        if channel_count != 6 {
            return Err(Error::Shape(
                "rays".into(),
                "[R, 6]".into(),
                format!("{:?}", rays.dims()),
            ));
        }

        let origins = rays.to_owned().slice([0..ray_count, 0..3]);
        let directions = rays.slice([0..ray_count, 3..6]);
        Self::new(origins, directions)
    }

    /// Attach one time value per ray.
    ///
    /// ## Shapes
    ///
    /// * `times` - `[R, 1]`
    pub fn with_times(
        mut self,
        times: Tensor<B, 2>,
    ) -> Result<Self, Error> {
        let ray_count = self.ray_count();
        if times.dims() != [ray_count, 1] {
            return Err(Error::Shape(
                "times".into(),
                format!("[{ray_count}, 1]"),
                format!("{:?}", times.dims()),
            ));
        }
        self.times = Some(times);
        Ok(self)
    }

    /// `R`
    #[inline]
    pub fn ray_count(&self) -> usize {
        self.origins.dims()[0]
    }

    #[inline]
    pub fn device(&self) -> B::Device {
        self.origins.device()
    }

    /// `origin + depth * direction`
    ///
    /// ## Shapes
    ///
    /// * `depths` - `[1 | R, N]`
    /// * `output` - `[R, N, 3]`
    pub fn points_at(
        &self,
        depths: Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        let origins = self.origins.to_owned().unsqueeze_dim::<3>(1);
        let directions = self.directions.to_owned().unsqueeze_dim::<3>(1);
        origins + depths.unsqueeze_dim::<3>(2) * directions
    }
}

impl RaySamplerConfig {
    /// Initialize from the configuration.
    pub fn init(&self) -> Result<RaySampler, Error> {
        if !(self.near.is_finite() && self.far.is_finite() && self.near < self.far)
        {
            return Err(Error::Config(format!(
                "near ({}) should be less than far ({})",
                self.near, self.far
            )));
        }
        if self.step_count == 0 {
            return Err(Error::Config("step_count should be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::Config(format!(
                "jitter ({}) should be in [0, 1]",
                self.jitter
            )));
        }

        let count = self.step_count;
        let steps = (0..count).map(|index| {
            if count == 1 {
                0.0
            } else {
                index as f64 / (count - 1) as f64
            }
        });
        let depths_base = match self.spacing {
            Spacing::Linear => steps
                .map(|step| self.near + (self.far - self.near) * step)
                .collect(),
            Spacing::InverseDepth => {
                let near_inv = 1.0 / self.near.max(INVERSE_DEPTH_NEAR_MIN);
                let far_inv = 1.0 / self.far;
                steps
                    .map(|step| 1.0 / (near_inv * (1.0 - step) + far_inv * step))
                    .collect()
            },
        };

        Ok(RaySampler {
            near: self.near,
            far: self.far,
            spacing: self.spacing,
            jitter: self.jitter,
            depths_base,
        })
    }
}

impl RaySampler {
    /// `N`
    #[inline]
    pub fn step_count(&self) -> usize {
        self.depths_base.len()
    }

    /// The deterministic depths without jitter.
    #[inline]
    pub fn depths_base(&self) -> &[f64] {
        &self.depths_base
    }

    /// Depths with stratified jitter of strength `jitter`.
    ///
    /// With `jitter == 0.0`, it returns [`Self::depths_base`] and draws nothing from `rng`.
    pub fn depths<R: Rng + ?Sized>(
        &self,
        jitter: f64,
        rng: &mut R,
    ) -> Vec<f64> {
        let depths = &self.depths_base;
        if jitter <= 0.0 || depths.len() < 2 {
            return depths.to_owned();
        }

        let mids = depths
            .windows(2)
            .map(|pair| 0.5 * (pair[0] + pair[1]))
            .collect::<Vec<_>>();
        let lowers = mids.iter().chain(depths.last());
        let uppers = depths.first().into_iter().chain(mids.iter());
        let distribution = Uniform::new_inclusive(0.0, 1.0);

        lowers
            .zip(uppers)
            .map(|(lower, upper)| {
                let rand = distribution.sample(rng) * jitter;
                lower + (upper - lower) * rand
            })
            .collect()
    }

    /// Sample points along the rays.
    ///
    /// The jitter is applied only if `is_training` is `true`.
    pub fn sample<B: Backend, R: Rng + ?Sized>(
        &self,
        rays: &Rays<B>,
        is_training: bool,
        rng: &mut R,
    ) -> RaySamples<B> {
        let jitter = if is_training { self.jitter } else { 0.0 };
        let depths = self.depths(jitter, rng);
        let step_count = depths.len();
        let depths = Tensor::from_data(
            TensorData::new(depths, [1, step_count]).convert::<B::FloatElem>(),
            &rays.device(),
        );

        RaySamples::new(rays, depths)
    }
}

impl<B: Backend> RaySamples<B> {
    /// Place samples at `depths` along `rays`.
    ///
    /// ## Shapes
    ///
    /// * `depths` - `[1 | R, N]`
    pub fn new(
        rays: &Rays<B>,
        depths: Tensor<B, 2>,
    ) -> Self {
        let points = rays.points_at(depths.to_owned());
        Self {
            depths,
            points,
            origins: rays.origins.to_owned(),
            directions: rays.directions.to_owned(),
        }
    }

    /// `R`
    #[inline]
    pub fn ray_count(&self) -> usize {
        self.points.dims()[0]
    }

    /// `N`
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.points.dims()[1]
    }

    /// Replace the points, keeping the depths.
    #[inline]
    pub fn with_points(
        mut self,
        points: Tensor<B, 3>,
    ) -> Self {
        self.points = points;
        self
    }
}

impl Default for RaySamplerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
