//! Samples placed on a family of parallel planes.

pub use super::*;

use burn::tensor::{Shape, TensorData};

/// `|direction . normal|` below which a ray counts as parallel to the planes.
pub const PARALLEL_THRESHOLD: f64 = 1e-3;

/// The configuration for [`MultiPlaneField`].
#[derive(Config, Debug, PartialEq)]
pub struct MultiPlaneConfig {
    /// The center of the first plane.
    #[config(default = "[0.0, 0.0, 0.0]")]
    pub position: [f64; 3],
    /// The normal shared by the planes.
    #[config(default = "[0.0, 0.0, -1.0]")]
    pub normal: [f64; 3],
    /// The positive spacing between consecutive planes along `-normal`.
    #[config(default = 0.1)]
    pub delta: f64,
    /// `K`, the plane count.
    #[config(default = 6)]
    pub count: usize,
}

/// A field sampled at the intersections of each ray with `K` parallel planes.
///
/// The plane centers are `position + k * delta * (-normal)` for `k` in `0..K`.
/// Rays nearly parallel to the planes, or pointing along `normal`, miss the
/// planes and get zero depths at every plane. Intersections behind the ray
/// origin are clamped to zero depth, so the depths of each ray never descend.
#[derive(Clone, Debug)]
pub struct MultiPlaneField<F> {
    pub canonical: F,
    pub position: [f64; 3],
    pub normal: [f64; 3],
    pub delta: f64,
    pub count: usize,
}

impl MultiPlaneConfig {
    /// Initialize from the configuration around `canonical`.
    pub fn init<F>(
        &self,
        canonical: F,
    ) -> Result<MultiPlaneField<F>, Error> {
        if self.count == 0 {
            return Err(Error::Config("count should be at least 1".into()));
        }
        if self.normal.iter().all(|value| *value == 0.0) {
            return Err(Error::Config("normal should be non-zero".into()));
        }
        if !self.delta.is_finite() || self.delta <= 0.0 {
            return Err(Error::Config(format!(
                "delta ({}) should be finite and positive",
                self.delta
            )));
        }

        Ok(MultiPlaneField {
            canonical,
            position: self.position,
            normal: self.normal,
            delta: self.delta,
            count: self.count,
        })
    }
}

impl<F> MultiPlaneField<F> {
    /// Intersect the rays with the planes.
    ///
    /// ## Shapes
    ///
    /// * `output` - `[R, K]`
    pub fn depths<B: Backend>(
        &self,
        rays: &Rays<B>,
    ) -> Tensor<B, 2> {
        let device = &rays.device();
        let ray_count = rays.ray_count();
        let count = self.count;

        let vector = |values: [f64; 3]| {
            Tensor::<B, 2>::from_data(
                TensorData::new(values.to_vec(), [1, 3]).convert::<B::FloatElem>(),
                device,
            )
        };
        let normal = vector(self.normal);
        let position = vector(self.position);

        // ((position - k * delta * normal - origin) . normal) / (direction . normal)
        let norm_squared = self.normal.iter().map(|value| value * value).sum::<f64>();
        let offsets = (0..count)
            .map(|index| index as f64 * self.delta * norm_squared)
            .collect::<Vec<_>>();
        let offsets = Tensor::<B, 2>::from_data(
            TensorData::new(offsets, [1, count]).convert::<B::FloatElem>(),
            device,
        );
        let numerators = (position - rays.origins.to_owned())
            .mul(normal.to_owned())
            .sum_dim(1)
            - offsets;
        let denominators = (rays.directions.to_owned() * normal).sum_dim(1);

        // The depths ascend only where the rays run against the normal.
        let is_missed = denominators.to_owned().greater_elem(-PARALLEL_THRESHOLD);
        let denominators = denominators.mask_fill(is_missed.to_owned(), -1.0);
        (numerators / denominators)
            .clamp_min(0.0)
            .mask_fill(is_missed.expand(Shape::new([ray_count, count])), 0.0)
    }
}

impl<B: Backend, F: SceneField<B>> SceneField<B> for MultiPlaneField<F> {
    #[inline]
    fn feature_dim(&self) -> usize {
        self.canonical.feature_dim()
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        self.canonical.latent_dim()
    }

    fn place_samples(
        &self,
        rays: &Rays<B>,
        _samples: RaySamples<B>,
    ) -> Result<RaySamples<B>, Error> {
        Ok(RaySamples::new(rays, self.depths(rays)))
    }

    #[inline]
    fn regularizers(&self) -> Regularizers {
        self.canonical.regularizers()
    }

    #[inline]
    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        self.canonical.evaluate(query)
    }
}
