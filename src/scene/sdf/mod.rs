//! Signed distance fields.

pub use crate::scene::{
    field::*,
    network::{Mlp, MlpActivation, MlpConfig},
};
pub use burn::module::Module;

use crate::function::{norm_l2, normalize_l2};
use burn::tensor::TensorData;
use std::fmt;

/// The default sharpness of [`occupancy_guidance_penalty`].
pub const OCCUPANCY_GUIDANCE_SHARPNESS: f64 = 1000.0;

/// A signed distance to a surface, negative inside.
pub trait SignedDistanceField<B: Backend>: fmt::Debug + Send {
    /// ## Shapes
    ///
    /// * `points` - `[P, 3]`
    /// * `output` - `[P, 1]`
    fn distance(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// The spatial gradient of [`Self::distance`].
    ///
    /// ## Shapes
    ///
    /// * `points` - `[P, 3]`
    /// * `output` - `[P, 3]`
    fn normal(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2>;

    /// The width of [`Self::latent`].
    fn latent_dim(&self) -> usize;

    /// The distance, the normal and any internal feature, concatenated.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[P, 3]`
    /// * `output` - `[P, latent_dim]`
    fn latent(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2>;
}

/// A sphere with a closed-form distance and normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphereSdf {
    pub center: [f64; 3],
    pub radius: f64,
}

/// The configuration for [`NeuralSdf`].
#[derive(Config, Debug)]
pub struct NeuralSdfConfig {
    #[config(default = 64)]
    pub dim_hidden: usize,
    #[config(default = 4)]
    pub layer_count: usize,
    #[config(default = 0)]
    pub frequency_count: usize,
    /// The step of the central differences.
    #[config(default = 1e-3)]
    pub step: f64,
}

/// A signed distance approximated by an [`Mlp`] with softplus activations.
///
/// The normals are central differences and are not normalized.
#[derive(Debug, Module)]
pub struct NeuralSdf<B: Backend> {
    pub network: Mlp<B>,
    pub dim_hidden: usize,
    pub step: f64,
}

/// Injects the latent of a signed distance field into the per-point latent of a field.
///
/// The SDF latent precedes the latent of the query.
#[derive(Clone, Debug)]
pub struct SdfLatentField<S, F> {
    pub sdf: S,
    pub field: F,
}

impl SphereSdf {
    #[inline]
    pub const fn new(
        center: [f64; 3],
        radius: f64,
    ) -> Self {
        Self { center, radius }
    }

    fn offsets<B: Backend>(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let center = Tensor::<B, 2>::from_data(
            TensorData::new(self.center.to_vec(), [1, 3]).convert::<B::FloatElem>(),
            &points.device(),
        );
        points - center
    }
}

impl<B: Backend> SignedDistanceField<B> for SphereSdf {
    #[inline]
    fn distance(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        norm_l2(self.offsets(points), 1).sub_scalar(self.radius)
    }

    #[inline]
    fn normal(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        normalize_l2(self.offsets(points), 1)
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        4
    }

    fn latent(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let distances = self.distance(points.to_owned());
        let normals = SignedDistanceField::<B>::normal(self, points);
        Tensor::cat(vec![distances, normals], 1)
    }
}

impl NeuralSdfConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NeuralSdf<B> {
        let network = MlpConfig::new(3, 1)
            .with_dim_hidden(self.dim_hidden)
            .with_layer_count(self.layer_count)
            .with_frequency_count(self.frequency_count)
            .with_activation(MlpActivation::Softplus)
            .init(device);

        NeuralSdf {
            network,
            dim_hidden: self.dim_hidden,
            step: self.step,
        }
    }
}

impl<B: Backend> SignedDistanceField<B> for NeuralSdf<B> {
    #[inline]
    fn distance(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        self.network.forward(points, None)
    }

    fn normal(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [point_count, _] = points.dims();
        let step = self.step;

        // [+x, +y, +z, -x, -y, -z]
        let offsets = (0..6)
            .flat_map(|index| {
                let sign = if index < 3 { step } else { -step };
                (0..3).map(move |axis| if axis == index % 3 { sign } else { 0.0 })
            })
            .collect::<Vec<_>>();
        let offsets = Tensor::<B, 2>::from_data(
            TensorData::new(offsets, [6, 3]).convert::<B::FloatElem>(),
            &points.device(),
        );

        let probes = points.unsqueeze_dim::<3>(0) + offsets.unsqueeze_dim::<3>(1);
        let values = self
            .network
            .forward(probes.reshape([6 * point_count, 3]), None)
            .reshape([6, point_count]);
        let forwards = values.to_owned().slice([0..3, 0..point_count]);
        let backwards = values.slice([3..6, 0..point_count]);

        (forwards - backwards).div_scalar(2.0 * step).transpose()
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        1 + 3 + self.dim_hidden
    }

    fn latent(
        &self,
        points: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let (distances, hiddens) =
            self.network.forward_with_hidden(points.to_owned(), None);
        let normals = self.normal(points);
        Tensor::cat(vec![distances, normals, hiddens], 1)
    }
}

impl Default for NeuralSdfConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<S, F> SdfLatentField<S, F> {
    /// Wrap `field`, whose latent width should include the latent of `sdf`.
    pub fn new<B: Backend>(
        sdf: S,
        field: F,
    ) -> Result<Self, Error>
    where
        S: SignedDistanceField<B>,
        F: SceneField<B>,
    {
        if field.latent_dim() < sdf.latent_dim() {
            return Err(Error::Config(format!(
                "the latent width of the field ({}) should be at least {}",
                field.latent_dim(),
                sdf.latent_dim()
            )));
        }
        Ok(Self { sdf, field })
    }
}

impl<B, S, F> SceneField<B> for SdfLatentField<S, F>
where
    B: Backend,
    S: SignedDistanceField<B>,
    F: SceneField<B>,
{
    #[inline]
    fn feature_dim(&self) -> usize {
        self.field.feature_dim()
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        self.field.latent_dim().saturating_sub(self.sdf.latent_dim())
    }

    #[inline]
    fn place_samples(
        &self,
        rays: &Rays<B>,
        samples: RaySamples<B>,
    ) -> Result<RaySamples<B>, Error> {
        self.field.place_samples(rays, samples)
    }

    #[inline]
    fn regularizers(&self) -> Regularizers {
        self.field.regularizers()
    }

    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        query.check_latent(SceneField::<B>::latent_dim(self))?;

        let [ray_count, sample_count, _] = query.samples.points.dims();
        let points = query
            .samples
            .points
            .to_owned()
            .reshape([ray_count * sample_count, 3]);
        let latent_sdf = self.sdf.latent(points).reshape([
            ray_count,
            sample_count,
            self.sdf.latent_dim(),
        ]);

        let latent = cat_optional(vec![Some(latent_sdf), query.latent]);
        self.field.evaluate(FieldQuery { latent, ..query })
    }
}

/// Supervise the sign of an SDF with the densities of a radiance field.
///
/// `mean(|-sdf * sharpness - round(density)|)`
///
/// The densities are detached.
pub fn occupancy_guidance_penalty<B: Backend, const D: usize>(
    sdf_values: Tensor<B, D>,
    densities: Tensor<B, D>,
    sharpness: f64,
) -> Tensor<B, 1> {
    let targets = densities.detach().round();
    (sdf_values.mul_scalar(-sharpness) - targets).abs().mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::nerf::samples_along_z;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn sphere_distance_and_normal() {
        let device = &Default::default();

        let sdf = SphereSdf::new([0.0, 0.0, 1.0], 0.5);
        let points = Tensor::<B, 2>::from_floats(
            [[0.0, 0.0, 3.0], [0.0, 2.0, 1.0], [0.0, 0.0, 1.0]],
            device,
        );

        let distances = sdf.distance(points.to_owned());
        distances.into_data().assert_approx_eq(
            &TensorData::from([[1.5f32], [1.5], [-0.5]]),
            5,
        );

        let normals = SignedDistanceField::<B>::normal(&sdf, points.to_owned());
        normals.into_data().assert_approx_eq(
            &TensorData::from([[0.0f32, 0.0, 1.0], [0.0, 1.0, 0.0], [0.0, 0.0, 0.0]]),
            5,
        );

        let latent = sdf.latent(points);
        assert_eq!(latent.dims(), [3, SignedDistanceField::<B>::latent_dim(&sdf)]);
    }

    #[test]
    fn neural_normal_and_latent_shapes() {
        let device = &Default::default();

        let sdf = NeuralSdfConfig::new()
            .with_dim_hidden(8)
            .with_layer_count(2)
            .init::<B>(device);
        let points = Tensor::<B, 2>::from_floats([[0.1, -0.2, 0.3], [1.0, 0.5, -0.5]], device);

        let normals = sdf.normal(points.to_owned());
        assert_eq!(normals.dims(), [2, 3]);
        assert!(!normals.is_nan().any().into_scalar());

        let latent = sdf.latent(points);
        assert_eq!(latent.dims(), [2, 1 + 3 + 8]);
        assert_eq!(sdf.latent_dim(), 12);
    }

    #[test]
    fn sdf_latent_field_width() {
        let device = &Default::default();

        let sdf = SphereSdf::new([0.0; 3], 1.0);
        let field = FieldConfig::new()
            .with_latent(LatentConfig::new().with_dim_per_point(4).with_dim_per_instance(2))
            .with_dim_hidden(8)
            .with_layer_count(1)
            .init_single_stage::<B>(device);
        let field = SdfLatentField::new::<B>(sdf, field).unwrap();
        assert_eq!(SceneField::<B>::latent_dim(&field), 2);

        let samples = samples_along_z::<B>(2, 3, device);
        let latent = Tensor::<B, 3>::zeros([2, 3, 2], device);
        let output = field
            .evaluate(FieldQuery::new(samples).with_latent(Some(latent)))
            .unwrap();
        assert_eq!(output.features.dims(), [2, 3, 3]);

        let field = FieldConfig::new()
            .with_dim_hidden(8)
            .with_layer_count(1)
            .init_single_stage::<B>(device);
        assert!(matches!(
            SdfLatentField::new::<B>(sdf, field),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn occupancy_guidance() {
        let device = &Default::default();

        let sdf_values = Tensor::<B, 2>::from_floats([[-1e-3, 1e-3]], device);
        let densities = Tensor::<B, 2>::from_floats([[0.9, 0.2]], device);
        let output = occupancy_guidance_penalty(
            sdf_values,
            densities,
            OCCUPANCY_GUIDANCE_SHARPNESS,
        )
        .into_scalar();
        // |1 - 1| and |-1 - 0|
        assert!((output - 0.5).abs() < 1e-5, "{output}");
    }
}
