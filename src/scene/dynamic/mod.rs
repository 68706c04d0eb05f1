//! Time-dependent deformation of a canonical field.

pub use crate::scene::{
    field::*,
    nerf::AutoencodedField,
    network::{GatedUpdate, GatedUpdateConfig, Mlp, MlpActivation, MlpConfig},
};
pub use burn::module::Module;

use burn::tensor::{Distribution, Shape};

/// Times closer to zero than this leave the points undeformed.
pub const TIME_IDENTITY_THRESHOLD: f64 = 1e-6;

/// The network predicting the displacements.
#[derive(Config, Copy, Debug, PartialEq)]
pub enum DisplacementNetwork {
    /// A skip-connected [`Mlp`].
    Residual,
    /// A single [`GatedUpdate`].
    Gated,
}

/// The configuration for [`Deformer`].
#[derive(Config, Debug)]
pub struct DeformerConfig {
    #[config(default = "DisplacementNetwork::Residual")]
    pub network: DisplacementNetwork,
    /// The hidden width of the residual network.
    #[config(default = 128)]
    pub dim_hidden: usize,
    /// The hidden layer count of the residual network.
    #[config(default = 5)]
    pub layer_count: usize,
    /// The frequency count of the positional encoding of `(point, time)`.
    #[config(default = 4)]
    pub frequency_count: usize,
    /// The hidden width of the gated network.
    #[config(default = 32)]
    pub dim_hidden_gated: usize,
    /// The standard deviation of time noise while training.
    #[config(default = 1e-2)]
    pub time_noise_std: f64,
    /// Compute the smoothness penalty while training.
    #[config(default = false)]
    pub is_smoothness: bool,
    /// The standard deviation of the input perturbation of the smoothness penalty.
    #[config(default = 1e-3)]
    pub smoothness_step: f64,
}

/// Predicts `(point, time) -> (displacement, extra)`.
///
/// The output is exactly zero where `|time| < 1e-6`.
#[derive(Debug, Module)]
pub struct Deformer<B: Backend> {
    pub residual: Option<Mlp<B>>,
    pub gated: Option<GatedUpdate<B>>,
    /// The width of the extra output after the displacement.
    pub dim_extra: usize,
    pub time_noise_std: f64,
    pub smoothness_step: f64,
    pub is_smoothness: bool,
}

/// The output of [`Deformer::forward`].
#[derive(Clone, Debug)]
pub struct Deformation<B: Backend> {
    /// `[R, N, 3]`
    pub displacements: Tensor<B, 3>,
    /// `[R, N, dim_extra]`
    pub extras: Option<Tensor<B, 3>>,
    /// `[1]`
    pub smoothness: Option<Tensor<B, 1>>,
}

/// A canonical field evaluated at points deformed by time.
#[derive(Debug)]
pub struct DeformationField<B: Backend, F> {
    pub deformer: Deformer<B>,
    pub canonical: F,
}

/// An [`AutoencodedField`] evaluated at points deformed by time,
/// with its encoding shifted by time as well.
#[derive(Debug)]
pub struct EncodedDeformationField<B: Backend> {
    pub deformer: Deformer<B>,
    pub canonical: AutoencodedField<B>,
}

impl DeformerConfig {
    /// The defaults for [`EncodedDeformationField`].
    pub fn for_encoding() -> Self {
        Self::new().with_layer_count(6).with_time_noise_std(1e-3)
    }

    /// Initialize a [`Deformer`] with `dim_extra` outputs after the displacement.
    pub fn init<B: Backend>(
        &self,
        dim_extra: usize,
        device: &B::Device,
    ) -> Deformer<B> {
        let dim_output = 3 + dim_extra;
        let (residual, gated) = match self.network {
            DisplacementNetwork::Residual => (
                Some(
                    MlpConfig::new(4, dim_output)
                        .with_dim_hidden(self.dim_hidden)
                        .with_layer_count(self.layer_count)
                        .with_frequency_count(self.frequency_count)
                        .with_activation(MlpActivation::Softplus)
                        .with_is_output_zeroed(true)
                        .init(device),
                ),
                None,
            ),
            DisplacementNetwork::Gated => (
                None,
                Some(
                    GatedUpdateConfig::new(4, dim_output)
                        .with_dim_hidden(self.dim_hidden_gated)
                        .init(device),
                ),
            ),
        };

        Deformer {
            residual,
            gated,
            dim_extra,
            time_noise_std: self.time_noise_std,
            smoothness_step: self.smoothness_step,
            is_smoothness: self.is_smoothness,
        }
    }

    /// Initialize a [`DeformationField`] around `canonical`.
    pub fn init_field<B: Backend, F: SceneField<B>>(
        &self,
        canonical: F,
        device: &B::Device,
    ) -> DeformationField<B, F> {
        DeformationField {
            deformer: self.init(0, device),
            canonical,
        }
    }

    /// Initialize an [`EncodedDeformationField`] around `canonical`.
    pub fn init_encoded_field<B: Backend>(
        &self,
        canonical: AutoencodedField<B>,
        device: &B::Device,
    ) -> EncodedDeformationField<B> {
        EncodedDeformationField {
            deformer: self.init(canonical.dim_encoding, device),
            canonical,
        }
    }
}

impl<B: Backend> Deformer<B> {
    /// ## Shapes
    ///
    /// * `points` - `[R, N, 3]`
    /// * `times` - `[R, 1]`
    pub fn forward(
        &self,
        points: Tensor<B, 3>,
        times: Tensor<B, 2>,
        is_training: bool,
    ) -> Result<Deformation<B>, Error> {
        let [ray_count, sample_count, _] = points.dims();
        if times.dims() != [ray_count, 1] {
            return Err(Error::Shape(
                "times".into(),
                format!("[{ray_count}, 1]"),
                format!("{:?}", times.dims()),
            ));
        }

        let dim_output = 3 + self.dim_extra;
        let is_identity = times
            .to_owned()
            .abs()
            .lower_elem(TIME_IDENTITY_THRESHOLD)
            .unsqueeze_dim::<3>(1)
            .expand(Shape::new([ray_count, sample_count, dim_output]));

        let times = if is_training && self.time_noise_std > 0.0 {
            let noise = Tensor::random(
                times.shape(),
                Distribution::Normal(0.0, self.time_noise_std),
                &times.device(),
            );
            times + noise
        } else {
            times
        };
        let times = times
            .unsqueeze_dim::<3>(1)
            .expand(Shape::new([ray_count, sample_count, 1]));
        let inputs = Tensor::cat(vec![points, times], 2);

        let outputs = self
            .predict(inputs.to_owned())?
            .mask_fill(is_identity.to_owned(), 0.0);

        let smoothness = if is_training && self.is_smoothness {
            let noise = Tensor::random(
                inputs.shape(),
                Distribution::Normal(0.0, self.smoothness_step),
                &inputs.device(),
            );
            let outputs_perturbed = self
                .predict(inputs + noise)?
                .mask_fill(is_identity, 0.0);
            Some((outputs_perturbed - outputs.to_owned()).powf_scalar(2.0).mean())
        } else {
            None
        };

        let displacements =
            outputs
                .to_owned()
                .slice([0..ray_count, 0..sample_count, 0..3]);
        let extras = (self.dim_extra != 0).then(|| {
            outputs.slice([0..ray_count, 0..sample_count, 3..dim_output])
        });

        Ok(Deformation {
            displacements,
            extras,
            smoothness,
        })
    }

    /// `[R, N, 4] -> [R, N, 3 + dim_extra]`
    fn predict(
        &self,
        inputs: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>, Error> {
        match (&self.residual, &self.gated) {
            (Some(network), _) => Ok(network.forward(inputs, None)),
            (None, Some(network)) => Ok(network.forward(inputs)),
            (None, None) => Err(Error::Validation(
                "deformer".into(),
                "initialized with a displacement network".into(),
            )),
        }
    }
}

/// Deform the samples of `query` and return the deformation.
fn deform<B: Backend>(
    deformer: &Deformer<B>,
    query: FieldQuery<B>,
) -> Result<(FieldQuery<B>, Deformation<B>), Error> {
    let times = query.times.to_owned().ok_or_else(|| {
        Error::Validation("times".into(), "provided for a deformation field".into())
    })?;
    let points = query.samples.points.to_owned();
    let deformation = deformer.forward(points.to_owned(), times, query.is_training)?;

    let samples = query
        .samples
        .with_points(points + deformation.displacements.to_owned());
    let query = FieldQuery { samples, ..query };
    Ok((query, deformation))
}

impl<B: Backend, F: SceneField<B>> SceneField<B> for DeformationField<B, F> {
    #[inline]
    fn feature_dim(&self) -> usize {
        self.canonical.feature_dim()
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        self.canonical.latent_dim()
    }

    #[inline]
    fn place_samples(
        &self,
        rays: &Rays<B>,
        samples: RaySamples<B>,
    ) -> Result<RaySamples<B>, Error> {
        self.canonical.place_samples(rays, samples)
    }

    #[inline]
    fn regularizers(&self) -> Regularizers {
        self.canonical.regularizers()
    }

    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        let (query, deformation) = deform(&self.deformer, query)?;

        let mut output = self.canonical.evaluate(query)?;
        output.penalties.deformation = deformation.smoothness;
        Ok(output)
    }
}

impl<B: Backend> SceneField<B> for EncodedDeformationField<B> {
    #[inline]
    fn feature_dim(&self) -> usize {
        SceneField::<B>::feature_dim(&self.canonical)
    }

    #[inline]
    fn latent_dim(&self) -> usize {
        SceneField::<B>::latent_dim(&self.canonical)
    }

    #[inline]
    fn regularizers(&self) -> Regularizers {
        SceneField::<B>::regularizers(&self.canonical)
    }

    fn evaluate(
        &self,
        query: FieldQuery<B>,
    ) -> Result<FieldOutput<B>, Error> {
        let (query, deformation) = deform(&self.deformer, query)?;

        let mut encodings = self.canonical.encode(&query)?;
        if let Some(extras) = deformation.extras {
            encodings = encodings + extras;
        }
        let penalty = query
            .is_training
            .then(|| AutoencodedField::encoding_penalty(encodings.to_owned()));

        let mut output = self.canonical.decode(encodings, &query)?;
        output.penalties.encoding = penalty;
        output.penalties.deformation = deformation.smoothness;
        Ok(output)
    }
}

impl Default for DeformerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
