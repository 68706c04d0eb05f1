//! Scene field variants.

pub mod autoencoded;
pub mod multi_plane;
pub mod occupancy;
pub mod single;
pub mod two_stage;

pub use crate::scene::{
    field::*,
    network::{Mlp, MlpConfig},
};
pub use autoencoded::*;
pub use burn::module::Module;
pub use multi_plane::*;
pub use occupancy::*;
pub use single::*;
pub use two_stage::*;

#[cfg(test)]
pub(crate) fn samples_along_z<B: Backend>(
    ray_count: usize,
    sample_count: usize,
    device: &B::Device,
) -> RaySamples<B> {
    use crate::render::ray::RaySamplerConfig;

    let rays = Rays::new(
        Tensor::<B, 2>::zeros([ray_count, 3], device),
        Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0]], device).repeat_dim(0, ray_count),
    )
    .unwrap();
    RaySamplerConfig::new()
        .with_step_count(sample_count)
        .init()
        .unwrap()
        .sample(&rays, false, &mut rand::thread_rng())
}
