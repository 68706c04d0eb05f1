pub mod dynamic;
pub mod field;
pub mod latent;
pub mod nerf;
pub mod network;
pub mod sdf;
