//! Function approximators used by the scene fields.

pub mod encoding;
pub mod gated;
pub mod mlp;

pub use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
pub use encoding::*;
pub use gated::*;
pub use mlp::*;

use humansize::{format_size, BINARY};
use std::mem::size_of;

/// Parameter sizes of a module.
pub trait ModuleSize<B: Backend>: Module<B> {
    /// Size of the parameters in bytes.
    #[inline]
    fn size(&self) -> usize {
        self.num_params() * size_of::<B::FloatElem>()
    }

    /// Readable size of the parameters.
    #[inline]
    fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }
}

impl<B: Backend, M: Module<B>> ModuleSize<B> for M {}

#[cfg(test)]
mod tests {
    #[test]
    fn size_of_linear_mlp() {
        use super::*;
        use burn::backend::NdArray;

        type B = NdArray<f32>;
        let device = &Default::default();

        // (3 * 4 + 4) + (4 * 2 + 2)
        let mlp = MlpConfig::new(3, 2)
            .with_dim_hidden(4)
            .with_layer_count(1)
            .init::<B>(device);
        assert_eq!(mlp.size(), 26 * 4);
        assert!(mlp.size_readable().starts_with("104"));
    }
}
