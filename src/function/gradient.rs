//! Point gradients through reverse-mode differentiation.

use crate::error::Error;
use burn::tensor::{backend::AutodiffBackend, Tensor};

/// `d sum(outputs) / d inputs`
///
/// `inputs` should be tracked by autodiff, e.g., by [`Tensor::require_grad`].
///
/// ## Details
///
/// It runs a backward pass on `outputs`,
/// so the graph of `outputs` should not be reused afterwards.
pub fn gradient<AB: AutodiffBackend, const D: usize, const D2: usize>(
    inputs: &Tensor<AB, D>,
    outputs: Tensor<AB, D2>,
) -> Result<Tensor<AB::InnerBackend, D>, Error> {
    #[cfg(debug_assertions)]
    log::debug!(
        target: "radiance_field_renderer::function",
        "gradient",
    );

    let grads = outputs.sum().backward();
    inputs.grad(&grads).ok_or_else(|| {
        Error::Validation(
            "inputs".into(),
            "tracked by autodiff and used by outputs".into(),
        )
    })
}
