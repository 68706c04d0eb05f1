//! Discretized volume rendering.
//!
//! `C = sum_i T_i * alpha_i * c_i`, where `alpha_i = 1 - exp(-sigma_i * delta_i)`
//! and `T_i = prod_(j < i) (1 - alpha_j)`.

pub use burn::tensor::{backend::Backend, Tensor};

use crate::function::{norm_l2, softplus_shifted, TensorFloatExtension};
use burn::tensor::activation;

/// The distance after the last sample, an open boundary absorbing the remaining transmittance.
pub const DISTANCE_FAR: f64 = 1e10;

/// Added to every transmittance factor, keeping the products away from exact zero.
pub const TRANSMITTANCE_EPSILON: f64 = 1e-10;

/// Per-sample opacities and contributions.
#[derive(Clone, Debug)]
pub struct Composite<B: Backend> {
    /// `[R, N]`
    pub alphas: Tensor<B, 2>,
    /// `[R, N]`
    pub weights: Tensor<B, 2>,
}

/// Convert raw densities into alphas and weights.
///
/// ## Arguments
///
/// * `densities` - Raw densities. `[R, N]`
/// * `depths` - Ascending sample depths. `[1 | R, N]`
/// * `directions` - Unnormalized ray directions. `[R, 3]`
/// * `is_softplus_shifted` - Whether to map densities with `softplus(x - 1)` instead of `relu(x)`.
pub fn alpha_from_density<B: Backend>(
    densities: Tensor<B, 2>,
    depths: Tensor<B, 2>,
    directions: Tensor<B, 2>,
    is_softplus_shifted: bool,
) -> Composite<B> {
    let sigmas = if is_softplus_shifted {
        softplus_shifted(densities)
    } else {
        activation::relu(densities)
    };

    let distances = distances(depths) * norm_l2(directions, 1);
    let alphas = (sigmas * distances).neg().exp().neg().add_scalar(1.0);
    let weights = weights_from_alpha(alphas.to_owned());

    Composite { alphas, weights }
}

/// `weight_i = alpha_i * prod_(j < i) (1 - alpha_j + eps)`
///
/// ## Shapes
///
/// * `alphas` - `[R, N]`
/// * `output` - `[R, N]`
pub fn weights_from_alpha<B: Backend>(alphas: Tensor<B, 2>) -> Tensor<B, 2> {
    let transmittances = alphas
        .to_owned()
        .neg()
        .add_scalar(1.0 + TRANSMITTANCE_EPSILON)
        .prod_cumulative_exclusive(1);
    alphas * transmittances
}

/// `delta_i = t_(i + 1) - t_i`, with [`DISTANCE_FAR`] after the last sample.
///
/// ## Shapes
///
/// * `depths` - `[D, N]`
/// * `output` - `[D, N]`
pub fn distances<B: Backend>(depths: Tensor<B, 2>) -> Tensor<B, 2> {
    let [row_count, step_count] = depths.dims();
    let far = Tensor::full([row_count, 1], DISTANCE_FAR, &depths.device());
    if step_count < 2 {
        return far;
    }

    let deltas = depths.to_owned().slice([0..row_count, 1..step_count])
        - depths.slice([0..row_count, 0..(step_count - 1)]);
    Tensor::cat(vec![deltas, far], 1)
}

/// `sum_i weight_i * value_i` along the sample axis.
///
/// ## Shapes
///
/// * `weights` - `[R, N]`
/// * `values` - `[R | 1, N, C]`
/// * `output` - `[R, C]`
pub fn volumetric_integrate<B: Backend>(
    weights: Tensor<B, 2>,
    values: Tensor<B, 3>,
) -> Tensor<B, 2> {
    (weights.unsqueeze_dim::<3>(2) * values)
        .sum_dim(1)
        .squeeze::<2>(1)
}

/// The expected depth, integrating the sample depths with the same weights.
///
/// ## Shapes
///
/// * `weights` - `[R, N]`
/// * `depths` - `[1 | R, N]`
/// * `output` - `[R, 1]`
#[inline]
pub fn depth<B: Backend>(
    weights: Tensor<B, 2>,
    depths: Tensor<B, 2>,
) -> Tensor<B, 2> {
    volumetric_integrate(weights, depths.unsqueeze_dim::<3>(2))
}

/// The maximum alpha along every ray, a proxy of occupancy.
///
/// ## Shapes
///
/// * `alphas` - `[R, N]`
/// * `output` - `[R, 1]`
#[inline]
pub fn accumulation<B: Backend>(alphas: Tensor<B, 2>) -> Tensor<B, 2> {
    alphas.max_dim(1)
}

/// The transmittance left after the last sample, `1 - sum_i weight_i`.
///
/// ## Shapes
///
/// * `weights` - `[R, N]`
/// * `output` - `[R, 1]`
#[inline]
pub fn transmittance_residual<B: Backend>(weights: Tensor<B, 2>) -> Tensor<B, 2> {
    weights.sum_dim(1).neg().add_scalar(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::NdArray,
        tensor::{Distribution, ElementConversion},
    };

    type B = NdArray<f32>;

    #[test]
    fn alpha_from_density_constant() {
        let device = &Default::default();

        let densities = Tensor::<B, 2>::full([1, 4], 2.0, device);
        let depths =
            Tensor::<B, 2>::from_floats([[0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]], device);
        let directions = Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0]], device);

        let Composite { alphas, weights } =
            alpha_from_density(densities, depths, directions, true);

        let sigma = (1.0_f64.exp() + 1.0).ln();
        let alpha = 1.0 - (-sigma / 3.0).exp();
        alphas.into_data().assert_approx_eq(
            &Tensor::<B, 2>::from_floats([[alpha, alpha, alpha, 1.0]], device)
                .into_data(),
            5,
        );

        let residual = 1.0 - alpha;
        weights.into_data().assert_approx_eq(
            &Tensor::<B, 2>::from_floats(
                [[
                    alpha,
                    alpha * residual,
                    alpha * residual.powi(2),
                    residual.powi(3),
                ]],
                device,
            )
            .into_data(),
            5,
        );
    }

    #[test]
    fn alpha_from_density_zero() {
        let device = &Default::default();

        let densities = Tensor::<B, 2>::zeros([2, 5], device);
        let depths =
            Tensor::<B, 2>::from_floats([[0.0, 0.25, 0.5, 0.75, 1.0]], device);
        let directions =
            Tensor::<B, 2>::from_floats([[0.0, 0.0, 1.0], [3.0, 0.0, 4.0]], device);

        let Composite { alphas, weights } =
            alpha_from_density(densities, depths, directions, false);
        alphas
            .into_data()
            .assert_eq(&Tensor::<B, 2>::zeros([2, 5], device).into_data(), true);
        weights
            .to_owned()
            .into_data()
            .assert_eq(&Tensor::<B, 2>::zeros([2, 5], device).into_data(), true);

        let colors = Tensor::<B, 3>::random([2, 5, 3], Distribution::Default, device);
        volumetric_integrate(weights, colors)
            .into_data()
            .assert_eq(&Tensor::<B, 2>::zeros([2, 3], device).into_data(), true);
    }

    #[test]
    fn alpha_from_density_direction_scales_distance() {
        let device = &Default::default();

        let densities = Tensor::<B, 2>::full([2, 3], 0.5, device);
        let depths = Tensor::<B, 2>::from_floats([[1.0, 1.5, 2.0]], device);
        let directions =
            Tensor::<B, 2>::from_floats([[0.0, 1.0, 0.0], [0.0, 2.0, 0.0]], device);

        let alphas = alpha_from_density(densities, depths, directions, false).alphas;
        let alpha_unit = 1.0 - (-0.5_f64 * 0.5).exp();
        let alpha_double = 1.0 - (-0.5_f64 * 1.0).exp();
        alphas.slice([0..2, 0..2]).into_data().assert_approx_eq(
            &Tensor::<B, 2>::from_floats(
                [[alpha_unit, alpha_unit], [alpha_double, alpha_double]],
                device,
            )
            .into_data(),
            5,
        );
    }

    #[test]
    fn weights_sum_at_most_one() {
        let device = &Default::default();

        let depths = Tensor::<B, 2>::from_floats(
            [[0.0, 0.1, 0.2, 0.5, 0.9, 1.0, 1.2, 2.0]],
            device,
        );
        let directions = Tensor::<B, 2>::random(
            [16, 3],
            Distribution::Uniform(-2.0, 2.0),
            device,
        );
        for high in [1e-3, 1.0, 1e2, 1e6] {
            let densities = Tensor::<B, 2>::random(
                [16, 8],
                Distribution::Uniform(0.0, high),
                device,
            );
            for is_softplus_shifted in [false, true] {
                let Composite { alphas, weights } = alpha_from_density(
                    densities.to_owned(),
                    depths.to_owned(),
                    directions.to_owned(),
                    is_softplus_shifted,
                );
                assert!(!alphas.is_nan().any().into_scalar());
                assert!(weights.to_owned().min().into_scalar().elem::<f32>() >= 0.0);
                let sum_max = weights.sum_dim(1).max().into_scalar().elem::<f32>();
                assert!(sum_max <= 1.0 + 1e-5, "{sum_max} should be at most 1");
            }
        }
    }

    #[test]
    fn weights_from_alpha_transmittance() {
        let device = &Default::default();

        let alphas = Tensor::<B, 2>::from_floats([[0.5, 0.5, 1.0], [0.0, 0.2, 0.0]], device);
        let weights = weights_from_alpha(alphas);
        weights.into_data().assert_approx_eq(
            &Tensor::<B, 2>::from_floats([[0.5, 0.25, 0.25], [0.0, 0.2, 0.0]], device)
                .into_data(),
            6,
        );
    }

    #[test]
    fn distances_single_step() {
        let device = &Default::default();

        let depths = Tensor::<B, 2>::from_floats([[0.3]], device);
        let output = distances(depths).into_scalar();
        assert_eq!(output, DISTANCE_FAR as f32);
    }

    #[test]
    fn depth_and_accumulation() {
        let device = &Default::default();

        let weights = Tensor::<B, 2>::from_floats([[0.25, 0.5, 0.25]], device);
        let depths = Tensor::<B, 2>::from_floats([[1.0, 2.0, 4.0]], device);
        let output = depth(weights.to_owned(), depths).into_scalar();
        assert!((output - 2.25).abs() < 1e-6);

        let output = transmittance_residual(weights).into_scalar();
        assert!(output.abs() < 1e-6);

        let alphas = Tensor::<B, 2>::from_floats([[0.1, 0.7, 0.3], [0.0, 0.0, 0.2]], device);
        accumulation(alphas).into_data().assert_eq(
            &Tensor::<B, 2>::from_floats([[0.7], [0.2]], device).into_data(),
            true,
        );
    }
}
