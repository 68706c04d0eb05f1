//! View direction encoding.

use crate::error::Error;
use burn::tensor::{backend::Backend, Tensor, TensorData};

/// Encode directions as `[elevation, azimuth]` in radians.
///
/// - `elevation = asin(z / |d|)`, in `[-pi / 2, pi / 2]`
/// - `azimuth = atan2(y, x)`, in `(-pi, pi]`
///
/// Zero-length directions map to `[0, 0]`.
///
/// ## Shapes
///
/// * `directions` - `[R, 3]`
/// * `output` - `[R, 2]`
///
/// ## Details
///
/// Directions are ray inputs rather than learned values,
/// so the encoding is computed on the host and is not differentiable.
pub fn elevation_azimuth<B: Backend>(
    directions: Tensor<B, 2>
) -> Result<Tensor<B, 2>, Error> {
    let device = directions.device();
    let [ray_count, _] = directions.dims();
    let directions = directions
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::Data(format!("{err:?}")))?;

    let angles = directions
        .chunks_exact(3)
        .flat_map(|direction| {
            let [x, y, z] = [direction[0], direction[1], direction[2]];
            let norm = (x * x + y * y + z * z).sqrt();
            if norm <= f32::EPSILON {
                return [0.0, 0.0];
            }
            let elevation = (z / norm).clamp(-1.0, 1.0).asin();
            let azimuth = y.atan2(x);
            [elevation, azimuth]
        })
        .collect::<Vec<_>>();

    Ok(Tensor::from_data(
        TensorData::new(angles, [ray_count, 2]).convert::<B::FloatElem>(),
        &device,
    ))
}
