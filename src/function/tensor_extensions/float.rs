use burn::tensor::{backend, Float, Tensor};

pub trait TensorFloatExtension {
    fn prod_cumulative(
        self,
        dim: usize,
    ) -> Self;

    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self;
}

impl<B: backend::Backend, const D: usize> TensorFloatExtension
    for Tensor<B, D, Float>
{
    /// `c_i = a_0 * ... * a_i` along `dim`.
    fn prod_cumulative(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than self.dims().len()");

        let mut state_batch: Option<Self> = None;
        let products = self
            .iter_dim(dim)
            .map(|value_batch| {
                let product = match state_batch.take() {
                    Some(state) => state * value_batch,
                    None => value_batch,
                };
                state_batch = Some(product.to_owned());
                product
            })
            .collect();

        Tensor::cat(products, dim)
    }

    /// `c_0 = 1, c_i = a_0 * ... * a_(i - 1)` along `dim`.
    ///
    /// It is the inclusive product shifted right by one position.
    fn prod_cumulative_exclusive(
        self,
        dim: usize,
    ) -> Self {
        assert!(dim < D, "dim should be less than self.dims().len()");

        let count = self.dims()[dim];
        let dims_batch = {
            let mut dims = self.dims();
            dims[dim] = 1;
            dims
        };
        let ones = Tensor::ones(dims_batch, &self.device());
        if count <= 1 {
            return ones;
        }

        let inclusive = self.prod_cumulative(dim);
        let mut ranges = inclusive.dims().map(|dim| 0..dim);
        ranges[dim] = 0..(count - 1);

        Tensor::cat(vec![ones, inclusive.slice(ranges)], dim)
    }
}
