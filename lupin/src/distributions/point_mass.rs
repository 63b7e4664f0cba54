use candle_core::Tensor;
use rand::rngs::StdRng;

use super::{full_shape, Distribution};
use crate::error::Result;

/// Degenerate distribution concentrated at `loc`
///
/// Used as the approximating family of point estimates. Its samples are
/// `loc` itself, so gradients reach the location parameter.
pub struct PointMass {
    loc: Tensor,
}

impl PointMass {
    pub fn new(loc: Tensor) -> Self {
        Self { loc }
    }
}

impl Distribution for PointMass {
    fn sample(&self, sample_shape: &[usize], _rng: &mut StdRng) -> Result<Tensor> {
        if sample_shape.is_empty() {
            return Ok(self.loc.clone());
        }
        let shape = full_shape(sample_shape, self.loc.dims());
        Ok(self.loc.broadcast_as(shape)?)
    }

    /// Constant zero; the entropy term of a point estimate is dropped
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.to_dtype(self.loc.dtype())?.zeros_like()?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.loc.dims().to_vec()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.loc.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        true
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.loc.clone())
    }
}
