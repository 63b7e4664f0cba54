use candle_core::{DType, Tensor, D};
use candle_nn::ops::{log_softmax, softmax_last_dim};
use rand::rngs::StdRng;
use rand::Rng;

use super::{full_shape, host_values, Distribution};
use crate::error::{Error, Result};

/// Categorical distribution over {0, ..., K-1} parameterized by
/// unnormalized `logits` whose last dimension is K
///
/// Samples are `u32` indices of shape `sample_shape ++ logits.dims()[..-1]`
pub struct Categorical {
    logits: Tensor,
}

impl Categorical {
    pub fn new(logits: Tensor) -> Result<Self> {
        if logits.rank() == 0 {
            return Err(Error::InvalidArgument(
                "categorical logits need a trailing category dimension".into(),
            ));
        }
        Ok(Self { logits })
    }

    pub fn num_categories(&self) -> usize {
        self.logits.dims()[self.logits.rank() - 1]
    }
}

impl Distribution for Categorical {
    /// Gumbel-max: argmax_k (logit_k - ln(-ln u_k))
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let k = self.num_categories();
        let shape = full_shape(sample_shape, &self.batch_shape());
        let mut logit_shape = shape.clone();
        logit_shape.push(k);

        let logits = host_values(&self.logits, &logit_shape)?;
        let x: Vec<u32> = logits
            .chunks(k)
            .map(|row| {
                let mut best = (0u32, f32::NEG_INFINITY);
                for (j, &l) in row.iter().enumerate() {
                    let u: f32 = rng.random_range(f32::MIN_POSITIVE..1.0);
                    let g = l - (-u.ln()).ln();
                    if g > best.1 {
                        best = (j as u32, g);
                    }
                }
                best.0
            })
            .collect();
        Ok(Tensor::from_vec(x, shape, self.logits.device())?)
    }

    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let k = self.num_categories();
        let rank = x.rank();
        let mut full = x.dims().to_vec();
        full.push(k);

        let log_p = log_softmax(&self.logits, D::Minus1)?
            .broadcast_as(full)?
            .contiguous()?;
        let idx = x.to_dtype(DType::U32)?.unsqueeze(rank)?.contiguous()?;
        Ok(log_p.gather(&idx, rank)?.squeeze(rank)?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        let dims = self.logits.dims();
        dims[..dims.len() - 1].to_vec()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.logits.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    /// Class probabilities, shape of `logits`
    fn mean(&self) -> Result<Tensor> {
        Ok(softmax_last_dim(&self.logits)?)
    }
}
