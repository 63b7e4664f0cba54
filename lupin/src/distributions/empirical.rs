use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use super::{full_shape, Distribution};
use crate::error::{Error, Result};

/// Empirical distribution over the rows of a sample buffer of shape
/// `(T, ...)`; each draw picks a stored row uniformly at random
pub struct Empirical {
    buffer: Tensor,
}

impl Empirical {
    pub fn new(buffer: Tensor) -> Result<Self> {
        if buffer.rank() == 0 || buffer.dims()[0] == 0 {
            return Err(Error::InvalidArgument(
                "empirical buffer needs a non-empty leading sample dimension".into(),
            ));
        }
        Ok(Self { buffer })
    }

    pub fn num_rows(&self) -> usize {
        self.buffer.dims()[0]
    }
}

impl Distribution for Empirical {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let t = self.num_rows();
        if sample_shape.is_empty() {
            return Ok(self.buffer.get(rng.random_range(0..t))?);
        }
        let n = sample_shape.iter().product::<usize>();
        let idx: Vec<u32> = (0..n).map(|_| rng.random_range(0..t) as u32).collect();
        let idx = Tensor::from_vec(idx, n, self.buffer.device())?;
        let rows = self.buffer.index_select(&idx, 0)?;
        Ok(rows.reshape(full_shape(sample_shape, &self.batch_shape()))?)
    }

    fn log_prob(&self, _x: &Tensor) -> Result<Tensor> {
        Err(Error::LogProbUnavailable("Empirical".into()))
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.buffer.dims()[1..].to_vec()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.buffer.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.buffer.mean(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_draws_are_rows() -> Result<()> {
        let dev = Device::Cpu;
        let buffer = Tensor::new(&[[1f32, 10.], [2., 20.], [3., 30.]], &dev)?;
        let emp = Empirical::new(buffer)?;
        let mut rng = StdRng::seed_from_u64(2);
        let x = emp.sample(&[5], &mut rng)?;
        assert_eq!(x.dims(), &[5, 2]);
        for row in x.to_vec2::<f32>()? {
            assert_eq!(row[1], row[0] * 10.0);
        }
        assert_eq!(emp.mean()?.to_vec1::<f32>()?, vec![2.0, 20.0]);
        assert!(emp.log_prob(&Tensor::new(&[1f32, 10.], &dev)?).is_err());
        Ok(())
    }
}
