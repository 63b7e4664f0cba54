use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use super::special::lgamma;
use super::{from_host, full_shape, host_values, rand_err, restrict_support, Distribution};
use crate::error::Result;

/// Poisson distribution over counts
pub struct Poisson {
    rate: Tensor,
}

impl Poisson {
    pub fn new(rate: Tensor) -> Self {
        Self { rate }
    }
}

impl Distribution for Poisson {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, self.rate.dims());
        let x = host_values(&self.rate, &shape)?
            .into_iter()
            .map(|lambda| -> Result<f32> {
                let d = rand_distr::Poisson::new(lambda).map_err(rand_err("Poisson"))?;
                Ok(rng.sample(d))
            })
            .collect::<Result<Vec<f32>>>()?;
        from_host(x, &shape, self.rate.device())
    }

    /// x ln λ - λ - ln Γ(x + 1), -∞ for negative counts
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.to_dtype(self.rate.dtype())?;
        let support = x.ge(0.0)?;
        let x = x.maximum(0.0)?;
        let log_p = x
            .broadcast_mul(&self.rate.log()?)?
            .broadcast_sub(&self.rate)?
            .sub(&lgamma(&x.affine(1.0, 1.0)?)?)?;
        restrict_support(&log_p, &support)
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.rate.dims().to_vec()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.rate.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.rate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_log_prob() -> Result<()> {
        let dev = Device::Cpu;
        let p = Poisson::new(Tensor::new(3f32, &dev)?);
        let lp = p.log_prob(&Tensor::new(&[0f32, 2.], &dev)?)?.to_vec1::<f32>()?;
        assert!((lp[0] + 3.0).abs() < 1e-4);
        let expected = 2.0 * 3f32.ln() - 3.0 - 2f32.ln();
        assert!((lp[1] - expected).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_negative_counts() -> Result<()> {
        let dev = Device::Cpu;
        let p = Poisson::new(Tensor::new(2f32, &dev)?);
        let lp = p.log_prob(&Tensor::new(&[-1f32, 0.], &dev)?)?.to_vec1::<f32>()?;
        assert_eq!(lp[0], f32::NEG_INFINITY);
        assert!((lp[1] + 2.0).abs() < 1e-5);
        Ok(())
    }
}
