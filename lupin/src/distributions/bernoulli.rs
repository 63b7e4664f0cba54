use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use super::{from_host, full_shape, host_values, restrict_support, Distribution, PROB_EPS};
use crate::error::Result;

/// Bernoulli distribution over {0, 1} parameterized by `probs`
pub struct Bernoulli {
    probs: Tensor,
}

impl Bernoulli {
    pub fn new(probs: Tensor) -> Result<Self> {
        Ok(Self { probs })
    }
}

impl Distribution for Bernoulli {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, self.probs.dims());
        let p = host_values(&self.probs, &shape)?;
        let x: Vec<f32> = p
            .into_iter()
            .map(|p| if rng.random::<f32>() < p { 1.0 } else { 0.0 })
            .collect();
        from_host(x, &shape, self.probs.device())
    }

    /// x ln p + (1 - x) ln(1 - p), -∞ for p outside [0, 1]
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.to_dtype(self.probs.dtype())?;
        let valid = self.probs.ge(0.0)?.mul(&self.probs.le(1.0)?)?;
        let p = self.probs.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
        let ln_p = p.log()?;
        let ln_q = p.affine(-1.0, 1.0)?.log()?;
        let log_p = x
            .broadcast_mul(&ln_p)?
            .add(&x.affine(-1.0, 1.0)?.broadcast_mul(&ln_q)?)?;
        restrict_support(&log_p, &valid)
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.probs.dims().to_vec()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.probs.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.probs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_log_prob() -> Result<()> {
        let dev = Device::Cpu;
        let b = Bernoulli::new(Tensor::new(0.25f32, &dev)?)?;
        let x = Tensor::new(&[1f32, 0.], &dev)?;
        let lp = b.log_prob(&x)?.to_vec1::<f32>()?;
        assert!((lp[0] - 0.25f32.ln()).abs() < 1e-5);
        assert!((lp[1] - 0.75f32.ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_sample_frequency() -> Result<()> {
        let dev = Device::Cpu;
        let b = Bernoulli::new(Tensor::new(0.3f32, &dev)?)?;
        let mut rng = StdRng::seed_from_u64(1);
        let x = b.sample(&[4000], &mut rng)?;
        let freq = x.mean_all()?.to_scalar::<f32>()?;
        assert!((freq - 0.3).abs() < 0.03, "frequency {}", freq);
        Ok(())
    }

    #[test]
    fn test_invalid_probs() -> Result<()> {
        let dev = Device::Cpu;
        let b = Bernoulli::new(Tensor::new(&[-0.2f32, 0., 1., 1.3], &dev)?)?;
        let lp = b.log_prob(&Tensor::ones(4, candle_core::DType::F32, &dev)?)?;
        let lp = lp.to_vec1::<f32>()?;
        assert_eq!(lp[0], f32::NEG_INFINITY);
        assert!(lp[1].is_finite());
        assert!(lp[2].abs() < 1e-5);
        assert_eq!(lp[3], f32::NEG_INFINITY);
        Ok(())
    }
}
