use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use super::special::lgamma;
use super::{
    broadcast_shapes, from_host, full_shape, host_values, rand_err, restrict_support,
    Distribution, POSITIVE_FLOOR,
};
use crate::error::Result;

/// Gamma distribution with shape `concentration` and inverse scale `rate`
pub struct Gamma {
    concentration: Tensor,
    rate: Tensor,
}

impl Gamma {
    pub fn new(concentration: Tensor, rate: Tensor) -> Result<Self> {
        broadcast_shapes(concentration.dims(), rate.dims())?;
        Ok(Self {
            concentration,
            rate,
        })
    }
}

impl Distribution for Gamma {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, &self.batch_shape());
        let alpha = host_values(&self.concentration, &shape)?;
        let beta = host_values(&self.rate, &shape)?;
        let x = alpha
            .into_iter()
            .zip(beta)
            .map(|(a, b)| -> Result<f32> {
                let d = rand_distr::Gamma::new(a, 1.0 / b).map_err(rand_err("Gamma"))?;
                Ok(rng.sample::<f32, _>(d).max(f32::MIN_POSITIVE))
            })
            .collect::<Result<Vec<f32>>>()?;
        from_host(x, &shape, self.rate.device())
    }

    /// α ln β + (α - 1) ln x - β x - ln Γ(α), -∞ for x ≤ 0
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.to_dtype(self.rate.dtype())?;
        let support = x.gt(0.0)?;
        let x = x.maximum(POSITIVE_FLOOR)?;
        let alpha = &self.concentration;
        let head = alpha
            .broadcast_mul(&self.rate.log()?)?
            .broadcast_sub(&lgamma(alpha)?)?;
        let body = x
            .log()?
            .broadcast_mul(&alpha.affine(1.0, -1.0)?)?
            .sub(&x.broadcast_mul(&self.rate)?)?;
        restrict_support(&body.broadcast_add(&head)?, &support)
    }

    fn batch_shape(&self) -> Vec<usize> {
        broadcast_shapes(self.concentration.dims(), self.rate.dims()).unwrap_or_default()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![
            self.concentration.dims().to_vec(),
            self.rate.dims().to_vec(),
        ]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.concentration.broadcast_div(&self.rate)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_exponential_log_prob() -> Result<()> {
        // Gamma(1, λ) is Exponential(λ)
        let dev = Device::Cpu;
        let g = Gamma::new(Tensor::new(1f32, &dev)?, Tensor::new(2f32, &dev)?)?;
        let lp = g.log_prob(&Tensor::new(0.7f32, &dev)?)?.to_scalar::<f32>()?;
        let expected = 2f32.ln() - 2.0 * 0.7;
        assert!((lp - expected).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_non_positive_values() -> Result<()> {
        let dev = Device::Cpu;
        let g = Gamma::new(Tensor::new(3f32, &dev)?, Tensor::new(1f32, &dev)?)?;
        let lp = g.log_prob(&Tensor::new(&[-1f32, 0., 2.], &dev)?)?.to_vec1::<f32>()?;
        assert_eq!(lp[0], f32::NEG_INFINITY);
        assert_eq!(lp[1], f32::NEG_INFINITY);
        assert!(lp[2].is_finite());
        Ok(())
    }
}
