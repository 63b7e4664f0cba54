use candle_core::{DType, Tensor, D};
use rand::rngs::StdRng;
use rand::Rng;

use super::special::lgamma;
use super::{
    from_host, full_shape, host_values, rand_err, restrict_support, Distribution, PROB_EPS,
    SIMPLEX_TOL,
};
use crate::error::{Error, Result};

/// Dirichlet distribution on the simplex; the last dimension of
/// `concentration` is the event dimension
pub struct Dirichlet {
    concentration: Tensor,
}

impl Dirichlet {
    pub fn new(concentration: Tensor) -> Result<Self> {
        if concentration.rank() == 0 {
            return Err(Error::InvalidArgument(
                "dirichlet concentration needs an event dimension".into(),
            ));
        }
        Ok(Self { concentration })
    }
}

impl Distribution for Dirichlet {
    /// Normalized independent Gamma(α_k, 1) draws
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, self.concentration.dims());
        let g = host_values(&self.concentration, &shape)?
            .into_iter()
            .map(|a| -> Result<f32> {
                let d = rand_distr::Gamma::new(a, 1.0).map_err(rand_err("Dirichlet"))?;
                Ok(rng.sample::<f32, _>(d).max(f32::MIN_POSITIVE))
            })
            .collect::<Result<Vec<f32>>>()?;
        let g = from_host(g, &shape, self.concentration.device())?;
        Ok(g.broadcast_div(&g.sum_keepdim(D::Minus1)?)?)
    }

    /// Σ_k (α_k - 1) ln x_k + ln Γ(Σ_k α_k) - Σ_k ln Γ(α_k), -∞ off
    /// the simplex
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let alpha = &self.concentration;
        let x = x.to_dtype(alpha.dtype())?;
        let positive = x.gt(0.0)?.to_dtype(DType::F32)?.min(D::Minus1)?.gt(0.5)?;
        let normalized = x.sum(D::Minus1)?.affine(1.0, -1.0)?.abs()?.lt(SIMPLEX_TOL)?;
        let support = positive.mul(&normalized)?;
        let x = x.clamp(PROB_EPS, 1.0)?;
        let body = x
            .log()?
            .broadcast_mul(&alpha.affine(1.0, -1.0)?)?
            .sum(D::Minus1)?;
        let norm = lgamma(&alpha.sum(D::Minus1)?)?.sub(&lgamma(alpha)?.sum(D::Minus1)?)?;
        restrict_support(&body.broadcast_add(&norm)?, &support)
    }

    fn batch_shape(&self) -> Vec<usize> {
        let dims = self.concentration.dims();
        dims[..dims.len() - 1].to_vec()
    }

    fn event_shape(&self) -> Vec<usize> {
        vec![self.concentration.dims()[self.concentration.rank() - 1]]
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.concentration.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        let alpha = &self.concentration;
        Ok(alpha.broadcast_div(&alpha.sum_keepdim(D::Minus1)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rand::SeedableRng;

    #[test]
    fn test_flat_dirichlet_log_prob() -> Result<()> {
        // Dirichlet(1, 1, 1) has constant density Γ(3) = 2
        let dev = Device::Cpu;
        let d = Dirichlet::new(Tensor::new(&[1f32, 1., 1.], &dev)?)?;
        let x = Tensor::new(&[0.2f32, 0.3, 0.5], &dev)?;
        let lp = d.log_prob(&x)?.to_scalar::<f32>()?;
        assert!((lp - 2f32.ln()).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_samples_on_simplex() -> Result<()> {
        let dev = Device::Cpu;
        let d = Dirichlet::new(Tensor::new(&[0.5f32, 2., 3.], &dev)?)?;
        let mut rng = StdRng::seed_from_u64(5);
        let x = d.sample(&[10], &mut rng)?;
        assert_eq!(x.dims(), &[10, 3]);
        for s in x.sum(1)?.to_vec1::<f32>()? {
            assert!((s - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_off_simplex() -> Result<()> {
        let dev = Device::Cpu;
        let d = Dirichlet::new(Tensor::new(&[1f32, 1., 1.], &dev)?)?;
        let x = Tensor::new(&[[0.2f32, 0.3, 0.5], [0.5, 0.6, 0.7], [-0.1, 0.6, 0.5]], &dev)?;
        let lp = d.log_prob(&x)?.to_vec1::<f32>()?;
        assert!(lp[0].is_finite());
        assert_eq!(lp[1], f32::NEG_INFINITY);
        assert_eq!(lp[2], f32::NEG_INFINITY);
        Ok(())
    }
}
