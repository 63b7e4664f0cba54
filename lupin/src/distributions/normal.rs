use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::{broadcast_shapes, from_host, full_shape, Distribution};
use crate::error::Result;

const HALF_LN_2PI: f64 = 0.9189385332046727;

/// Normal distribution N(loc, scale²) with reparameterized sampling
///
/// x = loc + scale * ε, ε ~ N(0, 1)
pub struct Normal {
    loc: Tensor,
    scale: Tensor,
}

impl Normal {
    pub fn new(loc: Tensor, scale: Tensor) -> Result<Self> {
        broadcast_shapes(loc.dims(), scale.dims())?;
        Ok(Self { loc, scale })
    }

    pub fn loc(&self) -> &Tensor {
        &self.loc
    }

    pub fn scale(&self) -> &Tensor {
        &self.scale
    }
}

impl Distribution for Normal {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, &self.batch_shape());
        let numel = shape.iter().product::<usize>();
        let eps: Vec<f32> = (0..numel).map(|_| rng.sample(StandardNormal)).collect();
        let eps = from_host(eps, &shape, self.loc.device())?.to_dtype(self.loc.dtype())?;
        Ok(eps.broadcast_mul(&self.scale)?.broadcast_add(&self.loc)?)
    }

    /// log N(x; μ, σ²) = -0.5 * ((x - μ)/σ)² - ln σ - 0.5 * ln(2π)
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.to_dtype(self.loc.dtype())?;
        let z = x.broadcast_sub(&self.loc)?.broadcast_div(&self.scale)?;
        Ok(z
            .sqr()?
            .affine(-0.5, -HALF_LN_2PI)?
            .broadcast_sub(&self.scale.log()?)?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        broadcast_shapes(self.loc.dims(), self.scale.dims()).unwrap_or_default()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.loc.dims().to_vec(), self.scale.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        true
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.loc.broadcast_as(self.batch_shape())?.contiguous()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};
    use rand::SeedableRng;

    #[test]
    fn test_unit_normal_log_prob() -> Result<()> {
        let dev = Device::Cpu;
        let normal = Normal::new(Tensor::new(0f32, &dev)?, Tensor::new(1f32, &dev)?)?;
        let x = Tensor::new(&[0f32, 1., -2.], &dev)?;
        let lp = normal.log_prob(&x)?.to_vec1::<f32>()?;
        for (v, xi) in lp.iter().zip([0f32, 1., -2.]) {
            let expected = -0.5 * xi * xi - HALF_LN_2PI as f32;
            assert!((v - expected).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_sample_shape_and_grad() -> Result<()> {
        let dev = Device::Cpu;
        let loc = Var::new(&[1f32, 2., 3.], &dev)?;
        let scale = Tensor::new(0.5f32, &dev)?;
        let normal = Normal::new(loc.as_tensor().clone(), scale)?;
        let mut rng = StdRng::seed_from_u64(7);
        let x = normal.sample(&[4], &mut rng)?;
        assert_eq!(x.dims(), &[4, 3]);

        let grads = x.sum_all()?.backward()?;
        let g = grads.get(loc.as_tensor()).expect("gradient").to_vec1::<f32>()?;
        assert_eq!(g, vec![4.0, 4.0, 4.0]);
        Ok(())
    }
}
