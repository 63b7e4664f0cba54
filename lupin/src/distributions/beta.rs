use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

use super::special::lbeta;
use super::{
    broadcast_shapes, from_host, full_shape, host_values, rand_err, restrict_support,
    Distribution, PROB_EPS,
};
use crate::error::Result;

/// Beta distribution on (0, 1)
///
/// Samples are drawn on the host and carry no gradient; use score
/// function estimators when this is an approximating family.
pub struct Beta {
    a: Tensor,
    b: Tensor,
}

impl Beta {
    pub fn new(a: Tensor, b: Tensor) -> Result<Self> {
        broadcast_shapes(a.dims(), b.dims())?;
        Ok(Self { a, b })
    }
}

impl Distribution for Beta {
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor> {
        let shape = full_shape(sample_shape, &self.batch_shape());
        let a = host_values(&self.a, &shape)?;
        let b = host_values(&self.b, &shape)?;
        let x = a
            .into_iter()
            .zip(b)
            .map(|(a, b)| -> Result<f32> {
                let d = rand_distr::Beta::new(a, b).map_err(rand_err("Beta"))?;
                // f32 draws may round onto the boundary
                Ok(rng
                    .sample::<f32, _>(d)
                    .clamp(PROB_EPS as f32, 1.0 - PROB_EPS as f32))
            })
            .collect::<Result<Vec<f32>>>()?;
        from_host(x, &shape, self.a.device())
    }

    /// (a - 1) ln x + (b - 1) ln(1 - x) - ln B(a, b), -∞ outside (0, 1)
    fn log_prob(&self, x: &Tensor) -> Result<Tensor> {
        let x = x.to_dtype(self.a.dtype())?;
        let support = x.gt(0.0)?.mul(&x.lt(1.0)?)?;
        let x = x.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
        let t1 = x.log()?.broadcast_mul(&self.a.affine(1.0, -1.0)?)?;
        let t2 = x
            .affine(-1.0, 1.0)?
            .log()?
            .broadcast_mul(&self.b.affine(1.0, -1.0)?)?;
        let log_p = t1.add(&t2)?.broadcast_sub(&lbeta(&self.a, &self.b)?)?;
        restrict_support(&log_p, &support)
    }

    fn batch_shape(&self) -> Vec<usize> {
        broadcast_shapes(self.a.dims(), self.b.dims()).unwrap_or_default()
    }

    fn param_shapes(&self) -> Vec<Vec<usize>> {
        vec![self.a.dims().to_vec(), self.b.dims().to_vec()]
    }

    fn is_reparameterized(&self) -> bool {
        false
    }

    fn mean(&self) -> Result<Tensor> {
        Ok(self.a.broadcast_div(&self.a.broadcast_add(&self.b)?)?)
    }
}
