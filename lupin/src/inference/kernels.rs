//! Transition kernels of [`MonteCarlo`](super::MonteCarlo).
//!
//! A kernel sees the unnormalized log posterior of the latent state
//! through [`LogDensity`] and proposes the next state. The state is one
//! tensor per latent, in mapping order.

use candle_core::{Tensor, Var};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::base::InferenceBase;
use crate::error::Result;

/// Scaled log joint as a function of the latent state
pub struct LogDensity<'a> {
    base: &'a mut InferenceBase,
}

impl<'a> LogDensity<'a> {
    pub(crate) fn new(base: &'a mut InferenceBase) -> Self {
        Self { base }
    }

    /// log p(x, z) at `position`
    pub fn value(&mut self, position: &[Tensor]) -> Result<f32> {
        let bindings = self.base.bindings_at(position)?;
        let trace = self.base.joint_pass(&bindings)?;
        Ok(self.base.log_joint(&trace)?.to_scalar::<f32>()?)
    }

    /// log p(x, z) and its gradient with respect to each latent tensor
    pub fn value_and_grad(&mut self, position: &[Tensor]) -> Result<(f32, Vec<Tensor>)> {
        let vars = position
            .iter()
            .map(|x| Var::from_tensor(&x.detach()))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let tensors: Vec<Tensor> = vars.iter().map(|v| v.as_tensor().clone()).collect();

        let bindings = self.base.bindings_at(&tensors)?;
        let trace = self.base.joint_pass(&bindings)?;
        let log_joint = self.base.log_joint(&trace)?;
        let grads = log_joint.backward()?;

        let mut grad = Vec::with_capacity(vars.len());
        for v in vars.iter() {
            match grads.get(v) {
                Some(g) => grad.push(g.detach()),
                None => grad.push(v.as_tensor().zeros_like()?),
            }
        }
        Ok((log_joint.to_scalar::<f32>()?, grad))
    }
}

/// Outcome of one kernel step
pub struct Proposal {
    pub position: Vec<Tensor>,
    pub log_density: f32,
    pub accepted: bool,
    /// the proposal had a NaN or +∞ log density or energy; -∞ (outside
    /// the support) is an ordinary rejection
    pub divergent: bool,
}

impl Proposal {
    fn reject(position: &[Tensor], log_density: f32, divergent: bool) -> Self {
        Self {
            position: position.to_vec(),
            log_density,
            accepted: false,
            divergent,
        }
    }
}

pub trait Kernel {
    fn name(&self) -> &'static str;

    /// Propose the state following `position`
    ///
    /// * `target` - log posterior up to a constant
    /// * `position` - current state
    /// * `log_density` - log posterior at `position`
    /// * `t` - index of the update
    /// * `rng` - random stream of the sampler
    fn step(
        &self,
        target: &mut LogDensity<'_>,
        position: &[Tensor],
        log_density: f32,
        t: usize,
        rng: &mut StdRng,
    ) -> Result<Proposal>;
}

fn is_divergent(lp: f32) -> bool {
    lp.is_nan() || lp == f32::INFINITY
}

fn standard_normal_like(x: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
    let n = x.elem_count();
    let z: Vec<f32> = (0..n).map(|_| rng.sample::<f32, _>(StandardNormal)).collect();
    Ok(Tensor::from_vec(z, x.dims(), x.device())?.to_dtype(x.dtype())?)
}

fn half_sq_norm(ps: &[Tensor]) -> Result<f32> {
    let mut tot = 0f32;
    for p in ps {
        tot += p.sqr()?.sum_all()?.to_scalar::<f32>()? * 0.5;
    }
    Ok(tot)
}

/// Hamiltonian Monte Carlo with a fixed leapfrog trajectory and a
/// Metropolis correction
#[derive(Debug, Clone)]
pub struct Hmc {
    pub step_size: f64,
    pub num_leapfrog_steps: usize,
}

impl Default for Hmc {
    fn default() -> Self {
        Self {
            step_size: 0.25,
            num_leapfrog_steps: 2,
        }
    }
}

impl Hmc {
    pub fn new(step_size: f64, num_leapfrog_steps: usize) -> Self {
        Self {
            step_size,
            num_leapfrog_steps,
        }
    }
}

impl Kernel for Hmc {
    fn name(&self) -> &'static str {
        "Hmc"
    }

    fn step(
        &self,
        target: &mut LogDensity<'_>,
        position: &[Tensor],
        log_density: f32,
        _t: usize,
        rng: &mut StdRng,
    ) -> Result<Proposal> {
        let eps = self.step_size;
        let p0 = position
            .iter()
            .map(|x| standard_normal_like(x, rng))
            .collect::<Result<Vec<_>>>()?;

        let (_, mut grad) = target.value_and_grad(position)?;
        let mut q = position.to_vec();
        let mut p = Vec::with_capacity(p0.len());
        for (pi, gi) in p0.iter().zip(grad.iter()) {
            p.push((pi + gi.affine(0.5 * eps, 0.0)?)?);
        }

        let mut lp = log_density;
        for step in 0..self.num_leapfrog_steps {
            for (qi, pi) in q.iter_mut().zip(p.iter()) {
                *qi = (&*qi + pi.affine(eps, 0.0)?)?;
            }
            (lp, grad) = target.value_and_grad(&q)?;
            if !lp.is_finite() {
                return Ok(Proposal::reject(position, log_density, is_divergent(lp)));
            }
            let w = if step + 1 < self.num_leapfrog_steps {
                eps
            } else {
                0.5 * eps
            };
            for (pi, gi) in p.iter_mut().zip(grad.iter()) {
                *pi = (&*pi + gi.affine(w, 0.0)?)?;
            }
        }

        let h0 = -log_density + half_sq_norm(&p0)?;
        let h1 = -lp + half_sq_norm(&p)?;
        let log_ratio = h0 - h1;
        if !h1.is_finite() {
            return Ok(Proposal::reject(position, log_density, true));
        }

        if rng.random::<f32>().ln() < log_ratio {
            Ok(Proposal {
                position: q,
                log_density: lp,
                accepted: true,
                divergent: false,
            })
        } else {
            Ok(Proposal::reject(position, log_density, false))
        }
    }
}

/// Stochastic gradient Langevin dynamics
///
/// z' = z + ε_t / 2 · ∇log p(z) + N(0, ε_t), ε_t = ε · (1 + t)^-0.55
///
/// Every finite proposal is accepted.
#[derive(Debug, Clone)]
pub struct Sgld {
    pub step_size: f64,
}

impl Default for Sgld {
    fn default() -> Self {
        Self { step_size: 0.25 }
    }
}

impl Sgld {
    pub fn new(step_size: f64) -> Self {
        Self { step_size }
    }

    fn step_size_at(&self, t: usize) -> f64 {
        self.step_size * ((1 + t) as f64).powf(-0.55)
    }
}

impl Kernel for Sgld {
    fn name(&self) -> &'static str {
        "Sgld"
    }

    fn step(
        &self,
        target: &mut LogDensity<'_>,
        position: &[Tensor],
        log_density: f32,
        t: usize,
        rng: &mut StdRng,
    ) -> Result<Proposal> {
        let eps = self.step_size_at(t);
        let (_, grad) = target.value_and_grad(position)?;

        let mut q = Vec::with_capacity(position.len());
        for (x, g) in position.iter().zip(grad.iter()) {
            let noise = standard_normal_like(x, rng)?.affine(eps.sqrt(), 0.0)?;
            q.push(((x + g.affine(0.5 * eps, 0.0)?)? + noise)?);
        }

        let lp = target.value(&q)?;
        if !lp.is_finite() {
            return Ok(Proposal::reject(position, log_density, is_divergent(lp)));
        }
        Ok(Proposal {
            position: q,
            log_density: lp,
            accepted: true,
            divergent: false,
        })
    }
}

/// Gaussian random-walk Metropolis
#[derive(Debug, Clone)]
pub struct RandomWalkMetropolis {
    /// standard deviation of the proposal
    pub scale: f64,
}

impl Default for RandomWalkMetropolis {
    fn default() -> Self {
        Self { scale: 0.5 }
    }
}

impl RandomWalkMetropolis {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }
}

impl Kernel for RandomWalkMetropolis {
    fn name(&self) -> &'static str {
        "RandomWalkMetropolis"
    }

    fn step(
        &self,
        target: &mut LogDensity<'_>,
        position: &[Tensor],
        log_density: f32,
        _t: usize,
        rng: &mut StdRng,
    ) -> Result<Proposal> {
        let mut q = Vec::with_capacity(position.len());
        for x in position {
            let noise = standard_normal_like(x, rng)?.affine(self.scale, 0.0)?;
            q.push((x + noise)?);
        }

        let lp = target.value(&q)?;
        if is_divergent(lp) {
            return Ok(Proposal::reject(position, log_density, true));
        }
        if rng.random::<f32>().ln() < lp - log_density {
            Ok(Proposal {
                position: q,
                log_density: lp,
                accepted: true,
                divergent: false,
            })
        } else {
            Ok(Proposal::reject(position, log_density, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_nan_and_positive_infinity_diverge() {
        assert!(is_divergent(f32::NAN));
        assert!(is_divergent(f32::INFINITY));
        assert!(!is_divergent(f32::NEG_INFINITY));
        assert!(!is_divergent(-3.5));
    }

    #[test]
    fn test_sgld_step_size_decays() {
        let sgld = Sgld::new(0.1);
        assert!((sgld.step_size_at(0) - 0.1).abs() < 1e-12);
        assert!(sgld.step_size_at(10) < sgld.step_size_at(9));
        assert!((sgld.step_size_at(99) - 0.1 * 100f64.powf(-0.55)).abs() < 1e-12);
    }
}
