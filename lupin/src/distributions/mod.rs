//! Distribution families.
//!
//! Every family implements the same small capability set: draw samples,
//! evaluate per-element log densities, and report parameter shapes.
//! Model nodes store a [`Family`] tag and parameter node ids; a concrete
//! distribution is instantiated from the parameter values of each
//! evaluation pass.
//!
//! Reparameterized families (Normal, PointMass) keep gradients flowing
//! from samples back to parameters. The others draw on the host with
//! `rand_distr` and return detached samples, so gradient estimators must
//! fall back to the score function for them.

mod bernoulli;
mod beta;
mod categorical;
mod dirichlet;
mod empirical;
mod gamma;
mod normal;
mod point_mass;
mod poisson;
pub mod special;

pub use bernoulli::Bernoulli;
pub use beta::Beta;
pub use categorical::Categorical;
pub use dirichlet::Dirichlet;
pub use empirical::Empirical;
pub use gamma::Gamma;
pub use normal::Normal;
pub use point_mass::PointMass;
pub use poisson::Poisson;

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;

/// Probabilities are kept away from {0, 1} before taking logs
pub(crate) const PROB_EPS: f64 = 1e-6;

/// Floor of positive supports before taking logs
pub(crate) const POSITIVE_FLOOR: f64 = 1e-30;

/// Tolerance on Σ x = 1 for points of the simplex
pub(crate) const SIMPLEX_TOL: f64 = 1e-4;

pub trait Distribution {
    /// Draw a sample of shape `sample_shape ++ batch_shape ++ event_shape`
    ///
    /// # Arguments
    /// * `sample_shape` - leading i.i.d. dimensions
    /// * `rng` - random number generator for host-side draws
    fn sample(&self, sample_shape: &[usize], rng: &mut StdRng) -> Result<Tensor>;

    /// Log density of `x`, one value per batch element (event dimensions
    /// are reduced)
    fn log_prob(&self, x: &Tensor) -> Result<Tensor>;

    /// Broadcast shape of the parameters without event dimensions
    fn batch_shape(&self) -> Vec<usize>;

    /// Shape of a single event, empty for scalar families
    fn event_shape(&self) -> Vec<usize> {
        vec![]
    }

    /// Shapes of the parameter tensors in declaration order
    fn param_shapes(&self) -> Vec<Vec<usize>>;

    /// Whether samples carry gradients back to the parameters
    fn is_reparameterized(&self) -> bool;

    fn mean(&self) -> Result<Tensor>;
}

/// Tag of a distribution family stored on model nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Normal,
    Bernoulli,
    Beta,
    Gamma,
    Poisson,
    Categorical,
    Dirichlet,
    PointMass,
    Empirical,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Normal => "Normal",
            Family::Bernoulli => "Bernoulli",
            Family::Beta => "Beta",
            Family::Gamma => "Gamma",
            Family::Poisson => "Poisson",
            Family::Categorical => "Categorical",
            Family::Dirichlet => "Dirichlet",
            Family::PointMass => "PointMass",
            Family::Empirical => "Empirical",
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Family::Normal | Family::Beta | Family::Gamma => 2,
            _ => 1,
        }
    }

    /// Continuous support, i.e. usable by gradient-based samplers
    pub fn is_continuous(&self) -> bool {
        !matches!(
            self,
            Family::Bernoulli | Family::Poisson | Family::Categorical
        )
    }

    /// Samples carry gradients back to the parameters
    pub fn is_reparameterized(&self) -> bool {
        matches!(self, Family::Normal | Family::PointMass)
    }

    /// Build a concrete distribution from evaluated parameter values
    pub fn instantiate(&self, params: &[Tensor]) -> Result<Box<dyn Distribution>> {
        if params.len() != self.num_params() {
            return Err(Error::InvalidArgument(format!(
                "{} takes {} parameter(s), got {}",
                self.name(),
                self.num_params(),
                params.len()
            )));
        }
        let p = |i: usize| params[i].clone();
        Ok(match self {
            Family::Normal => Box::new(Normal::new(p(0), p(1))?),
            Family::Bernoulli => Box::new(Bernoulli::new(p(0))?),
            Family::Beta => Box::new(Beta::new(p(0), p(1))?),
            Family::Gamma => Box::new(Gamma::new(p(0), p(1))?),
            Family::Poisson => Box::new(Poisson::new(p(0))),
            Family::Categorical => Box::new(Categorical::new(p(0))?),
            Family::Dirichlet => Box::new(Dirichlet::new(p(0))?),
            Family::PointMass => Box::new(PointMass::new(p(0))),
            Family::Empirical => Box::new(Empirical::new(p(0))?),
        })
    }
}

/// Broadcast two shapes right-aligned, numpy style
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let l = if i < rank - lhs.len() { 1 } else { lhs[i + lhs.len() - rank] };
        let r = if i < rank - rhs.len() { 1 } else { rhs[i + rhs.len() - rank] };
        out[i] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "cannot broadcast {:?} with {:?}",
                    lhs, rhs
                )))
            }
        };
    }
    Ok(out)
}

pub(crate) fn full_shape(sample_shape: &[usize], batch_shape: &[usize]) -> Vec<usize> {
    sample_shape.iter().chain(batch_shape.iter()).copied().collect()
}

/// Parameter values broadcast to `shape`, realized on the host
pub(crate) fn host_values(t: &Tensor, shape: &[usize]) -> Result<Vec<f32>> {
    Ok(t.detach()
        .to_dtype(DType::F32)?
        .broadcast_as(shape.to_vec())?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<f32>()?)
}

pub(crate) fn from_host(data: Vec<f32>, shape: &[usize], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_vec(data, shape.to_vec(), device)?)
}

/// `log_p` where `mask` is set, -∞ elsewhere
///
/// * `log_p` - log densities computed on clamped, in-support inputs
/// * `mask` - u8 support indicator broadcasting to `log_p`
pub(crate) fn restrict_support(log_p: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let neg_inf =
        Tensor::full(f32::NEG_INFINITY, log_p.dims(), log_p.device())?.to_dtype(log_p.dtype())?;
    let mask = mask.broadcast_as(log_p.dims())?.contiguous()?;
    Ok(mask.where_cond(log_p, &neg_inf)?)
}

pub(crate) fn rand_err<E: std::fmt::Display>(family: &str) -> impl Fn(E) -> Error + '_ {
    move |e| Error::InvalidArgument(format!("{} parameters: {}", family, e))
}
