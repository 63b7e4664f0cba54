use std::sync::Arc;

use candle_core::{Tensor, Var};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::base::{InferenceBase, Mappings};
use super::kernels::{Kernel, LogDensity};
use super::{Diagnostics, Inference};
use crate::distributions::Family;
use crate::error::{Error, Result};
use crate::model::Model;

#[derive(Debug, Clone, Default)]
pub struct MonteCarloConfig {
    pub seed: u64,
}

impl MonteCarloConfig {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

/// Markov chain Monte Carlo over the mapped latents.
///
/// Each latent is approximated by an `Empirical` whose buffer is a
/// learnable parameter of shape `(T, ...)`. The chain starts at row 0 of
/// every buffer; the state after update `t` is written to row `t mod T`,
/// so after `T + k` updates the buffers hold the most recent `T` states.
pub struct MonteCarlo<K: Kernel> {
    base: InferenceBase,
    kernel: K,
    rng: StdRng,
    buffers: Vec<Var>,
    capacity: usize,
    position: Vec<Tensor>,
    log_density: f32,
    num_accepted: usize,
    num_stored: usize,
}

impl<K: Kernel> MonteCarlo<K> {
    /// * `model` - shared model
    /// * `mappings` - continuous latents to `Empirical` approximations
    /// * `kernel` - transition kernel
    /// * `config` - seed of proposals and passes
    pub fn new(model: Arc<Model>, mappings: Mappings, kernel: K, config: MonteCarloConfig) -> Result<Self> {
        let name = kernel.name();
        let base = InferenceBase::new(name, model, mappings, config.seed)?;
        base.require_families(name, |f| f == Family::Empirical)?;

        let model = base.model().clone();
        let mut buffers = vec![];
        let mut capacity = None;

        for &(z, qz) in base.latents() {
            let (family, _, _) = model.random_params(z)?;
            if !family.is_continuous() {
                return Err(Error::UnsupportedFamily {
                    algorithm: name,
                    variable: model.name_of(z),
                    family: family.name(),
                });
            }

            let (_, params, _) = model.random_params(qz)?;
            let var = model.param_var_at(params[0]).map_err(|_| {
                Error::InvalidArgument(format!(
                    "buffer of `{}` must be a learnable parameter",
                    model.name_of(qz)
                ))
            })?;
            let rows = var.dim(0)?;
            match capacity {
                None => capacity = Some(rows),
                Some(t) if t != rows => {
                    return Err(Error::InvalidArgument(format!(
                        "sample buffers disagree on length: {} vs {} (`{}`)",
                        t,
                        rows,
                        model.name_of(qz)
                    )))
                }
                _ => {}
            }
            buffers.push(var);
        }

        Ok(Self {
            base,
            kernel,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
            buffers,
            capacity: capacity.unwrap_or(0),
            position: vec![],
            log_density: f32::NEG_INFINITY,
            num_accepted: 0,
            num_stored: 0,
        })
    }

    /// Number of rows T of every buffer
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows holding states of this chain, at most T
    pub fn num_stored(&self) -> usize {
        self.num_stored
    }

    /// Buffer row receiving the state of update `t`
    pub fn slot_of(&self, t: usize) -> usize {
        if self.capacity == 0 {
            0
        } else {
            t % self.capacity
        }
    }

    pub fn acceptance_rate(&self) -> f32 {
        match self.base.iteration() {
            0 => 0.0,
            n => self.num_accepted as f32 / n as f32,
        }
    }

    /// Current state, one tensor per latent
    pub fn position(&self) -> &[Tensor] {
        &self.position
    }

    /// Stored states of the `i`-th latent, `(num_stored, ...)`
    pub fn samples(&self, i: usize) -> Result<Tensor> {
        let var = self
            .buffers
            .get(i)
            .ok_or_else(|| Error::InvalidArgument(format!("no latent #{}", i)))?;
        Ok(var.as_tensor().narrow(0, 0, self.num_stored)?.detach())
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    fn write_slot(&self, slot: usize) -> Result<()> {
        for (var, x) in self.buffers.iter().zip(self.position.iter()) {
            // owned copy: `slice_set` refuses a source sharing the buffer's storage
            let row = x.detach().copy()?.unsqueeze(0)?;
            var.as_tensor().slice_set(&row, 0, slot)?;
        }
        Ok(())
    }
}

impl<K: Kernel> Inference for MonteCarlo<K> {
    fn base(&self) -> &InferenceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InferenceBase {
        &mut self.base
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.check_uninitialized()?;

        let mut position = Vec::with_capacity(self.buffers.len());
        for var in self.buffers.iter() {
            position.push(var.as_tensor().get(0)?.detach().copy()?);
        }
        let log_density = LogDensity::new(&mut self.base).value(&position)?;
        if !log_density.is_finite() {
            warn!(
                "{}: log density at the initial state is {}",
                self.base.label(),
                log_density
            );
        }
        debug!(
            "{}: {} latents, buffer length {}",
            self.base.label(),
            self.buffers.len(),
            self.capacity
        );

        self.position = position;
        self.log_density = log_density;
        self.base.mark_initialized();
        Ok(())
    }

    fn update(&mut self) -> Result<Diagnostics> {
        self.base.check_initialized()?;

        let t = self.base.iteration();
        let proposal = {
            let mut target = LogDensity::new(&mut self.base);
            self.kernel.step(
                &mut target,
                &self.position,
                self.log_density,
                t,
                &mut self.rng,
            )?
        };

        if proposal.accepted {
            self.position = proposal.position;
            self.log_density = proposal.log_density;
            self.num_accepted += 1;
        }
        if proposal.divergent {
            debug!("{}: divergent proposal at iteration {}", self.base.label(), t);
        }

        self.write_slot(self.slot_of(t))?;
        self.num_stored = (self.num_stored + 1).min(self.capacity);
        self.base.advance();

        Ok(Diagnostics {
            iteration: t,
            loss: -self.log_density,
            accept_rate: Some(self.acceptance_rate()),
            disc_loss: None,
            divergent: proposal.divergent,
        })
    }
}
