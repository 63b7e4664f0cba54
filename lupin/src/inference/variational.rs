use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, warn};

use super::base::{InferenceBase, Mappings};
use super::objectives::{direct_elbo_loss, elbo_estimate, score_function_loss};
use super::{Diagnostics, Inference};
use crate::distributions::Family;
use crate::error::{Error, Result};
use crate::model::Model;

const NAME: &str = "VariationalInference";

/// Gradient estimator of the ELBO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimator {
    /// reparameterization when every approximation allows it,
    /// otherwise score function
    Auto,
    Reparameterization,
    ScoreFunction,
}

#[derive(Debug, Clone)]
pub struct VariationalConfig {
    /// Number of Monte Carlo samples S per update
    pub num_samples: usize,
    pub learning_rate: f64,
    pub estimator: Estimator,
    pub seed: u64,
}

impl Default for VariationalConfig {
    fn default() -> Self {
        Self {
            num_samples: 10,
            learning_rate: 1e-2,
            estimator: Estimator::Auto,
            seed: 0,
        }
    }
}

impl VariationalConfig {
    pub fn new(num_samples: usize, learning_rate: f64) -> Self {
        Self {
            num_samples,
            learning_rate,
            ..Default::default()
        }
    }
}

/// Variational inference minimizing KL(q ‖ p) by stochastic gradients
/// of the negative ELBO
pub struct VariationalInference {
    base: InferenceBase,
    config: VariationalConfig,
    reparameterized: bool,
    optimizer: Option<AdamW>,
}

impl VariationalInference {
    /// * `model` - shared model
    /// * `mappings` - latents to parametric approximations, observed data,
    ///   scale factors
    /// * `config` - samples, learning rate and estimator
    pub fn new(model: Arc<Model>, mappings: Mappings, config: VariationalConfig) -> Result<Self> {
        if config.num_samples == 0 {
            return Err(Error::InvalidArgument("num_samples must be > 0".into()));
        }
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "learning rate must be > 0, got {}",
                config.learning_rate
            )));
        }

        let base = InferenceBase::new(NAME, model, mappings, config.seed)?;
        base.require_families(NAME, |f| f != Family::Empirical)?;

        let reparameterized = match config.estimator {
            Estimator::Reparameterization => {
                base.require_families(NAME, |f| f.is_reparameterized())?;
                true
            }
            Estimator::ScoreFunction => false,
            Estimator::Auto => {
                let mut all = true;
                for &(_, qz) in base.latents() {
                    let (family, _, _) = base.model().random_params(qz)?;
                    all &= family.is_reparameterized();
                }
                all
            }
        };

        Ok(Self {
            base,
            config,
            reparameterized,
            optimizer: None,
        })
    }

    pub fn is_reparameterized(&self) -> bool {
        self.reparameterized
    }

    /// ELBO estimate from `num_samples` passes, without a parameter step
    pub fn elbo(&mut self, num_samples: usize) -> Result<f32> {
        let (log_p, log_q) = self.sample_terms(num_samples, false)?;
        elbo_estimate(&log_p, &log_q)
    }

    /// Per-sample log joint and log q, each of shape `(S,)`
    fn sample_terms(&mut self, num_samples: usize, detach_samples: bool) -> Result<(Tensor, Tensor)> {
        let mut bindings = self.base.bindings();
        if detach_samples {
            for &(_, qz) in self.base.latents() {
                bindings.detach_sample(qz);
            }
        }

        let mut log_p = Vec::with_capacity(num_samples);
        let mut log_q = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let trace = self.base.pass(&bindings)?;
            log_p.push(self.base.log_joint(&trace)?);
            log_q.push(self.base.log_q(&trace)?);
        }
        Ok((Tensor::stack(&log_p, 0)?, Tensor::stack(&log_q, 0)?))
    }
}

impl Inference for VariationalInference {
    fn base(&self) -> &InferenceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InferenceBase {
        &mut self.base
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.check_uninitialized()?;

        let vars = self.base.trainable_vars()?;
        if vars.is_empty() {
            warn!("{}: no learnable parameters reachable", self.base.label());
        }
        debug!(
            "{}: {} variables, {} estimator",
            self.base.label(),
            vars.len(),
            if self.reparameterized {
                "reparameterization"
            } else {
                "score-function"
            }
        );

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        self.optimizer = Some(AdamW::new(vars, params)?);
        self.base.mark_initialized();
        Ok(())
    }

    fn update(&mut self) -> Result<Diagnostics> {
        self.base.check_initialized()?;

        let detach = !self.reparameterized;
        let (log_p, log_q) = self.sample_terms(self.config.num_samples, detach)?;
        let elbo = elbo_estimate(&log_p, &log_q)?;

        let t = self.base.advance();
        let diag = Diagnostics::new(t, -elbo);
        if diag.divergent {
            warn!("{}: non-finite ELBO at iteration {}", self.base.label(), t);
            return Ok(diag);
        }

        let loss = if self.reparameterized {
            direct_elbo_loss(&log_p, &log_q)?
        } else {
            score_function_loss(&log_p, &log_q)?
        };

        let Some(optimizer) = self.optimizer.as_mut() else {
            return Err(Error::NotInitialized {
                inference: self.base.label().to_string(),
            });
        };
        optimizer.backward_step(&loss)?;
        Ok(diag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::RunConfig;
    use candle_core::{DType, Device};

    #[test]
    fn test_estimator_selection() -> Result<()> {
        let dev = Device::Cpu;
        let mut model = Model::new(dev.clone(), 0);
        let one = model.scalar(1.0)?;
        let p = model.beta(one, one).name("p").build()?;
        let _x = model.bernoulli(p.value()).sample_shape(&[5]).name("x").build()?;
        let ln_a = model.param("ln_a", Tensor::zeros((), DType::F32, &dev)?)?;
        let a = model.exp(ln_a)?;
        let qp = model.beta(a, a).name("qp").build()?;
        let model = Arc::new(model);

        let vi = VariationalInference::new(
            model.clone(),
            Mappings::new().latent(p, qp),
            VariationalConfig::default(),
        )?;
        assert!(!vi.is_reparameterized());

        let forced = VariationalInference::new(
            model,
            Mappings::new().latent(p, qp),
            VariationalConfig {
                estimator: Estimator::Reparameterization,
                ..Default::default()
            },
        );
        assert!(matches!(forced, Err(Error::UnsupportedFamily { .. })));
        Ok(())
    }

    #[test]
    fn test_normal_mean_reparameterized() -> Result<()> {
        // z ~ N(0, 1), x_i ~ N(z, 1), posterior mean Σx / (n + 1)
        let dev = Device::Cpu;
        let mut model = Model::new(dev.clone(), 0);
        let zero = model.scalar(0.0)?;
        let one = model.scalar(1.0)?;
        let z = model.normal(zero, one).name("z").build()?;
        let x = model.normal(z.value(), one).sample_shape(&[4]).name("x").build()?;
        let loc = model.param("loc", Tensor::zeros((), DType::F32, &dev)?)?;
        let ln_sd = model.param("ln_sd", Tensor::zeros((), DType::F32, &dev)?)?;
        let sd = model.exp(ln_sd)?;
        let qz = model.normal(loc, sd).name("qz").build()?;
        let model = Arc::new(model);

        let x_data = Tensor::new(&[2f32, 3., 2.5, 2.5], &dev)?;
        let mut vi = VariationalInference::new(
            model.clone(),
            Mappings::new().latent(z, qz).data(x, x_data),
            VariationalConfig::new(5, 0.02),
        )?;
        assert!(vi.is_reparameterized());
        vi.run(&RunConfig::new(2000))?;

        let m = model.param_var(loc)?.as_tensor().to_scalar::<f32>()?;
        assert!((m - 2.0).abs() < 0.2, "posterior mean {}", m);
        Ok(())
    }
}
