use std::sync::Arc;

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::warn;

use super::base::{InferenceBase, Mappings};
use super::{Diagnostics, Inference};
use crate::distributions::Family;
use crate::error::{Error, Result};
use crate::model::Model;

const NAME: &str = "MapInference";

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            seed: 0,
        }
    }
}

impl MapConfig {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            ..Default::default()
        }
    }
}

/// Maximum a posteriori estimation: every latent is approximated by a
/// `PointMass` whose learnable location ascends the scaled log joint
pub struct MapInference {
    base: InferenceBase,
    config: MapConfig,
    optimizer: Option<AdamW>,
}

impl MapInference {
    pub fn new(model: Arc<Model>, mappings: Mappings, config: MapConfig) -> Result<Self> {
        if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "learning rate must be > 0, got {}",
                config.learning_rate
            )));
        }
        let base = InferenceBase::new(NAME, model, mappings, config.seed)?;
        base.require_families(NAME, |f| f == Family::PointMass)?;
        Ok(Self {
            base,
            config,
            optimizer: None,
        })
    }
}

impl Inference for MapInference {
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

        let bindings = self.base.bindings();
        let trace = self.base.pass(&bindings)?;
        let log_joint = self.base.log_joint(&trace)?;
        let value = log_joint.to_scalar::<f32>()?;

        let t = self.base.advance();
        let diag = Diagnostics::new(t, -value);
        if diag.divergent {
            warn!("{}: non-finite log joint at iteration {}", self.base.label(), t);
            return Ok(diag);
        }

        let Some(optimizer) = self.optimizer.as_mut() else {
            return Err(Error::NotInitialized {
                inference: self.base.label().to_string(),
            });
        };
        optimizer.backward_step(&log_joint.neg()?)?;
        Ok(diag)
    }
}
