use std::collections::HashSet;
use std::sync::Arc;

use candle_core::{Tensor, TensorId, Var};
use candle_nn::{AdamW, Module, Optimizer, ParamsAdamW, VarMap};
use log::{debug, warn};

use super::base::{DataSource, InferenceBase, Mappings, Observed};
use super::objectives::bce_with_logits;
use super::{Diagnostics, Inference};
use crate::error::{Error, Result};
use crate::model::{Model, NodeId, Value};

const NAME: &str = "GanInference";

/// Adversarial objective
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GanObjective {
    /// non-saturating binary cross entropy on discriminator logits
    Standard,
    /// critic scores with weights clipped to `[-clip, clip]`
    Wasserstein { clip: f64 },
}

#[derive(Debug, Clone)]
pub struct GanConfig {
    pub learning_rate: f64,
    pub disc_learning_rate: f64,
    /// discriminator steps per generator step
    pub disc_steps: usize,
    pub objective: GanObjective,
    pub seed: u64,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            disc_learning_rate: 1e-3,
            disc_steps: 1,
            objective: GanObjective::Standard,
            seed: 0,
        }
    }
}

impl GanConfig {
    pub fn new(learning_rate: f64, disc_learning_rate: f64) -> Self {
        Self {
            learning_rate,
            disc_learning_rate,
            ..Default::default()
        }
    }
}

/// Generative adversarial training of an implicit model.
///
/// The generated values (any nodes of the model, typically the output
/// of a generator network applied to noise) are matched against real
/// data by a discriminator. Each update makes `disc_steps`
/// discriminator steps on detached fakes, then one generator step.
pub struct GanInference {
    base: InferenceBase,
    config: GanConfig,
    data: Vec<(NodeId, DataSource)>,
    discriminator: Box<dyn Module>,
    disc_vars: Vec<Var>,
    gen_vars: Vec<Var>,
    gen_optimizer: Option<AdamW>,
    disc_optimizer: Option<AdamW>,
}

impl GanInference {
    /// * `model` - shared model containing the generator
    /// * `data` - generated value → real data (tensor or fed placeholder)
    /// * `discriminator` - network scoring one batch of samples
    /// * `disc_varmap` - variables of `discriminator`
    /// * `config` - learning rates and objective
    pub fn new<D>(
        model: Arc<Model>,
        data: Vec<(Value, Observed)>,
        discriminator: D,
        disc_varmap: &VarMap,
        config: GanConfig,
    ) -> Result<Self>
    where
        D: Module + 'static,
    {
        if data.is_empty() {
            return Err(Error::InvalidArgument(
                "adversarial training needs at least one data pair".into(),
            ));
        }
        if config.disc_steps == 0 {
            return Err(Error::InvalidArgument("disc_steps must be > 0".into()));
        }
        if let GanObjective::Wasserstein { clip } = config.objective {
            if !clip.is_finite() || clip <= 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "weight clip must be > 0, got {}",
                    clip
                )));
            }
        }

        let base = InferenceBase::new(NAME, model.clone(), Mappings::new(), config.seed)?;

        let mut resolved = vec![];
        let mut keys = HashSet::new();
        for (generated, observed) in data.into_iter() {
            let id = model.check_value(generated)?;
            if !keys.insert(id) {
                return Err(Error::InvalidArgument(format!(
                    "`{}` is matched more than once",
                    model.name_of(id)
                )));
            }
            resolved.push((id, DataSource::resolve(&model, id, observed)?));
        }

        let roots: Vec<NodeId> = resolved.iter().map(|(id, _)| *id).collect();
        let gen_vars = model.collect_vars(&roots, &HashSet::new(), &Default::default());
        let disc_vars = disc_varmap.all_vars();

        let disc_ids: HashSet<TensorId> = disc_vars.iter().map(|v| v.id()).collect();
        if gen_vars.iter().any(|v| disc_ids.contains(&v.id())) {
            return Err(Error::InvalidArgument(
                "generator and discriminator share variables".into(),
            ));
        }

        Ok(Self {
            base,
            config,
            data: resolved,
            discriminator: Box::new(discriminator),
            disc_vars,
            gen_vars,
            gen_optimizer: None,
            disc_optimizer: None,
        })
    }

    pub fn discriminator_vars(&self) -> &[Var] {
        &self.disc_vars
    }

    /// Real and generated batches of one pass, in data order
    fn draw(&mut self) -> Result<(Vec<Tensor>, Vec<Tensor>)> {
        let bindings = self.base.data_bindings();
        let mut targets = vec![];
        for (id, source) in self.data.iter() {
            targets.push(*id);
            if let DataSource::Node(real) = source {
                targets.push(*real);
            }
        }
        let trace = self.base.evaluate(&targets, &bindings)?;

        let mut real = vec![];
        let mut fake = vec![];
        for (id, source) in self.data.iter() {
            let missing = || Error::InvalidArgument(format!("node #{} not evaluated", id.index()));
            fake.push(trace.get(*id).cloned().ok_or_else(missing)?);
            real.push(match source {
                DataSource::Tensor(t) => t.clone(),
                DataSource::Node(n) => trace.get(*n).ok_or_else(missing)?.detach(),
            });
        }
        Ok((real, fake))
    }

    fn discriminator_loss(&self, real: &[Tensor], fake: &[Tensor]) -> Result<Tensor> {
        let mut total = Tensor::zeros((), self.base.model().dtype(), self.base.model().device())?;
        for (r, f) in real.iter().zip(fake.iter()) {
            let d_real = self.discriminator.forward(r)?;
            let d_fake = self.discriminator.forward(&f.detach())?;
            let loss = match self.config.objective {
                GanObjective::Standard => {
                    (bce_with_logits(&d_real, 1.0)? + bce_with_logits(&d_fake, 0.0)?)?
                }
                GanObjective::Wasserstein { .. } => (d_fake.mean_all()? - d_real.mean_all()?)?,
            };
            total = (total + loss)?;
        }
        Ok(total)
    }

    fn generator_loss(&self, fake: &[Tensor]) -> Result<Tensor> {
        let mut total = Tensor::zeros((), self.base.model().dtype(), self.base.model().device())?;
        for f in fake.iter() {
            let d_fake = self.discriminator.forward(f)?;
            let loss = match self.config.objective {
                GanObjective::Standard => bce_with_logits(&d_fake, 1.0)?,
                GanObjective::Wasserstein { .. } => d_fake.mean_all()?.neg()?,
            };
            total = (total + loss)?;
        }
        Ok(total)
    }

    fn clip_discriminator(&self) -> Result<()> {
        if let GanObjective::Wasserstein { clip } = self.config.objective {
            for var in self.disc_vars.iter() {
                var.set(&var.as_tensor().clamp(-clip, clip)?)?;
            }
        }
        Ok(())
    }
}

impl Inference for GanInference {
    fn base(&self) -> &InferenceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InferenceBase {
        &mut self.base
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.check_uninitialized()?;
        if self.gen_vars.is_empty() {
            warn!("{}: generated values depend on no learnable parameters", NAME);
        }
        debug!(
            "{}: {} generator variables, {} discriminator variables",
            NAME,
            self.gen_vars.len(),
            self.disc_vars.len()
        );

        let gen = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let disc = ParamsAdamW {
            lr: self.config.disc_learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        self.gen_optimizer = Some(AdamW::new(self.gen_vars.clone(), gen)?);
        self.disc_optimizer = Some(AdamW::new(self.disc_vars.clone(), disc)?);
        self.base.mark_initialized();
        Ok(())
    }

    fn update(&mut self) -> Result<Diagnostics> {
        self.base.check_initialized()?;
        let not_initialized = || Error::NotInitialized {
            inference: NAME.to_string(),
        };

        let mut disc_loss = f32::NAN;
        for _ in 0..self.config.disc_steps {
            let (real, fake) = self.draw()?;
            let loss = self.discriminator_loss(&real, &fake)?;
            disc_loss = loss.to_scalar::<f32>()?;
            if !disc_loss.is_finite() {
                break;
            }
            self.disc_optimizer
                .as_mut()
                .ok_or_else(not_initialized)?
                .backward_step(&loss)?;
            self.clip_discriminator()?;
        }

        let (_, fake) = self.draw()?;
        let loss = self.generator_loss(&fake)?;
        let gen_loss = loss.to_scalar::<f32>()?;

        let t = self.base.advance();
        let mut diag = Diagnostics::new(t, gen_loss);
        diag.disc_loss = Some(disc_loss);
        diag.divergent |= !disc_loss.is_finite();
        if diag.divergent {
            warn!("{}: non-finite loss at iteration {}", NAME, t);
            return Ok(diag);
        }

        self.gen_optimizer
            .as_mut()
            .ok_or_else(not_initialized)?
            .backward_step(&loss)?;
        Ok(diag)
    }

    /// Generator variables only; the discriminator's are listed by
    /// [`GanInference::discriminator_vars`]
    fn trainable_vars(&self) -> Result<Vec<Var>> {
        Ok(self.gen_vars.clone())
    }
}
