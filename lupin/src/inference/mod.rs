//! Inference algorithms sharing one lifecycle.
//!
//! An instance is constructed from a shared [`Model`](crate::model::Model)
//! and its [`Mappings`] (all validation happens here), allocates its state
//! in [`Inference::initialize`] and then advances by one step per
//! [`Inference::update`]. Several instances over the same model can be
//! interleaved by the [`Composition`](crate::compose::Composition) driver.
//!
//! # Example
//!
//! ```ignore
//! let mut vi = VariationalInference::new(
//!     model.clone(),
//!     Mappings::new().latent(p, qp).data(x, x_data),
//!     VariationalConfig::default(),
//! )?;
//! let report = vi.run(&RunConfig::new(1000))?;
//! ```

mod base;
mod gan;
mod kernels;
mod map;
mod monte_carlo;
pub mod objectives;
mod variational;

pub use base::{InferenceBase, Mappings, Observed};
pub use gan::{GanConfig, GanInference, GanObjective};
pub use kernels::{Hmc, Kernel, Proposal, RandomWalkMetropolis, Sgld};
pub use map::{MapConfig, MapInference};
pub use monte_carlo::{MonteCarlo, MonteCarloConfig};
pub use variational::{Estimator, VariationalConfig, VariationalInference};

use candle_core::{Tensor, Var};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::model::Value;

/// Outcome of one `update()`
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// index of the update, starting at 0
    pub iteration: usize,
    /// negative objective for optimizers, negative log joint of the
    /// current state for samplers
    pub loss: f32,
    /// Monte Carlo acceptance rate so far
    pub accept_rate: Option<f32>,
    /// discriminator loss of adversarial training
    pub disc_loss: Option<f32>,
    /// the step was rejected or skipped for numerical reasons
    pub divergent: bool,
}

impl Diagnostics {
    pub(crate) fn new(iteration: usize, loss: f32) -> Self {
        Self {
            iteration,
            loss,
            accept_rate: None,
            disc_loss: None,
            divergent: !loss.is_finite(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub num_iterations: usize,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_iterations: 1000,
            show_progress: false,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn new(num_iterations: usize) -> Self {
        Self {
            num_iterations,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Completed,
    /// every iteration was rejected as divergent
    AllDiverged,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub losses: Vec<f32>,
    pub num_divergent: usize,
    pub accept_rate: Option<f32>,
    pub status: RunStatus,
}

pub trait Inference {
    fn base(&self) -> &InferenceBase;

    fn base_mut(&mut self) -> &mut InferenceBase;

    /// Allocate optimizer, buffer or discriminator state. Fails with
    /// `AlreadyInitialized` when called twice.
    fn initialize(&mut self) -> Result<()>;

    /// One iteration of the algorithm. Fails with `NotInitialized`
    /// before `initialize()`.
    fn update(&mut self) -> Result<Diagnostics>;

    fn name(&self) -> &str {
        self.base().label()
    }

    fn is_initialized(&self) -> bool {
        self.base().is_initialized()
    }

    /// Number of updates made so far
    fn iteration(&self) -> usize {
        self.base().iteration()
    }

    /// Supply a placeholder value for subsequent updates
    fn feed(&mut self, placeholder: Value, value: Tensor) -> Result<()> {
        self.base_mut().feed(placeholder, value)
    }

    /// Variables this instance updates
    fn trainable_vars(&self) -> Result<Vec<Var>> {
        self.base().trainable_vars()
    }

    /// Initialize when needed, then run `num_iterations` updates
    fn run(&mut self, config: &RunConfig) -> Result<RunReport> {
        if !self.is_initialized() {
            self.initialize()?;
        }

        let pb = ProgressBar::new(config.num_iterations as u64);
        if !config.show_progress || config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut losses = Vec::with_capacity(config.num_iterations);
        let mut num_divergent = 0;
        let mut accept_rate = None;

        for _ in 0..config.num_iterations {
            let diag = self.update()?;
            if diag.divergent {
                num_divergent += 1;
            }
            if diag.accept_rate.is_some() {
                accept_rate = diag.accept_rate;
            }
            losses.push(diag.loss);
            pb.inc(1);
            if config.verbose {
                info!("[{}][{}] loss: {}", self.name(), diag.iteration + 1, diag.loss);
            }
        }
        pb.finish_and_clear();

        let status = if config.num_iterations > 0 && num_divergent == config.num_iterations {
            RunStatus::AllDiverged
        } else {
            RunStatus::Completed
        };

        Ok(RunReport {
            name: self.name().to_string(),
            losses,
            num_divergent,
            accept_rate,
            status,
        })
    }
}
