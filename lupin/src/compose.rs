//! Interleaving several inference instances over one model.
//!
//! Variational EM, for instance, alternates a variational E-step over
//! local latents with a MAP M-step over global parameters. Each stage
//! observes the other's approximation through a cross-referenced data
//! mapping, and the driver calls the stages' `update()` in insertion
//! order:
//!
//! ```ignore
//! let mut comp = Composition::new()
//!     .stage("e-step", &mut e_step)
//!     .stage("m-step", &mut m_step);
//! comp.initialize_all()?;
//! let report = comp.run(100)?;
//! ```

use log::info;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::inference::{Diagnostics, Inference};

/// Stage update reported to [`Composition::run_with`] callbacks
pub struct StageEvent<'e> {
    pub outer: usize,
    pub stage: &'e str,
    pub diagnostics: &'e Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTrace {
    pub name: String,
    pub losses: Vec<f32>,
    pub num_divergent: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionReport {
    pub outer_iterations: usize,
    pub stages: Vec<StageTrace>,
}

#[derive(Default)]
pub struct Composition<'a> {
    stages: Vec<(String, &'a mut dyn Inference)>,
}

impl<'a> Composition<'a> {
    pub fn new() -> Self {
        Self { stages: vec![] }
    }

    /// Append a stage; stages update in insertion order
    pub fn stage(mut self, name: &str, inference: &'a mut dyn Inference) -> Self {
        self.stages.push((name.to_string(), inference));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Initialize every stage that is not initialized yet
    pub fn initialize_all(&mut self) -> Result<()> {
        for (_, inference) in self.stages.iter_mut() {
            if !inference.is_initialized() {
                inference.initialize()?;
            }
        }
        Ok(())
    }

    /// Run `outer_iterations` rounds of one update per stage
    pub fn run(&mut self, outer_iterations: usize) -> Result<CompositionReport> {
        self.run_with(outer_iterations, |_| Ok(()))
    }

    /// Like [`Composition::run`], calling `callback` after every stage
    /// update, e.g. to feed the next minibatch
    pub fn run_with<F>(&mut self, outer_iterations: usize, mut callback: F) -> Result<CompositionReport>
    where
        F: FnMut(StageEvent<'_>) -> Result<()>,
    {
        if self.stages.is_empty() {
            return Err(Error::EmptyComposition);
        }
        for (name, inference) in self.stages.iter() {
            if !inference.is_initialized() {
                return Err(Error::NotInitialized {
                    inference: name.clone(),
                });
            }
        }

        let mut traces: Vec<StageTrace> = self
            .stages
            .iter()
            .map(|(name, _)| StageTrace {
                name: name.clone(),
                losses: Vec::with_capacity(outer_iterations),
                num_divergent: 0,
            })
            .collect();

        for outer in 0..outer_iterations {
            for ((name, inference), trace) in self.stages.iter_mut().zip(traces.iter_mut()) {
                let diag = inference.update()?;
                trace.losses.push(diag.loss);
                if diag.divergent {
                    trace.num_divergent += 1;
                }
                callback(StageEvent {
                    outer,
                    stage: name,
                    diagnostics: &diag,
                })?;
            }
        }

        for trace in traces.iter() {
            info!(
                "[{}] {} updates, {} divergent, final loss {:?}",
                trace.name,
                trace.losses.len(),
                trace.num_divergent,
                trace.losses.last()
            );
        }

        Ok(CompositionReport {
            outer_iterations,
            stages: traces,
        })
    }
}
