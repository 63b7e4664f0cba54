use std::collections::{HashMap, HashSet};

use candle_core::Tensor;
use rand::rngs::StdRng;

use super::graph::{Model, NodeId, Op, RandomVariable, Value};
use crate::distributions::Distribution;
use crate::error::{Error, Result};

/// How a node's value is supplied in an evaluation pass
#[derive(Clone, Debug)]
pub enum Binding {
    /// literal value (observed data, fed placeholder, sampler state)
    Tensor(Tensor),
    /// value of another node in the same pass (latent → approximation,
    /// observed → another inference's approximation)
    Alias { node: NodeId, detach: bool },
}

/// Substitutions applied during one evaluation pass
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    map: HashMap<NodeId, Binding>,
    /// random nodes whose fresh samples are cut from the autodiff graph
    detached: HashSet<NodeId>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_tensor(&mut self, node: NodeId, value: Tensor) {
        self.map.insert(node, Binding::Tensor(value));
    }

    pub fn bind_alias(&mut self, node: NodeId, target: NodeId, detach: bool) {
        self.map.insert(
            node,
            Binding::Alias {
                node: target,
                detach,
            },
        );
    }

    /// Cut gradients flowing through the sample of random node `node`,
    /// as score-function estimators require
    pub fn detach_sample(&mut self, node: NodeId) {
        self.detached.insert(node);
    }

    pub fn get(&self, node: NodeId) -> Option<&Binding> {
        self.map.get(&node)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Node values of one evaluation pass. Each node is evaluated at most
/// once, so a random variable's sample is consistent within the pass.
pub struct Trace {
    values: Vec<Option<Tensor>>,
}

impl Trace {
    pub fn get(&self, node: NodeId) -> Option<&Tensor> {
        self.values.get(node.0).and_then(|v| v.as_ref())
    }

    pub fn value(&self, v: Value) -> Result<&Tensor> {
        self.get(v.node)
            .ok_or_else(|| Error::InvalidArgument(format!("node #{} not evaluated", v.node.0)))
    }
}

impl Model {
    /// Evaluate `targets` (and everything they depend on) under
    /// `bindings`. Unbound random nodes are sampled from their
    /// distribution given the pass's parameter values.
    pub fn evaluate(
        &self,
        targets: &[NodeId],
        bindings: &Bindings,
        rng: &mut StdRng,
    ) -> Result<Trace> {
        let mut trace = Trace {
            values: vec![None; self.nodes.len()],
        };
        let mut visiting = vec![false; self.nodes.len()];
        for &t in targets {
            self.eval_node(t, bindings, rng, &mut trace, &mut visiting)?;
        }
        Ok(trace)
    }

    fn eval_node(
        &self,
        id: NodeId,
        bindings: &Bindings,
        rng: &mut StdRng,
        trace: &mut Trace,
        visiting: &mut [bool],
    ) -> Result<Tensor> {
        if let Some(v) = trace.get(id) {
            return Ok(v.clone());
        }
        let node = self.node(id)?;
        if visiting[id.0] {
            return Err(Error::Cycle(node.name.clone()));
        }
        visiting[id.0] = true;

        let value = match bindings.get(id) {
            Some(Binding::Tensor(t)) => t.clone(),
            Some(Binding::Alias { node: target, detach }) => {
                let v = self.eval_node(*target, bindings, rng, trace, visiting)?;
                if *detach {
                    v.detach()
                } else {
                    v
                }
            }
            None => match &node.op {
                Op::Constant(t) => t.clone(),
                Op::Param(var) => var.as_tensor().clone(),
                Op::Placeholder => return Err(Error::UnfedPlaceholder(node.name.clone())),
                Op::Random {
                    family,
                    params,
                    sample_shape,
                } => {
                    let values = params
                        .iter()
                        .map(|&p| self.eval_node(p, bindings, rng, trace, visiting))
                        .collect::<Result<Vec<_>>>()?;
                    let x = family.instantiate(&values)?.sample(sample_shape, rng)?;
                    if bindings.detached.contains(&id) {
                        x.detach()
                    } else {
                        x
                    }
                }
                Op::Unary(op, x) => {
                    let x = self.eval_node(*x, bindings, rng, trace, visiting)?;
                    op.apply(&x)?
                }
                Op::Binary(op, a, b) => {
                    let a = self.eval_node(*a, bindings, rng, trace, visiting)?;
                    let b = self.eval_node(*b, bindings, rng, trace, visiting)?;
                    op.apply(&a, &b)?
                }
                Op::Layer { input, layer, .. } => {
                    let x = self.eval_node(*input, bindings, rng, trace, visiting)?;
                    layer.forward(&x)?
                }
            },
        };

        visiting[id.0] = false;
        trace.values[id.0] = Some(value.clone());
        Ok(value)
    }

    /// Nodes whose values are needed to score the random node `id`
    pub(crate) fn density_targets(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let (_, params, _) = self.random_params(id)?;
        let mut targets = params.to_vec();
        targets.push(id);
        Ok(targets)
    }

    /// Distribution of the random node `id` under the pass's parameter
    /// values; its parameters must have been evaluated
    pub fn distribution_in(&self, id: NodeId, trace: &Trace) -> Result<Box<dyn Distribution>> {
        let (family, params, _) = self.random_params(id)?;
        let values = params
            .iter()
            .map(|&p| {
                trace.get(p).cloned().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "parameter of `{}` not evaluated",
                        self.name_of(id)
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        family.instantiate(&values)
    }

    /// Total log density of random node `id` at its value in `trace`,
    /// summed over all elements (scalar)
    pub fn log_prob_in(&self, id: NodeId, trace: &Trace) -> Result<Tensor> {
        let x = trace.get(id).ok_or_else(|| {
            Error::InvalidArgument(format!("`{}` not evaluated", self.name_of(id)))
        })?;
        let dist = self.distribution_in(id, trace)?;
        match dist.log_prob(x) {
            Err(Error::LogProbUnavailable(_)) => {
                Err(Error::LogProbUnavailable(self.name_of(id)))
            }
            other => Ok(other?.sum_all()?),
        }
    }

    /// Fresh ancestral draw of `v`, ignoring the value fixed at
    /// declaration
    pub fn sample(&self, v: Value, rng: &mut StdRng) -> Result<Tensor> {
        let id = self.check_value(v)?;
        let trace = self.evaluate(&[id], &Bindings::new(), rng)?;
        trace.value(v).cloned()
    }

    /// Mean of `rv`'s distribution at the current parameter values;
    /// random parents are drawn afresh
    pub fn mean(&self, rv: RandomVariable, rng: &mut StdRng) -> Result<Tensor> {
        let id = self.check_random(rv)?;
        let (_, params, _) = self.random_params(id)?;
        let trace = self.evaluate(params, &Bindings::new(), rng)?;
        Ok(self.distribution_in(id, &trace)?.mean()?.detach())
    }

    /// Evaluate `v` with placeholders and other nodes bound by `feeds`
    pub fn evaluate_value(
        &self,
        v: Value,
        feeds: &[(Value, Tensor)],
        rng: &mut StdRng,
    ) -> Result<Tensor> {
        let id = self.check_value(v)?;
        let mut bindings = Bindings::new();
        for (k, t) in feeds {
            bindings.bind_tensor(self.check_value(*k)?, t.clone());
        }
        let trace = self.evaluate(&[id], &bindings, rng)?;
        trace.value(v).cloned()
    }
}
