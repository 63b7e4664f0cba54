use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use candle_core::{Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distributions::Family;
use crate::error::{Error, Result};
use crate::model::{Bindings, Model, NodeId, RandomVariable, Trace, Value};

/// What an observed variable is bound to
#[derive(Clone, Debug)]
pub enum Observed {
    /// literal data
    Tensor(Tensor),
    /// any node of the model, typically a placeholder fed per update
    Value(Value),
    /// another random variable, usually the approximation owned by a
    /// different inference instance; read detached in each pass
    Variable(RandomVariable),
}

impl From<Tensor> for Observed {
    fn from(t: Tensor) -> Self {
        Observed::Tensor(t)
    }
}

impl From<Value> for Observed {
    fn from(v: Value) -> Self {
        Observed::Value(v)
    }
}

impl From<RandomVariable> for Observed {
    fn from(rv: RandomVariable) -> Self {
        Observed::Variable(rv)
    }
}

/// Latent, data and scale mappings of one inference instance
///
/// ```ignore
/// let maps = Mappings::new()
///     .latent(p, qp)
///     .data(x, x_data)
///     .scale(x, subsample_scale(n, batch)?);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Mappings {
    pub(crate) latents: Vec<(RandomVariable, RandomVariable)>,
    pub(crate) data: Vec<(RandomVariable, Observed)>,
    pub(crate) scale: Vec<(RandomVariable, f64)>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approximate the posterior of `latent` by `approx`
    pub fn latent(mut self, latent: RandomVariable, approx: RandomVariable) -> Self {
        self.latents.push((latent, approx));
        self
    }

    /// Condition on `observed`
    pub fn data(mut self, variable: RandomVariable, observed: impl Into<Observed>) -> Self {
        self.data.push((variable, observed.into()));
        self
    }

    /// Multiply the log density of `variable` by `scale`
    pub fn scale(mut self, variable: RandomVariable, scale: f64) -> Self {
        self.scale.push((variable, scale));
        self
    }
}

/// Validated binding of an observed node
#[derive(Clone, Debug)]
pub(crate) enum DataSource {
    Tensor(Tensor),
    Node(NodeId),
}

impl DataSource {
    /// Check `observed` against the shape of node `key` and move
    /// literal data to the model's device and dtype
    pub(crate) fn resolve(model: &Model, key: NodeId, observed: Observed) -> Result<Self> {
        let expected = model.node_shape(key)?;
        let (source, data_shape) = match observed {
            Observed::Tensor(t) => {
                let t = t.to_device(model.device())?;
                let t = if t.dtype().is_float() {
                    t.to_dtype(model.dtype())?
                } else {
                    t
                };
                let shape = t.dims().to_vec();
                (DataSource::Tensor(t), shape)
            }
            Observed::Value(v) => (DataSource::Node(model.check_value(v)?), model.shape(v)?),
            Observed::Variable(rv) => (
                DataSource::Node(model.check_random(rv)?),
                model.shape(rv.value())?,
            ),
        };
        if data_shape != expected {
            return Err(Error::DataShape {
                variable: model.name_of(key),
                expected,
                data_shape,
            });
        }
        if let DataSource::Node(target) = &source {
            if model.depends_on(*target, key) {
                return Err(Error::Cycle(model.name_of(key)));
            }
        }
        Ok(source)
    }
}

/// State shared by all inference algorithms: validated mappings, feeds,
/// random number generator and the lifecycle counters.
pub struct InferenceBase {
    label: String,
    model: Arc<Model>,
    latents: Vec<(NodeId, NodeId)>,
    data: Vec<(NodeId, DataSource)>,
    scale: HashMap<NodeId, f64>,
    feeds: HashMap<NodeId, Tensor>,
    rng: StdRng,
    initialized: bool,
    iteration: usize,
}

impl InferenceBase {
    /// Validate mappings against the model
    ///
    /// * `label` - name used in diagnostics and errors
    /// * `model` - the shared model
    /// * `mappings` - latent, data and scale mappings
    /// * `seed` - seed of this instance's evaluation passes
    pub fn new(label: &str, model: Arc<Model>, mappings: Mappings, seed: u64) -> Result<Self> {
        let mut latents = vec![];
        let mut latent_set = HashSet::new();

        for (z, qz) in mappings.latents.iter() {
            let z_id = model.check_random(*z)?;
            let qz_id = model.check_random(*qz)?;
            if !latent_set.insert(z_id) {
                return Err(Error::DuplicateLatent(model.name_of(z_id)));
            }
            let z_shape = model.shape(z.value())?;
            let qz_shape = model.shape(qz.value())?;
            if z_shape != qz_shape {
                return Err(Error::ShapeMismatch {
                    latent: model.name_of(z_id),
                    approx: model.name_of(qz_id),
                    latent_shape: z_shape,
                    approx_shape: qz_shape,
                });
            }
            if model.depends_on(qz_id, z_id) {
                return Err(Error::SelfDependentApproximation {
                    latent: model.name_of(z_id),
                    approx: model.name_of(qz_id),
                });
            }
            latents.push((z_id, qz_id));
        }

        let mut data = vec![];
        let mut data_set = HashSet::new();

        for (x, observed) in mappings.data.into_iter() {
            let x_id = model.check_random(x)?;
            if latent_set.contains(&x_id) {
                return Err(Error::LatentObserved(model.name_of(x_id)));
            }
            if !data_set.insert(x_id) {
                return Err(Error::InvalidArgument(format!(
                    "`{}` is observed more than once",
                    model.name_of(x_id)
                )));
            }
            let source = DataSource::resolve(&model, x_id, observed)?;
            data.push((x_id, source));
        }

        let mut scale = HashMap::new();
        for (rv, s) in mappings.scale.iter() {
            let id = model.check_random(*rv)?;
            if !s.is_finite() || *s <= 0.0 {
                return Err(Error::NonPositiveScale {
                    variable: model.name_of(id),
                    scale: *s,
                });
            }
            if !latent_set.contains(&id) && !data_set.contains(&id) {
                return Err(Error::InvalidArgument(format!(
                    "scaled variable `{}` is neither latent nor observed",
                    model.name_of(id)
                )));
            }
            scale.insert(id, *s);
        }

        Ok(Self {
            label: label.to_string(),
            model,
            latents,
            data,
            scale,
            feeds: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
            initialized: false,
            iteration: 0,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// (latent, approximation) pairs in mapping order
    pub fn latents(&self) -> &[(NodeId, NodeId)] {
        &self.latents
    }

    pub fn observed(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.data.iter().map(|(x, _)| *x)
    }

    pub fn scale_of(&self, id: NodeId) -> f64 {
        self.scale.get(&id).copied().unwrap_or(1.0)
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Reject approximations whose family `allowed` does not accept
    pub(crate) fn require_families<F>(&self, algorithm: &'static str, allowed: F) -> Result<()>
    where
        F: Fn(Family) -> bool,
    {
        for &(_, qz) in self.latents.iter() {
            let (family, _, _) = self.model.random_params(qz)?;
            if !allowed(family) {
                return Err(Error::UnsupportedFamily {
                    algorithm,
                    variable: self.model.name_of(qz),
                    family: family.name(),
                });
            }
        }
        Ok(())
    }

    ///////////////
    // lifecycle //
    ///////////////

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Fails when `initialize()` already ran; state is left untouched
    pub(crate) fn check_uninitialized(&self) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized {
                inference: self.label.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub(crate) fn check_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(Error::NotInitialized {
                inference: self.label.clone(),
            });
        }
        Ok(())
    }

    /// Count one update; returns the index of the update just made
    pub(crate) fn advance(&mut self) -> usize {
        let t = self.iteration;
        self.iteration += 1;
        t
    }

    ///////////
    // feeds //
    ///////////

    /// Supply the value of a placeholder for subsequent updates
    pub fn feed(&mut self, placeholder: Value, value: Tensor) -> Result<()> {
        let id = self.model.check_value(placeholder)?;
        if !self.model.is_placeholder(id) {
            return Err(Error::InvalidArgument(format!(
                "`{}` is not a placeholder",
                self.model.name_of(id)
            )));
        }
        let expected = self.model.shape(placeholder)?;
        if value.dims() != expected.as_slice() {
            return Err(Error::DataShape {
                variable: self.model.name_of(id),
                expected,
                data_shape: value.dims().to_vec(),
            });
        }
        let value = value.to_device(self.model.device())?;
        let value = if value.dtype().is_float() {
            value.to_dtype(self.model.dtype())?
        } else {
            value
        };
        self.feeds.insert(id, value);
        Ok(())
    }

    ////////////
    // passes //
    ////////////

    /// Observed data and feeds only; latents stay unbound
    pub fn data_bindings(&self) -> Bindings {
        let mut bindings = Bindings::new();
        for (id, t) in self.feeds.iter() {
            bindings.bind_tensor(*id, t.clone());
        }
        for (x, source) in self.data.iter() {
            match source {
                DataSource::Tensor(t) => bindings.bind_tensor(*x, t.clone()),
                DataSource::Node(target) => bindings.bind_alias(*x, *target, true),
            }
        }
        bindings
    }

    /// Data bindings plus every latent replaced by its approximation
    pub fn bindings(&self) -> Bindings {
        let mut bindings = self.data_bindings();
        for &(z, qz) in self.latents.iter() {
            bindings.bind_alias(z, qz, false);
        }
        bindings
    }

    /// Data bindings plus latents fixed at `position` (one tensor per
    /// latent, in mapping order)
    pub fn bindings_at(&self, position: &[Tensor]) -> Result<Bindings> {
        if position.len() != self.latents.len() {
            return Err(Error::InvalidArgument(format!(
                "{} position tensors for {} latents",
                position.len(),
                self.latents.len()
            )));
        }
        let mut bindings = self.data_bindings();
        for (&(z, _), x) in self.latents.iter().zip(position.iter()) {
            bindings.bind_tensor(z, x.clone());
        }
        Ok(bindings)
    }

    fn scored_nodes(&self) -> Vec<NodeId> {
        self.latents
            .iter()
            .map(|(z, _)| *z)
            .chain(self.observed())
            .collect()
    }

    /// Evaluate arbitrary nodes with this instance's random stream
    pub fn evaluate(&mut self, targets: &[NodeId], bindings: &Bindings) -> Result<Trace> {
        self.model.evaluate(targets, bindings, &mut self.rng)
    }

    /// One evaluation pass producing everything the log joint and the
    /// approximations' log densities need
    pub fn pass(&mut self, bindings: &Bindings) -> Result<Trace> {
        let mut targets = vec![];
        for id in self.scored_nodes() {
            targets.extend(self.model.density_targets(id)?);
        }
        for &(_, qz) in self.latents.iter() {
            targets.extend(self.model.density_targets(qz)?);
        }
        self.evaluate(&targets, bindings)
    }

    /// Evaluation pass for the log joint only
    pub fn joint_pass(&mut self, bindings: &Bindings) -> Result<Trace> {
        let mut targets = vec![];
        for id in self.scored_nodes() {
            targets.extend(self.model.density_targets(id)?);
        }
        self.evaluate(&targets, bindings)
    }

    /// Scaled log joint of latents and observed variables in `trace`
    ///
    /// Σ_v scale(v) · Σ log p(v | parents)
    pub fn log_joint(&self, trace: &Trace) -> Result<Tensor> {
        let mut total = Tensor::zeros((), self.model.dtype(), self.model.device())?;
        for id in self.scored_nodes() {
            let lp = self.model.log_prob_in(id, trace)?;
            let s = self.scale_of(id);
            let lp = if s != 1.0 { lp.affine(s, 0.0)? } else { lp };
            total = total.add(&lp)?;
        }
        Ok(total)
    }

    /// Σ log q(qz) over the approximations in `trace`
    pub fn log_q(&self, trace: &Trace) -> Result<Tensor> {
        let mut total = Tensor::zeros((), self.model.dtype(), self.model.device())?;
        for &(_, qz) in self.latents.iter() {
            total = total.add(&self.model.log_prob_in(qz, trace)?)?;
        }
        Ok(total)
    }

    /// Scaled log joint at one draw of the approximations
    pub fn log_joint_estimate(&mut self) -> Result<f32> {
        let bindings = self.bindings();
        let trace = self.pass(&bindings)?;
        Ok(self.log_joint(&trace)?.to_scalar::<f32>()?)
    }

    /// Variables this instance optimizes: those reachable from its
    /// approximations and from the parameters of its mapped variables,
    /// never entering observed or cross-referenced nodes
    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        let mut roots = vec![];
        for &(_, qz) in self.latents.iter() {
            roots.push(qz);
        }
        for id in self.scored_nodes() {
            let (_, params, _) = self.model.random_params(id)?;
            roots.extend_from_slice(params);
        }
        let stop: HashSet<NodeId> = self.observed().collect();
        let redirect: HashMap<NodeId, NodeId> = self.latents.iter().copied().collect();
        Ok(self.model.collect_vars(&roots, &stop, &redirect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn normal_pair() -> Result<(Model, RandomVariable, RandomVariable, RandomVariable)> {
        let mut model = Model::new(Device::Cpu, 0);
        let zero = model.scalar(0.0)?;
        let one = model.scalar(1.0)?;
        let z = model.normal(zero, one).sample_shape(&[3]).name("z").build()?;
        let x = model.normal(z.value(), one).name("x").build()?;
        let loc = model.param("loc", Tensor::zeros(3, DType::F32, &Device::Cpu)?)?;
        let qz = model.normal(loc, one).name("qz").build()?;
        Ok((model, z, x, qz))
    }

    #[test]
    fn test_valid_mappings() -> Result<()> {
        let (model, z, x, qz) = normal_pair()?;
        let x_data = Tensor::ones(3, DType::F32, &Device::Cpu)?;
        let base = InferenceBase::new(
            "vi",
            Arc::new(model),
            Mappings::new().latent(z, qz).data(x, x_data).scale(x, 2.0),
            0,
        )?;
        assert_eq!(base.latents().len(), 1);
        assert_eq!(base.scale_of(x.node()), 2.0);
        assert_eq!(base.scale_of(z.node()), 1.0);
        assert_eq!(base.trainable_vars()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_latent_observed_rejected() -> Result<()> {
        let (model, z, _x, qz) = normal_pair()?;
        let z_data = Tensor::ones(3, DType::F32, &Device::Cpu)?;
        let res = InferenceBase::new(
            "vi",
            Arc::new(model),
            Mappings::new().latent(z, qz).data(z, z_data),
            0,
        );
        assert!(matches!(res, Err(Error::LatentObserved(name)) if name == "z"));
        Ok(())
    }

    #[test]
    fn test_feed_checks_shape() -> Result<()> {
        let mut model = Model::new(Device::Cpu, 0);
        let xs = model.placeholder("xs", &[4])?;
        let one = model.scalar(1.0)?;
        let x = model.normal(xs, one).name("x").build()?;
        let mut base = InferenceBase::new("map", Arc::new(model), Mappings::new(), 0)?;
        assert!(matches!(
            base.feed(xs, Tensor::zeros(5, DType::F32, &Device::Cpu)?),
            Err(Error::DataShape { .. })
        ));
        assert!(base.feed(x.value(), Tensor::zeros(4, DType::F32, &Device::Cpu)?).is_err());
        base.feed(xs, Tensor::zeros(4, DType::F32, &Device::Cpu)?)?;
        Ok(())
    }
}
