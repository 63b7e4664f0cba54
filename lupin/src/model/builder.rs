use super::graph::{Model, RandomVariable, Value};
use crate::distributions::Family;
use crate::error::Result;

/// Declaration of a random variable in progress
///
/// ```ignore
/// let z = model.normal(loc, scale).sample_shape(&[50]).name("z").build()?;
/// ```
pub struct RvBuilder<'a> {
    model: &'a mut Model,
    family: Family,
    params: Vec<Value>,
    sample_shape: Vec<usize>,
    name: Option<String>,
}

impl<'a> RvBuilder<'a> {
    pub(crate) fn new(model: &'a mut Model, family: Family, params: Vec<Value>) -> Self {
        Self {
            model,
            family,
            params,
            sample_shape: vec![],
            name: None,
        }
    }

    /// Leading i.i.d. dimensions of the sample
    pub fn sample_shape(mut self, shape: &[usize]) -> Self {
        self.sample_shape = shape.to_vec();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn build(self) -> Result<RandomVariable> {
        self.model.random(
            self.family,
            &self.params,
            &self.sample_shape,
            self.name.as_deref(),
        )
    }
}

impl Model {
    pub fn normal(&mut self, loc: Value, scale: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Normal, vec![loc, scale])
    }

    pub fn bernoulli(&mut self, probs: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Bernoulli, vec![probs])
    }

    pub fn beta(&mut self, a: Value, b: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Beta, vec![a, b])
    }

    pub fn gamma(&mut self, concentration: Value, rate: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Gamma, vec![concentration, rate])
    }

    pub fn poisson(&mut self, rate: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Poisson, vec![rate])
    }

    pub fn categorical(&mut self, logits: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Categorical, vec![logits])
    }

    pub fn dirichlet(&mut self, concentration: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Dirichlet, vec![concentration])
    }

    /// Point estimate located at `loc` (usually a learnable parameter)
    pub fn point_mass(&mut self, loc: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::PointMass, vec![loc])
    }

    /// Sample-buffer distribution; `buffer` must be a learnable parameter
    /// of shape `(T, ...)` for Monte Carlo to write into it
    pub fn empirical(&mut self, buffer: Value) -> RvBuilder<'_> {
        RvBuilder::new(self, Family::Empirical, vec![buffer])
    }
}
