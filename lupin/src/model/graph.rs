use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor, TensorId, Var, D};
use candle_nn::{Module, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::distributions::special::softplus;
use crate::distributions::Family;
use crate::error::{Error, Result};

static NEXT_MODEL_ID: AtomicUsize = AtomicUsize::new(0);

/// Position of a node in its model; nodes only reference earlier nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to any node of a model, usable as input of deterministic ops
/// and as parameter of random variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    pub(crate) node: NodeId,
    pub(crate) model: usize,
}

impl Value {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Handle to a random node. The drawn sample is reached explicitly through
/// [`RandomVariable::value`], never by implicit coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RandomVariable {
    pub(crate) node: NodeId,
    pub(crate) model: usize,
}

impl RandomVariable {
    /// The variable's sample as a graph value
    pub fn value(&self) -> Value {
        Value {
            node: self.node,
            model: self.model,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Exp,
    Log,
    Neg,
    Sqr,
    Sqrt,
    Softplus,
    Sigmoid,
    Tanh,
    Relu,
    /// softmax over the last dimension
    Softmax,
    /// sum over the last dimension
    SumLast,
}

impl UnaryOp {
    pub(crate) fn apply(&self, x: &Tensor) -> Result<Tensor> {
        Ok(match self {
            UnaryOp::Exp => x.exp()?,
            UnaryOp::Log => x.log()?,
            UnaryOp::Neg => x.neg()?,
            UnaryOp::Sqr => x.sqr()?,
            UnaryOp::Sqrt => x.sqrt()?,
            UnaryOp::Softplus => softplus(x)?,
            UnaryOp::Sigmoid => x.neg()?.exp()?.affine(1.0, 1.0)?.recip()?,
            UnaryOp::Tanh => x.tanh()?,
            UnaryOp::Relu => x.relu()?,
            UnaryOp::Softmax => candle_nn::ops::softmax(x, D::Minus1)?,
            UnaryOp::SumLast => x.sum(D::Minus1)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    /// rows of the first operand selected by the integer second operand
    Gather,
}

impl BinaryOp {
    pub(crate) fn apply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        Ok(match self {
            BinaryOp::Add => a.broadcast_add(b)?,
            BinaryOp::Sub => a.broadcast_sub(b)?,
            BinaryOp::Mul => a.broadcast_mul(b)?,
            BinaryOp::Div => a.broadcast_div(b)?,
            BinaryOp::MatMul => a.broadcast_matmul(b)?,
            BinaryOp::Gather => {
                let idx = b.to_dtype(DType::U32)?;
                let flat = idx.flatten_all()?;
                let rows = a.index_select(&flat, 0)?;
                let mut shape = idx.dims().to_vec();
                shape.extend_from_slice(&a.dims()[1..]);
                rows.reshape(shape)?
            }
        })
    }
}

pub(crate) enum Op {
    Constant(Tensor),
    Param(Var),
    Placeholder,
    Random {
        family: Family,
        params: Vec<NodeId>,
        sample_shape: Vec<usize>,
    },
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Layer {
        input: NodeId,
        layer: Arc<dyn Module + Send + Sync>,
        vars: Vec<Var>,
    },
}

impl Op {
    pub(crate) fn inputs(&self) -> Vec<NodeId> {
        match self {
            Op::Constant(_) | Op::Param(_) | Op::Placeholder => vec![],
            Op::Random { params, .. } => params.clone(),
            Op::Unary(_, x) => vec![*x],
            Op::Binary(_, a, b) => vec![*a, *b],
            Op::Layer { input, .. } => vec![*input],
        }
    }
}

pub(crate) struct Node {
    pub(crate) op: Op,
    pub(crate) name: String,
    /// value computed when the node was declared; for random nodes this
    /// is the variable's drawn sample
    pub(crate) eager: Tensor,
}

/// A probabilistic program: random variables, inputs and deterministic
/// operations stored in topological order.
///
/// The model is an explicit context object. Every node gets an eager
/// value at declaration, which fixes its shape and validates operand
/// shapes immediately. Inference instances share the finished model
/// behind an `Arc` and evaluate it pass by pass.
pub struct Model {
    id: usize,
    device: Device,
    dtype: DType,
    pub(crate) nodes: Vec<Node>,
    rng: StdRng,
}

impl Model {
    /// Create an empty model
    /// * `device` - device of all tensors
    /// * `seed` - seed of the draws made at declaration time
    pub fn new(device: Device, seed: u64) -> Self {
        Self {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            device,
            dtype: DType::F32,
            nodes: vec![],
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    //////////////////
    // node lookups //
    //////////////////

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::UnknownVariable(format!("node #{}", id.0)))
    }

    pub(crate) fn check_value(&self, v: Value) -> Result<NodeId> {
        if v.model != self.id {
            return Err(Error::ForeignNode(format!("node #{}", v.node.0)));
        }
        self.node(v.node)?;
        Ok(v.node)
    }

    /// Validate that `rv` is a random node of this model
    pub fn check_random(&self, rv: RandomVariable) -> Result<NodeId> {
        let id = self.check_value(rv.value())?;
        match self.node(id)?.op {
            Op::Random { .. } => Ok(id),
            _ => Err(Error::NotRandom(self.name_of(id))),
        }
    }

    pub fn name_of(&self, id: NodeId) -> String {
        self.nodes
            .get(id.0)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("node #{}", id.0))
    }

    pub fn name(&self, v: Value) -> String {
        self.name_of(v.node)
    }

    /// Shape of the value, fixed at declaration
    pub fn shape(&self, v: Value) -> Result<Vec<usize>> {
        let id = self.check_value(v)?;
        Ok(self.node(id)?.eager.dims().to_vec())
    }

    pub(crate) fn node_shape(&self, id: NodeId) -> Result<Vec<usize>> {
        Ok(self.node(id)?.eager.dims().to_vec())
    }

    /// The value computed at declaration; for a random variable this is
    /// its drawn sample
    pub fn eager(&self, v: Value) -> Result<Tensor> {
        let id = self.check_value(v)?;
        Ok(self.node(id)?.eager.clone())
    }

    pub fn family(&self, rv: RandomVariable) -> Result<Family> {
        let id = self.check_random(rv)?;
        match &self.node(id)?.op {
            Op::Random { family, .. } => Ok(*family),
            _ => Err(Error::NotRandom(self.name_of(id))),
        }
    }

    pub(crate) fn random_params(&self, id: NodeId) -> Result<(Family, &[NodeId], &[usize])> {
        match &self.node(id)?.op {
            Op::Random {
                family,
                params,
                sample_shape,
            } => Ok((*family, params.as_slice(), sample_shape.as_slice())),
            _ => Err(Error::NotRandom(self.name_of(id))),
        }
    }

    pub(crate) fn is_placeholder(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0).map(|n| &n.op), Some(Op::Placeholder))
    }

    /// The learnable variable behind a `param` node
    pub fn param_var(&self, v: Value) -> Result<Var> {
        let id = self.check_value(v)?;
        self.param_var_at(id)
    }

    pub(crate) fn param_var_at(&self, id: NodeId) -> Result<Var> {
        match &self.node(id)?.op {
            Op::Param(var) => Ok(var.clone()),
            _ => Err(Error::InvalidArgument(format!(
                "`{}` is not a learnable parameter",
                self.name_of(id)
            ))),
        }
    }

    /// Learnable variables `v` depends on
    pub fn vars_of(&self, v: Value) -> Result<Vec<Var>> {
        let id = self.check_value(v)?;
        Ok(self.collect_vars(&[id], &HashSet::new(), &Default::default()))
    }

    /// Learnable variables reachable from `roots`.
    ///
    /// Traversal does not enter nodes in `stop` and continues at the
    /// redirect target for nodes in `redirect` (latent → approximation).
    pub(crate) fn collect_vars(
        &self,
        roots: &[NodeId],
        stop: &HashSet<NodeId>,
        redirect: &std::collections::HashMap<NodeId, NodeId>,
    ) -> Vec<Var> {
        let mut seen_nodes = HashSet::new();
        let mut seen_vars: HashSet<TensorId> = HashSet::new();
        let mut vars = vec![];
        let mut stack: Vec<NodeId> = roots.to_vec();

        while let Some(id) = stack.pop() {
            let id = redirect.get(&id).copied().unwrap_or(id);
            if stop.contains(&id) || !seen_nodes.insert(id) {
                continue;
            }
            let Some(node) = self.nodes.get(id.0) else {
                continue;
            };
            match &node.op {
                Op::Param(var) => {
                    if seen_vars.insert(var.id()) {
                        vars.push(var.clone());
                    }
                }
                Op::Layer { vars: layer_vars, .. } => {
                    for var in layer_vars {
                        if seen_vars.insert(var.id()) {
                            vars.push(var.clone());
                        }
                    }
                }
                _ => {}
            }
            stack.extend(node.op.inputs());
        }
        vars
    }

    /// Whether `node` has `ancestor` among its inputs, transitively
    pub(crate) fn depends_on(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(n) = self.nodes.get(id.0) {
                stack.extend(n.op.inputs());
            }
        }
        false
    }

    //////////////////////
    // node declaration //
    //////////////////////

    fn push(&mut self, op: Op, name: Option<&str>, eager: Tensor) -> Value {
        let id = NodeId(self.nodes.len());
        let name = match name {
            Some(n) => n.to_string(),
            None => format!("{}_{}", op_label(&op), id.0),
        };
        self.nodes.push(Node { op, name, eager });
        Value {
            node: id,
            model: self.id,
        }
    }

    fn eager_of(&self, v: Value) -> Result<Tensor> {
        let id = self.check_value(v)?;
        Ok(self.node(id)?.eager.clone())
    }

    fn to_model_dtype(&self, t: Tensor) -> Result<Tensor> {
        let t = t.to_device(&self.device)?;
        if t.dtype().is_float() && t.dtype() != self.dtype {
            Ok(t.to_dtype(self.dtype)?)
        } else {
            Ok(t)
        }
    }

    /// A fixed tensor; float tensors are converted to the model dtype
    pub fn constant(&mut self, t: Tensor) -> Result<Value> {
        let t = self.to_model_dtype(t)?;
        Ok(self.push(Op::Constant(t.clone()), None, t))
    }

    pub fn scalar(&mut self, v: f64) -> Result<Value> {
        let t = Tensor::new(v as f32, &self.device)?;
        self.constant(t)
    }

    /// External input fed per update, e.g. a streamed minibatch
    pub fn placeholder(&mut self, name: &str, shape: &[usize]) -> Result<Value> {
        let eager = Tensor::zeros(shape.to_vec(), self.dtype, &self.device)?;
        Ok(self.push(Op::Placeholder, Some(name), eager))
    }

    /// Learnable parameter initialized at `init`, updated in place by
    /// the inference instance that owns it
    pub fn param(&mut self, name: &str, init: Tensor) -> Result<Value> {
        let init = self.to_model_dtype(init)?;
        let var = Var::from_tensor(&init)?;
        let eager = var.as_tensor().clone();
        Ok(self.push(Op::Param(var), Some(name), eager))
    }

    pub fn unary(&mut self, op: UnaryOp, x: Value) -> Result<Value> {
        let eager = op.apply(&self.eager_of(x)?)?.detach();
        Ok(self.push(Op::Unary(op, x.node), None, eager))
    }

    pub fn binary(&mut self, op: BinaryOp, a: Value, b: Value) -> Result<Value> {
        let eager = op.apply(&self.eager_of(a)?, &self.eager_of(b)?)?.detach();
        Ok(self.push(Op::Binary(op, a.node, b.node), None, eager))
    }

    pub fn add(&mut self, a: Value, b: Value) -> Result<Value> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: Value, b: Value) -> Result<Value> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: Value, b: Value) -> Result<Value> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: Value, b: Value) -> Result<Value> {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn matmul(&mut self, a: Value, b: Value) -> Result<Value> {
        self.binary(BinaryOp::MatMul, a, b)
    }

    /// `source[index]` along the first dimension, e.g. cluster means
    /// looked up by discrete assignments
    pub fn gather(&mut self, source: Value, index: Value) -> Result<Value> {
        self.binary(BinaryOp::Gather, source, index)
    }

    pub fn exp(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Exp, x)
    }

    pub fn log(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Log, x)
    }

    pub fn neg(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Neg, x)
    }

    pub fn sqr(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Sqr, x)
    }

    pub fn sqrt(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Sqrt, x)
    }

    pub fn softplus(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Softplus, x)
    }

    pub fn sigmoid(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Sigmoid, x)
    }

    pub fn tanh(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Tanh, x)
    }

    pub fn relu(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Relu, x)
    }

    pub fn softmax(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::Softmax, x)
    }

    pub fn sum_last(&mut self, x: Value) -> Result<Value> {
        self.unary(UnaryOp::SumLast, x)
    }

    /// Push `input` through a neural-network layer.
    ///
    /// * `layer` - any `candle_nn::Module`
    /// * `varmap` - the map holding the layer's weights; its variables
    ///   become trainable by inference instances reaching this node
    pub fn apply<M>(&mut self, input: Value, layer: M, varmap: &VarMap) -> Result<Value>
    where
        M: Module + Send + Sync + 'static,
    {
        let eager = layer.forward(&self.eager_of(input)?)?.detach();
        let op = Op::Layer {
            input: input.node,
            layer: Arc::new(layer),
            vars: varmap.all_vars(),
        };
        Ok(self.push(op, None, eager))
    }

    /// Declare a random variable and draw its sample
    ///
    /// * `family` - distribution family
    /// * `params` - parameter values in the family's order
    /// * `sample_shape` - leading i.i.d. dimensions
    /// * `name` - optional display name used in error messages
    pub fn random(
        &mut self,
        family: Family,
        params: &[Value],
        sample_shape: &[usize],
        name: Option<&str>,
    ) -> Result<RandomVariable> {
        let values = params
            .iter()
            .map(|&p| self.eager_of(p))
            .collect::<Result<Vec<_>>>()?;
        let dist = family.instantiate(&values)?;
        let eager = dist.sample(sample_shape, &mut self.rng)?.detach();
        let op = Op::Random {
            family,
            params: params.iter().map(|p| p.node).collect(),
            sample_shape: sample_shape.to_vec(),
        };
        let v = self.push(op, name, eager);
        Ok(RandomVariable {
            node: v.node,
            model: v.model,
        })
    }
}

fn op_label(op: &Op) -> &'static str {
    match op {
        Op::Constant(_) => "const",
        Op::Param(_) => "param",
        Op::Placeholder => "placeholder",
        Op::Random { family, .. } => family.name(),
        Op::Unary(..) => "unary",
        Op::Binary(..) => "binary",
        Op::Layer { .. } => "layer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eager_shapes() -> Result<()> {
        let mut model = Model::new(Device::Cpu, 0);
        let w = model.param("w", Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?)?;
        let x = model.placeholder("x", &[5, 3])?;
        let h = model.matmul(x, w)?;
        assert_eq!(model.shape(h)?, vec![5, 2]);

        let bad = model.placeholder("bad", &[5, 4])?;
        assert!(model.matmul(bad, w).is_err());
        Ok(())
    }

    #[test]
    fn test_random_sample_is_fixed() -> Result<()> {
        let mut model = Model::new(Device::Cpu, 1);
        let zero = model.scalar(0.0)?;
        let one = model.scalar(1.0)?;
        let z = model.random(Family::Normal, &[zero, one], &[4], Some("z"))?;
        let first = model.eager(z.value())?.to_vec1::<f32>()?;
        let second = model.eager(z.value())?.to_vec1::<f32>()?;
        assert_eq!(first, second);
        assert_eq!(model.name(z.value()), "z");
        Ok(())
    }

    #[test]
    fn test_foreign_handles_rejected() -> Result<()> {
        let mut a = Model::new(Device::Cpu, 0);
        let mut b = Model::new(Device::Cpu, 0);
        let x = a.scalar(1.0)?;
        assert!(matches!(b.exp(x), Err(Error::ForeignNode(_))));
        Ok(())
    }

    #[test]
    fn test_gather_rows() -> Result<()> {
        let mut model = Model::new(Device::Cpu, 0);
        let means = model.constant(Tensor::new(&[[0f32, 0.], [5., 5.], [9., 9.]], &Device::Cpu)?)?;
        let z = model.constant(Tensor::new(&[2u32, 0, 2, 1], &Device::Cpu)?)?;
        let picked = model.gather(means, z)?;
        assert_eq!(model.shape(picked)?, vec![4, 2]);
        let rows = model.eager(picked)?.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![9., 9.]);
        assert_eq!(rows[3], vec![5., 5.]);
        Ok(())
    }
}
