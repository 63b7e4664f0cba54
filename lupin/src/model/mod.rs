//! Model graphs: random variables embedded in a candle computation graph.
//!
//! # Example
//!
//! ```ignore
//! use lupin::model::Model;
//!
//! let mut model = Model::new(Device::Cpu, 0);
//! let one = model.scalar(1.0)?;
//! let p = model.beta(one, one).name("p").build()?;
//! let x = model.bernoulli(p.value()).sample_shape(&[50]).name("x").build()?;
//! ```
//!
//! Ragged structures (e.g. documents of different lengths) are a
//! `Vec<RandomVariable>` with one independently shaped variable per
//! element.

mod builder;
mod evaluate;
mod graph;

pub use builder::RvBuilder;
pub use evaluate::{Binding, Bindings, Trace};
pub use graph::{BinaryOp, Model, NodeId, RandomVariable, UnaryOp, Value};
