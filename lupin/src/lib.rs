//! Compositional probabilistic inference on candle.
//!
//! Models are graphs of random variables and deterministic tensor
//! operations ([`model`]). Inference algorithms ([`inference`]) bind
//! latent variables to approximating variables and observed variables
//! to data, and can be interleaved over one model by the
//! [`compose::Composition`] driver.

pub mod cli;
pub mod compose;
pub mod distributions;
pub mod error;
pub mod inference;
pub mod layers;
pub mod model;
pub mod subsample;

pub use error::{Error, Result};

pub use candle_core;
pub use candle_nn;
