//! Small feed-forward networks for generators and discriminators.

use candle_core::Tensor;
use candle_nn::{linear, Activation, Linear, Module, VarBuilder};

use crate::error::{Error, Result};

/// Alternating `M` layers and optional activations
pub struct StackLayers<M: Module> {
    layers: Vec<(M, Option<Activation>)>,
}

impl<M: Module> Module for StackLayers<M> {
    fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = input.clone();
        for (layer, activation) in self.layers.iter() {
            x = layer.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M: Module> StackLayers<M> {
    pub fn new() -> Self {
        Self { layers: vec![] }
    }

    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.layers.push((layer, Some(activation)));
    }

    pub fn push(&mut self, layer: M) {
        self.layers.push((layer, None));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<M: Module> Default for StackLayers<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-layer perceptron `dims[0] → dims[1] → ... → dims[last]`;
/// hidden layers use `activation`, the output layer is linear
///
/// * `dims` - layer widths, at least input and output
/// * `activation` - hidden activation
/// * `vb` - variable builder, usually over the network's own `VarMap`
pub fn mlp(dims: &[usize], activation: Activation, vb: VarBuilder) -> Result<StackLayers<Linear>> {
    if dims.len() < 2 {
        return Err(Error::InvalidArgument(format!(
            "an MLP needs input and output widths, got {:?}",
            dims
        )));
    }
    let mut net = StackLayers::new();
    let last = dims.len() - 2;
    for (i, w) in dims.windows(2).enumerate() {
        let layer = linear(w[0], w[1], vb.pp(format!("fc{}", i)))?;
        if i < last {
            net.push_with_act(layer, activation);
        } else {
            net.push(layer);
        }
    }
    Ok(net)
}
