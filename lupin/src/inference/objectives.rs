//! Surrogate losses minimized by the gradient-based algorithms.
//!
//! Inputs are per-sample vectors of shape `(S,)`: the scaled log joint
//! `log p` and the approximation's log density `log q` of each pass.

use candle_core::Tensor;

use crate::distributions::special::softplus;
use crate::error::Result;

/// Normalized rewards get this added to their variance
const REWARD_VAR_EPS: f64 = 1e-8;

/// Negative ELBO with reparameterization gradients
///
/// -E_q[log p(x, z) - log q(z)]
///
/// Gradients flow through the samples, so every approximation must be
/// reparameterized.
pub fn direct_elbo_loss(log_p: &Tensor, log_q: &Tensor) -> Result<Tensor> {
    Ok((log_p - log_q)?.mean(0)?.neg()?)
}

/// Score-function (REINFORCE) surrogate of the negative ELBO
///
/// ∇ELBO ≈ E[(normalized reward) · ∇log q(z)] with reward
/// `log p - log q` and control variate `(reward - mean) / std`.
///
/// Samples must be detached from the approximation's parameters. The
/// extra `-E[log p]` term carries gradients to model parameters that
/// the log joint depends on directly.
///
/// With a single sample the reward is used as is, since its spread is
/// undefined.
///
/// * `log_p` - scaled log joint per sample `(S,)`
/// * `log_q` - approximation log density per sample `(S,)`, with
///   gradients to its parameters
pub fn score_function_loss(log_p: &Tensor, log_q: &Tensor) -> Result<Tensor> {
    let reward = (log_p - log_q)?.detach();

    let reward = if reward.dim(0)? > 1 {
        let mean = reward.mean(0)?;
        let std = (reward.var(0)? + REWARD_VAR_EPS)?.sqrt()?;
        reward.broadcast_sub(&mean)?.broadcast_div(&std)?
    } else {
        reward
    };

    let surrogate = (&reward * log_q)?.mean(0)?.neg()?;
    let model_term = log_p.mean(0)?.neg()?;
    Ok((surrogate + model_term)?)
}

/// Monitored ELBO estimate, no gradients
pub fn elbo_estimate(log_p: &Tensor, log_q: &Tensor) -> Result<f32> {
    Ok((log_p - log_q)?.detach().mean(0)?.to_scalar::<f32>()?)
}

/// Binary cross entropy on logits, averaged over all elements
///
/// mean( softplus(l) - y · l )
///
/// * `logits` - discriminator outputs
/// * `target` - 1 for real, 0 for fake; broadcast to `logits`
pub fn bce_with_logits(logits: &Tensor, target: f64) -> Result<Tensor> {
    Ok(softplus(logits)?
        .sub(&logits.affine(target, 0.0)?)?
        .mean_all()?)
}
