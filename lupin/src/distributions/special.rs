use candle_core::Tensor;

use crate::error::Result;

const LN_2PI: f64 = 1.8378770664093453;

/// Recurrence shift before the Stirling series kicks in
const LGAMMA_SHIFT: usize = 6;

/// Differentiable log-gamma for positive arguments
///
/// ln Γ(x) = ln Γ(x + 6) - ln[x (x+1) ... (x+5)]
///
/// and ln Γ(z) for z ≥ 6 by the Stirling series
///
/// (z - 1/2) ln z - z + ln(2π)/2 + 1/(12z) - 1/(360z³) + 1/(1260z⁵)
///
/// * `x` - positive tensor of any shape
pub fn lgamma(x: &Tensor) -> Result<Tensor> {
    let mut prod = x.clone();
    for k in 1..LGAMMA_SHIFT {
        prod = prod.mul(&x.affine(1.0, k as f64)?)?;
    }

    let z = x.affine(1.0, LGAMMA_SHIFT as f64)?;
    let z_inv = z.recip()?;
    let z_inv2 = z_inv.sqr()?;

    let inner = z_inv2.affine(-1.0 / 1260.0, 1.0 / 360.0)?;
    let series = z_inv.mul(&z_inv2.mul(&inner)?.affine(-1.0, 1.0 / 12.0)?)?;

    let stirling = z
        .affine(1.0, -0.5)?
        .mul(&z.log()?)?
        .sub(&z)?
        .affine(1.0, 0.5 * LN_2PI)?
        .add(&series)?;

    Ok(stirling.sub(&prod.log()?)?)
}

/// ln B(a, b) = ln Γ(a) + ln Γ(b) - ln Γ(a + b), broadcasting `a` and `b`
pub fn lbeta(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let ab = a.broadcast_add(b)?;
    Ok(lgamma(a)?.broadcast_add(&lgamma(b)?)?.broadcast_sub(&lgamma(&ab)?)?)
}

/// ln(1 + exp(x)) computed as relu(x) + ln(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok(x.relu()?.add(&tail)?)
}
