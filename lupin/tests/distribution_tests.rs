use approx::assert_abs_diff_eq;
use lupin::candle_core::{Device, Tensor};
use lupin::distributions::special::{lbeta, lgamma};
use lupin::distributions::{Beta, Categorical, Dirichlet, Distribution, Gamma, Normal, Poisson};
use lupin::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use special::Gamma as SpecialGamma;

#[test]
fn lgamma_matches_reference() -> Result<()> {
    let xs = [0.05f64, 0.3, 0.9, 1.7, 4.2, 12.5, 80.0];
    let got = lgamma(&Tensor::new(&xs, &Device::Cpu)?)?.to_vec1::<f64>()?;
    for (x, g) in xs.iter().zip(got.iter()) {
        assert_abs_diff_eq!(*g, SpecialGamma::ln_gamma(*x).0, epsilon = 1e-8);
    }
    Ok(())
}

#[test]
fn lbeta_matches_reference() -> Result<()> {
    let a = Tensor::new(&[0.5f64, 2.0, 51.0], &Device::Cpu)?;
    let b = Tensor::new(&[0.5f64, 3.0, 1.0], &Device::Cpu)?;
    let got = lbeta(&a, &b)?.to_vec1::<f64>()?;
    for (k, (a, b)) in [(0.5, 0.5), (2.0, 3.0), (51.0, 1.0)].iter().enumerate() {
        let expected = SpecialGamma::ln_gamma(*a).0 + SpecialGamma::ln_gamma(*b).0
            - SpecialGamma::ln_gamma(a + b).0;
        assert_abs_diff_eq!(got[k], expected, epsilon = 1e-8);
    }
    Ok(())
}

#[test]
fn closed_form_log_densities() -> Result<()> {
    let dev = Device::Cpu;

    // N(1 | 0, 2)
    let normal = Normal::new(Tensor::new(0f64, &dev)?, Tensor::new(2f64, &dev)?)?;
    let lp = normal.log_prob(&Tensor::new(1f64, &dev)?)?.to_scalar::<f64>()?;
    let expected = -0.5 * (2.0 * std::f64::consts::PI).ln() - 2f64.ln() - 0.125;
    assert_abs_diff_eq!(lp, expected, epsilon = 1e-8);

    // Beta(0.25 | 2, 3) = 12 x (1 - x)²
    let beta = Beta::new(Tensor::new(2f64, &dev)?, Tensor::new(3f64, &dev)?)?;
    let lp = beta.log_prob(&Tensor::new(0.25f64, &dev)?)?.to_scalar::<f64>()?;
    assert_abs_diff_eq!(lp, (12.0 * 0.25 * 0.75 * 0.75f64).ln(), epsilon = 1e-6);

    // Gamma(2 | 3, 2) = 2³ x² e^{-2x} / Γ(3)
    let gamma = Gamma::new(Tensor::new(3f64, &dev)?, Tensor::new(2f64, &dev)?)?;
    let lp = gamma.log_prob(&Tensor::new(2f64, &dev)?)?.to_scalar::<f64>()?;
    assert_abs_diff_eq!(lp, (8.0 * 4.0 * (-4f64).exp() / 2.0).ln(), epsilon = 1e-6);

    // Poisson(3 | 2) = 2³ e^{-2} / 3!
    let poisson = Poisson::new(Tensor::new(2f64, &dev)?);
    let lp = poisson.log_prob(&Tensor::new(3f64, &dev)?)?.to_scalar::<f64>()?;
    assert_abs_diff_eq!(lp, (8.0 * (-2f64).exp() / 6.0).ln(), epsilon = 1e-6);
    Ok(())
}

#[test]
fn categorical_and_dirichlet_events() -> Result<()> {
    let dev = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(17);

    let logits = Tensor::new(&[[0f64, 0., 0.], [0., 1f64.ln(), 2f64.ln()]], &dev)?;
    let cat = Categorical::new(logits)?;
    assert_eq!(cat.num_categories(), 3);
    assert_eq!(cat.batch_shape(), vec![2]);
    let lp = cat
        .log_prob(&Tensor::new(&[1u32, 2], &dev)?)?
        .to_vec1::<f64>()?;
    assert_abs_diff_eq!(lp[0], (1.0f64 / 3.0).ln(), epsilon = 1e-8);
    assert_abs_diff_eq!(lp[1], (2.0f64 / 4.0).ln(), epsilon = 1e-8);

    let dir = Dirichlet::new(Tensor::new(&[1f32, 2., 3.], &dev)?)?;
    let draws = dir.sample(&[4], &mut rng)?;
    assert_eq!(draws.dims(), &[4, 3]);
    for row in draws.to_vec2::<f32>()? {
        assert_abs_diff_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }
    assert_eq!(dir.log_prob(&draws)?.dims(), &[4]);
    Ok(())
}
