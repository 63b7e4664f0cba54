use std::collections::HashSet;
use std::sync::Arc;

use lupin::candle_core::{DType, Device, Tensor, Var};
use lupin::candle_nn::{Activation, Linear, VarBuilder, VarMap};
use lupin::inference::{GanConfig, GanInference, GanObjective, Inference, Observed};
use lupin::layers::{mlp, StackLayers};
use lupin::model::{Model, Value};
use lupin::{Error, Result};

struct Setup {
    model: Arc<Model>,
    x_gen: Value,
    gen_varmap: VarMap,
}

/// x = G(ε), ε ~ N(0, 1) of shape [batch, 1]
fn generator(batch: usize) -> Result<Setup> {
    let dev = Device::Cpu;
    let mut model = Model::new(dev.clone(), 21);
    let zero = model.scalar(0.0)?;
    let one = model.scalar(1.0)?;
    let eps = model
        .normal(zero, one)
        .sample_shape(&[batch, 1])
        .name("eps")
        .build()?;
    let gen_varmap = VarMap::new();
    let net = mlp(
        &[1, 8, 1],
        Activation::Relu,
        VarBuilder::from_varmap(&gen_varmap, DType::F32, &dev),
    )?;
    let x_gen = model.apply(eps.value(), net, &gen_varmap)?;
    Ok(Setup {
        model: Arc::new(model),
        x_gen,
        gen_varmap,
    })
}

fn discriminator(varmap: &VarMap) -> Result<StackLayers<Linear>> {
    mlp(
        &[1, 8, 1],
        Activation::Relu,
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu),
    )
}

fn values(vars: &[Var]) -> Result<Vec<Vec<f32>>> {
    vars.iter()
        .map(|v| Ok(v.as_tensor().flatten_all()?.to_vec1::<f32>()?))
        .collect()
}

fn real_batch(batch: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..batch).map(|i| 4.0 + 0.1 * i as f32).collect();
    Ok(Tensor::from_vec(data, (batch, 1), &Device::Cpu)?)
}

#[test]
fn generator_and_discriminator_update_separately() -> Result<()> {
    let batch = 16;
    let Setup { model, x_gen, .. } = generator(batch)?;
    let disc_varmap = VarMap::new();
    let disc = discriminator(&disc_varmap)?;

    let mut gan = GanInference::new(
        model,
        vec![(x_gen, Observed::Tensor(real_batch(batch)?))],
        disc,
        &disc_varmap,
        GanConfig::new(1e-2, 1e-2),
    )?;

    let gen_vars = gan.trainable_vars()?;
    let disc_vars = gan.discriminator_vars().to_vec();
    assert!(!gen_vars.is_empty());
    assert!(!disc_vars.is_empty());
    let gen_ids: HashSet<_> = gen_vars.iter().map(|v| v.id()).collect();
    assert!(disc_vars.iter().all(|v| !gen_ids.contains(&v.id())));

    assert!(matches!(gan.update(), Err(Error::NotInitialized { .. })));
    gan.initialize()?;

    let gen_before = values(&gen_vars)?;
    let disc_before = values(&disc_vars)?;
    let diag = gan.update()?;
    assert!(diag.loss.is_finite());
    assert!(diag.disc_loss.is_some_and(|l| l.is_finite()));
    assert_ne!(values(&gen_vars)?, gen_before);
    assert_ne!(values(&disc_vars)?, disc_before);
    Ok(())
}

#[test]
fn shared_variables_are_rejected() -> Result<()> {
    let batch = 4;
    let Setup {
        model,
        x_gen,
        gen_varmap,
    } = generator(batch)?;
    // a discriminator registered on the generator's own map
    let disc = mlp(
        &[1, 8, 1],
        Activation::Relu,
        VarBuilder::from_varmap(&gen_varmap, DType::F32, &Device::Cpu).pp("disc"),
    )?;

    let res = GanInference::new(
        model,
        vec![(x_gen, Observed::Tensor(real_batch(batch)?))],
        disc,
        &gen_varmap,
        GanConfig::default(),
    );
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn wasserstein_critic_stays_clipped() -> Result<()> {
    let batch = 8;
    let Setup { model, x_gen, .. } = generator(batch)?;
    let disc_varmap = VarMap::new();
    let disc = discriminator(&disc_varmap)?;
    let clip = 0.01;

    let mut gan = GanInference::new(
        model,
        vec![(x_gen, Observed::Tensor(real_batch(batch)?))],
        disc,
        &disc_varmap,
        GanConfig {
            disc_steps: 3,
            objective: GanObjective::Wasserstein { clip },
            ..GanConfig::new(1e-3, 5e-2)
        },
    )?;
    gan.initialize()?;
    for _ in 0..5 {
        gan.update()?;
    }
    for w in values(gan.discriminator_vars())?.into_iter().flatten() {
        assert!(w.abs() <= clip as f32 + 1e-6);
    }
    Ok(())
}

#[test]
fn fed_real_data_must_match_placeholder() -> Result<()> {
    let batch = 4;
    let dev = Device::Cpu;
    let mut model = Model::new(dev.clone(), 3);
    let zero = model.scalar(0.0)?;
    let one = model.scalar(1.0)?;
    let eps = model.normal(zero, one).sample_shape(&[batch, 1]).name("eps").build()?;
    let gen_varmap = VarMap::new();
    let net = mlp(
        &[1, 4, 1],
        Activation::Relu,
        VarBuilder::from_varmap(&gen_varmap, DType::F32, &dev),
    )?;
    let x_gen = model.apply(eps.value(), net, &gen_varmap)?;
    let x_real = model.placeholder("x_real", &[batch, 1])?;

    let disc_varmap = VarMap::new();
    let mut gan = GanInference::new(
        Arc::new(model),
        vec![(x_gen, Observed::Value(x_real))],
        discriminator(&disc_varmap)?,
        &disc_varmap,
        GanConfig::default(),
    )?;
    gan.initialize()?;

    assert!(matches!(gan.update(), Err(Error::UnfedPlaceholder(_))));
    assert!(gan.feed(x_real, real_batch(batch + 1)?).is_err());
    gan.feed(x_real, real_batch(batch)?)?;
    assert!(gan.update()?.loss.is_finite());
    Ok(())
}
