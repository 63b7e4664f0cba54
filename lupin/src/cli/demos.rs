use std::sync::Arc;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, VarBuilder, VarMap};
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::{run_trials, CommonArgs, TrialOutcome};
use crate::compose::Composition;
use crate::inference::{
    Estimator, GanConfig, GanInference, GanObjective, Hmc, Inference, MapConfig, MapInference,
    Mappings, MonteCarlo, MonteCarloConfig, Observed, RunConfig, VariationalConfig,
    VariationalInference,
};
use crate::layers::mlp;
use crate::model::Model;
use crate::subsample::Minibatches;

fn run_config(common: &CommonArgs) -> RunConfig {
    RunConfig {
        num_iterations: common.iters,
        show_progress: common.progress && common.trials == 1,
        verbose: common.verbose,
    }
}

fn gaussian_draws(n: usize, loc: f64, sd: f64, rng: &mut StdRng) -> Vec<f32> {
    (0..n)
        .map(|_| (loc + sd * rng.sample::<f64, _>(StandardNormal)) as f32)
        .collect()
}

//////////////////////
// beta - bernoulli //
//////////////////////

#[derive(Args, Debug)]
pub struct BetaBernoulliArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, default_value = "50", help = "Number of coin flips")]
    pub n: usize,

    #[arg(long, default_value = "1.0", help = "Success probability of the simulated flips")]
    pub p_true: f64,

    #[arg(long, default_value = "20", help = "Monte Carlo samples per update")]
    pub samples: usize,

    #[arg(long, default_value = "0.05")]
    pub lr: f64,
}

/// p ~ Beta(1, 1), x_i ~ Bernoulli(p), q(p) = Beta(exp a, exp b)
pub fn beta_bernoulli_trial(args: &BetaBernoulliArgs, seed: u64) -> Result<TrialOutcome> {
    let dev = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(seed);
    let flips: Vec<f32> = (0..args.n)
        .map(|_| if rng.random::<f64>() < args.p_true { 1.0 } else { 0.0 })
        .collect();
    let num_ones: f32 = flips.iter().sum();

    let mut model = Model::new(dev.clone(), seed);
    let one = model.scalar(1.0)?;
    let p = model.beta(one, one).name("p").build()?;
    let x = model.bernoulli(p.value()).sample_shape(&[args.n]).name("x").build()?;

    let ln_a = model.param("ln_a", Tensor::zeros((), DType::F32, &dev)?)?;
    let ln_b = model.param("ln_b", Tensor::zeros((), DType::F32, &dev)?)?;
    let a = model.exp(ln_a)?;
    let b = model.exp(ln_b)?;
    let qp = model.beta(a, b).name("qp").build()?;
    let model = Arc::new(model);

    let config = VariationalConfig {
        num_samples: args.samples,
        learning_rate: args.lr,
        estimator: Estimator::ScoreFunction,
        seed,
    };
    let x_data = Tensor::from_vec(flips, args.n, &dev)?;
    let mut vi = VariationalInference::new(
        model.clone(),
        Mappings::new().latent(p, qp).data(x, x_data),
        config,
    )?;
    let report = vi.run(&run_config(&args.common))?;

    let estimate = model.mean(qp, &mut rng)?.to_scalar::<f32>()?;
    Ok(TrialOutcome {
        seed,
        estimate: vec![estimate],
        reference: vec![(1.0 + num_ones) / (2.0 + args.n as f32)],
        final_loss: report.losses.last().copied(),
        num_divergent: report.num_divergent,
        accept_rate: None,
    })
}

pub fn run_beta_bernoulli(args: &BetaBernoulliArgs) -> Result<()> {
    run_trials("beta-bernoulli", &args.common, |seed| {
        beta_bernoulli_trial(args, seed)
    })?;
    Ok(())
}

////////////////////////
// normal - normal HMC //
////////////////////////

#[derive(Args, Debug)]
pub struct NormalHmcArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, default_value = "20")]
    pub n: usize,

    #[arg(long, default_value = "1.5", help = "Mean of the simulated data")]
    pub mu_true: f64,

    #[arg(long, default_value = "0.2")]
    pub step_size: f64,

    #[arg(long, default_value = "5")]
    pub leapfrog: usize,

    #[arg(long, help = "Sample buffer length (default: iters)")]
    pub buffer: Option<usize>,
}

/// z ~ N(0, 1), x_i ~ N(z, 1), sampled by HMC into an empirical buffer
pub fn normal_hmc_trial(args: &NormalHmcArgs, seed: u64) -> Result<TrialOutcome> {
    let dev = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(seed);
    let data = gaussian_draws(args.n, args.mu_true, 1.0, &mut rng);
    let total: f32 = data.iter().sum();

    let capacity = args.buffer.unwrap_or(args.common.iters).max(1);

    let mut model = Model::new(dev.clone(), seed);
    let zero = model.scalar(0.0)?;
    let one = model.scalar(1.0)?;
    let z = model.normal(zero, one).name("z").build()?;
    let x = model.normal(z.value(), one).sample_shape(&[args.n]).name("x").build()?;
    let buffer = model.param("qz_buffer", Tensor::zeros(capacity, DType::F32, &dev)?)?;
    let qz = model.empirical(buffer).name("qz").build()?;
    let model = Arc::new(model);

    let mut hmc = MonteCarlo::new(
        model,
        Mappings::new()
            .latent(z, qz)
            .data(x, Tensor::from_vec(data, args.n, &dev)?),
        Hmc::new(args.step_size, args.leapfrog),
        MonteCarloConfig::new(seed),
    )?;
    let report = hmc.run(&run_config(&args.common))?;

    // second half of the stored chain
    let samples = hmc.samples(0)?;
    let k = samples.dim(0)?;
    let kept = samples.narrow(0, k / 2, k - k / 2)?;
    let estimate = kept.mean_all()?.to_scalar::<f32>()?;

    Ok(TrialOutcome {
        seed,
        estimate: vec![estimate],
        reference: vec![total / (args.n as f32 + 1.0)],
        final_loss: report.losses.last().copied(),
        num_divergent: report.num_divergent,
        accept_rate: report.accept_rate,
    })
}

pub fn run_normal_hmc(args: &NormalHmcArgs) -> Result<()> {
    run_trials("normal-hmc", &args.common, |seed| normal_hmc_trial(args, seed))?;
    Ok(())
}

//////////////////
// mixture - EM //
//////////////////

#[derive(Args, Debug)]
pub struct MixtureArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, default_value = "200")]
    pub n: usize,

    #[arg(long, default_value = "2.0", help = "Clusters are centered at ±mu")]
    pub mu: f64,

    #[arg(long, default_value = "10")]
    pub samples: usize,

    #[arg(long, default_value = "0.05")]
    pub lr: f64,
}

/// Two-component mixture with unit variances
///
/// μ_k ~ N(0, 10²), z_i ~ Categorical(0, 0), x_i ~ N(μ_{z_i}, 1)
///
/// E-step: variational Categorical q(z); M-step: MAP point estimates of
/// μ. Each stage reads the other's approximation as data.
pub fn mixture_trial(args: &MixtureArgs, seed: u64) -> Result<TrialOutcome> {
    let dev = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = gaussian_draws(args.n / 2, -args.mu, 1.0, &mut rng);
    data.extend(gaussian_draws(args.n - args.n / 2, args.mu, 1.0, &mut rng));

    let init_loc = [-1f32, 1.];
    // responsibilities under the initial locations
    let init_logits: Vec<f32> = data
        .iter()
        .flat_map(|&x| init_loc.iter().map(move |&m| -0.5 * (x - m) * (x - m)))
        .collect();

    let mut model = Model::new(dev.clone(), seed);
    let zero = model.scalar(0.0)?;
    let one = model.scalar(1.0)?;
    let ten = model.scalar(10.0)?;
    let mu = model.normal(zero, ten).sample_shape(&[2]).name("mu").build()?;
    let flat = model.constant(Tensor::zeros(2, DType::F32, &dev)?)?;
    let z = model.categorical(flat).sample_shape(&[args.n]).name("z").build()?;
    let loc = model.gather(mu.value(), z.value())?;
    let x = model.normal(loc, one).name("x").build()?;

    let q_logits = model.param("q_logits", Tensor::from_vec(init_logits, (args.n, 2), &dev)?)?;
    let qz = model.categorical(q_logits).name("qz").build()?;
    let q_loc = model.param("q_loc", Tensor::new(&init_loc, &dev)?)?;
    let qmu = model.point_mass(q_loc).name("qmu").build()?;
    let model = Arc::new(model);

    let x_data = Tensor::from_vec(data, args.n, &dev)?;
    let mut e_step = VariationalInference::new(
        model.clone(),
        Mappings::new()
            .latent(z, qz)
            .data(x, x_data.clone())
            .data(mu, qmu),
        VariationalConfig {
            num_samples: args.samples,
            learning_rate: args.lr,
            estimator: Estimator::ScoreFunction,
            seed,
        },
    )?;
    let mut m_step = MapInference::new(
        model.clone(),
        Mappings::new().latent(mu, qmu).data(x, x_data).data(z, qz),
        MapConfig {
            learning_rate: args.lr,
            seed: seed.wrapping_add(1),
        },
    )?;

    let report = {
        let mut comp = Composition::new()
            .stage("e-step", &mut e_step)
            .stage("m-step", &mut m_step);
        comp.initialize_all()?;
        comp.run(args.common.iters)?
    };
    let num_divergent = report.stages.iter().map(|s| s.num_divergent).sum();
    let final_loss = report
        .stages
        .last()
        .and_then(|s| s.losses.last().copied());

    let mut estimate = model.param_var(q_loc)?.as_tensor().to_vec1::<f32>()?;
    estimate.sort_by(|a, b| a.total_cmp(b));

    Ok(TrialOutcome {
        seed,
        estimate,
        reference: vec![-args.mu as f32, args.mu as f32],
        final_loss,
        num_divergent,
        accept_rate: None,
    })
}

pub fn run_mixture(args: &MixtureArgs) -> Result<()> {
    run_trials("mixture-em", &args.common, |seed| mixture_trial(args, seed))?;
    Ok(())
}

////////////
// GAN 1d //
////////////

#[derive(Args, Debug)]
pub struct GanArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, default_value = "1000", help = "Number of real data points")]
    pub n: usize,

    #[arg(long, default_value = "64")]
    pub batch: usize,

    #[arg(long, default_value = "4.0")]
    pub mu_true: f64,

    #[arg(long, default_value = "1.25")]
    pub sd_true: f64,

    #[arg(long, default_value = "16")]
    pub hidden: usize,

    #[arg(long, default_value = "0.001")]
    pub lr: f64,

    #[arg(long, default_value = "0.001")]
    pub disc_lr: f64,

    #[arg(long, help = "Wasserstein objective with weight clipping")]
    pub wasserstein: bool,

    #[arg(long, default_value = "0.01")]
    pub clip: f64,
}

/// ε ~ N(0, 1), x = G(ε) matched against N(μ, σ²) data by a
/// discriminator D; real data are streamed in minibatches
pub fn gan_trial(args: &GanArgs, seed: u64) -> Result<TrialOutcome> {
    let dev = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(seed);
    let data = gaussian_draws(args.n, args.mu_true, args.sd_true, &mut rng);
    let data = Tensor::from_vec(data, (args.n, 1), &dev)?;

    let mut model = Model::new(dev.clone(), seed);
    let zero = model.scalar(0.0)?;
    let one = model.scalar(1.0)?;
    let eps = model
        .normal(zero, one)
        .sample_shape(&[args.batch, 1])
        .name("eps")
        .build()?;
    let gen_varmap = VarMap::new();
    let generator = mlp(
        &[1, args.hidden, 1],
        Activation::Relu,
        VarBuilder::from_varmap(&gen_varmap, DType::F32, &dev),
    )?;
    let x_gen = model.apply(eps.value(), generator, &gen_varmap)?;
    let x_real = model.placeholder("x_real", &[args.batch, 1])?;
    let model = Arc::new(model);

    let disc_varmap = VarMap::new();
    let discriminator = mlp(
        &[1, args.hidden, 1],
        Activation::Relu,
        VarBuilder::from_varmap(&disc_varmap, DType::F32, &dev),
    )?;

    let objective = if args.wasserstein {
        GanObjective::Wasserstein { clip: args.clip }
    } else {
        GanObjective::Standard
    };
    let mut gan = GanInference::new(
        model.clone(),
        vec![(x_gen, Observed::Value(x_real))],
        discriminator,
        &disc_varmap,
        GanConfig {
            learning_rate: args.lr,
            disc_learning_rate: args.disc_lr,
            disc_steps: 1,
            objective,
            seed,
        },
    )?;
    gan.initialize()?;

    let config = run_config(&args.common);
    let pb = ProgressBar::new(config.num_iterations as u64);
    if !config.show_progress || config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut batches = Minibatches::new(args.n, args.batch, seed)?;
    let mut last = None;
    let mut num_divergent = 0;
    for t in 0..config.num_iterations {
        let b = t % batches.num_batches();
        if b == 0 && t > 0 {
            batches.shuffle();
        }
        gan.feed(x_real, batches.select_rows(&data, b)?)?;
        let diag = gan.update()?;
        if diag.divergent {
            num_divergent += 1;
        }
        if config.verbose && (t % 100 == 0 || t + 1 == config.num_iterations) {
            info!(
                "[{}] generator loss: {}, discriminator loss: {:?}",
                t + 1,
                diag.loss,
                diag.disc_loss
            );
        }
        last = Some(diag.loss);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut draws = vec![];
    for _ in 0..16 {
        draws.push(model.sample(x_gen, &mut rng)?);
    }
    let draws = Tensor::cat(&draws, 0)?.flatten_all()?;
    let mean = draws.mean_all()?.to_scalar::<f32>()?;
    let sd = draws
        .affine(1.0, -(mean as f64))?
        .sqr()?
        .mean_all()?
        .sqrt()?
        .to_scalar::<f32>()?;

    Ok(TrialOutcome {
        seed,
        estimate: vec![mean, sd],
        reference: vec![args.mu_true as f32, args.sd_true as f32],
        final_loss: last,
        num_divergent,
        accept_rate: None,
    })
}

pub fn run_gan(args: &GanArgs) -> Result<()> {
    run_trials("gan-1d", &args.common, |seed| gan_trial(args, seed))?;
    Ok(())
}
