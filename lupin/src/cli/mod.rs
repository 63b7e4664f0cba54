pub mod demos;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use rayon::prelude::*;
use serde::Serialize;

pub use demos::{BetaBernoulliArgs, GanArgs, MixtureArgs, NormalHmcArgs};

#[derive(Parser)]
#[command(name = "lupin")]
#[command(about = "Compositional probabilistic inference on candle")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Variational inference on a Beta-Bernoulli model
    BetaBernoulli(BetaBernoulliArgs),
    /// Hamiltonian Monte Carlo on a Normal-Normal model
    NormalHmc(NormalHmcArgs),
    /// Variational EM on a two-component Gaussian mixture
    MixtureEm(MixtureArgs),
    /// Adversarial fit of a 1-D Gaussian
    Gan1d(GanArgs),
}

/// Flags shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = "1000")]
    pub iters: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, default_value = "1", help = "Independent repetitions, seeds seed..seed+trials")]
    pub trials: usize,

    #[arg(long, help = "Write per-trial outcomes as JSON")]
    pub json: Option<PathBuf>,

    #[arg(long, help = "Show a progress bar")]
    pub progress: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

/// Result of one trial of a demo
#[derive(Debug, Clone, Serialize)]
pub struct TrialOutcome {
    pub seed: u64,
    /// posterior summary estimated by the algorithm
    pub estimate: Vec<f32>,
    /// closed-form or generating value the estimate is compared with
    pub reference: Vec<f32>,
    pub final_loss: Option<f32>,
    pub num_divergent: usize,
    pub accept_rate: Option<f32>,
}

/// Run `trial` for seeds `seed..seed+trials` on the rayon pool, log
/// the outcomes and optionally write them as JSON
pub fn run_trials<F>(name: &str, common: &CommonArgs, trial: F) -> Result<Vec<TrialOutcome>>
where
    F: Fn(u64) -> Result<TrialOutcome> + Sync,
{
    if common.trials == 0 {
        anyhow::bail!("--trials must be at least 1");
    }

    let outcomes = (0..common.trials as u64)
        .into_par_iter()
        .map(|k| trial(common.seed + k))
        .collect::<Result<Vec<_>>>()?;

    for out in outcomes.iter() {
        info!(
            "[{}] seed {}: estimate {:?}, reference {:?}",
            name, out.seed, out.estimate, out.reference
        );
        println!(
            "{}\tseed={}\testimate={:?}\treference={:?}",
            name, out.seed, out.estimate, out.reference
        );
    }

    if let Some(path) = common.json.as_ref() {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &outcomes)?;
        info!("Saved {} outcomes to {:?}", outcomes.len(), path);
    }
    Ok(outcomes)
}
