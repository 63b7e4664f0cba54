use anyhow::Result;
use clap::Parser;
use lupin::cli::{demos, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::BetaBernoulli(args) => {
            demos::run_beta_bernoulli(args)?;
        }
        Commands::NormalHmc(args) => {
            demos::run_normal_hmc(args)?;
        }
        Commands::MixtureEm(args) => {
            demos::run_mixture(args)?;
        }
        Commands::Gan1d(args) => {
            demos::run_gan(args)?;
        }
    }

    Ok(())
}
