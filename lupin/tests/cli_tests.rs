use anyhow::Result;
use clap::Parser;
use lupin::cli::demos::{beta_bernoulli_trial, mixture_trial, normal_hmc_trial};
use lupin::cli::{
    run_trials, BetaBernoulliArgs, Cli, Commands, CommonArgs, MixtureArgs, NormalHmcArgs,
};

fn common(iters: usize) -> CommonArgs {
    CommonArgs {
        iters,
        seed: 7,
        trials: 1,
        json: None,
        progress: false,
        verbose: false,
    }
}

#[test]
fn parse_subcommand_flags() -> Result<()> {
    let cli = Cli::try_parse_from([
        "lupin",
        "normal-hmc",
        "--iters",
        "50",
        "--trials",
        "3",
        "--leapfrog",
        "7",
    ])?;
    match cli.command {
        Commands::NormalHmc(args) => {
            assert_eq!(args.common.iters, 50);
            assert_eq!(args.common.trials, 3);
            assert_eq!(args.leapfrog, 7);
            assert_eq!(args.n, 20);
        }
        _ => anyhow::bail!("parsed the wrong subcommand"),
    }
    assert!(Cli::try_parse_from(["lupin", "no-such-demo"]).is_err());
    Ok(())
}

#[test]
fn trials_are_written_as_json() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("beta.json");
    let args = BetaBernoulliArgs {
        common: CommonArgs {
            trials: 2,
            json: Some(path.clone()),
            ..common(30)
        },
        n: 10,
        p_true: 1.0,
        samples: 4,
        lr: 0.05,
    };

    let outcomes = run_trials("beta-bernoulli", &args.common, |seed| {
        beta_bernoulli_trial(&args, seed)
    })?;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].seed, 7);
    assert_eq!(outcomes[1].seed, 8);

    let json: serde_json::Value = serde_json::from_reader(std::fs::File::open(&path)?)?;
    let rows = json.as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2);
    for row in rows.iter() {
        assert!(row["estimate"].is_array());
        // 10 heads under a Beta(1, 1) prior
        let reference = row["reference"][0].as_f64().unwrap_or_default();
        assert!((reference - 11.0 / 12.0).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn zero_trials_is_an_error() {
    let args = common(10);
    let res = run_trials("noop", &CommonArgs { trials: 0, ..args }, |_| {
        anyhow::bail!("never called")
    });
    assert!(res.is_err());
}

#[test]
fn hmc_demo_reports_acceptance() -> Result<()> {
    let args = NormalHmcArgs {
        common: common(200),
        n: 20,
        mu_true: 1.5,
        step_size: 0.2,
        leapfrog: 5,
        buffer: None,
    };
    let out = normal_hmc_trial(&args, 3)?;
    assert_eq!(out.estimate.len(), 1);
    assert!(out.accept_rate.is_some_and(|a| a > 0.0));
    assert!((out.estimate[0] - out.reference[0]).abs() < 0.5);
    Ok(())
}

#[test]
fn mixture_demo_separates_clusters() -> Result<()> {
    let args = MixtureArgs {
        common: common(150),
        n: 60,
        mu: 2.0,
        samples: 5,
        lr: 0.05,
    };
    let out = mixture_trial(&args, 1)?;
    assert_eq!(out.estimate.len(), 2);
    assert!(out.estimate[0] < 0.0 && out.estimate[1] > 0.0);
    Ok(())
}
