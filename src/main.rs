//! # Storage Benchmark - Main Entry Point
//!
//! 1. **Initialize logging**: colorized diagnostics on stderr
//! 2. **Read the description**: from `--input` or stdin
//! 3. **Build the experiment**: bound to the selected storage backend
//! 4. **Run**: every trial sequentially, in a randomized order
//! 5. **Report**: text report on stdout, optional JSON results file
//!
//! Any error aborts the whole experiment with a non-zero exit status.

use anyhow::{Context, Result};
use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use std::io::{BufReader, Write};
use storage_benchmark::{
    cli::Args,
    logging::init_logging,
    results::{log_summary, write_report, ResultsManager},
    ExperimentDescription,
};
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("Starting Storage Benchmark v{}", storage_benchmark::VERSION);

    let description = match &args.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open experiment description {}", path.display()))?;
            ExperimentDescription::read(BufReader::new(file))
        }
        None => {
            info!("Reading experiment description from stdin");
            ExperimentDescription::read(std::io::stdin().lock())
        }
    }
    .context("Failed to read experiment description")?;

    let backend = args.io_backend();
    if backend.is_simulated() {
        warn!("Using simulated {} backend; results do not reflect the device", backend);
    }
    let experiment = description
        .into_experiment(backend.clone())
        .context("Invalid experiment description")?;
    info!(
        "{} combinations x {} replays, file {}",
        experiment.config().combinations.len(),
        experiment.config().replays,
        experiment.config().environment.filepath.display()
    );

    let results_manager = args
        .output_file
        .as_deref()
        .map(|path| ResultsManager::new(path, &backend, args.seed));

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let result = experiment.run(&mut rng).context("Experiment failed")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_report(&mut out, &result).context("Failed to write report")?;
    out.flush()?;

    log_summary(&result);
    if let Some(manager) = results_manager {
        manager.finalize(experiment.config(), &result)?;
    }

    info!("Storage Benchmark completed successfully");
    Ok(())
}
