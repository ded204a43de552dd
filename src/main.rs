//! # Transport Benchmark - Main Entry Point
//!
//! Compares HTTP/1.1, HTTP/2 and HTTP/3 request latency and throughput
//! against one target under low-noise conditions.
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: Colorized console output plus an optional log file
//! 2. **Parse arguments**: Builds and validates one `RunConfig` per transport
//! 3. **Run benchmarks**: Each transport runs inside its own low-noise guard,
//!    separated by a reclamation pass and a settling pause
//! 4. **Report**: Prints each run's summary, a comparison table, and writes
//!    the JSON results file when one was requested
//!
//! ## Concurrency Model
//!
//! Trials are strictly sequential, so the runtime is a single-threaded tokio
//! runtime on the pinned core.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};
use transport_bench::{
    benchmark::{BenchmarkRunner, RunConfig},
    cli::Args,
    environment::{EnvironmentController, EnvironmentSettings},
    logging,
    report::{ComparisonTable, RunReport},
    results::ResultsManager,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("Starting Transport Benchmark v{}", transport_bench::VERSION);
    debug!("Configuration: {:?}", args);

    // Validate every run before touching the environment.
    let configs = args
        .selected_transports()
        .into_iter()
        .map(|kind| RunConfig::from_args(&args, kind))
        .collect::<Result<Vec<_>>>()?;

    let settings = if args.no_low_noise {
        EnvironmentSettings::disabled()
    } else {
        EnvironmentSettings {
            suspend_reclamation: true,
            pin_to_core: true,
            core: args.cpu_core,
            priority: Some(args.priority),
        }
    };
    let controller = EnvironmentController::new(settings);
    let mut results_manager = ResultsManager::new(args.output_file.as_deref());

    for (i, config) in configs.into_iter().enumerate() {
        if i > 0 {
            controller.reclaim();
            info!("Pausing {:?} before the next transport", args.pause);
            tokio::time::sleep(args.pause).await;
        }

        let kind = config.transport.kind;
        let guard = controller.prepare();
        let outcome = BenchmarkRunner::new(config).run().await;
        guard.restore();

        match outcome {
            Ok(results) => {
                println!("{}", RunReport::new(&results));
                results_manager.add_results(results);
            }
            Err(e) => {
                error!("Benchmark failed for {}: {:#}", kind, e);
                if !args.continue_on_error {
                    return Err(e);
                }
            }
        }
    }

    if results_manager.results().len() > 1 {
        println!("{}", ComparisonTable(&results_manager.comparison()));
    }
    results_manager.finalize()?;

    info!("Transport Benchmark completed");
    Ok(())
}
