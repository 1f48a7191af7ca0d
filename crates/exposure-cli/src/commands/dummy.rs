use std::collections::BTreeMap;

use clap::Subcommand;
use exposure_core::ingestion::should_continue;
use exposure_core::{Configuration, RandomnessPort, SeededRandomness};
use serde::Serialize;

use super::CliResult;

/// Stops a run whose probabilities never let it end.
const MAX_REQUESTS_PER_RUN: usize = 1_000;

#[derive(Subcommand)]
pub enum DummyAction {
    /// Draw sequences offline with the configured probabilities
    Simulate {
        /// Number of sequences to draw
        #[arg(long, default_value_t = 1_000)]
        runs: usize,
        /// Seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    runs: usize,
    /// Requests per sequence -> number of sequences.
    histogram: BTreeMap<usize, usize>,
    mean_requests: f64,
    /// Start-up delay plus waits between requests, in seconds.
    mean_duration_secs: f64,
}

fn simulate(config: &Configuration, rng: &dyn RandomnessPort, runs: usize) -> SimulationReport {
    let mut histogram = BTreeMap::new();
    let mut total_requests = 0;
    let mut total_duration = 0.0;

    for _ in 0..runs {
        let mut duration = rng.exponential(config.dummy_ingestion_average_start_up_delay);
        let mut sent = 1;
        while sent < MAX_REQUESTS_PER_RUN && should_continue(config, sent - 1, rng.uniform()) {
            duration += rng.exponential(config.dummy_ingestion_average_request_waiting_time);
            sent += 1;
        }
        *histogram.entry(sent).or_insert(0) += 1;
        total_requests += sent;
        total_duration += duration;
    }

    let denominator = runs.max(1) as f64;
    SimulationReport {
        runs,
        histogram,
        mean_requests: total_requests as f64 / denominator,
        mean_duration_secs: total_duration / denominator,
    }
}

pub fn run(action: DummyAction) -> CliResult {
    match action {
        DummyAction::Simulate { runs, seed, json } => {
            let config = Configuration::load()?;
            let rng = SeededRandomness::new(seed, chrono::Utc::now());
            let report = simulate(&config, &rng, runs);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("Runs:           {}", report.runs);
            println!("Mean requests:  {:.2}", report.mean_requests);
            println!("Mean duration:  {:.0}s", report.mean_duration_secs);
            for (requests, count) in &report.histogram {
                println!("  {requests:>3} requests: {count}");
            }
        }
    }
    Ok(())
}
