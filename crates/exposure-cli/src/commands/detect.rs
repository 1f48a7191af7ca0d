use std::path::{Path, PathBuf};

use clap::Subcommand;
use exposure_core::matcher::ReplayMatcher;
use exposure_core::{Configuration, ExposureDetectionOutcome, FileConfigurationSource};

use super::{describe_status, print_state, CliResult, NetworkArgs, Session};

#[derive(Subcommand)]
pub enum DetectAction {
    /// Show the parameters the next detection cycle would use
    Request,
    /// Run detection cycles with outcomes read from a JSON file
    Replay {
        /// One outcome object or an array of them
        file: PathBuf,
        /// Print the resulting state as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        network: NetworkArgs,
    },
}

fn read_outcomes(file: &Path) -> Result<Vec<ExposureDetectionOutcome>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    let outcomes = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(outcomes)
}

fn outcome_label(outcome: &ExposureDetectionOutcome) -> String {
    match outcome {
        ExposureDetectionOutcome::NoDetectionNecessary => "no detection necessary".to_string(),
        ExposureDetectionOutcome::Error { kind } => format!("error: {kind}"),
        ExposureDetectionOutcome::PartialDetection { summary, .. } => {
            format!("partial detection, {} matched keys", summary.matched_key_count)
        }
        ExposureDetectionOutcome::FullDetection { exposure_infos, .. } => {
            format!("full detection, {} contacts", exposure_infos.len())
        }
    }
}

pub async fn run(action: DetectAction) -> CliResult {
    match action {
        DetectAction::Request => {
            let session = Session::open(NetworkArgs { offline: true })?;
            let state = session.app.state().await?;
            let request = session.app.core().detection_request(&state);
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        DetectAction::Replay {
            file,
            json,
            network,
        } => {
            let outcomes = read_outcomes(&file)?;
            let session = Session::open(network)?;
            let source = FileConfigurationSource {
                path: Configuration::path()?,
            };
            let cycles = outcomes.len();
            let matcher = ReplayMatcher::new(outcomes.into_iter().map(Ok));

            for _ in 0..cycles {
                let outcome = session.app.detect(&matcher, Some(&source)).await?;
                let status = session.app.state().await?.user.covid_status;
                println!("{} -> {}", outcome_label(&outcome), describe_status(&status));
            }

            session.report_side_effects();
            print_state(&session.app.state().await?, json)?;
        }
    }
    Ok(())
}
