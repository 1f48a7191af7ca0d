use clap::Subcommand;
use tracing::warn;

use super::{print_state, CliResult, NetworkArgs, Session};

#[derive(Subcommand)]
pub enum SessionAction {
    /// App launch: prune history and fix stale statuses
    Launch {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// App came to the foreground
    Start {
        /// Stay alive until a scheduled dummy sequence has finished; without
        /// it the sequence is dropped when the command exits
        #[arg(long)]
        wait: bool,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// App went to the background
    End {
        #[command(flatten)]
        network: NetworkArgs,
    },
}

pub async fn run(action: SessionAction) -> CliResult {
    match action {
        SessionAction::Launch { network } => {
            let session = Session::open(network)?;
            let state = session.app.launch().await?;
            session.report_side_effects();
            print_state(&state, false)?;
        }
        SessionAction::Start { wait, network } => {
            let session = Session::open(network)?;
            let state = session.app.foreground_started().await?;
            if state.ingestion.dummy_traffic_sequence_scheduled_in_session {
                println!("dummy sequence scheduled");
            }
            if wait {
                for sequence in session.app.take_sequences() {
                    match sequence.await {
                        Ok(Ok(sent)) => println!("dummy sequence sent {sent} requests"),
                        Ok(Err(e)) => warn!(error = %e, "dummy sequence aborted"),
                        Err(e) => warn!(error = %e, "dummy sequence task failed"),
                    }
                }
            } else if session.app.abandon_sequences().await? > 0 {
                println!("dummy sequence dropped (use --wait to run it)");
            }
            session.report_side_effects();
        }
        SessionAction::End { network } => {
            let session = Session::open(network)?;
            let state = session.app.foreground_ended().await?;
            session.report_side_effects();
            print_state(&state, false)?;
        }
    }
    Ok(())
}
