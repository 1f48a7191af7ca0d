use clap::Subcommand;
use exposure_core::UserEvent;

use super::{describe_status, CliResult, NetworkArgs, Session};

#[derive(Subcommand)]
pub enum EventAction {
    /// Dismiss the current risk or positive alert
    Dismiss {
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Confirm recovery after a positive diagnosis
    Recover {
        #[command(flatten)]
        network: NetworkArgs,
    },
}

pub async fn run(action: EventAction) -> CliResult {
    let (event, network) = match action {
        EventAction::Dismiss { network } => (UserEvent::AlertDismissal, network),
        EventAction::Recover { network } => (UserEvent::RecoverConfirmed, network),
    };

    let session = Session::open(network)?;
    let before = session.app.state().await?.user.covid_status;
    let after = session.app.user_event(event).await?.user.covid_status;
    session.report_side_effects();

    if before == after {
        println!("status unchanged: {}", describe_status(&after));
    } else {
        println!("{} -> {}", describe_status(&before), describe_status(&after));
    }
    Ok(())
}
