use clap::Subcommand;
use exposure_core::province::Province;
use exposure_core::state::{ExposureNotificationStatus, PushNotificationStatus};
use exposure_core::{StateDb, StateUpdate, Store};

use super::{parse_snake_case, print_state, CliResult, NetworkArgs, Session};

#[derive(Subcommand)]
pub enum StateAction {
    /// Show the persisted state
    Show {
        /// Print the full state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the province reported with uploads and analytics
    Province {
        /// Two-letter province code (e.g. "BO")
        code: String,
    },
    /// Record a change of the exposure or push permission
    Permissions {
        /// e.g. "authorized_and_active", "not_authorized"
        #[arg(long)]
        exposure: Option<String>,
        /// e.g. "authorized", "denied"
        #[arg(long)]
        push: Option<String>,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Forget everything
    Reset,
}

pub async fn run(action: StateAction) -> CliResult {
    match action {
        StateAction::Show { json } => {
            let state = StateDb::open()?.load_state()?;
            print_state(&state, json)?;
        }
        StateAction::Province { code } => {
            let province: Province = code.parse()?;
            let db = StateDb::open()?;
            let (store, _task) = Store::spawn(db.load_state()?, Some(db));
            store
                .apply(vec![StateUpdate::SetProvince(Some(province.clone()))])
                .await?;
            println!("province set to {province}");
        }
        StateAction::Permissions {
            exposure,
            push,
            network,
        } => {
            let session = Session::open(network)?;
            let current = session.app.state().await?;
            let exposure = match exposure {
                Some(value) => parse_snake_case::<ExposureNotificationStatus>("exposure status", &value)?,
                None => current.environment.exposure_notification_status,
            };
            let push = match push {
                Some(value) => parse_snake_case::<PushNotificationStatus>("push status", &value)?,
                None => current.environment.push_notification_status,
            };
            let state = session.app.permissions_changed(exposure, push).await?;
            session.report_side_effects();
            print_state(&state, false)?;
        }
        StateAction::Reset => {
            StateDb::open()?.reset_state()?;
            println!("state reset");
        }
    }
    Ok(())
}
