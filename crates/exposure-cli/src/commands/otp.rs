use std::path::{Path, PathBuf};

use clap::Subcommand;
use exposure_core::network::{CunValidationBody, TemporaryExposureKey};
use exposure_core::otp::Otp;
use exposure_core::CalendarDay;

use super::{describe_status, CliResult, NetworkArgs, Session};

#[derive(Subcommand)]
pub enum OtpAction {
    /// Print a fresh one-time code
    Generate,
    /// Check a code's format without contacting the backend
    Check {
        code: String,
    },
    /// Ask the backend to authorize a one-time code
    Validate {
        code: String,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Ask the backend to authorize a CUN issued by a health authority
    ValidateCun {
        code: String,
        /// Last eight digits of the health insurance card
        #[arg(long)]
        last_his_number: String,
        /// YYYY-MM-DD
        #[arg(long)]
        symptoms_started_on: String,
        #[command(flatten)]
        network: NetworkArgs,
    },
    /// Upload diagnosis keys authorized by a validated code
    Upload {
        code: String,
        /// JSON array of keys ({key_data, rolling_start_number, rolling_period})
        #[arg(long)]
        keys: PathBuf,
        /// The code is a CUN
        #[arg(long)]
        cun: bool,
        #[command(flatten)]
        network: NetworkArgs,
    },
}

fn read_keys(path: &Path) -> Result<Vec<TemporaryExposureKey>, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn run(action: OtpAction) -> CliResult {
    match action {
        OtpAction::Generate => {
            let otp = Otp::generate(&mut rand::thread_rng());
            println!("{}", otp.code_parts().join(" "));
        }
        OtpAction::Check { code } => {
            let otp: Otp = code.parse()?;
            println!("valid code: {}", otp.code_parts().join(" "));
        }
        OtpAction::Validate { code, network } => {
            let otp: Otp = code.parse()?;
            let session = Session::open(network)?;
            let result = session.app.validate_otp(&otp).await;
            session.report_side_effects();
            result?;
            println!("code authorized");
        }
        OtpAction::ValidateCun {
            code,
            last_his_number,
            symptoms_started_on,
            network,
        } => {
            let symptoms_started_on = CalendarDay::parse(&symptoms_started_on)
                .ok_or_else(|| format!("invalid date: {symptoms_started_on}"))?;
            let body = CunValidationBody {
                last_his_number,
                symptoms_started_on,
            };
            let session = Session::open(network)?;
            let result = session.app.validate_cun(&Otp::cun(&code), &body).await;
            session.report_side_effects();
            result?;
            println!("code authorized");
        }
        OtpAction::Upload {
            code,
            keys,
            cun,
            network,
        } => {
            let otp = if cun { Otp::cun(&code) } else { code.parse()? };
            let teks = read_keys(&keys)?;
            let session = Session::open(network)?;
            session.app.genuine_upload_started().await?;
            let state = session.app.upload_data(&otp, teks).await?;
            session.report_side_effects();
            println!("uploaded; status {}", describe_status(&state.user.covid_status));
        }
    }
    Ok(())
}
