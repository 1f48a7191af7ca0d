pub mod config;
pub mod detect;
pub mod dummy;
pub mod event;
pub mod otp;
pub mod session;
pub mod state;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use exposure_core::device::RandomDeviceToken;
use exposure_core::network::{NetworkClient, RecordingNetworkClient, ReqwestNetworkClient};
use exposure_core::notification::InMemoryNotificationScheduler;
use exposure_core::{
    AppState, ConfigProvider, Configuration, CovidStatus, ExposureApp, Ports, StateDb, Store,
    SystemRandomness,
};

pub type CliResult = Result<(), Box<dyn Error>>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Args, Debug, Clone, Copy, Default)]
pub struct NetworkArgs {
    /// Record outgoing requests instead of sending them
    #[arg(long)]
    pub offline: bool,
}

/// An app wired to the on-disk state and configuration.
pub struct Session {
    pub app: ExposureApp,
    pub notifications: Arc<InMemoryNotificationScheduler>,
    pub recorded: Option<Arc<RecordingNetworkClient>>,
}

impl Session {
    /// Must be called inside the tokio runtime: the state store is a task.
    pub fn open(network: NetworkArgs) -> Result<Self, Box<dyn Error>> {
        let config = Configuration::load()?;
        let db = StateDb::open()?;
        let initial = db.load_state()?;
        let (store, _task) = Store::spawn(initial, Some(db));

        let recorded = network
            .offline
            .then(|| Arc::new(RecordingNetworkClient::new()));
        let client: Arc<dyn NetworkClient> = match &recorded {
            Some(recording) => recording.clone(),
            None => Arc::new(ReqwestNetworkClient::new(REQUEST_TIMEOUT)?),
        };
        let notifications = Arc::new(InMemoryNotificationScheduler::new());
        let ports = Ports {
            network: client,
            notifications: notifications.clone(),
            device_token: Arc::new(RandomDeviceToken::default()),
            rng: Arc::new(SystemRandomness),
        };

        Ok(Self {
            app: ExposureApp::new(store, Arc::new(ConfigProvider::new(config)), ports),
            notifications,
            recorded,
        })
    }

    /// Print what this run scheduled and, offline, what it would have sent.
    pub fn report_side_effects(&self) {
        for notification in self.notifications.pending() {
            println!(
                "notification scheduled: {} (in {}s)",
                notification.id(),
                notification.after_secs
            );
        }
        if let Some(recorded) = &self.recorded {
            for request in recorded.sent() {
                println!(
                    "request recorded: {:?} {} ({} bytes)",
                    request.kind,
                    request.url,
                    request.wire_size()
                );
            }
        }
    }
}

pub fn describe_status(status: &CovidStatus) -> String {
    match status {
        CovidStatus::Neutral => "neutral".to_string(),
        CovidStatus::Risk { last_contact_day } => format!("risk (last contact {last_contact_day})"),
        CovidStatus::Positive { last_upload_day } => {
            format!("positive (uploaded {last_upload_day})")
        }
    }
}

pub fn print_state(state: &AppState, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    let province = state
        .user
        .province
        .as_ref()
        .map(|p| p.code().to_string())
        .unwrap_or_else(|| "-".to_string());
    let last_detection = state
        .exposure_detection
        .last_detection_date
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());

    println!("Status:          {}", describe_status(&state.user.covid_status));
    println!("Province:        {province}");
    println!(
        "Exposure status: {}",
        serde_json::to_value(state.environment.exposure_notification_status)?
            .as_str()
            .unwrap_or_default()
    );
    println!("Last detection:  {last_detection}");
    println!(
        "Positive results kept: {}",
        state.exposure_detection.recent_positive_exposure_results.len()
    );
    println!(
        "Dummy window:    {} (+{}s)",
        state.ingestion.dummy_traffic_window.window_start.to_rfc3339(),
        state.ingestion.dummy_traffic_window.window_duration
    );
    println!(
        "Failed code attempts: {}",
        state.ingestion.otp_upload_failed_attempts
    );
    let token = match &state.analytics.token {
        Some(token) => format!("{:?}, expires {}", token.status, token.expiration.to_rfc3339()),
        None => "none".to_string(),
    };
    println!("Analytics token: {token}");
    Ok(())
}

/// Parse a snake_case enum name the way the state file stores it.
pub fn parse_snake_case<T: serde::de::DeserializeOwned>(
    what: &str,
    value: &str,
) -> Result<T, Box<dyn Error>> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unknown {what}: {value}").into())
}
