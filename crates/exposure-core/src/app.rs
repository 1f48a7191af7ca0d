//! Wires the decision core, the state store and the effect runner together.
//!
//! Each method is one trigger: the core derives a [`Dispatch`] from the state
//! on the store task, the updates are committed in the same step and the
//! effects run afterwards. Genuine uploads and code validations are the only
//! flows whose failures reach the caller.

use std::sync::Arc;

use tracing::{info, warn};

use crate::calendar::{std_duration_from_secs, CalendarDay};
use crate::config::{ConfigProvider, ConfigurationSource};
use crate::decision::{Dispatch, ExposureCore};
use crate::effects::{EffectRunner, Ports, SequenceHandle};
use crate::error::{ConfigError, CoreError, NetworkError, Result};
use crate::exposure::ExposureDetectionOutcome;
use crate::matcher::ExposureMatcher;
use crate::network::{CunValidationBody, DataUploadBody, NetworkRequest, TemporaryExposureKey};
use crate::otp::Otp;
use crate::state::{AppState, ExposureNotificationStatus, PushNotificationStatus};
use crate::status::UserEvent;
use crate::store::StoreHandle;

pub struct ExposureApp {
    core: ExposureCore,
    runner: EffectRunner,
    store: StoreHandle,
    config: Arc<ConfigProvider>,
    ports: Ports,
}

impl ExposureApp {
    pub fn new(store: StoreHandle, config: Arc<ConfigProvider>, ports: Ports) -> Self {
        Self {
            core: ExposureCore::new(Arc::clone(&config), Arc::clone(&ports.rng)),
            runner: EffectRunner::new(store.clone(), Arc::clone(&config), ports.clone()),
            store,
            config,
            ports,
        }
    }

    pub fn core(&self) -> &ExposureCore {
        &self.core
    }

    pub async fn state(&self) -> Result<AppState> {
        Ok(self.store.snapshot().await?)
    }

    /// Dummy sequences started so far, for callers that want to await them.
    pub fn take_sequences(&self) -> Vec<SequenceHandle> {
        self.runner.take_sequences()
    }

    /// Abort the dummy sequences still held and release the session flags, so
    /// the stored state does not claim a sequence that will never run.
    /// Returns how many were dropped.
    pub async fn abandon_sequences(&self) -> Result<usize> {
        let sequences = self.runner.take_sequences();
        if sequences.is_empty() {
            return Ok(0);
        }
        for sequence in &sequences {
            sequence.abort();
        }
        self.commit(|core, state| core.on_dummy_sequences_abandoned(state))
            .await?;
        info!(count = sequences.len(), "dummy sequences abandoned");
        Ok(sequences.len())
    }

    async fn commit<F>(&self, derive: F) -> Result<AppState>
    where
        F: FnOnce(&ExposureCore, &AppState) -> Dispatch + Send + 'static,
    {
        let core = self.core.clone();
        Ok(self
            .runner
            .dispatch(move |state| derive(&core, state))
            .await?)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn launch(&self) -> Result<AppState> {
        self.commit(|core, state| core.on_app_launch(state)).await
    }

    pub async fn foreground_started(&self) -> Result<AppState> {
        self.commit(|core, state| core.on_foreground_session_started(state))
            .await
    }

    pub async fn foreground_ended(&self) -> Result<AppState> {
        self.commit(|core, state| core.on_foreground_session_ended(state))
            .await
    }

    pub async fn permissions_changed(
        &self,
        exposure: ExposureNotificationStatus,
        push: PushNotificationStatus,
    ) -> Result<AppState> {
        self.commit(move |core, state| core.on_permissions_changed(state, exposure, push))
            .await
    }

    pub async fn user_event(&self, event: UserEvent) -> Result<AppState> {
        self.commit(move |core, state| core.on_user_event(state, event))
            .await
    }

    pub async fn refresh_analytics_token(&self) -> Result<AppState> {
        self.commit(|core, state| core.on_analytics_token_check(state))
            .await
    }

    // ── Detection ────────────────────────────────────────────────────

    /// Run one detection cycle. A configuration refresh is attempted first
    /// but never holds the detection back longer than the configured timeout.
    pub async fn detect(
        &self,
        matcher: &dyn ExposureMatcher,
        source: Option<&dyn ConfigurationSource>,
    ) -> Result<ExposureDetectionOutcome> {
        if let Some(source) = source {
            let timeout = std_duration_from_secs(self.config.snapshot().configuration_refresh_timeout);
            self.config.refresh(source, timeout).await;
        }

        let state = self.store.snapshot().await?;
        let request = self.core.detection_request(&state);
        let outcome = match matcher.detect(request).await {
            Ok(outcome) => outcome,
            Err(kind) => {
                warn!(error = %kind, "exposure detection failed");
                ExposureDetectionOutcome::Error { kind }
            }
        };
        self.handle_outcome(&outcome).await?;
        Ok(outcome)
    }

    pub async fn handle_outcome(&self, outcome: &ExposureDetectionOutcome) -> Result<AppState> {
        let outcome = outcome.clone();
        self.commit(move |core, state| core.on_detection_outcome(state, &outcome))
            .await
    }

    // ── Genuine upload ───────────────────────────────────────────────

    /// The user opened the upload flow.
    pub async fn genuine_upload_started(&self) -> Result<AppState> {
        self.commit(|core, state| core.on_genuine_upload_started(state))
            .await
    }

    /// Ask the backend to authorize `otp`.
    pub async fn validate_otp(&self, otp: &Otp) -> Result<()> {
        let config = self.config.snapshot();
        let base = config.endpoints.ingestion_url()?;
        self.validate(
            NetworkRequest::otp_validation(
                &base,
                otp,
                self.core.now(),
                config.ingestion_request_target_size,
            )?,
        )
        .await
    }

    pub async fn validate_cun(&self, cun: &Otp, body: &CunValidationBody) -> Result<()> {
        let config = self.config.snapshot();
        let base = config.endpoints.ingestion_url()?;
        self.validate(
            NetworkRequest::cun_validation(
                &base,
                cun,
                body,
                self.core.now(),
                config.ingestion_request_target_size,
            )?,
        )
        .await
    }

    async fn validate(&self, request: NetworkRequest) -> Result<()> {
        let current = self.store.snapshot().await?;
        self.core.check_otp_attempt(&current)?;

        match self.ports.network.send(request).await {
            Ok(_) => {
                self.commit(|core, state| core.on_otp_validation_succeeded(state))
                    .await?;
                Ok(())
            }
            Err(NetworkError::UnauthorizedOtp) => {
                let state = self
                    .commit(|core, state| core.on_otp_validation_failed(state))
                    .await?;
                Err(self.core.otp_failure(&state).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upload diagnosis keys authorized by `otp`. Failures are returned so
    /// the user can retry.
    pub async fn upload_data(
        &self,
        otp: &Otp,
        teks: Vec<TemporaryExposureKey>,
    ) -> Result<AppState> {
        let state = self.store.snapshot().await?;
        let province = state
            .user
            .province
            .clone()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "province".into(),
                message: "must be set before uploading".into(),
            })?;
        let config = self.config.snapshot();
        let now = self.core.now();
        let body = DataUploadBody {
            teks,
            province: province.code().to_string(),
            exposure_detection_summaries: state
                .exposure_detection
                .recent_positive_exposure_results
                .iter()
                .map(|r| r.summary.clone())
                .collect(),
        };
        let request = NetworkRequest::data_upload(
            &config.endpoints.ingestion_url()?,
            otp,
            &body,
            now,
            config.ingestion_request_target_size,
        )?;
        self.ports
            .network
            .send(request)
            .await
            .map_err(CoreError::from)?;
        info!(keys = body.teks.len(), "diagnosis keys uploaded");

        let day = CalendarDay::from_timestamp(&now);
        self.commit(move |core, state| core.on_data_uploaded(state, day))
            .await
    }
}
