//! Executes the effects requested by the core.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::analytics::{self, AnalyticsRecord, AnalyticsToken, AnalyticsTokenStatus};
use crate::config::ConfigProvider;
use crate::decision::{Dispatch, Effect};
use crate::device::DeviceTokenProvider;
use crate::error::StoreError;
use crate::ingestion::DummyTrafficSequence;
use crate::network::{NetworkClient, NetworkRequest};
use crate::notification::NotificationScheduler;
use crate::random::RandomnessPort;
use crate::state::AppState;
use crate::store::StoreHandle;

/// External collaborators the effects talk to.
#[derive(Clone)]
pub struct Ports {
    pub network: Arc<dyn NetworkClient>,
    pub notifications: Arc<dyn NotificationScheduler>,
    pub device_token: Arc<dyn DeviceTokenProvider>,
    pub rng: Arc<dyn RandomnessPort>,
}

pub type SequenceHandle = JoinHandle<Result<usize, StoreError>>;

pub struct EffectRunner {
    store: StoreHandle,
    config: Arc<ConfigProvider>,
    ports: Ports,
    sequences: Mutex<Vec<SequenceHandle>>,
}

impl EffectRunner {
    pub fn new(store: StoreHandle, config: Arc<ConfigProvider>, ports: Ports) -> Self {
        Self {
            store,
            config,
            ports,
            sequences: Mutex::new(Vec::new()),
        }
    }

    /// Derive a dispatch on the store task and commit its updates, then run
    /// the effects in order.
    pub async fn dispatch<F>(&self, derive: F) -> Result<AppState, StoreError>
    where
        F: FnOnce(&AppState) -> Dispatch + Send + 'static,
    {
        let (state, effects) = self.store.update(derive).await?;
        for effect in effects {
            self.run(effect).await;
        }
        Ok(state)
    }

    pub async fn run(&self, effect: Effect) {
        match effect {
            Effect::ScheduleNotification { notification } => {
                debug!(id = notification.id(), "scheduling notification");
                self.ports.notifications.schedule(notification);
            }
            Effect::CancelNotifications { kinds } => {
                let ids: Vec<&str> = kinds.iter().map(|k| k.id()).collect();
                self.ports.notifications.cancel(&ids);
            }
            Effect::SendAnalytics { record, token } => self.send_analytics(record, &token).await,
            Effect::ValidateAnalyticsToken { token } => self.validate_analytics_token(token).await,
            Effect::StartDummySequence { start_delay } => {
                let handle = DummyTrafficSequence::new(
                    self.store.clone(),
                    Arc::clone(&self.config),
                    Arc::clone(&self.ports.rng),
                    Arc::clone(&self.ports.network),
                )
                .spawn(start_delay);
                self.lock_sequences().push(handle);
            }
        }
    }

    /// Handles of the dummy sequences spawned so far.
    pub fn take_sequences(&self) -> Vec<SequenceHandle> {
        std::mem::take(&mut *self.lock_sequences())
    }

    async fn send_analytics(&self, record: AnalyticsRecord, token: &str) {
        let config = self.config.snapshot();
        let base = match config.endpoints.analytics_url() {
            Ok(base) => base,
            Err(e) => {
                warn!(error = %e, "invalid analytics endpoint");
                return;
            }
        };
        let result = match NetworkRequest::analytics(&base, &record, token) {
            Ok(request) => self.ports.network.send(request).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(is_dummy = record.is_dummy, "analytics record sent"),
            Err(e) => debug!(error = %e, is_dummy = record.is_dummy, "analytics record failed"),
        }
    }

    /// Ask the backend to bind `token` to this device. `201` validates it,
    /// `202` leaves it pending for the next attempt; anything else is dropped.
    async fn validate_analytics_token(&self, token: AnalyticsToken) {
        let device_token = match self.ports.device_token.device_token().await {
            Ok(device_token) => device_token,
            Err(e) => {
                debug!(error = %e, "device token unavailable, analytics token left pending");
                return;
            }
        };
        let config = self.config.snapshot();
        let request = config
            .endpoints
            .analytics_url()
            .map_err(|e| e.to_string())
            .and_then(|base| {
                NetworkRequest::analytics_token_validation(&base, &token.token, &device_token)
                    .map_err(|e| e.to_string())
            });
        let response = match request {
            Ok(request) => self.ports.network.send(request).await.map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };
        let status = match response.map(|r| r.status) {
            Ok(201) => AnalyticsTokenStatus::Validated,
            Ok(202) => AnalyticsTokenStatus::Generated,
            Ok(other) => {
                debug!(status = other, "unexpected analytics token answer");
                return;
            }
            Err(error) => {
                debug!(%error, "analytics token validation failed");
                return;
            }
        };

        let verdict = token.with_status(status);
        let result = self
            .store
            .update(move |state| Dispatch {
                updates: analytics::token_validated(&state.analytics, verdict)
                    .into_iter()
                    .collect(),
                effects: Vec::new(),
            })
            .await;
        match result {
            Ok(_) => debug!(?status, "analytics token validation answered"),
            Err(e) => warn!(error = %e, "analytics token verdict not stored"),
        }
    }

    fn lock_sequences(&self) -> std::sync::MutexGuard<'_, Vec<SequenceHandle>> {
        self.sequences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
