//! Dummy upload sequences.
//!
//! Once per foreground session, if the current opportunity window is open, a
//! sequence of fake uploads starts after a random delay. Each request is
//! padded to the size of a genuine upload. After every request the sequence
//! continues with a configured probability, so the number of requests looks
//! like the number a user uploading real keys would produce.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calendar::{std_duration_from_secs, Timestamp};
use crate::config::{ConfigProvider, Configuration};
use crate::error::StoreError;
use crate::network::{NetworkClient, NetworkRequest};
use crate::random::RandomnessPort;
use crate::state::StateUpdate;
use crate::store::StoreHandle;
use crate::window::OpportunityWindow;

use super::IngestionState;

fn next_window(config: &Configuration, rng: &dyn RandomnessPort, now: Timestamp) -> OpportunityWindow {
    let delay = rng.exponential(config.dummy_ingestion_mean_stochastic_delay);
    OpportunityWindow::starting_after(now, delay, config.dummy_ingestion_window_duration)
}

/// Recompute the window once the current one is over.
pub fn update_dummy_ingestion_window(
    state: &IngestionState,
    config: &Configuration,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> Option<StateUpdate> {
    if !state.dummy_traffic_window.has_ended_before(now) {
        return None;
    }
    let window = next_window(config, rng, now);
    debug!(window_start = %window.window_start, "dummy ingestion window recomputed");
    Some(StateUpdate::SetDummyIngestionWindow(window))
}

/// What a foreground session should do about dummy traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePlan {
    pub updates: Vec<StateUpdate>,
    /// Seconds until the sequence starts, if one was scheduled.
    pub start_delay: Option<f64>,
}

/// Schedule at most one sequence per session.
pub fn schedule_if_necessary(
    state: &IngestionState,
    config: &Configuration,
    rng: &dyn RandomnessPort,
    now: Timestamp,
) -> SequencePlan {
    if state.dummy_traffic_sequence_scheduled_in_session {
        return SequencePlan {
            updates: Vec::new(),
            start_delay: None,
        };
    }

    let mut updates = vec![StateUpdate::SetDummyTrafficSequenceCancelled(false)];
    if !state.dummy_traffic_window.contains(now) {
        return SequencePlan {
            updates,
            start_delay: None,
        };
    }

    let start_delay = rng.exponential(config.dummy_ingestion_average_start_up_delay);
    updates.push(StateUpdate::SetDummyTrafficSequenceScheduled(true));
    SequencePlan {
        updates,
        start_delay: Some(start_delay),
    }
}

/// Whether a sequence goes on after its `execution_index`-th request. A roll
/// equal to the threshold stops it.
pub fn should_continue(config: &Configuration, execution_index: usize, roll: f64) -> bool {
    roll < config.dummy_request_probability(execution_index)
}

/// The user opened the genuine upload flow.
pub fn cancel_sequence() -> Vec<StateUpdate> {
    vec![StateUpdate::SetDummyTrafficSequenceCancelled(true)]
}

/// The app went to the background.
pub fn end_session() -> Vec<StateUpdate> {
    abandon_sequence()
}

/// The task running the sequence is gone before it finished, e.g. the
/// process is exiting. A later session may schedule again.
pub fn abandon_sequence() -> Vec<StateUpdate> {
    vec![
        StateUpdate::SetDummyTrafficSequenceScheduled(false),
        StateUpdate::SetDummyTrafficSequenceCancelled(true),
    ]
}

/// A running dummy sequence. It only talks to the state through the store,
/// re-reading it after every suspension.
#[derive(Clone)]
pub struct DummyTrafficSequence {
    store: StoreHandle,
    config: Arc<ConfigProvider>,
    rng: Arc<dyn RandomnessPort>,
    network: Arc<dyn NetworkClient>,
}

impl DummyTrafficSequence {
    pub fn new(
        store: StoreHandle,
        config: Arc<ConfigProvider>,
        rng: Arc<dyn RandomnessPort>,
        network: Arc<dyn NetworkClient>,
    ) -> Self {
        Self {
            store,
            config,
            rng,
            network,
        }
    }

    pub fn spawn(self, start_delay: f64) -> JoinHandle<Result<usize, StoreError>> {
        tokio::spawn(async move { self.run(start_delay).await })
    }

    /// Wait `start_delay` seconds, then send requests until cancelled or a
    /// roll fails. Returns the number of requests sent.
    pub async fn run(&self, start_delay: f64) -> Result<usize, StoreError> {
        tokio::time::sleep(std_duration_from_secs(start_delay)).await;

        let config = self.config.snapshot();
        let window = next_window(&config, self.rng.as_ref(), self.rng.now());
        let sequence_id = Uuid::new_v4();
        debug!(%sequence_id, window_start = %window.window_start, "dummy traffic sequence started");
        self.store
            .apply(vec![StateUpdate::SetDummyIngestionWindow(window)])
            .await?;

        let sent = self.send_until_stopped().await;
        self.store
            .apply(vec![StateUpdate::SetDummyTrafficSequenceScheduled(false)])
            .await?;

        let sent = sent?;
        info!(%sequence_id, requests_sent = sent, "dummy traffic sequence finished");
        Ok(sent)
    }

    async fn send_until_stopped(&self) -> Result<usize, StoreError> {
        let mut execution_index = 0;
        let mut sent = 0;
        loop {
            if self.store.snapshot().await?.ingestion.is_dummy_traffic_sequence_cancelled {
                debug!(requests_sent = sent, "dummy traffic sequence cancelled");
                return Ok(sent);
            }

            let config = self.config.snapshot();
            self.send_one(&config).await;
            sent += 1;

            if !should_continue(&config, execution_index, self.rng.uniform()) {
                return Ok(sent);
            }

            let delay = self
                .rng
                .exponential(config.dummy_ingestion_average_request_waiting_time);
            tokio::time::sleep(std_duration_from_secs(delay)).await;
            execution_index += 1;
        }
    }

    async fn send_one(&self, config: &Configuration) {
        let request = config
            .endpoints
            .ingestion_url()
            .map_err(|e| e.to_string())
            .and_then(|base| {
                NetworkRequest::dummy_ingestion(&base, config.ingestion_request_target_size)
                    .map_err(|e| e.to_string())
            });
        let result = match request {
            Ok(request) => self.network.send(request).await.map_err(|e| e.to_string()),
            Err(e) => Err(e),
        };
        if let Err(error) = result {
            debug!(%error, "dummy ingestion request failed");
        }
    }
}
