//! Single owner of [`AppState`].
//!
//! The state lives inside one task. Handlers send batches of
//! [`StateUpdate`]s and get back the resulting snapshot, so updates from the
//! foreground flow and the background dummy sequence never interleave within
//! a batch. Triggers that decide from the current state send the decision
//! itself with [`StoreHandle::update`], so no other command runs between the
//! read and the commit.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::decision::{Dispatch, Effect};
use crate::error::StoreError;
use crate::state::{AppState, StateUpdate};
use crate::storage::StateDb;

type Derive = Box<dyn FnOnce(&AppState) -> Dispatch + Send>;

enum StoreCommand {
    Apply {
        updates: Vec<StateUpdate>,
        reply: oneshot::Sender<AppState>,
    },
    Update {
        derive: Derive,
        reply: oneshot::Sender<(AppState, Vec<Effect>)>,
    },
    Snapshot {
        reply: oneshot::Sender<AppState>,
    },
}

/// Cloneable handle to the store task.
#[derive(Clone)]
pub struct StoreHandle {
    command_tx: mpsc::Sender<StoreCommand>,
}

pub struct Store;

impl Store {
    /// Spawn the store task holding `initial`.
    ///
    /// With a database, every applied batch is written through.
    pub fn spawn(initial: AppState, db: Option<StateDb>) -> (StoreHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let task = tokio::spawn(run_store(initial, db, command_rx));
        (StoreHandle { command_tx }, task)
    }
}

impl StoreHandle {
    /// Apply `updates` in order and return the new state.
    pub async fn apply(&self, updates: Vec<StateUpdate>) -> Result<AppState, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Apply {
                updates,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)
    }

    /// Derive a [`Dispatch`] from the current state and commit its updates
    /// in the same step. Returns the new state and the effects to run.
    pub async fn update<F>(&self, derive: F) -> Result<(AppState, Vec<Effect>), StoreError>
    where
        F: FnOnce(&AppState) -> Dispatch + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Update {
                derive: Box::new(derive),
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)
    }

    pub async fn snapshot(&self) -> Result<AppState, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(StoreCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)
    }
}

async fn run_store(
    mut state: AppState,
    db: Option<StateDb>,
    mut command_rx: mpsc::Receiver<StoreCommand>,
) {
    info!(persistent = db.is_some(), "state store started");

    while let Some(command) = command_rx.recv().await {
        match command {
            StoreCommand::Apply { updates, reply } => {
                commit(&mut state, db.as_ref(), updates);
                let _ = reply.send(state.clone());
            }
            StoreCommand::Update { derive, reply } => {
                let Dispatch { updates, effects } = derive(&state);
                commit(&mut state, db.as_ref(), updates);
                let _ = reply.send((state.clone(), effects));
            }
            StoreCommand::Snapshot { reply } => {
                let _ = reply.send(state.clone());
            }
        }
    }

    info!("state store stopped");
}

fn commit(state: &mut AppState, db: Option<&StateDb>, updates: Vec<StateUpdate>) {
    if updates.is_empty() {
        return;
    }
    debug!(count = updates.len(), "applying state updates");
    state.apply_all(updates);
    if let Some(db) = db {
        if let Err(e) = db.save_state(state) {
            warn!(error = %e, "failed to persist state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExposureNotificationStatus;

    #[tokio::test]
    async fn apply_returns_the_new_state() {
        let (store, _task) = Store::spawn(AppState::default(), None);
        let state = store
            .apply(vec![
                StateUpdate::SetInForeground(true),
                StateUpdate::SetExposureNotificationStatus(
                    ExposureNotificationStatus::AuthorizedAndActive,
                ),
            ])
            .await
            .unwrap();
        assert!(state.environment.is_in_foreground);
        assert_eq!(store.snapshot().await.unwrap(), state);
    }

    #[tokio::test]
    async fn concurrent_batches_are_not_lost() {
        let (store, _task) = Store::spawn(AppState::default(), None);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .apply(vec![StateUpdate::RecordOtpFailure(
                        chrono::Utc::now() + chrono::Duration::seconds(i),
                    )])
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let state = store.snapshot().await.unwrap();
        assert_eq!(state.ingestion.otp_upload_failed_attempts, 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_decide_on_the_committed_state() {
        let (store, _task) = Store::spawn(AppState::default(), None);
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let (_, effects) = store
                    .update(|state| {
                        if state.toggles.is_wrongly_attributed_risk_status_checked {
                            return Dispatch::default();
                        }
                        Dispatch {
                            updates: vec![StateUpdate::MarkWronglyAttributedRiskChecked],
                            effects: vec![Effect::StartDummySequence { start_delay: 0.0 }],
                        }
                    })
                    .await
                    .unwrap();
                effects.len()
            }));
        }
        let mut started = 0;
        for task in tasks {
            started += task.await.unwrap();
        }
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn writes_through_to_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let (store, task) = Store::spawn(AppState::default(), Some(StateDb::open_at(&path).unwrap()));
        store
            .apply(vec![StateUpdate::MarkWronglyAttributedRiskChecked])
            .await
            .unwrap();
        drop(store);
        task.await.unwrap();

        let loaded = StateDb::open_at(&path).unwrap().load_state().unwrap();
        assert!(loaded.toggles.is_wrongly_attributed_risk_status_checked);
    }

    #[tokio::test]
    async fn closed_store_reports_an_error() {
        let (store, task) = Store::spawn(AppState::default(), None);
        task.abort();
        let _ = task.await;
        assert_eq!(store.snapshot().await, Err(StoreError::Closed));
    }
}
