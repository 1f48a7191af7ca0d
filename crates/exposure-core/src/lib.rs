//! # Exposure Core Library
//!
//! Decision core of a decentralized exposure-notification client. It keeps the
//! user's epidemiological status, decides when anonymous telemetry leaves the
//! device, and produces dummy upload traffic that a network observer cannot
//! tell apart from genuine diagnosis-key uploads.
//!
//! ## Architecture
//!
//! - **Pure decisions**: status machine, outcome reducer, analytics sampler and
//!   dummy traffic scheduling read an [`AppState`] snapshot and return
//!   [`StateUpdate`] descriptions
//! - **Single state owner**: the [`Store`] task commits updates in order
//! - **Effects**: notifications, network requests and dummy sequences run
//!   through the [`EffectRunner`] against narrow ports
//! - **Storage**: SQLite key-value persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`ExposureCore`]: one operation per external trigger
//! - [`ExposureApp`]: core + store + effects wired together
//! - [`RandomnessPort`]: every random draw and clock read, swappable in tests
//! - [`Configuration`]: thresholds, rates and means

pub mod analytics;
pub mod app;
pub mod calendar;
pub mod config;
pub mod decision;
pub mod device;
pub mod effects;
pub mod error;
pub mod exposure;
pub mod ingestion;
pub mod matcher;
pub mod network;
pub mod notification;
pub mod otp;
pub mod province;
pub mod random;
pub mod state;
pub mod status;
pub mod storage;
pub mod store;
pub mod window;

pub use app::ExposureApp;
pub use calendar::{CalendarDay, CalendarMonth, Timestamp};
pub use config::{ConfigProvider, Configuration, ConfigurationSource, FileConfigurationSource};
pub use decision::{Dispatch, Effect, ExposureCore};
pub use effects::{EffectRunner, Ports};
pub use error::{
    ConfigError, CoreError, ExposureDetectionError, NetworkError, OtpError, Result, StorageError,
    StoreError,
};
pub use exposure::{ExposureDetectionOutcome, ExposureDetectionSummary, ExposureInfo};
pub use random::{RandomnessPort, ScriptedRandomness, SeededRandomness, SystemRandomness};
pub use state::{AppState, StateUpdate};
pub use status::{transition, CovidEvent, CovidStatus, Transition, UserEvent};
pub use storage::StateDb;
pub use store::{Store, StoreHandle};
pub use window::OpportunityWindow;
