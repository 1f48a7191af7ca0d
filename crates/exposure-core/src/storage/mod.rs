mod state_db;

pub use state_db::StateDb;

use std::path::PathBuf;

use crate::error::StorageError;

/// Returns `~/.config/exposure[-dev]/` based on EXPOSURE_ENV.
///
/// Set EXPOSURE_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("EXPOSURE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("exposure-dev")
    } else {
        base_dir.join("exposure")
    };

    std::fs::create_dir_all(&dir).map_err(|e| StorageError::DataDir(e.to_string()))?;
    Ok(dir)
}
