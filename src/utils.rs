//! Utility functions for directory management
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and state storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Data: `~/.local/share/drks/` - Configuration (`config.json`)
//! - State: `~/.local/state/drks/` - Operation lock and audit log
//!
//! # Example
//!
//! ```
//! use drks::utils::{get_data_dir, ensure_dirs};
//!
//! // Ensure directories exist before use
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(data_path) = get_data_dir() {
//!     // Load configuration from data_path
//! }
//! ```

use directories::ProjectDirs;
use std::path::PathBuf;

const LOCK_FILE: &str = "drks.lock";

pub fn get_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "drks", "drks").map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "drks", "drks")
        .and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Lock file used when the config does not name one
pub fn default_lock_path() -> Option<PathBuf> {
    get_state_dir().map(|dir| dir.join(LOCK_FILE))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_data_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}
