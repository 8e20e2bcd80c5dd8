//! CLI command implementations.

pub mod dump_changelog;
pub mod gc;
pub mod inspect;
pub mod verify;

use rollcall_core::{Replica, ReplicaConfig};
use std::path::Path;
use tracing::debug;

/// Opens an existing replica; never creates one.
pub fn open_existing(path: &Path) -> Result<Replica, Box<dyn std::error::Error>> {
    if !path.join("META.json").exists() {
        return Err(format!("No replica found at {}", path.display()).into());
    }
    debug!(path = %path.display(), "opening replica");
    let config = ReplicaConfig::new().create_if_missing(false);
    Ok(Replica::open_with_config(path, config)?)
}
