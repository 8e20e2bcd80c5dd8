//! Replica sync metadata (`META.json`).

use crate::error::{CoreError, CoreResult};
use rollcall_protocol::DeviceId;
use serde::{Deserialize, Serialize};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Per-replica state that must survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Layout version of the replica directory.
    pub format_version: u32,
    /// This device's id, generated once.
    pub device_id: DeviceId,
    /// Last remote watermark fully applied.
    pub remote_watermark: u64,
    /// Highest Lamport counter issued or observed as of the last save.
    pub lamport: u64,
}

impl SyncMeta {
    /// Metadata for a brand-new replica.
    #[must_use]
    pub fn fresh() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            device_id: DeviceId::generate(),
            remote_watermark: 0,
            lamport: 0,
        }
    }

    /// Encodes as pretty JSON.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CoreError::codec(e.to_string()))
    }

    /// Decodes and checks the format version.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let meta: Self = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::invalid_format(format!("META.json: {e}")))?;
        if meta.format_version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {}",
                meta.format_version
            )));
        }
        Ok(meta)
    }
}
