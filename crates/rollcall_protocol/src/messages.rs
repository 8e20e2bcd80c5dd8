//! Push and pull messages.

use crate::change::ChangeLogEntry;
use crate::entity::Entity;
use crate::id::DeviceId;
use serde::{Deserialize, Serialize};

/// A batch of pending change-log entries sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Sending device.
    pub device_id: DeviceId,
    /// Entries in `local_seq` order.
    pub entries: Vec<ChangeLogEntry>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(device_id: DeviceId, entries: Vec<ChangeLogEntry>) -> Self {
        Self { device_id, entries }
    }

    /// Highest `local_seq` in the batch.
    pub fn last_seq(&self) -> Option<u64> {
        self.entries.last().map(|e| e.local_seq)
    }
}

/// Why the remote refused an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    /// The entry's base version is not the remote's current version.
    VersionConflict,
    /// A different attendance record already holds the same triple.
    Duplicate,
    /// The entry updates an entity the remote does not have.
    NotFound,
    /// The entry failed the remote's validation.
    Invalid {
        /// Remote's explanation.
        message: String,
    },
}

/// A refused entry with the remote's current view of the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    /// Refused entry.
    pub local_seq: u64,
    /// Why.
    pub reason: RejectReason,
    /// Remote state of the conflicting entity, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_entity: Option<Entity>,
}

impl Rejection {
    /// Creates a rejection.
    pub fn new(local_seq: u64, reason: RejectReason, server_entity: Option<Entity>) -> Self {
        Self {
            local_seq,
            reason,
            server_entity,
        }
    }
}

/// Per-entry outcome of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Entries the remote applied (or had already applied).
    pub accepted: Vec<u64>,
    /// Entries the remote refused.
    pub rejected: Vec<Rejection>,
}

impl PushResponse {
    /// Every entry of `request` accepted.
    pub fn accept_all(request: &PushRequest) -> Self {
        Self {
            accepted: request.entries.iter().map(|e| e.local_seq).collect(),
            rejected: Vec::new(),
        }
    }

    /// Whether nothing was refused.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Request for remote changes after a watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Last remote watermark this device has applied.
    pub watermark: u64,
    /// Maximum number of entities to return.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a pull request.
    pub fn new(watermark: u64, limit: u32) -> Self {
        Self { watermark, limit }
    }
}

/// Remote entities changed after the request watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Latest state of each changed entity, in remote order.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Watermark to send on the next pull.
    pub new_watermark: u64,
    /// Whether more changes remain after `new_watermark`.
    #[serde(default)]
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a pull response.
    pub fn new(entities: Vec<Entity>, new_watermark: u64, has_more: bool) -> Self {
        Self {
            entities,
            new_watermark,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_tagged_by_code() {
        let json = serde_json::to_value(RejectReason::Invalid {
            message: "bad date".into(),
        })
        .unwrap();
        assert_eq!(json["code"], "invalid");
        assert_eq!(json["message"], "bad date");

        let json = serde_json::to_value(RejectReason::Duplicate).unwrap();
        assert_eq!(json, serde_json::json!({ "code": "duplicate" }));
    }

    #[test]
    fn empty_push_accepts_nothing() {
        let request = PushRequest::new(DeviceId::generate(), vec![]);
        assert_eq!(request.last_seq(), None);
        let response = PushResponse::accept_all(&request);
        assert!(response.accepted.is_empty());
        assert!(response.is_clean());
    }

    #[test]
    fn has_more_defaults_to_false() {
        let response: PullResponse =
            serde_json::from_str(r#"{"entities":[],"newWatermark":9}"#).unwrap();
        assert_eq!(response.new_watermark, 9);
        assert!(!response.has_more);
    }
}
