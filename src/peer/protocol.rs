//! Administrative API
//!
//! Endpoints and DTOs of the HTTP surface a client uses to drive a peer.
//! Every command maps one-to-one onto an operation of `Peer`.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

pub const ENDPOINT_BACKUP: &str = "/backup";
pub const ENDPOINT_RESTORE: &str = "/restore";
pub const ENDPOINT_DELETE: &str = "/delete";
pub const ENDPOINT_RECLAIM: &str = "/reclaim";
/// Human-readable report of the peer's storage.
pub const ENDPOINT_STATE: &str = "/state";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupRequest {
    pub path: String,
    pub replication_degree: u32,
}

/// Body of RESTORE and DELETE.
#[derive(Debug, Serialize, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimRequest {
    pub max_bytes: u64,
}

/// Outcome of a command.
///
/// `detail` carries the restored file location, the number of evicted
/// chunks, or the reason for a failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CommandResponse {
    pub fn ok(detail: Option<String>) -> Self {
        Self {
            success: true,
            detail,
        }
    }

    pub fn failed(reason: impl ToString) -> Self {
        Self {
            success: false,
            detail: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub state: String,
}
