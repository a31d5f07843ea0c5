use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

use super::ItemId;
use crate::Error;

/// Log category carried by an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    StepLog,
    ServiceLog,
}

impl ItemType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StepLog => "step-log",
            Self::ServiceLog => "service-log",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "step-log" => Ok(Self::StepLog),
            "service-log" => Ok(Self::ServiceLog),
            other => Err(Error::InvalidInput(format!("Unknown item type: {other}"))),
        }
    }
}

/// Lifecycle status of an item.
///
/// `Incoming -> Completed` is the only transition; `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    Incoming,
    Completed,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "Incoming",
            Self::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Incoming" => Ok(Self::Incoming),
            "Completed" => Ok(Self::Completed),
            other => Err(Error::InvalidInput(format!("Unknown item status: {other}"))),
        }
    }
}

/// Coordinates of the job step (or service) that produced a log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRef {
    pub project_key: String,
    pub workflow_name: String,
    pub workflow_id: i64,
    pub run_id: i64,
    pub node_run_name: String,
    pub node_run_id: i64,
    pub job_name: String,
    pub job_id: i64,
    pub step_name: String,
    pub step_order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl ApiRef {
    /// Deterministic lookup key for this reference.
    ///
    /// SHA-256 over the JSON encoding; field order is fixed by the struct
    /// definition so equal references always hash the same.
    pub fn hash(&self) -> crate::Result<String> {
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// A logical, append-only log stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub item_type: ItemType,
    pub api_ref: ApiRef,
    pub api_ref_hash: String,
    pub status: ItemStatus,
    pub to_delete: bool,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Item {
    /// Build a fresh `Incoming` item for the given reference
    pub fn new(item_type: ItemType, api_ref: ApiRef) -> crate::Result<Self> {
        let api_ref_hash = api_ref.hash()?;
        let now = Utc::now();
        Ok(Self {
            id: ItemId::new(),
            item_type,
            api_ref,
            api_ref_hash,
            status: ItemStatus::Incoming,
            to_delete: false,
            created_at: now,
            last_modified: now,
        })
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

/// Which items a mark-for-deletion request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSelector {
    /// Every item produced by exactly this run
    Run(i64),
    /// Every item produced by any run of this workflow
    Workflow(i64),
}

impl DeleteSelector {
    #[must_use]
    pub fn matches(&self, api_ref: &ApiRef) -> bool {
        match self {
            Self::Run(run_id) => api_ref.run_id == *run_id,
            Self::Workflow(workflow_id) => api_ref.workflow_id == *workflow_id,
        }
    }
}

/// Wire form of a mark-for-deletion request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkDeleteRequest {
    #[serde(default)]
    pub run_id: Option<i64>,
    #[serde(default)]
    pub workflow_id: Option<i64>,
}

impl TryFrom<MarkDeleteRequest> for DeleteSelector {
    type Error = Error;

    // run_id wins over workflow_id when both are present
    fn try_from(req: MarkDeleteRequest) -> Result<Self, Self::Error> {
        match (req.run_id, req.workflow_id) {
            (Some(run_id), _) if run_id > 0 => Ok(Self::Run(run_id)),
            (_, Some(workflow_id)) if workflow_id > 0 => Ok(Self::Workflow(workflow_id)),
            _ => Err(Error::InvalidInput(
                "run_id or workflow_id must be provided".to_string(),
            )),
        }
    }
}
