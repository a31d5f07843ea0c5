use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{ItemId, UnitId};
use crate::Error;

/// Role a storage unit plays in the tiering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    /// Fast ingestion fan-in point, evicted once content is durable elsewhere
    Buffer,
    /// Durable backend that gates buffer eviction
    Permanent,
    /// Durable backend filled out-of-band; never gates buffer eviction
    PermanentLegacy,
}

impl UnitRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Permanent => "permanent",
            Self::PermanentLegacy => "permanent_legacy",
        }
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent | Self::PermanentLegacy)
    }
}

impl std::fmt::Display for UnitRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buffer" => Ok(Self::Buffer),
            "permanent" => Ok(Self::Permanent),
            "permanent_legacy" => Ok(Self::PermanentLegacy),
            other => Err(Error::InvalidInput(format!("Unknown unit role: {other}"))),
        }
    }
}

/// A registered backend instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub id: UnitId,
    pub name: String,
    pub role: UnitRole,
    pub created_at: DateTime<Utc>,
}

/// Membership fact: the content of `item_id` is held by `unit_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUnit {
    pub item_id: ItemId,
    pub unit_id: UnitId,
    pub last_modified: DateTime<Utc>,
}

impl ItemUnit {
    #[must_use]
    pub fn new(item_id: ItemId, unit_id: UnitId) -> Self {
        Self {
            item_id,
            unit_id,
            last_modified: Utc::now(),
        }
    }
}
