//! Sync queue domain models.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote tables the replay dispatcher is allowed to address.
pub const SYNC_TABLES: [&str; 5] = [
    "transactions",
    "fixed_costs",
    "recurring_services",
    "master_variables",
    "profiles",
];

/// Allow-listed sync table. Parsing is the only way to get one from a raw
/// queue row, so a tampered `table_name` never reaches the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Transactions,
    FixedCosts,
    RecurringServices,
    MasterVariables,
    Profiles,
}

impl SyncTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::FixedCosts => "fixed_costs",
            Self::RecurringServices => "recurring_services",
            Self::MasterVariables => "master_variables",
            Self::Profiles => "profiles",
        }
    }

    /// Column that links child rows to their parent, for tables replaced as a set.
    pub fn parent_column(&self) -> Option<&'static str> {
        match self {
            Self::FixedCosts | Self::RecurringServices => Some("transaction_id"),
            _ => None,
        }
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTable {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "transactions" => Ok(Self::Transactions),
            "fixed_costs" => Ok(Self::FixedCosts),
            "recurring_services" => Ok(Self::RecurringServices),
            "master_variables" => Ok(Self::MasterVariables),
            "profiles" => Ok(Self::Profiles),
            other => Err(format!("Unsupported sync table '{}'", other)),
        }
    }
}

/// Operations recorded in the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Insert,
    Update,
    UpdateStatus,
    Upsert,
    Replace,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::UpdateStatus => "update_status",
            Self::Upsert => "upsert",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "update_status" => Ok(Self::UpdateStatus),
            "upsert" => Ok(Self::Upsert),
            "replace" => Ok(Self::Replace),
            other => Err(format!("Unknown sync operation '{}'", other)),
        }
    }
}

/// Queue row lifecycle. `Failed` rows are retried; `PermanentlyFailed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    PermanentlyFailed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Statuses a drain cycle may select.
    pub fn replayable() -> [SyncStatus; 2] {
        [Self::Pending, Self::Failed]
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "permanently_failed" => Ok(Self::PermanentlyFailed),
            other => Err(format!("Unknown sync status '{}'", other)),
        }
    }
}

/// One durable queue row. `table_name` and `operation` stay raw so a malformed
/// row can still be loaded, inspected and marked failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub id: i64,
    pub table_name: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub status: SyncStatus,
    pub created_at: String,
    pub attempted_at: Option<String>,
    pub error_message: Option<String>,
}

/// Replay attempts allowed before a row becomes `PermanentlyFailed`.
pub const SYNC_MAX_RETRIES: u32 = 5;

const ATTEMPT_PREFIX: &str = "Attempt ";

/// Number of failed attempts recorded in a queue row's `error_message`.
///
/// Messages are written as `"Attempt N: <reason>"`; anything else counts as zero.
pub fn recorded_attempts(error_message: Option<&str>) -> u32 {
    error_message
        .and_then(|msg| msg.strip_prefix(ATTEMPT_PREFIX))
        .and_then(|rest| rest.split_once(':'))
        .and_then(|(n, _)| n.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

pub fn attempt_message(attempt: u32, reason: &str) -> String {
    format!("{}{}: {}", ATTEMPT_PREFIX, attempt, reason)
}

pub fn status_after_attempt(attempt: u32, max_retries: u32) -> SyncStatus {
    if attempt >= max_retries {
        SyncStatus::PermanentlyFailed
    } else {
        SyncStatus::Failed
    }
}
