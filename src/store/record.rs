//! Execution record schema shared by the log store, the reconciler and the
//! live fan-out.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Outcome of one attempted arbitrage action.
///
/// Serialized as a lowercase string. Anything the deserializer does not
/// recognize (and an absent field) maps to `Unknown` rather than failing the
/// record, so a writer running a newer schema cannot poison old readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
    #[default]
    Unknown,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ExecutionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExecutionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatusVisitor;

        impl Visitor<'_> for StatusVisitor {
            type Value = ExecutionStatus;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an execution status string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(match v {
                    "pending" => ExecutionStatus::Pending,
                    "success" => ExecutionStatus::Success,
                    "failed" => ExecutionStatus::Failed,
                    _ => ExecutionStatus::Unknown,
                })
            }
        }

        deserializer.deserialize_str(StatusVisitor)
    }
}

/// One attempted or completed arbitrage action.
///
/// `pair_id` groups all write attempts (retries, status updates) belonging to
/// one logical trade pair; it is NOT unique in the raw log. Everything beyond
/// the fixed fields (exchange, symbol, side, quantity, realized P&L, ...) is
/// carried opaquely in `extra` and preserved verbatim on round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub pair_id: String,

    /// Epoch milliseconds; monotonic per writer but not globally ordered.
    pub ts: i64,

    #[serde(default)]
    pub status: ExecutionStatus,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionRecord {
    pub fn new(pair_id: impl Into<String>, ts: i64, status: ExecutionStatus) -> Self {
        Self {
            pair_id: pair_id.into(),
            ts,
            status,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
