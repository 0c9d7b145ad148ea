use crate::error::TablesError;
use crate::permission::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Table-wide version token. Values handed to callers are exactly the
/// sequence numbers of committed change-log entries, so an etag doubles as the
/// cursor for the diff feed.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct DataEtag(pub u64);

impl DataEtag {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DataEtag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DataEtag {
    type Err = TablesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(DataEtag)
            .map_err(|_| TablesError::InvalidArgument(format!("malformed dataEtag '{s}'")))
    }
}

/// Per-row version token for optimistic concurrency. Fresh on every accepted
/// mutation and never reused.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RowEtag(pub String);

impl RowEtag {
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowEtag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowEtag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Column name -> value. Values travel as strings; `None` is SQL-style null.
pub type RowValues = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Savepoint {
    #[serde(default)]
    pub savepoint_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Row {
    pub row_id: String,
    pub row_etag: RowEtag,
    /// Sequence of the change that produced this state.
    pub data_etag_at_modification: DataEtag,
    pub scope: Scope,
    pub values: RowValues,
    pub deleted: bool,
    #[serde(default)]
    pub savepoint: Savepoint,
    pub create_user: Option<String>,
    pub last_update_user: Option<String>,
}

/// A client's request to create or replace one row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RowWrite {
    /// Generated when absent.
    #[serde(default)]
    pub row_id: Option<String>,
    /// The etag the client last saw; required to update an existing row.
    #[serde(default)]
    pub row_etag: Option<RowEtag>,
    /// Absent keeps the stored scope on update and means DEFAULT on insert.
    #[serde(default)]
    pub scope: Option<Scope>,
    pub values: RowValues,
    #[serde(default)]
    pub savepoint: Savepoint,
    /// Request a soft delete instead of a value write.
    #[serde(default)]
    pub deleted: bool,
}

impl RowWrite {
    pub fn new(row_id: impl Into<String>) -> Self {
        Self {
            row_id: Some(row_id.into()),
            ..Self::default()
        }
    }

    pub fn value(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), Some(value.into()));
        self
    }

    pub fn null(mut self, column: impl Into<String>) -> Self {
        self.values.insert(column.into(), None);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn etag(mut self, etag: RowEtag) -> Self {
        self.row_etag = Some(etag);
        self
    }

    pub fn savepoint(mut self, savepoint: Savepoint) -> Self {
        self.savepoint = savepoint;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// One key/value table property, addressed by (partition, aspect, key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyEntry {
    pub partition: String,
    pub aspect: String,
    pub key: String,
    pub value_type: String,
    pub value: Option<String>,
}

impl PropertyEntry {
    pub fn new(
        partition: impl Into<String>,
        aspect: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            partition: partition.into(),
            aspect: aspect.into(),
            key: key.into(),
            value_type: "string".into(),
            value: Some(value.into()),
        }
    }
}

/// One committed change, as appended to a table's change log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub sequence: u64,
    pub row: Row,
    /// `None` when the change created the row.
    pub previous_row_etag: Option<RowEtag>,
}
