use crate::catalog::TableEntry;
use crate::catalog::types::{ChangeLogEntry, DataEtag, PropertyEntry, Row, RowEtag};
use crate::permission::{Scope, TableRole};
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Committed state of one table. Cloning is cheap (persistent maps), which is
/// what lets writers build the next version off to the side and publish it in
/// one swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableState {
    pub entry: TableEntry,
    pub rows: OrdMap<String, Row>,
    /// Append-only, keyed by sequence.
    pub log: OrdMap<u64, ChangeLogEntry>,
    pub acls: OrdMap<Scope, TableRole>,
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
}

impl TableState {
    pub fn new(entry: TableEntry) -> Self {
        Self {
            entry,
            rows: OrdMap::new(),
            log: OrdMap::new(),
            acls: OrdMap::new(),
            properties: Vec::new(),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.entry.table_id
    }

    pub fn data_etag(&self) -> DataEtag {
        self.entry.data_etag
    }

    /// Records one accepted row mutation: log append, row replace and
    /// dataEtag bump. `sequence` must exceed every sequence already logged.
    pub fn commit_row(
        &mut self,
        sequence: u64,
        mut row: Row,
        previous_row_etag: Option<RowEtag>,
    ) -> Row {
        debug_assert!(
            sequence > self.entry.data_etag.sequence(),
            "sequence {sequence} does not advance dataEtag {}",
            self.entry.data_etag
        );
        row.data_etag_at_modification = DataEtag(sequence);
        self.log.insert(
            sequence,
            ChangeLogEntry {
                sequence,
                row: row.clone(),
                previous_row_etag,
            },
        );
        self.rows.insert(row.row_id.clone(), row.clone());
        self.entry.data_etag = DataEtag(sequence);
        row
    }

    /// Log entries with sequence strictly greater than `after`, ascending.
    pub fn log_since(&self, after: Option<u64>) -> impl Iterator<Item = &ChangeLogEntry> {
        let lower = match after {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };
        self.log
            .range((lower, Bound::Unbounded))
            .map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::TableState;
    use crate::catalog::TableEntry;
    use crate::catalog::schema::SchemaType;
    use crate::catalog::types::{DataEtag, Row, RowEtag, RowValues, Savepoint};
    use crate::permission::Scope;

    fn state() -> TableState {
        TableState::new(TableEntry {
            table_id: "t1".into(),
            table_key: "t1".into(),
            schema_type: SchemaType::Data,
            data_etag: DataEtag(3),
            properties_etag: "p0".into(),
            columns: vec![],
            created_by: None,
        })
    }

    fn row(id: &str) -> Row {
        Row {
            row_id: id.into(),
            row_etag: RowEtag::fresh(),
            data_etag_at_modification: DataEtag::default(),
            scope: Scope::DEFAULT,
            values: RowValues::new(),
            deleted: false,
            savepoint: Savepoint::default(),
            create_user: None,
            last_update_user: None,
        }
    }

    #[test]
    fn commit_row_advances_etag_and_appends_log() {
        let mut s = state();
        let committed = s.commit_row(4, row("r1"), None);
        assert_eq!(committed.data_etag_at_modification, DataEtag(4));
        assert_eq!(s.data_etag(), DataEtag(4));
        assert_eq!(s.log.len(), 1);
        assert_eq!(s.rows.get("r1"), Some(&committed));
    }

    #[test]
    fn log_since_is_exclusive_and_ordered() {
        let mut s = state();
        s.commit_row(4, row("r1"), None);
        s.commit_row(7, row("r2"), None);
        s.commit_row(9, row("r1"), None);
        let seqs: Vec<u64> = s.log_since(Some(4)).map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![7, 9]);
        assert_eq!(s.log_since(None).count(), 3);
        assert_eq!(s.log_since(Some(9)).count(), 0);
    }

    #[test]
    fn clones_share_nothing_observable() {
        let mut s = state();
        let before = s.clone();
        s.commit_row(4, row("r1"), None);
        assert!(before.rows.is_empty());
        assert_eq!(before.data_etag(), DataEtag(3));
    }
}
