use crate::auth::AuthFilter;
use crate::catalog::types::{ChangeLogEntry, DataEtag, Row};
use crate::data::RowsPage;
use crate::error::TablesError;
use crate::permission::{CallerContext, TablePermission};
use crate::storage::Datastore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSetList {
    /// Sequences of visible changes after the requested etag, ascending.
    pub change_sets: Vec<DataEtag>,
    pub data_etag: DataEtag,
}

/// Incremental sync feed over a table's change log.
pub struct DiffManager<'a> {
    store: &'a Datastore,
    table_id: String,
    caller: CallerContext,
}

impl<'a> DiffManager<'a> {
    pub fn new(store: &'a Datastore, table_id: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            store,
            table_id: table_id.into(),
            caller,
        }
    }

    /// Rows changed after `since` (all rows ever written when `None`), each at
    /// its latest state, tombstones included, ordered by the sequence of that
    /// latest change.
    ///
    /// When `has_more` is set, pass `resume_cursor` back as `since` to get the
    /// next page.
    pub fn get_rows_since(
        &self,
        since: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let limit = self.store.config().clamp_fetch_limit(fetch_limit);

        // A log entry is the latest for its row exactly when the row's
        // current state was produced by it.
        let rows = state
            .log_since(since.map(DataEtag::sequence))
            .filter(|entry| {
                state
                    .rows
                    .get(&entry.row.row_id)
                    .is_some_and(|row| row.data_etag_at_modification.sequence() == entry.sequence)
            })
            .filter(|entry| auth.can_read(&entry.row.scope))
            .map(|entry| entry.row.clone());
        Ok(RowsPage::paginate(rows, limit, state.data_etag(), |row| {
            row.data_etag_at_modification
        }))
    }

    pub fn get_change_sets_since(
        &self,
        since: Option<DataEtag>,
    ) -> Result<ChangeSetList, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let change_sets = state
            .log_since(since.map(DataEtag::sequence))
            .filter(|entry| auth.can_read(&entry.row.scope))
            .map(|entry| DataEtag(entry.sequence))
            .collect();
        Ok(ChangeSetList {
            change_sets,
            data_etag: state.data_etag(),
        })
    }

    /// Rows of one change set, ordered by row id. With `is_active` only rows
    /// whose live state is still the one that change set produced are
    /// returned; otherwise the state recorded in the log is returned even if
    /// the row has moved on since.
    pub fn get_change_set_rows(
        &self,
        data_etag: DataEtag,
        is_active: bool,
        fetch_limit: Option<usize>,
        after_row_id: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let limit = self.store.config().clamp_fetch_limit(fetch_limit);

        let mut rows: Vec<&Row> = state
            .log
            .get(&data_etag.sequence())
            .and_then(|entry| {
                if is_active {
                    state
                        .rows
                        .get(&entry.row.row_id)
                        .filter(|row| row.data_etag_at_modification == data_etag)
                } else {
                    Some(&entry.row)
                }
            })
            .into_iter()
            .filter(|row| after_row_id.is_none_or(|after| row.row_id.as_str() > after))
            .filter(|row| auth.can_read(&row.scope))
            .collect();
        rows.sort_by(|a, b| a.row_id.cmp(&b.row_id));
        Ok(RowsPage::paginate(
            rows.into_iter().cloned(),
            limit,
            state.data_etag(),
            |row| row.row_id.clone(),
        ))
    }

    /// Rows whose savepoint timestamp lies in `[start, end]` (no upper bound
    /// when `end` is `None`), each at its last state inside the range, ordered
    /// by the sequence of that state. Timestamps compare as strings, which
    /// orders the fixed-width ISO-8601 form savepoints carry.
    ///
    /// When `has_more` is set, pass `resume_cursor` back as `resume`.
    pub fn get_rows_in_time_range(
        &self,
        start: &str,
        end: Option<&str>,
        resume: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError> {
        if start.trim().is_empty() {
            return Err(TablesError::InvalidArgument(
                "start timestamp must be specified".into(),
            ));
        }
        if let Some(end) = end {
            if end < start {
                return Err(TablesError::InvalidArgument(format!(
                    "time range end '{end}' precedes start '{start}'"
                )));
            }
        }
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let limit = self.store.config().clamp_fetch_limit(fetch_limit);

        let in_range = |entry: &ChangeLogEntry| {
            entry
                .row
                .savepoint
                .timestamp
                .as_deref()
                .is_some_and(|ts| ts >= start && end.is_none_or(|end| ts <= end))
        };
        let mut last_in_range: HashMap<&str, u64> = HashMap::new();
        for entry in state.log.values().filter(|entry| in_range(*entry)) {
            last_in_range.insert(entry.row.row_id.as_str(), entry.sequence);
        }

        let rows = state
            .log_since(resume.map(DataEtag::sequence))
            .filter(|entry| {
                last_in_range.get(entry.row.row_id.as_str()) == Some(&entry.sequence)
            })
            .filter(|entry| auth.can_read(&entry.row.scope))
            .map(|entry| entry.row.clone());
        Ok(RowsPage::paginate(rows, limit, state.data_etag(), |row| {
            row.data_etag_at_modification
        }))
    }
}
