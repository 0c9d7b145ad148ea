use crate::auth::AuthFilter;
use crate::catalog::types::{DataEtag, Row, RowEtag, RowWrite};
use crate::catalog::validate_identifier;
use crate::error::{TablesError, TablesErrorCode};
use crate::permission::{CallerContext, Scope, TablePermission};
use crate::storage::Datastore;
use crate::storage::table_state::TableState;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tracing::debug;

/// One page of rows. `resume_cursor` is set only when more rows remain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowsPage<C> {
    pub rows: Vec<Row>,
    /// The table's dataEtag when the page was read.
    pub data_etag: DataEtag,
    pub resume_cursor: Option<C>,
    pub has_more: bool,
}

impl<C> RowsPage<C> {
    pub(crate) fn paginate(
        rows: impl Iterator<Item = Row>,
        fetch_limit: usize,
        data_etag: DataEtag,
        cursor_of: impl Fn(&Row) -> C,
    ) -> Self {
        let mut rows: Vec<Row> = rows.take(fetch_limit + 1).collect();
        let has_more = rows.len() > fetch_limit;
        rows.truncate(fetch_limit);
        let resume_cursor = if has_more {
            rows.last().map(cursor_of)
        } else {
            None
        };
        Self {
            rows,
            data_etag,
            resume_cursor,
            has_more,
        }
    }
}

/// A batch of writes guarded by the dataEtag the client last synced to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowList {
    pub data_etag: DataEtag,
    pub rows: Vec<RowWrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RowOutcome {
    Success(Row),
    Denied { row_id: String, reason: String },
    /// The client's row etag was stale; carries the server's row.
    InConflict { row_id: String, server_row: Row },
    Failed { row_id: String, reason: String },
}

impl RowOutcome {
    pub fn row_id(&self) -> &str {
        match self {
            RowOutcome::Success(row) => &row.row_id,
            RowOutcome::Denied { row_id, .. }
            | RowOutcome::InConflict { row_id, .. }
            | RowOutcome::Failed { row_id, .. } => row_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowOutcomeList {
    /// dataEtag after the batch was applied.
    pub data_etag: DataEtag,
    pub outcomes: Vec<RowOutcome>,
}

enum DeletePlan {
    AlreadyDeleted(Row),
    Tombstone { row: Row, previous: RowEtag },
}

/// Row reads and writes on one table on behalf of one caller.
pub struct DataManager<'a> {
    store: &'a Datastore,
    table_id: String,
    caller: CallerContext,
}

impl<'a> DataManager<'a> {
    pub fn new(store: &'a Datastore, table_id: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            store,
            table_id: table_id.into(),
            caller,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    /// Returns the row even when it is a tombstone.
    pub fn get_row(&self, row_id: &str) -> Result<Row, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let row = state
            .rows
            .get(row_id)
            .ok_or_else(|| TablesError::row_not_found(&self.table_id, row_id))?;
        auth.check_filter(TablePermission::UnfilteredRead, row_id, &row.scope)?;
        Ok(row.clone())
    }

    /// Live rows visible to the caller, ordered by row id. The cursor is the
    /// last row id of the previous page.
    pub fn get_rows(
        &self,
        fetch_limit: Option<usize>,
        after_row_id: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError> {
        self.list(fetch_limit, after_row_id, |auth, scope| auth.can_read(scope))
    }

    /// Like [`Self::get_rows`] but restricted to rows in `scopes`. Naming
    /// other principals' scopes requires unfiltered read.
    pub fn get_rows_in_scopes(
        &self,
        scopes: &[Scope],
        fetch_limit: Option<usize>,
        after_row_id: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError> {
        for scope in scopes {
            scope.validate()?;
        }
        let state = self.store.read_table(&self.table_id)?;
        AuthFilter::new(&self.caller, &state).check_permission(TablePermission::UnfilteredRead)?;
        self.list(fetch_limit, after_row_id, |_, scope| scopes.contains(scope))
    }

    fn list(
        &self,
        fetch_limit: Option<usize>,
        after_row_id: Option<&str>,
        include: impl Fn(&AuthFilter, &Scope) -> bool,
    ) -> Result<RowsPage<String>, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        let auth = AuthFilter::new(&self.caller, &state);
        auth.check_permission(TablePermission::ReadRow)?;
        let limit = self.store.config().clamp_fetch_limit(fetch_limit);
        let lower = match after_row_id {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        let rows = state
            .rows
            .range((lower, Bound::Unbounded))
            .map(|(_, row)| row)
            .filter(|row| !row.deleted && include(&auth, &row.scope))
            .cloned();
        Ok(RowsPage::paginate(rows, limit, state.data_etag(), |row| {
            row.row_id.clone()
        }))
    }

    /// Inserts the row when its id is unknown, otherwise replaces it. An
    /// update must carry the row's current etag. A write flagged `deleted`
    /// is a soft delete, exactly as in [`Self::delete_row`].
    pub fn create_or_update_row(&self, write: RowWrite) -> Result<Row, TablesError> {
        if write.deleted {
            let row_id = write.row_id.ok_or_else(|| {
                TablesError::InvalidArgument("a row delete must name the row".into())
            })?;
            return self.delete_row(&row_id, write.row_etag.as_ref());
        }
        let row = self.store.mutate(&self.table_id, |state| {
            let auth = AuthFilter::new(&self.caller, state);
            auth.check_permission(TablePermission::WriteRow)?;
            let (row, previous) = prepare_write(state, &auth, &self.caller, write)?;
            Ok(state.commit_row(self.store.next_sequence(), row, previous))
        })?;
        debug!(
            table_id = %self.table_id,
            row_id = %row.row_id,
            data_etag = %row.data_etag_at_modification,
            caller = self.caller.display_id(),
            "row committed"
        );
        Ok(row)
    }

    /// Soft delete. When `expected` is given it must match the current etag.
    /// Deleting a tombstone returns it unchanged.
    pub fn delete_row(&self, row_id: &str, expected: Option<&RowEtag>) -> Result<Row, TablesError> {
        let (row, committed) = self.store.mutate(&self.table_id, |state| {
            let auth = AuthFilter::new(&self.caller, state);
            match prepare_delete(state, &auth, &self.caller, row_id, expected)? {
                DeletePlan::AlreadyDeleted(row) => Ok((row, false)),
                DeletePlan::Tombstone { row, previous } => {
                    let sequence = self.store.next_sequence();
                    Ok((state.commit_row(sequence, row, Some(previous)), true))
                }
            }
        })?;
        if committed {
            debug!(
                table_id = %self.table_id,
                row_id,
                data_etag = %row.data_etag_at_modification,
                caller = self.caller.display_id(),
                "row deleted"
            );
        }
        Ok(row)
    }

    /// Applies a batch of writes and deletes under one lock acquisition.
    /// Per-row failures are reported as outcomes; only a stale batch etag or
    /// a missing WRITE_ROW rejects the whole batch.
    pub fn insert_or_update_rows(&self, batch: RowList) -> Result<RowOutcomeList, TablesError> {
        let result = self.store.mutate(&self.table_id, |state| {
            let auth = AuthFilter::new(&self.caller, state);
            auth.check_permission(TablePermission::WriteRow)?;
            if batch.data_etag != state.data_etag() {
                return Err(TablesError::EtagMismatch {
                    resource: format!("table {}", self.table_id),
                    supplied: batch.data_etag.to_string(),
                    current: state.data_etag().to_string(),
                });
            }
            let mut outcomes = Vec::with_capacity(batch.rows.len());
            for mut write in batch.rows {
                let row_id = write
                    .row_id
                    .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                    .clone();
                let planned = if write.deleted {
                    let expected = write.row_etag.clone();
                    prepare_delete(state, &auth, &self.caller, &row_id, expected.as_ref()).map(
                        |plan| match plan {
                            DeletePlan::AlreadyDeleted(row) => (row, None),
                            DeletePlan::Tombstone { row, previous } => (row, Some(Some(previous))),
                        },
                    )
                } else {
                    prepare_write(state, &auth, &self.caller, write)
                        .map(|(row, previous)| (row, Some(previous)))
                };
                let outcome = match planned {
                    Ok((row, None)) => RowOutcome::Success(row),
                    Ok((row, Some(previous))) => {
                        let sequence = self.store.next_sequence();
                        RowOutcome::Success(state.commit_row(sequence, row, previous))
                    }
                    Err(err) => classify(state, row_id, err)?,
                };
                outcomes.push(outcome);
            }
            Ok(RowOutcomeList {
                data_etag: state.data_etag(),
                outcomes,
            })
        })?;
        debug!(
            table_id = %self.table_id,
            rows = result.outcomes.len(),
            accepted = result.outcomes.iter().filter(|o| o.is_success()).count(),
            data_etag = %result.data_etag,
            caller = self.caller.display_id(),
            "row batch committed"
        );
        Ok(result)
    }
}

/// Validates one write against the table as it currently stands and builds
/// the row to commit, plus the etag it replaces.
fn prepare_write(
    state: &TableState,
    auth: &AuthFilter,
    caller: &CallerContext,
    write: RowWrite,
) -> Result<(Row, Option<RowEtag>), TablesError> {
    if let Some(scope) = &write.scope {
        scope.validate()?;
    }
    let row_id = match write.row_id {
        Some(id) => {
            validate_identifier("row id", &id)?;
            id
        }
        None => uuid::Uuid::new_v4().to_string(),
    };
    state.entry.validate_values(&write.values)?;

    let Some(current) = state.rows.get(&row_id) else {
        let scope = write.scope.unwrap_or(Scope::DEFAULT);
        auth.check_filter(TablePermission::UnfilteredWrite, &row_id, &scope)?;
        let row = Row {
            row_id,
            row_etag: RowEtag::fresh(),
            data_etag_at_modification: DataEtag::default(),
            scope,
            values: write.values,
            deleted: false,
            savepoint: write.savepoint,
            create_user: caller.user_id.clone(),
            last_update_user: caller.user_id.clone(),
        };
        return Ok((row, None));
    };

    auth.check_filter(TablePermission::UnfilteredRead, &row_id, &current.scope)?;
    auth.check_filter(TablePermission::UnfilteredWrite, &row_id, &current.scope)?;
    let scope = write.scope.unwrap_or_else(|| current.scope.clone());
    if scope != current.scope {
        auth.check_filter(TablePermission::UnfilteredWrite, &row_id, &scope)?;
    }
    check_row_etag(state, current, write.row_etag.as_ref())?;
    let row = Row {
        row_id,
        row_etag: RowEtag::fresh(),
        data_etag_at_modification: DataEtag::default(),
        scope,
        values: write.values,
        deleted: false,
        savepoint: write.savepoint,
        create_user: current.create_user.clone(),
        last_update_user: caller.user_id.clone(),
    };
    Ok((row, Some(current.row_etag.clone())))
}

fn prepare_delete(
    state: &TableState,
    auth: &AuthFilter,
    caller: &CallerContext,
    row_id: &str,
    expected: Option<&RowEtag>,
) -> Result<DeletePlan, TablesError> {
    auth.check_permission(TablePermission::DeleteRow)?;
    let current = state
        .rows
        .get(row_id)
        .ok_or_else(|| TablesError::row_not_found(state.table_id(), row_id))?;
    auth.check_filter(TablePermission::UnfilteredRead, row_id, &current.scope)?;
    auth.check_filter(TablePermission::UnfilteredDelete, row_id, &current.scope)?;
    if current.deleted {
        return Ok(DeletePlan::AlreadyDeleted(current.clone()));
    }
    if expected.is_some() {
        check_row_etag(state, current, expected)?;
    }
    let mut row = current.clone();
    row.deleted = true;
    row.row_etag = RowEtag::fresh();
    row.last_update_user = caller.user_id.clone();
    Ok(DeletePlan::Tombstone {
        row,
        previous: current.row_etag.clone(),
    })
}

fn check_row_etag(
    state: &TableState,
    current: &Row,
    supplied: Option<&RowEtag>,
) -> Result<(), TablesError> {
    if supplied == Some(&current.row_etag) {
        return Ok(());
    }
    Err(TablesError::EtagMismatch {
        resource: format!("row {}/{}", state.table_id(), current.row_id),
        supplied: supplied.map_or_else(|| "<none>".to_string(), RowEtag::to_string),
        current: current.row_etag.to_string(),
    })
}

/// Maps a per-row failure inside a batch to its outcome. Anything that is not
/// a per-row condition aborts the batch.
fn classify(state: &TableState, row_id: String, err: TablesError) -> Result<RowOutcome, TablesError> {
    match err.code() {
        TablesErrorCode::PermissionDenied | TablesErrorCode::NotFound => Ok(RowOutcome::Denied {
            row_id,
            reason: err.to_string(),
        }),
        TablesErrorCode::EtagMismatch => match state.rows.get(&row_id) {
            Some(server_row) => Ok(RowOutcome::InConflict {
                row_id,
                server_row: server_row.clone(),
            }),
            None => Err(err),
        },
        TablesErrorCode::BadColumnName | TablesErrorCode::InvalidArgument => {
            Ok(RowOutcome::Failed {
                row_id,
                reason: err.to_string(),
            })
        }
        _ => Err(err),
    }
}
