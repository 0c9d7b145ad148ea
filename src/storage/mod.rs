pub mod table_state;
pub(crate) mod task_lock;

use crate::config::TablesConfig;
use crate::error::TablesError;
use crate::storage::table_state::TableState;
use crate::storage::task_lock::TaskLock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct TableHandle {
    table_id: String,
    lock: TaskLock,
    state: RwLock<Arc<TableState>>,
    /// Set under the task lock when the table is deleted, so writers queued
    /// behind the delete observe NotFound instead of resurrecting it.
    dropped: AtomicBool,
}

impl TableHandle {
    fn new(state: TableState) -> Self {
        Self {
            table_id: state.entry.table_id.clone(),
            lock: TaskLock::default(),
            state: RwLock::new(Arc::new(state)),
            dropped: AtomicBool::new(false),
        }
    }

    fn committed(&self) -> Arc<TableState> {
        Arc::clone(&self.state.read())
    }
}

/// Serializable image of every table plus the sequencer position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatastoreSnapshot {
    pub sequence: u64,
    pub tables: Vec<TableState>,
}

/// Registry of all tables. Constructed explicitly and shared by reference;
/// there is no process-wide state.
#[derive(Debug)]
pub struct Datastore {
    config: TablesConfig,
    tables: RwLock<BTreeMap<String, Arc<TableHandle>>>,
    /// Last sequence handed out. Shared by every table so a table recreated
    /// under an old id never reissues a sequence a replica has already seen.
    sequencer: AtomicU64,
}

impl Datastore {
    pub fn new(config: TablesConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(BTreeMap::new()),
            sequencer: AtomicU64::new(0),
        }
    }

    pub fn from_snapshot(config: TablesConfig, snapshot: DatastoreSnapshot) -> Self {
        let high_water = snapshot
            .tables
            .iter()
            .map(|t| {
                t.log
                    .get_max()
                    .map(|(seq, _)| *seq)
                    .unwrap_or(0)
                    .max(t.entry.data_etag.sequence())
            })
            .max()
            .unwrap_or(0)
            .max(snapshot.sequence);
        let tables = snapshot
            .tables
            .into_iter()
            .map(|t| (t.entry.table_id.clone(), Arc::new(TableHandle::new(t))))
            .collect();
        Self {
            config,
            tables: RwLock::new(tables),
            sequencer: AtomicU64::new(high_water),
        }
    }

    pub fn config(&self) -> &TablesConfig {
        &self.config
    }

    pub fn snapshot(&self) -> DatastoreSnapshot {
        let handles: Vec<Arc<TableHandle>> = self.tables.read().values().cloned().collect();
        let tables: Vec<TableState> = handles
            .iter()
            .map(|h| TableState::clone(&h.committed()))
            .collect();
        // Read after the tables so the recorded position covers every
        // sequence those states contain.
        let sequence = self.sequencer.load(Ordering::Acquire);
        DatastoreSnapshot { sequence, tables }
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequencer.load(Ordering::Acquire)
    }

    /// Callers must be the table's only writer when drawing a sequence:
    /// inside its critical section, or before the table is registered.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequencer.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn handle(&self, table_id: &str) -> Result<Arc<TableHandle>, TablesError> {
        self.tables
            .read()
            .get(table_id)
            .cloned()
            .ok_or_else(|| TablesError::table_not_found(table_id))
    }

    pub fn contains(&self, table_id: &str) -> bool {
        self.tables.read().contains_key(table_id)
    }

    /// Latest committed state of one table. Never waits on the task lock.
    pub fn read_table(&self, table_id: &str) -> Result<Arc<TableState>, TablesError> {
        Ok(self.handle(table_id)?.committed())
    }

    /// Latest committed state of every table, ordered by table id.
    pub fn read_all(&self) -> Vec<Arc<TableState>> {
        let handles: Vec<Arc<TableHandle>> = self.tables.read().values().cloned().collect();
        handles.iter().map(|h| h.committed()).collect()
    }

    pub(crate) fn register(&self, state: TableState) -> Result<Arc<TableState>, TablesError> {
        let mut tables = self.tables.write();
        let table_id = state.entry.table_id.clone();
        let key_taken = tables
            .values()
            .any(|h| h.committed().entry.table_key == state.entry.table_key);
        if tables.contains_key(&table_id) || key_taken {
            return Err(TablesError::TableAlreadyExists { table_id });
        }
        let handle = Arc::new(TableHandle::new(state));
        let committed = handle.committed();
        tables.insert(table_id, handle);
        Ok(committed)
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }

    /// Runs `apply` against a private copy of the table's state while holding
    /// the table's task lock, then publishes the copy in one swap. If `apply`
    /// fails nothing is published.
    pub(crate) fn mutate<T>(
        &self,
        table_id: &str,
        apply: impl FnOnce(&mut TableState) -> Result<T, TablesError>,
    ) -> Result<T, TablesError> {
        let handle = self.handle(table_id)?;
        let _guard = handle.lock.acquire(&handle.table_id, self.lock_timeout())?;
        if handle.dropped.load(Ordering::Acquire) {
            return Err(TablesError::table_not_found(table_id));
        }
        let mut next = TableState::clone(&handle.committed());
        let out = apply(&mut next)?;
        *handle.state.write() = Arc::new(next);
        Ok(out)
    }

    /// Removes a table under its task lock once `authorize` accepts the
    /// committed state. Returns the final state.
    pub(crate) fn remove(
        &self,
        table_id: &str,
        authorize: impl FnOnce(&TableState) -> Result<(), TablesError>,
    ) -> Result<Arc<TableState>, TablesError> {
        let handle = self.handle(table_id)?;
        let _guard = handle.lock.acquire(&handle.table_id, self.lock_timeout())?;
        if handle.dropped.load(Ordering::Acquire) {
            return Err(TablesError::table_not_found(table_id));
        }
        let last = handle.committed();
        authorize(&last)?;
        handle.dropped.store(true, Ordering::Release);
        self.tables.write().remove(table_id);
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::{Datastore, DatastoreSnapshot};
    use crate::catalog::TableEntry;
    use crate::catalog::schema::{ColumnDef, ColumnType, SchemaType, TableDefinition};
    use crate::catalog::types::{DataEtag, RowWrite};
    use crate::config::TablesConfig;
    use crate::data::DataManager;
    use crate::error::{TablesError, TablesErrorCode};
    use crate::permission::CallerContext;
    use crate::storage::table_state::TableState;
    use crate::table::TableManager;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn state(table_id: &str, key: &str) -> TableState {
        TableState::new(TableEntry {
            table_id: table_id.into(),
            table_key: key.into(),
            schema_type: SchemaType::Data,
            data_etag: DataEtag(0),
            properties_etag: "p".into(),
            columns: vec![],
            created_by: None,
        })
    }

    #[test]
    fn register_rejects_duplicate_id_and_key() {
        let store = Datastore::new(TablesConfig::default());
        store.register(state("t1", "k1")).expect("first");
        let dup_id = store.register(state("t1", "k2")).expect_err("dup id");
        assert_eq!(dup_id.code(), TablesErrorCode::TableAlreadyExists);
        let dup_key = store.register(state("t2", "k1")).expect_err("dup key");
        assert_eq!(dup_key.code(), TablesErrorCode::TableAlreadyExists);
    }

    #[test]
    fn failed_mutation_publishes_nothing() {
        let store = Datastore::new(TablesConfig::default());
        store.register(state("t1", "k1")).expect("register");
        let err = store
            .mutate("t1", |s| {
                s.entry.data_etag = DataEtag(99);
                Err::<(), _>(TablesError::PermissionDenied("nope".into()))
            })
            .expect_err("rejected");
        assert_eq!(err.code(), TablesErrorCode::PermissionDenied);
        assert_eq!(store.read_table("t1").expect("read").data_etag(), DataEtag(0));
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_commit() {
        let store = Datastore::new(TablesConfig::default());
        store.register(state("t1", "k1")).expect("register");
        let before = store.read_table("t1").expect("read");
        store
            .mutate("t1", |s| {
                s.entry.data_etag = DataEtag(5);
                Ok(())
            })
            .expect("mutate");
        assert_eq!(before.data_etag(), DataEtag(0));
        assert_eq!(store.read_table("t1").expect("read").data_etag(), DataEtag(5));
    }

    #[test]
    fn removed_table_is_not_found() {
        let store = Datastore::new(TablesConfig::default());
        store.register(state("t1", "k1")).expect("register");
        store.remove("t1", |_| Ok(())).expect("remove");
        assert!(!store.contains("t1"));
        let err = store.mutate("t1", |_| Ok(())).expect_err("gone");
        assert_eq!(err.code(), TablesErrorCode::NotFound);
    }

    #[test]
    fn restored_sequencer_never_goes_backwards() {
        let mut t = state("t1", "k1");
        t.entry.data_etag = DataEtag(40);
        let store = Datastore::from_snapshot(
            TablesConfig::default(),
            DatastoreSnapshot {
                sequence: 12,
                tables: vec![t],
            },
        );
        assert_eq!(store.current_sequence(), 40);
        assert_eq!(store.next_sequence(), 41);
    }

    #[test]
    fn held_task_lock_fails_mutations_without_committing() {
        let store = Datastore::new(TablesConfig::default().with_lock_timeout_ms(30));
        let alice = CallerContext::new("alice");
        TableManager::new(&store, alice.clone())
            .create_table(
                "t1",
                TableDefinition::new("t1", vec![ColumnDef::new("v", ColumnType::String)]),
            )
            .expect("create");
        let before = store.read_table("t1").expect("t1");
        let handle = store.handle("t1").expect("handle");
        let held = handle
            .lock
            .acquire("t1", Duration::from_millis(30))
            .expect("hold lock");

        let data = DataManager::new(&store, "t1", alice.clone());
        let err = data
            .create_or_update_row(RowWrite::new("r1").value("v", "x"))
            .expect_err("write while locked");
        assert_eq!(err.code(), TablesErrorCode::TaskLockFailure);
        assert!(err.is_retryable());
        let err = TableManager::new(&store, alice.clone())
            .delete_table("t1")
            .expect_err("delete while locked");
        assert_eq!(err.code(), TablesErrorCode::TaskLockFailure);

        let after = store.read_table("t1").expect("still registered");
        assert_eq!(after.data_etag(), before.data_etag());
        assert!(after.rows.is_empty());
        assert!(after.log.is_empty());

        drop(held);
        data.create_or_update_row(RowWrite::new("r1").value("v", "x"))
            .expect("write after release");
    }

    #[test]
    fn writer_queued_behind_table_delete_sees_not_found() {
        let store = Arc::new(Datastore::new(TablesConfig::default()));
        store.register(state("t1", "k1")).expect("register");
        let handle = store.handle("t1").expect("handle");
        let mut writer = None;
        store
            .remove("t1", |_| {
                let queued = Arc::clone(&store);
                writer = Some(thread::spawn(move || {
                    queued.mutate("t1", |s| {
                        s.entry.data_etag = DataEtag(7);
                        Ok(())
                    })
                }));
                // Registry, this test, `remove` and the queued writer.
                let deadline = Instant::now() + Duration::from_secs(5);
                while Arc::strong_count(&handle) < 4 {
                    assert!(Instant::now() < deadline, "writer never reached the table");
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .expect("remove");

        let err = writer
            .expect("writer spawned")
            .join()
            .expect("writer thread")
            .expect_err("table was dropped while queued");
        assert_eq!(err.code(), TablesErrorCode::NotFound);
        assert!(!store.contains("t1"));
        assert_eq!(handle.committed().data_etag(), DataEtag(0));
    }
}
