pub mod acl;
pub mod auth;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod diff;
pub mod error;
pub mod permission;
pub mod properties;
pub mod service;
pub mod storage;
pub mod table;

use crate::acl::TableAclManager;
use crate::checkpoint::writer::{CheckpointMeta, write_checkpoint};
use crate::checkpoint::{load_latest, prune_checkpoints};
use crate::config::TablesConfig;
use crate::data::DataManager;
use crate::diff::DiffManager;
use crate::error::TablesError;
use crate::permission::CallerContext;
use crate::properties::PropertiesManager;
use crate::storage::Datastore;
use crate::table::TableManager;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Creates a directory with restrictive permissions (0o700 on Unix); table
/// contents are only meant for the owning service account.
fn create_private_dir_all(path: &Path) -> Result<(), TablesError> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new().recursive(true).mode(0o700).create(path)?;
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)?;
    }
    if !fs::metadata(path)?.is_dir() {
        return Err(TablesError::InvalidConfig {
            message: format!("path is not a directory: {}", path.display()),
        });
    }
    Ok(())
}

/// One running tables service: the datastore plus, when opened on a
/// directory, its checkpoint location.
pub struct TablesInstance {
    config: TablesConfig,
    dir: Option<PathBuf>,
    store: Datastore,
    checkpoint_lock: Mutex<()>,
}

impl TablesInstance {
    pub fn open_in_memory(config: TablesConfig) -> Result<Self, TablesError> {
        config.validate()?;
        info!(
            lock_timeout_ms = config.lock_timeout_ms,
            default_fetch_limit = config.default_fetch_limit,
            max_fetch_limit = config.max_fetch_limit,
            "tables instance opened in memory"
        );
        Ok(Self {
            store: Datastore::new(config.clone()),
            config,
            dir: None,
            checkpoint_lock: Mutex::new(()),
        })
    }

    /// Opens `dir`, restoring the newest valid checkpoint if there is one.
    pub fn open(config: TablesConfig, dir: &Path) -> Result<Self, TablesError> {
        config.validate()?;
        info!(
            dir = %dir.display(),
            lock_timeout_ms = config.lock_timeout_ms,
            default_fetch_limit = config.default_fetch_limit,
            max_fetch_limit = config.max_fetch_limit,
            checkpoint_retention = config.checkpoint_retention,
            checkpoint_compression_level = config.checkpoint_compression_level,
            "tables config"
        );
        create_private_dir_all(dir)?;
        let store = match load_latest(dir)? {
            Some((path, snapshot)) => {
                info!(
                    checkpoint = %path.display(),
                    sequence = snapshot.sequence,
                    tables = snapshot.tables.len(),
                    "restored from checkpoint"
                );
                Datastore::from_snapshot(config.clone(), snapshot)
            }
            None => Datastore::new(config.clone()),
        };
        Ok(Self {
            config,
            dir: Some(dir.to_path_buf()),
            store,
            checkpoint_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &TablesConfig {
        &self.config
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn datastore(&self) -> &Datastore {
        &self.store
    }

    /// Writes the current committed state of every table to disk and prunes
    /// checkpoints beyond the configured retention.
    pub fn checkpoint(&self) -> Result<CheckpointMeta, TablesError> {
        let Some(dir) = self.dir.as_deref() else {
            return Err(TablesError::InvalidArgument(
                "in-memory instance has no checkpoint directory".into(),
            ));
        };
        let _serialized = self.checkpoint_lock.lock();
        let snapshot = self.store.snapshot();
        let meta = write_checkpoint(&snapshot, dir, self.config.checkpoint_compression_level)?;
        let pruned = prune_checkpoints(dir, self.config.checkpoint_retention)?;
        info!(
            filename = %meta.filename,
            seq = meta.seq,
            tables = meta.tables,
            rows = meta.rows,
            pruned,
            "checkpoint written"
        );
        Ok(meta)
    }

    pub fn tables(&self, caller: &CallerContext) -> TableManager<'_> {
        TableManager::new(&self.store, caller.clone())
    }

    pub fn data(&self, table_id: &str, caller: &CallerContext) -> DataManager<'_> {
        DataManager::new(&self.store, table_id, caller.clone())
    }

    pub fn diff(&self, table_id: &str, caller: &CallerContext) -> DiffManager<'_> {
        DiffManager::new(&self.store, table_id, caller.clone())
    }

    pub fn acl(&self, table_id: &str, caller: &CallerContext) -> TableAclManager<'_> {
        TableAclManager::new(&self.store, table_id, caller.clone())
    }

    pub fn properties(&self, table_id: &str, caller: &CallerContext) -> PropertiesManager<'_> {
        PropertiesManager::new(&self.store, table_id, caller.clone())
    }
}
