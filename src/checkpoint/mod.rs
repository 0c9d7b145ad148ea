pub mod loader;
pub mod writer;

use crate::checkpoint::loader::load_checkpoint;
use crate::error::TablesError;
use crate::storage::DatastoreSnapshot;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CHECKPOINT_PREFIX: &str = "checkpoint_";
const CHECKPOINT_SUFFIX: &str = ".tables.zst";

pub fn checkpoint_filename(seq: u64) -> String {
    format!("{CHECKPOINT_PREFIX}{seq:016}{CHECKPOINT_SUFFIX}")
}

pub fn parse_checkpoint_seq(name: &str) -> Option<u64> {
    name.strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}

/// Checkpoint files in `dir`, oldest first. A missing directory has none.
pub fn list_checkpoints(dir: &Path) -> Result<Vec<(u64, PathBuf)>, TablesError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut found: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            parse_checkpoint_seq(&name).map(|seq| (seq, entry.path()))
        })
        .collect();
    found.sort_by_key(|(seq, _)| *seq);
    Ok(found)
}

/// Newest checkpoint that loads cleanly. Damaged files are skipped in favor
/// of older ones.
pub fn load_latest(dir: &Path) -> Result<Option<(PathBuf, DatastoreSnapshot)>, TablesError> {
    for (seq, path) in list_checkpoints(dir)?.into_iter().rev() {
        match load_checkpoint(&path) {
            Ok(snapshot) => {
                info!(seq, path = %path.display(), "checkpoint loaded");
                return Ok(Some((path, snapshot)));
            }
            Err(err) => {
                warn!(
                    seq,
                    path = %path.display(),
                    error = %err,
                    "checkpoint load failed, trying older checkpoint"
                );
            }
        }
    }
    Ok(None)
}

/// Deletes all but the newest `retain` checkpoints. Returns how many were
/// removed.
pub fn prune_checkpoints(dir: &Path, retain: usize) -> Result<usize, TablesError> {
    let found = list_checkpoints(dir)?;
    let excess = found.len().saturating_sub(retain);
    for (_, path) in found.iter().take(excess) {
        fs::remove_file(path)?;
    }
    Ok(excess)
}

#[cfg(test)]
mod tests {
    use super::{
        checkpoint_filename, list_checkpoints, load_latest, parse_checkpoint_seq,
        prune_checkpoints,
    };
    use crate::checkpoint::writer::write_checkpoint;
    use crate::storage::DatastoreSnapshot;
    use tempfile::tempdir;

    fn empty(sequence: u64) -> DatastoreSnapshot {
        DatastoreSnapshot {
            sequence,
            tables: vec![],
        }
    }

    #[test]
    fn filenames_roundtrip_and_ignore_strangers() {
        assert_eq!(
            checkpoint_filename(42),
            "checkpoint_0000000000000042.tables.zst"
        );
        assert_eq!(parse_checkpoint_seq(&checkpoint_filename(42)), Some(42));
        assert_eq!(parse_checkpoint_seq("checkpoint_42.tables.gz"), None);
        assert_eq!(parse_checkpoint_seq("notes.txt"), None);
    }

    #[test]
    fn latest_skips_corrupt_newest() {
        let dir = tempdir().expect("temp");
        write_checkpoint(&empty(5), dir.path(), 1).expect("five");
        let newest = write_checkpoint(&empty(9), dir.path(), 1).expect("nine");
        std::fs::write(dir.path().join(newest.filename), [0x5a_u8; 64]).expect("corrupt");

        let (_, snapshot) = load_latest(dir.path()).expect("load").expect("some");
        assert_eq!(snapshot.sequence, 5);
    }

    #[test]
    fn prune_keeps_newest() {
        let dir = tempdir().expect("temp");
        for seq in [1, 2, 3, 4] {
            write_checkpoint(&empty(seq), dir.path(), 1).expect("write");
        }
        assert_eq!(prune_checkpoints(dir.path(), 2).expect("prune"), 2);
        let left: Vec<u64> = list_checkpoints(dir.path())
            .expect("list")
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(left, vec![3, 4]);
    }

    #[test]
    fn missing_directory_has_no_checkpoints() {
        let dir = tempdir().expect("temp");
        assert!(
            load_latest(&dir.path().join("absent"))
                .expect("load")
                .is_none()
        );
    }
}
