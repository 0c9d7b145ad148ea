use crate::checkpoint::parse_checkpoint_seq;
use crate::checkpoint::writer::{CheckpointData, CheckpointMeta};
use crate::error::TablesError;
use crate::storage::DatastoreSnapshot;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const TRAILER_LEN: usize = 32;

pub fn load_checkpoint(path: &Path) -> Result<DatastoreSnapshot, TablesError> {
    Ok(read_checkpoint(path)?.1.snapshot)
}

/// Fully decodes the file and reports what it holds without keeping it.
pub fn verify_checkpoint(path: &Path) -> Result<CheckpointMeta, TablesError> {
    let (file_hash, data) = read_checkpoint(path)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some(named_seq) = parse_checkpoint_seq(&filename) {
        if named_seq != data.snapshot.sequence {
            return Err(TablesError::IntegrityError {
                message: format!(
                    "{filename} holds sequence {} but is named for {named_seq}",
                    data.snapshot.sequence
                ),
            });
        }
    }
    Ok(CheckpointMeta {
        filename,
        seq: data.snapshot.sequence,
        tables: data.snapshot.tables.len(),
        rows: data.snapshot.tables.iter().map(|t| t.rows.len()).sum(),
        sha256_hex: file_hash,
        created_at_micros: data.created_at_micros,
    })
}

fn read_checkpoint(path: &Path) -> Result<(String, CheckpointData), TablesError> {
    let bytes = fs::read(path)?;
    if bytes.len() < TRAILER_LEN {
        return Err(TablesError::Decode(format!(
            "checkpoint {} too small",
            path.display()
        )));
    }
    let (compressed, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
    let actual = Sha256::digest(compressed);
    if actual.as_slice() != trailer {
        return Err(TablesError::IntegrityError {
            message: format!("checkpoint {} hash mismatch", path.display()),
        });
    }
    let decompressed = zstd::stream::decode_all(compressed)
        .map_err(|e| TablesError::Io(std::io::Error::other(e.to_string())))?;
    let data: CheckpointData =
        rmp_serde::from_slice(&decompressed).map_err(|e| TablesError::Decode(e.to_string()))?;
    Ok((hex::encode(Sha256::digest(&bytes)), data))
}

#[cfg(test)]
mod tests {
    use super::{load_checkpoint, verify_checkpoint};
    use crate::catalog::schema::{ColumnDef, ColumnType, TableDefinition};
    use crate::catalog::types::RowWrite;
    use crate::checkpoint::writer::write_checkpoint;
    use crate::config::TablesConfig;
    use crate::data::DataManager;
    use crate::error::TablesErrorCode;
    use crate::permission::CallerContext;
    use crate::storage::Datastore;
    use crate::table::TableManager;
    use tempfile::tempdir;

    fn populated() -> Datastore {
        let store = Datastore::new(TablesConfig::default());
        let alice = CallerContext::new("alice");
        for t in ["t1", "t2"] {
            TableManager::new(&store, alice.clone())
                .create_table(
                    t,
                    TableDefinition::new(t, vec![ColumnDef::new("name", ColumnType::String)]),
                )
                .expect("table");
            let data = DataManager::new(&store, t, alice.clone());
            for i in 0..200 {
                let write = RowWrite::new(format!("r{i}")).value("name", format!("{t}-{i}"));
                data.create_or_update_row(write).expect("row");
            }
        }
        store
    }

    #[test]
    fn checkpoint_roundtrip_preserves_state() {
        let dir = tempdir().expect("temp");
        let snapshot = populated().snapshot();
        let meta = write_checkpoint(&snapshot, dir.path(), 3).expect("checkpoint");
        assert_eq!(meta.tables, 2);
        assert_eq!(meta.rows, 400);

        let path = dir.path().join(&meta.filename);
        assert_eq!(load_checkpoint(&path).expect("load"), snapshot);
        let verified = verify_checkpoint(&path).expect("verify");
        assert_eq!(verified.seq, snapshot.sequence);
        assert_eq!(verified.sha256_hex, meta.sha256_hex);
    }

    #[test]
    fn checkpoint_loader_rejects_hash_mismatch() {
        let dir = tempdir().expect("temp");
        let meta = write_checkpoint(&populated().snapshot(), dir.path(), 1).expect("write");
        let path = dir.path().join(meta.filename);
        let mut bytes = std::fs::read(&path).expect("read");
        bytes[0] ^= 0xAA;
        std::fs::write(&path, bytes).expect("write");
        let err = load_checkpoint(&path).expect_err("corrupt");
        assert_eq!(err.code(), TablesErrorCode::DatastoreFailure);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("checkpoint_0000000000000001.tables.zst");
        std::fs::write(&path, b"short").expect("write");
        assert!(load_checkpoint(&path).is_err());
    }
}
