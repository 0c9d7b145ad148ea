use crate::checkpoint::checkpoint_filename;
use crate::error::TablesError;
use crate::storage::DatastoreSnapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub filename: String,
    pub seq: u64,
    pub tables: usize,
    pub rows: usize,
    /// Digest of the whole file as written, trailer included.
    pub sha256_hex: String,
    pub created_at_micros: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CheckpointData {
    pub created_at_micros: u64,
    pub snapshot: DatastoreSnapshot,
}

/// Writes `snapshot` to `dir` as msgpack, zstd-compressed, followed by the
/// SHA-256 of the compressed bytes. The file appears atomically under its
/// final name.
pub fn write_checkpoint(
    snapshot: &DatastoreSnapshot,
    dir: &Path,
    compression_level: i32,
) -> Result<CheckpointMeta, TablesError> {
    fs::create_dir_all(dir)?;
    let created_at_micros = now_micros();
    let data = CheckpointData {
        created_at_micros,
        snapshot: snapshot.clone(),
    };
    let encoded = rmp_serde::to_vec(&data).map_err(|e| TablesError::Encode(e.to_string()))?;
    let mut payload = zstd::stream::encode_all(encoded.as_slice(), compression_level)
        .map_err(|e| TablesError::Io(std::io::Error::other(e.to_string())))?;
    let trailer = Sha256::digest(&payload);
    payload.extend_from_slice(&trailer);

    let file_hash = Sha256::digest(&payload);
    let filename = checkpoint_filename(snapshot.sequence);
    let final_path = dir.join(&filename);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&payload)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(&final_path).map_err(|e| TablesError::Io(e.error))?;

    Ok(CheckpointMeta {
        filename,
        seq: snapshot.sequence,
        tables: snapshot.tables.len(),
        rows: snapshot.tables.iter().map(|t| t.rows.len()).sum(),
        sha256_hex: hex::encode(file_hash),
        created_at_micros,
    })
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
