//! SQLite connection pool bootstrap, shared by every store in this crate.
//! Grounded on `mneme_memory::sqlite::SqliteMemory::new` —
//! one pool per data root, `PRAGMA foreign_keys = ON`, migrations run on
//! connect.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

pub async fn open_pool<P: AsRef<Path>>(db_path: P) -> Result<Pool<Sqlite>> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await
        .with_context(|| format!("failed to open sqlite db at {}", db_path.as_ref().display()))?;
    Ok(pool)
}

/// Encode an embedding vector as a little-endian `f32` BLOB for storage.
pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

/// Decode a BLOB produced by [`encode_embedding`] back into an `f32` vector.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
