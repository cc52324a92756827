use crate::model::{Fingerprint, Signature};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use tracing::{debug, warn};

const SCHEMA_VERSION: i64 = 2;

/// A signature row as it sits in the cache, with the parameters it was
/// computed under.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSignature {
    pub fingerprint: String,
    pub path: String,
    pub sample_count: usize,
    pub signature: Signature,
}

/// SQLite persistence for computed signatures.
///
/// Rows are keyed by [`Fingerprint::key`]. A file that changed on disk gets a
/// new key, and the write that stores it removes every older row for the same
/// path in the same transaction.
pub struct SignatureDb {
    conn: Connection,
}

impl SignatureDb {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = SignatureDb { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = SignatureDb { conn };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 16MB cache)");
        Ok(())
    }

    /// Rows written by an unknown schema are derived data; drop and rebuild.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != 0 && version != SCHEMA_VERSION {
            debug!(
                "Cache schema version {} != {}, dropping and recreating",
                version, SCHEMA_VERSION
            );
            self.conn
                .execute_batch("DROP TABLE IF EXISTS signature_cache;")?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Signature cache schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<CachedSignature>> {
        self.conn
            .query_row(
                "SELECT fingerprint, path, sample_count, frame_hashes, skipped_frames, \
                 duration_secs, width, height, file_size, fps \
                 FROM signature_cache WHERE fingerprint = ?1",
                params![fingerprint],
                row_to_cached,
            )
            .optional()
    }

    /// Store a signature, replacing any row for an older version of the same file.
    pub fn put(
        &mut self,
        fingerprint: &Fingerprint,
        sample_count: usize,
        signature: &Signature,
    ) -> Result<()> {
        let hashes = bincode::serialize(&signature.frame_hashes)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let key = fingerprint.key();
        let now = chrono::Utc::now().to_rfc3339();

        let tx = self.conn.transaction()?;
        let stale = tx.execute(
            "DELETE FROM signature_cache WHERE path = ?1 AND fingerprint != ?2",
            params![fingerprint.path, key],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO signature_cache \
             (fingerprint, path, file_size, modified_ns, sample_count, frame_hashes, \
              skipped_frames, duration_secs, width, height, fps, computed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                key,
                fingerprint.path,
                fingerprint.size as i64,
                fingerprint.modified_ns,
                sample_count as i64,
                hashes,
                signature.skipped_frames,
                signature.duration_secs,
                signature.width,
                signature.height,
                signature.fps,
                now,
            ],
        )?;
        tx.commit()?;

        if stale > 0 {
            debug!("Replaced {} stale cache row(s) for {}", stale, fingerprint.path);
        }
        Ok(())
    }

    /// All rows whose path lies under `root`.
    pub fn load_under_root(&self, root: &str) -> Result<Vec<CachedSignature>> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, path, sample_count, frame_hashes, skipped_frames, \
             duration_secs, width, height, file_size, fps \
             FROM signature_cache WHERE substr(path, 1, ?2) = ?1",
        )?;
        let rows = stmt.query_map(params![root, root.chars().count() as i64], row_to_cached)?;

        let mut loaded = Vec::new();
        for row in rows {
            match row {
                Ok(cached) => loaded.push(cached),
                Err(e) => warn!("Ignoring unreadable cache row: {}", e),
            }
        }
        Ok(loaded)
    }

    pub fn paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT path FROM signature_cache ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    pub fn delete_path(&self, path: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM signature_cache WHERE path = ?1", params![path])
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM signature_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM signature_cache", [])?;
        debug!("Signature cache truncated ({} rows)", removed);
        Ok(removed)
    }
}

fn row_to_cached(row: &Row<'_>) -> Result<CachedSignature> {
    let blob: Vec<u8> = row.get(3)?;
    let frame_hashes: Vec<u64> = bincode::deserialize(&blob)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Blob, Box::new(e)))?;
    let sample_count: i64 = row.get(2)?;
    let file_size: i64 = row.get(8)?;

    Ok(CachedSignature {
        fingerprint: row.get(0)?,
        path: row.get(1)?,
        sample_count: sample_count.max(0) as usize,
        signature: Signature {
            frame_hashes,
            skipped_frames: row.get(4)?,
            duration_secs: row.get(5)?,
            width: row.get(6)?,
            height: row.get(7)?,
            fps: row.get(9)?,
            file_size: file_size.max(0) as u64,
        },
    })
}
