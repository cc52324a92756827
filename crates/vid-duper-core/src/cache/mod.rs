pub mod sqlite;

use crate::error::{DecodeError, Error};
use crate::model::{FileRecord, Fingerprint, Signature};
use dashmap::DashMap;
use serde::Serialize;
use sqlite::SignatureDb;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};
use tracing::{debug, info, trace, warn};

/// Outcome of a computation as seen by every caller waiting on it.
#[derive(Debug, Clone)]
enum ComputeFailure {
    Decode(DecodeError),
    Cache(String),
}

impl ComputeFailure {
    fn into_error(self) -> Error {
        match self {
            ComputeFailure::Decode(e) => Error::Decode(e),
            ComputeFailure::Cache(msg) => Error::CacheUnavailable(msg),
        }
    }
}

type InFlight = Arc<OnceLock<Result<Signature, ComputeFailure>>>;

/// Where the caller that ran a flight got its answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Index,
    RememberedFailure,
    Computed,
}

/// Counters for one store's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Served from the index or the database without computing.
    pub hits: usize,
    /// Computations actually run.
    pub computed: usize,
    /// Callers that waited on another caller's computation.
    pub shared: usize,
}

/// Fingerprint-keyed signature cache with single-flight computation.
///
/// Reads go through an in-memory index backed by SQLite. Concurrent requests
/// for the same fingerprint share one computation; the value is persisted
/// before any waiter observes it, so a crash never leaves a half-written
/// entry visible.
///
/// Decode failures are remembered for the lifetime of the store, never on
/// disk: a fingerprint that failed is not decoded again by this store, and a
/// fresh store retries it.
pub struct CacheStore {
    db: Mutex<SignatureDb>,
    sample_count: usize,
    index: DashMap<String, Signature>,
    in_flight: DashMap<String, InFlight>,
    failures: DashMap<String, DecodeError>,
    /// Roots whose rows are all in `index`; misses under them skip SQLite.
    preloaded: RwLock<Vec<PathBuf>>,
    hits: AtomicUsize,
    computed: AtomicUsize,
    shared: AtomicUsize,
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    ///
    /// Entries computed with a different `sample_count` are treated as misses.
    pub fn open(path: impl AsRef<Path>, sample_count: usize) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = SignatureDb::open(&path.to_string_lossy())?;
        debug!("Opened signature cache at {}", path.display());
        Ok(Self::with_db(db, sample_count))
    }

    /// A store that lives only as long as this process.
    pub fn in_memory(sample_count: usize) -> Result<Self, Error> {
        Ok(Self::with_db(SignatureDb::open_in_memory()?, sample_count))
    }

    fn with_db(db: SignatureDb, sample_count: usize) -> Self {
        CacheStore {
            db: Mutex::new(db),
            sample_count,
            index: DashMap::new(),
            in_flight: DashMap::new(),
            failures: DashMap::new(),
            preloaded: RwLock::new(Vec::new()),
            hits: AtomicUsize::new(0),
            computed: AtomicUsize::new(0),
            shared: AtomicUsize::new(0),
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, SignatureDb>, Error> {
        self.db
            .lock()
            .map_err(|e| Error::CacheUnavailable(format!("Failed to lock cache: {}", e)))
    }

    /// Load every valid row under `roots` into the in-memory index.
    ///
    /// Afterwards a lookup under one of these roots is answered by the index
    /// alone, so hashing workers do not queue on the database connection.
    pub fn preload(&self, roots: &[PathBuf]) -> Result<usize, Error> {
        let db = self.db()?;
        let mut loaded = 0usize;
        for root in roots {
            let prefix = root.to_string_lossy();
            for cached in db.load_under_root(&prefix)? {
                if cached.sample_count != self.sample_count
                    || !Path::new(&cached.path).starts_with(root)
                {
                    continue;
                }
                self.index.insert(cached.fingerprint, cached.signature);
                loaded += 1;
            }
        }
        drop(db);

        self.preloaded
            .write()
            .map_err(|e| Error::CacheUnavailable(format!("Failed to lock cache: {}", e)))?
            .extend(roots.iter().cloned());
        debug!("Preloaded {} cached signatures", loaded);
        Ok(loaded)
    }

    fn is_preloaded(&self, path: &Path) -> bool {
        self.preloaded
            .read()
            .map(|roots| roots.iter().any(|root| path.starts_with(root)))
            .unwrap_or(false)
    }

    /// Cached signature for `record`, if one is stored under its current fingerprint.
    pub fn get(&self, record: &FileRecord) -> Result<Option<Signature>, Error> {
        self.lookup(&record.fingerprint().key(), &record.path)
    }

    fn lookup(&self, key: &str, path: &Path) -> Result<Option<Signature>, Error> {
        if let Some(sig) = self.index.get(key) {
            return Ok(Some(sig.clone()));
        }
        if self.is_preloaded(path) {
            return Ok(None);
        }
        let cached = self.db()?.get(key)?;
        match cached {
            Some(cached) if cached.sample_count == self.sample_count => {
                self.index.insert(key.to_string(), cached.signature.clone());
                Ok(Some(cached.signature))
            }
            Some(cached) => {
                trace!(
                    "Cache row for {} sampled {} frames, want {}",
                    cached.path,
                    cached.sample_count,
                    self.sample_count
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn store(&self, fingerprint: &Fingerprint, signature: &Signature) -> Result<(), Error> {
        self.db()?.put(fingerprint, self.sample_count, signature)?;
        self.index.insert(fingerprint.key(), signature.clone());
        Ok(())
    }

    /// Return the signature for `record`, computing it at most once across
    /// all concurrent callers.
    ///
    /// Decode failures are handed to every waiter and remembered in memory
    /// only, see [`CacheStore`].
    pub fn get_or_compute<F>(&self, record: &FileRecord, compute: F) -> Result<Signature, Error>
    where
        F: FnOnce(&FileRecord) -> Result<Signature, DecodeError>,
    {
        let fingerprint = record.fingerprint();
        let key = fingerprint.key();

        if let Some(sig) = self.lookup(&key, &record.path)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Cache hit for {}", record.path.display());
            return Ok(sig);
        }

        let cell: InFlight = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        let mut source = None;
        let result = cell
            .get_or_init(|| {
                // A previous flight may have landed between lookup and entry.
                if let Some(sig) = self.index.get(&key) {
                    source = Some(Source::Index);
                    return Ok(sig.clone());
                }
                if let Some(e) = self.failures.get(&key) {
                    source = Some(Source::RememberedFailure);
                    return Err(ComputeFailure::Decode(e.clone()));
                }
                source = Some(Source::Computed);
                let sig = compute(record).map_err(|e| {
                    self.failures.insert(key.clone(), e.clone());
                    ComputeFailure::Decode(e)
                })?;
                self.store(&fingerprint, &sig)
                    .map_err(|e| ComputeFailure::Cache(e.to_string()))?;
                Ok(sig)
            })
            .clone();

        match source {
            Some(source) => {
                self.in_flight.remove(&key);
                let counter = match source {
                    Source::Index => &self.hits,
                    Source::RememberedFailure => &self.shared,
                    Source::Computed => &self.computed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.shared.fetch_add(1, Ordering::Relaxed);
                trace!("Shared in-flight signature for {}", record.path.display());
            }
        }

        result.map_err(ComputeFailure::into_error)
    }

    /// Rows currently persisted.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.db()?.count()?)
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<usize, Error> {
        let removed = self.db()?.clear()?;
        self.index.clear();
        self.failures.clear();
        info!("Signature cache cleared ({} entries)", removed);
        Ok(removed)
    }

    /// Drop rows whose file no longer exists on disk.
    pub fn prune_missing(&self) -> Result<usize, Error> {
        let db = self.db()?;
        let mut removed = 0usize;
        for path in db.paths()? {
            if Path::new(&path).exists() {
                continue;
            }
            match db.delete_path(&path) {
                Ok(n) => removed += n,
                Err(e) => warn!("Failed to prune cache rows for {}: {}", path, e),
            }
        }
        self.index.retain(|key, _| {
            key.rsplitn(3, '|')
                .nth(2)
                .map_or(true, |p| Path::new(p).exists())
        });
        info!("Pruned {} cache entries for missing files", removed);
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computed: self.computed.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord::new(
            PathBuf::from(path),
            size,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        )
    }

    fn signature(seed: u64, size: u64) -> Signature {
        Signature {
            frame_hashes: vec![seed; 4],
            skipped_frames: 0,
            duration_secs: 10.0,
            width: 640,
            height: 360,
            fps: 30.0,
            file_size: size,
        }
    }

    #[test]
    fn test_second_request_is_a_hit() {
        let store = CacheStore::in_memory(4).unwrap();
        let rec = record("/v/a.mp4", 100);

        let first = store.get_or_compute(&rec, |r| Ok(signature(1, r.size))).unwrap();
        let second = store
            .get_or_compute(&rec, |_| panic!("must not recompute"))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.stats(),
            CacheStats {
                hits: 1,
                computed: 1,
                shared: 0
            }
        );
    }

    #[test]
    fn test_decode_failure_is_remembered_but_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failures.db");
        let rec = record("/v/bad.mp4", 100);

        let store = CacheStore::open(&path, 4).unwrap();
        let err = store
            .get_or_compute(&rec, |_| Err(DecodeError::unreadable("/v/bad.mp4", "corrupt")))
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(store.len().unwrap(), 0);

        // A caller arriving after the failed flight has landed gets the same error.
        let again = store
            .get_or_compute(&rec, |_| panic!("must not decode a known failure twice"))
            .unwrap_err();
        assert!(matches!(again, Error::Decode(DecodeError::Unreadable { .. })));
        assert_eq!(store.stats().computed, 1);
        drop(store);

        let fresh = CacheStore::open(&path, 4).unwrap();
        let sig = fresh.get_or_compute(&rec, |r| Ok(signature(2, r.size))).unwrap();
        assert_eq!(sig.frame_hashes, vec![2; 4]);
    }

    #[test]
    fn test_preloaded_root_misses_skip_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preload.db");
        let store = CacheStore::open(&path, 4).unwrap();
        assert_eq!(store.preload(&[PathBuf::from("/media/one")]).unwrap(), 0);

        // Rows written behind this store's back after preloading.
        let writer = CacheStore::open(&path, 4).unwrap();
        for p in ["/media/one/new.mp4", "/media/two/other.mp4"] {
            writer.get_or_compute(&record(p, 10), |r| Ok(signature(5, r.size))).unwrap();
        }

        assert!(store.get(&record("/media/one/new.mp4", 10)).unwrap().is_none());
        assert!(store.get(&record("/media/two/other.mp4", 10)).unwrap().is_some());
    }

    #[test]
    fn test_changed_fingerprint_misses() {
        let store = CacheStore::in_memory(4).unwrap();
        store
            .get_or_compute(&record("/v/a.mp4", 100), |r| Ok(signature(1, r.size)))
            .unwrap();

        let grown = record("/v/a.mp4", 200);
        assert!(store.get(&grown).unwrap().is_none());
        store.get_or_compute(&grown, |r| Ok(signature(3, r.size))).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.stats().computed, 2);
    }
}
