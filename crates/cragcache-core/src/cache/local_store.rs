use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::models::{CragMeta, CragRecord, ImageRecord};

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Application directory under the platform data dir
const APP_NAME: &str = "cragcache";

/// Database file name
const DB_FILE: &str = "offline.db";

const META_TABLE: &str = "crag_meta";
const CRAGS_TABLE: &str = "crags";
const IMAGES_TABLE: &str = "images";

const SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS crag_meta (
        id      TEXT PRIMARY KEY,
        value   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS crags (
        id      TEXT PRIMARY KEY,
        value   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS images (
        id      TEXT PRIMARY KEY,
        crag_id TEXT NOT NULL,
        value   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS images_by_crag ON images(crag_id);
";

/// Process-wide store at the platform default path, opened on first use.
static SHARED: SharedStore = SharedStore::platform_default();

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Local store unavailable: {0}")]
    Init(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    #[error("Local store lock poisoned")]
    Poisoned,
}

/// Handle to the offline database. Clones share one connection.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Arc<PathBuf>,
}

impl LocalStore {
    /// The process-wide store at the default location. Concurrent callers
    /// share a single initialization.
    pub async fn shared() -> Result<LocalStore, StoreError> {
        SHARED.get().await
    }

    /// Default database location: `<data dir>/cragcache/offline.db`.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::Init("could not determine a data directory".to_string()))?;
        Ok(data_dir.join(APP_NAME).join(DB_FILE))
    }

    /// Open (creating and upgrading if needed) the database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<LocalStore, StoreError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || Self::open_blocking(&path))
            .await
            .map_err(|e| StoreError::Init(e.to_string()))?
    }

    fn open_blocking(path: &Path) -> Result<LocalStore, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        Self::upgrade(&mut conn)?;

        info!(path = %path.display(), "Local store opened");
        Ok(LocalStore {
            conn: Arc::new(Mutex::new(conn)),
            path: Arc::new(path.to_path_buf()),
        })
    }

    /// Bring the schema up to `SCHEMA_VERSION`.
    fn upgrade(conn: &mut Connection) -> Result<(), StoreError> {
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA_V1)?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        info!(from = version, to = SCHEMA_VERSION, "Local store schema upgraded");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when both handles share one underlying connection.
    pub fn same_connection(&self, other: &LocalStore) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Run `f` against the connection on the blocking pool. Failures are
    /// logged and turned into `None`.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard).map_err(StoreError::from)
        })
        .await;

        match result {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(op = op, error = %e, "Local store operation failed");
                None
            }
            Err(e) => {
                warn!(op = op, error = %e, "Local store task failed");
                None
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, table: &'static str, id: &str) -> Option<T> {
        let id = id.to_string();
        let sql = format!("SELECT value FROM {} WHERE id = ?1", table);
        let raw: String = self
            .with_conn("get", move |conn| {
                conn.query_row(&sql, params![id], |row| row.get(0)).optional()
            })
            .await??;

        decode(table, &raw)
    }

    async fn put_json<T: Serialize>(&self, table: &'static str, id: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(table = table, error = %e, "Failed to encode record");
                return false;
            }
        };
        let id = id.to_string();
        let sql = format!("INSERT OR REPLACE INTO {} (id, value) VALUES (?1, ?2)", table);
        self.with_conn("put", move |conn| conn.execute(&sql, params![id, raw]))
            .await
            .is_some()
    }

    async fn delete_row(&self, table: &'static str, id: &str) -> bool {
        let id = id.to_string();
        let sql = format!("DELETE FROM {} WHERE id = ?1", table);
        self.with_conn("delete", move |conn| conn.execute(&sql, params![id]))
            .await
            .is_some()
    }

    // ===== Crag Meta =====

    pub async fn get_meta(&self, crag_id: &str) -> Option<CragMeta> {
        self.get_json(META_TABLE, crag_id).await
    }

    pub async fn put_meta(&self, meta: &CragMeta) -> bool {
        self.put_json(META_TABLE, &meta.id, meta).await
    }

    pub async fn delete_meta(&self, crag_id: &str) -> bool {
        self.delete_row(META_TABLE, crag_id).await
    }

    /// Every downloaded crag, most recent first.
    pub async fn all_meta(&self) -> Vec<CragMeta> {
        let rows = self
            .with_conn("all_meta", |conn| {
                let mut stmt = conn.prepare("SELECT value FROM crag_meta")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await
            .unwrap_or_default();

        let mut metas: Vec<CragMeta> = rows
            .iter()
            .filter_map(|raw| decode(META_TABLE, raw))
            .collect();
        metas.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
        metas
    }

    // ===== Crags =====

    pub async fn get_crag(&self, crag_id: &str) -> Option<CragRecord> {
        self.get_json(CRAGS_TABLE, crag_id).await
    }

    pub async fn put_crag(&self, crag: &CragRecord) -> bool {
        self.put_json(CRAGS_TABLE, &crag.id, crag).await
    }

    pub async fn delete_crag(&self, crag_id: &str) -> bool {
        self.delete_row(CRAGS_TABLE, crag_id).await
    }

    // ===== Images =====

    pub async fn get_image(&self, image_id: &str) -> Option<ImageRecord> {
        self.get_json(IMAGES_TABLE, image_id).await
    }

    pub async fn put_image(&self, image: &ImageRecord) -> bool {
        let raw = match serde_json::to_string(image) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(image = %image.id, error = %e, "Failed to encode image record");
                return false;
            }
        };
        let id = image.id.clone();
        let crag_id = image.crag_id.clone();
        self.with_conn("put_image", move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO images (id, crag_id, value) VALUES (?1, ?2, ?3)",
                params![id, crag_id, raw],
            )
        })
        .await
        .is_some()
    }

    pub async fn delete_image(&self, image_id: &str) -> bool {
        self.delete_row(IMAGES_TABLE, image_id).await
    }

    /// All images of a crag, via the `crag_id` index.
    pub async fn images_by_crag(&self, crag_id: &str) -> Vec<ImageRecord> {
        let crag_id = crag_id.to_string();
        let rows = self
            .with_conn("images_by_crag", move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM images WHERE crag_id = ?1 ORDER BY rowid")?;
                let rows = stmt.query_map(params![crag_id], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await
            .unwrap_or_default();

        rows.iter().filter_map(|raw| decode(IMAGES_TABLE, raw)).collect()
    }

    pub async fn delete_images_by_crag(&self, crag_id: &str) -> bool {
        let crag_id = crag_id.to_string();
        match self
            .with_conn("delete_images_by_crag", move |conn| {
                conn.execute("DELETE FROM images WHERE crag_id = ?1", params![crag_id])
            })
            .await
        {
            Some(count) => {
                debug!(count = count, "Deleted cached images");
                true
            }
            None => false,
        }
    }
}

/// Decode a stored record, logging (and skipping) corrupt rows.
fn decode<T: DeserializeOwned>(table: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(table = table, error = %e, "Skipping unreadable record");
            None
        }
    }
}

/// A lazily opened store, initialized at most once no matter how many tasks
/// ask for it concurrently. Backs `LocalStore::shared`.
pub struct SharedStore {
    /// `None` resolves to `LocalStore::default_path()` on first use.
    path: Option<PathBuf>,
    cell: OnceCell<LocalStore>,
    opens: AtomicUsize,
}

impl SharedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            cell: OnceCell::const_new(),
            opens: AtomicUsize::new(0),
        }
    }

    const fn platform_default() -> Self {
        Self {
            path: None,
            cell: OnceCell::const_new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub async fn get(&self) -> Result<LocalStore, StoreError> {
        self.cell
            .get_or_try_init(|| async {
                self.opens.fetch_add(1, Ordering::SeqCst);
                let path = match self.path {
                    Some(ref path) => path.clone(),
                    None => LocalStore::default_path()?,
                };
                LocalStore::open(path).await
            })
            .await
            .cloned()
    }

    /// Number of times the underlying database was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, Point, RouteLine};
    use chrono::Utc;

    fn meta(id: &str) -> CragMeta {
        let bounds = BoundingBox {
            west: -2.6,
            south: 49.4,
            east: -2.5,
            north: 49.5,
        };
        CragMeta {
            id: id.to_string(),
            name: format!("Crag {}", id),
            downloaded_at: Utc::now(),
            bounds,
            projected_bounds: bounds.to_web_mercator(),
            screenshot_url: None,
            screenshot_updated_at: None,
        }
    }

    fn image(id: &str, crag_id: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            crag_id: crag_id.to_string(),
            url: format!("https://img.test/{}.jpg", id),
            latitude: Some(49.45),
            longitude: Some(-2.58),
            width: Some(1200),
            height: Some(800),
            verification_count: 2,
            flag_count: 0,
            route_lines: vec![RouteLine {
                id: format!("{}-r1", id),
                points: vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)],
                color: "#00ff00".to_string(),
                climb: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_open_sets_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DB_FILE);
        let store = LocalStore::open(&path).await.unwrap();
        drop(store);

        let conn = Connection::open(&path).unwrap();
        let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE);
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }
        let err = LocalStore::open(&path).await.err().unwrap();
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 2, supported: 1 }));
    }

    #[tokio::test]
    async fn test_meta_crud() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join(DB_FILE)).await.unwrap();

        assert!(store.get_meta("c1").await.is_none());
        assert!(store.put_meta(&meta("c1")).await);
        assert!(store.put_meta(&meta("c2")).await);
        assert_eq!(store.get_meta("c1").await.unwrap().name, "Crag c1");
        assert_eq!(store.all_meta().await.len(), 2);

        // Overwrite on re-download
        let mut renamed = meta("c1");
        renamed.name = "Renamed".to_string();
        assert!(store.put_meta(&renamed).await);
        assert_eq!(store.get_meta("c1").await.unwrap().name, "Renamed");

        assert!(store.delete_meta("c1").await);
        assert!(store.get_meta("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_images_by_crag_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join(DB_FILE)).await.unwrap();

        assert!(store.put_image(&image("i1", "c1")).await);
        assert!(store.put_image(&image("i2", "c1")).await);
        assert!(store.put_image(&image("i3", "c2")).await);

        let c1: Vec<String> = store.images_by_crag("c1").await.into_iter().map(|i| i.id).collect();
        assert_eq!(c1, vec!["i1", "i2"]);
        assert_eq!(store.get_image("i3").await.unwrap().route_lines.len(), 1);

        assert!(store.delete_images_by_crag("c1").await);
        assert!(store.images_by_crag("c1").await.is_empty());
        assert_eq!(store.images_by_crag("c2").await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE);
        let store = LocalStore::open(&path).await.unwrap();
        assert!(store.put_meta(&meta("good")).await);
        store
            .with_conn("corrupt", |conn| {
                conn.execute("INSERT INTO crag_meta (id, value) VALUES ('bad', 'not json')", [])
            })
            .await
            .unwrap();

        assert!(store.get_meta("bad").await.is_none());
        assert_eq!(store.all_meta().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(SharedStore::new(dir.path().join(DB_FILE)));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { shared.get().await.unwrap() })
            })
            .collect();

        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap());
        }

        assert_eq!(shared.open_count(), 1);
        assert!(stores.iter().all(|s| s.same_connection(&stores[0])));
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let shared = SharedStore::new(blocker.join(DB_FILE));

        assert!(shared.get().await.is_err());
        std::fs::remove_file(&blocker).unwrap();

        let first = shared.get().await.unwrap();
        let second = shared.get().await.unwrap();
        assert!(first.same_connection(&second));
        assert_eq!(shared.open_count(), 2);
    }
}
