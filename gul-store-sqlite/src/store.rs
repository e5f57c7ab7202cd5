// gul-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Fence Store
// Description: Fence table, R-Tree index, and metadata under one invariant.
// Purpose: Guarantee that after every externally visible operation, every
//          fence row has exactly one spatial index entry and vice versa.
// Dependencies: gul-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Fences live in a regular table keyed by an integer rowid; the same rowid
//! keys an R-Tree virtual table holding the fence's bounding box in
//! (longitude, latitude) axes. Every mutation touches both tables inside
//! one transaction, never two separate writes. A point query narrows by
//! the R-Tree and then exact-tests each candidate's stored geometry.
//!
//! A mutex-guarded writer connection serializes mutations; reads go through
//! a round-robin pool of read-only WAL connections, so concurrent query
//! callers proceed in parallel and observe the last committed snapshot even
//! while a sync transaction is open. Once the writer commits, subsequent
//! reads observe the new dataset.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use gul_core::BoundingBox;
use gul_core::FenceItem;
use gul_core::FenceType;
use gul_core::Geometry;
use gul_core::Manifest;
use gul_core::Point;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout for store connections (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of pooled read-only connections.
const DEFAULT_READ_POOL_SIZE: usize = 4;
/// Metadata key holding the latest verified manifest.
const META_MANIFEST: &str = "manifest";
/// Metadata key holding the current dataset version.
const META_VERSION: &str = "version";
/// Metadata key holding the last applied snapshot bytes.
const META_SNAPSHOT: &str = "snapshot";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for opening a fence store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Number of pooled read-only connections; at least one is opened.
    pub read_pool_size: usize,
}

impl StoreConfig {
    /// Creates a configuration with default timeouts and pool size.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by the fence store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem failure around the database file.
    #[error("store io error: {0}")]
    Io(String),
    /// SQLite engine failure.
    #[error("store db error: {0}")]
    Db(String),
    /// Stored data failed to decode; the store should be reinitialized.
    #[error("corrupted store: {0}")]
    CorruptedStore(String),
    /// No fence with the requested identifier exists.
    #[error("fence not found: {0}")]
    FenceNotFound(String),
    /// Invalid input to a store operation.
    #[error("invalid store input: {0}")]
    Invalid(String),
}

/// Maps a SQLite error into the store error space.
fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Round-robin pool of read-only connections.
///
/// Each slot is independently locked, so up to pool-size readers run their
/// queries simultaneously; WAL gives every connection a consistent view of
/// the last committed state.
struct ReaderPool {
    /// Pooled read-only connections.
    connections: Vec<Mutex<Connection>>,
    /// Round-robin slot cursor.
    next: AtomicUsize,
}

impl ReaderPool {
    /// Locks the next reader slot.
    fn acquire(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[slot]
            .lock()
            .map_err(|_| StoreError::Db("reader mutex poisoned".to_string()))
    }
}

/// SQLite-backed fence store with R-Tree spatial indexing.
#[derive(Clone)]
pub struct SqliteStore {
    /// Writer connection; all mutations serialize through this mutex.
    writer: Arc<Mutex<Connection>>,
    /// Read-only connections serving queries from committed state.
    readers: Arc<ReaderPool>,
}

impl SqliteStore {
    /// Opens or creates a fence store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened or the
    /// schema cannot be initialized.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.path.as_os_str().is_empty() {
            return Err(StoreError::Invalid("store path is required".to_string()));
        }
        ensure_parent_dir(&config.path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut writer =
            Connection::open_with_flags(&config.path, flags).map_err(db_err)?;
        apply_pragmas(&writer, config)?;
        initialize_schema(&mut writer)?;

        let reader_flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let pool_size = config.read_pool_size.max(1);
        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let reader =
                Connection::open_with_flags(&config.path, reader_flags).map_err(db_err)?;
            reader
                .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
                .map_err(db_err)?;
            connections.push(Mutex::new(reader));
        }

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: Arc::new(ReaderPool {
                connections,
                next: AtomicUsize::new(0),
            }),
        })
    }

    /// Adds a new fence and its index entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on conflicts (including duplicate ids).
    pub fn add_fence(&self, fence: &FenceItem) -> Result<(), StoreError> {
        self.mutate(|tx| insert_fence(tx, fence))
    }

    /// Updates an existing fence and its index entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FenceNotFound`] when no such fence exists; the
    /// update never degrades into an insert.
    pub fn update_fence(&self, fence: &FenceItem) -> Result<(), StoreError> {
        self.mutate(|tx| modify_fence(tx, fence))
    }

    /// Deletes a fence and its index entry in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FenceNotFound`] when no such fence exists.
    pub fn delete_fence(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(|tx| remove_fence(tx, id))
    }

    /// Retrieves a fence by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FenceNotFound`] when absent and
    /// [`StoreError::CorruptedStore`] when the stored row fails to decode.
    pub fn get_fence(&self, id: &str) -> Result<FenceItem, StoreError> {
        let guard = self.read_guard()?;
        let row = guard
            .query_row(
                &format!("SELECT {FENCE_COLUMNS} FROM fences WHERE id = ?1"),
                params![id],
                scan_fence_row,
            )
            .optional()
            .map_err(db_err)?;
        let raw = row.ok_or_else(|| StoreError::FenceNotFound(id.to_string()))?;
        decode_fence(raw)
    }

    /// Lists all fences in descending priority order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query or decode failure.
    pub fn list_fences(&self) -> Result<Vec<FenceItem>, StoreError> {
        let guard = self.read_guard()?;
        let mut stmt = guard
            .prepare(&format!("SELECT {FENCE_COLUMNS} FROM fences ORDER BY priority DESC, id ASC"))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![], scan_fence_row).map_err(db_err)?;

        let mut fences = Vec::new();
        for row in rows {
            fences.push(decode_fence(row.map_err(db_err)?)?);
        }
        Ok(fences)
    }

    /// Finds all fences whose geometry contains the point.
    ///
    /// The R-Tree narrows to bounding-box candidates; each candidate is then
    /// exact-tested against its stored geometry. No temporal filtering
    /// happens here.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query or decode failure.
    pub fn query_point(&self, lat: f64, lon: f64) -> Result<Vec<FenceItem>, StoreError> {
        let point = Point::new(lat, lon)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;

        let guard = self.read_guard()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {FENCE_COLUMNS_QUALIFIED} FROM fences f
                 INNER JOIN fence_index idx ON f.rowid = idx.rowid
                 WHERE idx.min_lon <= ?1 AND idx.max_lon >= ?1
                   AND idx.min_lat <= ?2 AND idx.max_lat >= ?2
                 ORDER BY f.priority DESC, f.id ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![lon, lat], scan_fence_row).map_err(db_err)?;

        let mut fences = Vec::new();
        for row in rows {
            let fence = decode_fence(row.map_err(db_err)?)?;
            if fence.contains(point) {
                fences.push(fence);
            }
        }
        Ok(fences)
    }

    /// Finds all fences whose index bounds intersect the box.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query or decode failure.
    pub fn query_bbox(&self, bounds: &BoundingBox) -> Result<Vec<FenceItem>, StoreError> {
        let guard = self.read_guard()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {FENCE_COLUMNS_QUALIFIED} FROM fences f
                 INNER JOIN fence_index idx ON f.rowid = idx.rowid
                 WHERE idx.max_lon >= ?1 AND idx.min_lon <= ?2
                   AND idx.max_lat >= ?3 AND idx.min_lat <= ?4
                 ORDER BY f.priority DESC, f.id ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat],
                scan_fence_row,
            )
            .map_err(db_err)?;

        let mut fences = Vec::new();
        for row in rows {
            fences.push(decode_fence(row.map_err(db_err)?)?);
        }
        Ok(fences)
    }

    /// Returns the stored manifest, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedStore`] when the stored blob fails to
    /// decode.
    pub fn get_manifest(&self) -> Result<Option<Manifest>, StoreError> {
        let Some(blob) = self.get_metadata(META_MANIFEST)? else {
            return Ok(None);
        };
        let manifest = serde_json::from_slice(&blob)
            .map_err(|err| StoreError::CorruptedStore(format!("manifest decode: {err}")))?;
        Ok(Some(manifest))
    }

    /// Stores the latest verified manifest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on encode or write failure.
    pub fn set_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(manifest)
            .map_err(|err| StoreError::Invalid(format!("manifest encode: {err}")))?;
        self.mutate(|tx| put_metadata(tx, META_MANIFEST, &blob))
    }

    /// Returns the current dataset version; 0 before the first sync.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedStore`] when the stored value fails to
    /// parse.
    pub fn get_version(&self) -> Result<u64, StoreError> {
        let Some(blob) = self.get_metadata(META_VERSION)? else {
            return Ok(0);
        };
        parse_version(&blob)
    }

    /// Stores the current dataset version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn set_version(&self, version: u64) -> Result<(), StoreError> {
        self.mutate(|tx| put_metadata(tx, META_VERSION, version.to_string().as_bytes()))
    }

    /// Returns the last applied snapshot bytes, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on read failure.
    pub fn get_snapshot_bytes(&self) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_metadata(META_SNAPSHOT)
    }

    /// Runs `f` inside a single writer transaction.
    ///
    /// The closure's `Ok` commits; any `Err` rolls the transaction back,
    /// leaving fence table, index, and metadata untouched.
    ///
    /// # Errors
    ///
    /// Returns the closure error, or [`StoreError::Db`] on commit failure.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&StoreTx<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| StoreError::Db("writer mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(db_err)?;
        let wrapper = StoreTx { tx };
        let value = f(&wrapper)?;
        wrapper.tx.commit().map_err(db_err)?;
        Ok(value)
    }

    /// Runs a single mutation in its own transaction.
    fn mutate(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| StoreError::Db("writer mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(db_err)?;
        f(&tx)?;
        tx.commit().map_err(db_err)
    }

    /// Reads one metadata value.
    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.read_guard()?;
        guard
            .query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)
    }

    /// Acquires a read-only connection from the pool.
    fn read_guard(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.readers.acquire()
    }
}

// ============================================================================
// SECTION: Scoped Transaction
// ============================================================================

/// A user-scoped store transaction.
///
/// All operations observe and extend the same uncommitted state; the
/// transaction commits only when the `with_transaction` closure returns
/// `Ok`.
pub struct StoreTx<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl StoreTx<'_> {
    /// Adds a fence inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Db`] on conflicts.
    pub fn add_fence(&self, fence: &FenceItem) -> Result<(), StoreError> {
        insert_fence(&self.tx, fence)
    }

    /// Updates a fence inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FenceNotFound`] when absent.
    pub fn update_fence(&self, fence: &FenceItem) -> Result<(), StoreError> {
        modify_fence(&self.tx, fence)
    }

    /// Deletes a fence inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::FenceNotFound`] when absent.
    pub fn delete_fence(&self, id: &str) -> Result<(), StoreError> {
        remove_fence(&self.tx, id)
    }

    /// Replaces the entire fence set inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn replace_all_fences(&self, fences: &[FenceItem]) -> Result<(), StoreError> {
        self.tx.execute("DELETE FROM fence_index", params![]).map_err(db_err)?;
        self.tx.execute("DELETE FROM fences", params![]).map_err(db_err)?;
        for fence in fences {
            insert_fence(&self.tx, fence)?;
        }
        Ok(())
    }

    /// Stores the manifest inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on encode or write failure.
    pub fn set_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(manifest)
            .map_err(|err| StoreError::Invalid(format!("manifest encode: {err}")))?;
        put_metadata(&self.tx, META_MANIFEST, &blob)
    }

    /// Stores the version inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn set_version(&self, version: u64) -> Result<(), StoreError> {
        put_metadata(&self.tx, META_VERSION, version.to_string().as_bytes())
    }

    /// Stores the applied snapshot bytes inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on write failure.
    pub fn set_snapshot_bytes(&self, bytes: &[u8]) -> Result<(), StoreError> {
        put_metadata(&self.tx, META_SNAPSHOT, bytes)
    }

    /// Lists all fences as visible inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on query or decode failure.
    pub fn list_fences(&self) -> Result<Vec<FenceItem>, StoreError> {
        let mut stmt = self
            .tx
            .prepare(&format!("SELECT {FENCE_COLUMNS} FROM fences ORDER BY priority DESC, id ASC"))
            .map_err(db_err)?;
        let rows = stmt.query_map(params![], scan_fence_row).map_err(db_err)?;

        let mut fences = Vec::new();
        for row in rows {
            fences.push(decode_fence(row.map_err(db_err)?)?);
        }
        Ok(fences)
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Column list shared by every fence select.
const FENCE_COLUMNS: &str = "id, type, start_ts, end_ts, priority, max_altitude, max_speed, \
                             name, description, signature, key_id, geometry_json";
/// Column list qualified for joined selects.
const FENCE_COLUMNS_QUALIFIED: &str =
    "f.id, f.type, f.start_ts, f.end_ts, f.priority, f.max_altitude, f.max_speed, \
     f.name, f.description, f.signature, f.key_id, f.geometry_json";

/// Ensures the parent directory for the database exists.
fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Io(err.to_string()))?;
        }
    }
    Ok(())
}

/// Applies WAL and timeout pragmas to a connection.
fn apply_pragmas(connection: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    connection
        .execute_batch("PRAGMA journal_mode = wal; PRAGMA synchronous = full; PRAGMA foreign_keys = ON;")
        .map_err(db_err)?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_err)
}

/// Creates tables and indexes if missing.
fn initialize_schema(connection: &mut Connection) -> Result<(), StoreError> {
    let tx = connection.transaction().map_err(db_err)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS fences (
            rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            type INTEGER NOT NULL,
            start_ts INTEGER NOT NULL DEFAULT 0,
            end_ts INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 0,
            max_altitude INTEGER NOT NULL DEFAULT 0,
            max_speed INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            signature BLOB,
            key_id TEXT NOT NULL DEFAULT '',
            geometry_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS fence_index USING rtree(
            rowid,
            min_lon, max_lon,
            min_lat, max_lat
        );
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
        CREATE INDEX IF NOT EXISTS fences_priority_idx ON fences(priority);
        CREATE INDEX IF NOT EXISTS fences_time_idx ON fences(start_ts, end_ts);",
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// A fence row before geometry and type decoding.
struct RawFenceRow {
    id: String,
    type_code: i64,
    start_ts: i64,
    end_ts: i64,
    priority: i64,
    max_altitude: i64,
    max_speed: i64,
    name: String,
    description: String,
    signature: Option<Vec<u8>>,
    key_id: String,
    geometry_json: String,
}

/// Scans the shared fence column list.
fn scan_fence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawFenceRow> {
    Ok(RawFenceRow {
        id: row.get(0)?,
        type_code: row.get(1)?,
        start_ts: row.get(2)?,
        end_ts: row.get(3)?,
        priority: row.get(4)?,
        max_altitude: row.get(5)?,
        max_speed: row.get(6)?,
        name: row.get(7)?,
        description: row.get(8)?,
        signature: row.get(9)?,
        key_id: row.get(10)?,
        geometry_json: row.get(11)?,
    })
}

/// Decodes a raw row into a fence item, failing closed on corruption.
fn decode_fence(raw: RawFenceRow) -> Result<FenceItem, StoreError> {
    let fence_type = FenceType::from_code(raw.type_code).ok_or_else(|| {
        StoreError::CorruptedStore(format!("fence {}: unknown type code {}", raw.id, raw.type_code))
    })?;
    let geometry: Geometry = serde_json::from_str(&raw.geometry_json).map_err(|err| {
        StoreError::CorruptedStore(format!("fence {}: geometry decode: {err}", raw.id))
    })?;
    Ok(FenceItem {
        id: raw.id,
        fence_type,
        geometry,
        start_ts: raw.start_ts,
        end_ts: raw.end_ts,
        priority: u32::try_from(raw.priority).unwrap_or(0),
        max_altitude_m: u32::try_from(raw.max_altitude).unwrap_or(0),
        max_speed_mps: u32::try_from(raw.max_speed).unwrap_or(0),
        name: raw.name,
        description: raw.description,
        signature: raw.signature.unwrap_or_default(),
        key_id: raw.key_id,
    })
}

// ============================================================================
// SECTION: Mutations
// ============================================================================

/// Inserts a fence row and its index entry.
fn insert_fence(tx: &rusqlite::Transaction<'_>, fence: &FenceItem) -> Result<(), StoreError> {
    let geometry_json = serde_json::to_string(&fence.geometry)
        .map_err(|err| StoreError::Invalid(format!("geometry encode: {err}")))?;
    let bounds = fence.bounds();

    tx.execute(
        "INSERT INTO fences (id, type, start_ts, end_ts, priority, max_altitude, max_speed,
            name, description, signature, key_id, geometry_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            fence.id,
            fence.fence_type.code(),
            fence.start_ts,
            fence.end_ts,
            i64::from(fence.priority),
            i64::from(fence.max_altitude_m),
            i64::from(fence.max_speed_mps),
            fence.name,
            fence.description,
            fence.signature,
            fence.key_id,
            geometry_json,
        ],
    )
    .map_err(db_err)?;
    let row_id = tx.last_insert_rowid();

    tx.execute(
        "INSERT INTO fence_index (rowid, min_lon, max_lon, min_lat, max_lat)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![row_id, bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Updates a fence row and its index entry.
fn modify_fence(tx: &rusqlite::Transaction<'_>, fence: &FenceItem) -> Result<(), StoreError> {
    let geometry_json = serde_json::to_string(&fence.geometry)
        .map_err(|err| StoreError::Invalid(format!("geometry encode: {err}")))?;
    let bounds = fence.bounds();

    let changed = tx
        .execute(
            "UPDATE fences SET type = ?1, start_ts = ?2, end_ts = ?3, priority = ?4,
                max_altitude = ?5, max_speed = ?6, name = ?7, description = ?8,
                signature = ?9, key_id = ?10, geometry_json = ?11,
                updated_at = strftime('%s', 'now')
             WHERE id = ?12",
            params![
                fence.fence_type.code(),
                fence.start_ts,
                fence.end_ts,
                i64::from(fence.priority),
                i64::from(fence.max_altitude_m),
                i64::from(fence.max_speed_mps),
                fence.name,
                fence.description,
                fence.signature,
                fence.key_id,
                geometry_json,
                fence.id,
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(StoreError::FenceNotFound(fence.id.clone()));
    }

    tx.execute(
        "UPDATE fence_index SET min_lon = ?1, max_lon = ?2, min_lat = ?3, max_lat = ?4
         WHERE rowid = (SELECT rowid FROM fences WHERE id = ?5)",
        params![bounds.min_lon, bounds.max_lon, bounds.min_lat, bounds.max_lat, fence.id],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Deletes a fence row and its index entry.
fn remove_fence(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<(), StoreError> {
    let row_id: Option<i64> = tx
        .query_row("SELECT rowid FROM fences WHERE id = ?1", params![id], |row| row.get(0))
        .optional()
        .map_err(db_err)?;
    let Some(row_id) = row_id else {
        return Err(StoreError::FenceNotFound(id.to_string()));
    };

    tx.execute("DELETE FROM fences WHERE rowid = ?1", params![row_id]).map_err(db_err)?;
    tx.execute("DELETE FROM fence_index WHERE rowid = ?1", params![row_id]).map_err(db_err)?;
    Ok(())
}

/// Upserts one metadata value.
fn put_metadata(tx: &rusqlite::Transaction<'_>, key: &str, value: &[u8]) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO metadata (key, value, updated_at)
         VALUES (?1, ?2, strftime('%s', 'now'))",
        params![key, value],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Parses a stored version value.
fn parse_version(blob: &[u8]) -> Result<u64, StoreError> {
    let text = std::str::from_utf8(blob)
        .map_err(|_| StoreError::CorruptedStore("version is not utf-8".to_string()))?;
    text.parse::<u64>()
        .map_err(|_| StoreError::CorruptedStore(format!("version parse: {text}")))
}
