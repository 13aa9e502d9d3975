use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::ocr::canonicalize_plate;

use super::DEFAULT_THRESHOLD_KMH;

pub const DEFAULT_BLACKLIST_REASON: &str = "added via admin";

/// Shared policy configuration: speed threshold plus plate blacklist.
///
/// Mutation methods are the only write path. Every method takes `&self` so one
/// store can be shared between the frame loop and the admin interface. Plates
/// are canonicalized on every call.
pub trait PolicyStore: Send + Sync {
    fn threshold(&self) -> Result<f64>;

    fn set_threshold(&self, kmh: f64) -> Result<()>;

    fn is_blacklisted(&self, plate: &str) -> Result<bool>;

    /// Returns false when the plate was already listed.
    fn add(&self, plate: &str) -> Result<bool>;

    /// Returns false when the plate was not listed.
    fn remove(&self, plate: &str) -> Result<bool>;

    fn list(&self) -> Result<Vec<String>>;
}

fn validate_threshold(kmh: f64) -> Result<()> {
    if !kmh.is_finite() || kmh < 0.0 {
        return Err(anyhow!("threshold must be a finite, non-negative km/h value"));
    }
    Ok(())
}

fn canonical_nonempty(plate: &str) -> Result<String> {
    let canonical = canonicalize_plate(plate);
    if canonical.is_empty() {
        return Err(anyhow!("number plate must not be empty"));
    }
    Ok(canonical)
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

/// Threshold lives in an `AtomicU64` holding the f64 bits, so a reader sees
/// either the old or the new value and never a torn one.
#[derive(Debug)]
pub struct InMemoryPolicyStore {
    threshold_bits: AtomicU64,
    blacklist: RwLock<HashSet<String>>,
}

impl InMemoryPolicyStore {
    pub fn new(threshold_kmh: f64) -> Self {
        Self {
            threshold_bits: AtomicU64::new(threshold_kmh.to_bits()),
            blacklist: RwLock::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_KMH)
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn threshold(&self) -> Result<f64> {
        Ok(f64::from_bits(self.threshold_bits.load(Ordering::Acquire)))
    }

    fn set_threshold(&self, kmh: f64) -> Result<()> {
        validate_threshold(kmh)?;
        self.threshold_bits.store(kmh.to_bits(), Ordering::Release);
        Ok(())
    }

    fn is_blacklisted(&self, plate: &str) -> Result<bool> {
        let plate = canonicalize_plate(plate);
        let guard = self
            .blacklist
            .read()
            .map_err(|_| anyhow!("blacklist lock poisoned"))?;
        Ok(guard.contains(&plate))
    }

    fn add(&self, plate: &str) -> Result<bool> {
        let plate = canonical_nonempty(plate)?;
        let mut guard = self
            .blacklist
            .write()
            .map_err(|_| anyhow!("blacklist lock poisoned"))?;
        Ok(guard.insert(plate))
    }

    fn remove(&self, plate: &str) -> Result<bool> {
        let plate = canonicalize_plate(plate);
        let mut guard = self
            .blacklist
            .write()
            .map_err(|_| anyhow!("blacklist lock poisoned"))?;
        Ok(guard.remove(&plate))
    }

    fn list(&self) -> Result<Vec<String>> {
        let guard = self
            .blacklist
            .read()
            .map_err(|_| anyhow!("blacklist lock poisoned"))?;
        let mut plates: Vec<String> = guard.iter().cloned().collect();
        plates.sort();
        Ok(plates)
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

/// `threshold()` falls back to `default_threshold` until a value has been set.
pub struct SqlitePolicyStore {
    conn: Mutex<Connection>,
    default_threshold: f64,
}

impl SqlitePolicyStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            default_threshold: DEFAULT_THRESHOLD_KMH,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Threshold reported while the `settings` table has no row.
    pub fn with_default_threshold(mut self, kmh: f64) -> Result<Self> {
        validate_threshold(kmh)?;
        self.default_threshold = kmh;
        Ok(self)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
              id INTEGER PRIMARY KEY,
              threshold_speed REAL NOT NULL DEFAULT 50
            );

            CREATE TABLE IF NOT EXISTS blacklisted_vehicles (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              numberplate TEXT NOT NULL UNIQUE,
              reason TEXT NOT NULL DEFAULT ''
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("policy store connection lock poisoned"))
    }

    pub fn add_with_reason(&self, plate: &str, reason: &str) -> Result<bool> {
        let plate = canonical_nonempty(plate)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO blacklisted_vehicles(numberplate, reason) VALUES (?1, ?2)",
            params![plate, reason],
        )?;
        Ok(changed > 0)
    }
}

impl PolicyStore for SqlitePolicyStore {
    fn threshold(&self) -> Result<f64> {
        let conn = self.lock()?;
        let value: Option<f64> = conn
            .query_row(
                "SELECT threshold_speed FROM settings WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(self.default_threshold))
    }

    fn set_threshold(&self, kmh: f64) -> Result<()> {
        validate_threshold(kmh)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO settings(id, threshold_speed) VALUES (1, ?1)
            ON CONFLICT(id) DO UPDATE SET threshold_speed = excluded.threshold_speed
            "#,
            params![kmh],
        )?;
        Ok(())
    }

    fn is_blacklisted(&self, plate: &str) -> Result<bool> {
        let plate = canonicalize_plate(plate);
        if plate.is_empty() {
            return Ok(false);
        }
        let conn = self.lock()?;
        let listed: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM blacklisted_vehicles WHERE numberplate = ?1)",
            params![plate],
            |row| row.get(0),
        )?;
        Ok(listed)
    }

    fn add(&self, plate: &str) -> Result<bool> {
        self.add_with_reason(plate, DEFAULT_BLACKLIST_REASON)
    }

    fn remove(&self, plate: &str) -> Result<bool> {
        let plate = canonicalize_plate(plate);
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM blacklisted_vehicles WHERE numberplate = ?1",
            params![plate],
        )?;
        Ok(changed > 0)
    }

    fn list(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT numberplate FROM blacklisted_vehicles ORDER BY numberplate ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut plates = Vec::new();
        for plate in rows {
            plates.push(plate?);
        }
        Ok(plates)
    }
}
