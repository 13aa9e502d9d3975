use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::policy::Status;
use crate::TrackId;

const TOP_VIOLATORS_LIMIT: usize = 5;

/// One row per finalized track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    pub track_id: TrackId,
    pub class_name: String,
    pub speed: f64,
    /// Canonical plate.
    pub numberplate: String,
    pub status: Status,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopViolator {
    pub numberplate: String,
    pub violation_count: u64,
}

/// Aggregate view over persisted records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationStats {
    pub total_vehicles: u64,
    /// Rounded to 2 decimals; 0.0 when nothing is recorded.
    pub average_speed: f64,
    pub overspeeding: u64,
    pub blacklisted: u64,
    pub top_violators: Vec<TopViolator>,
}

impl ViolationStats {
    pub fn from_records(records: &[ViolationRecord]) -> Self {
        let total_vehicles = records.len() as u64;
        let average_speed = if records.is_empty() {
            0.0
        } else {
            round2(records.iter().map(|r| r.speed).sum::<f64>() / records.len() as f64)
        };
        let count = |status: Status| records.iter().filter(|r| r.status == status).count() as u64;

        let mut per_plate: HashMap<&str, u64> = HashMap::new();
        for record in records.iter().filter(|r| r.status.is_violation()) {
            *per_plate.entry(record.numberplate.as_str()).or_default() += 1;
        }
        let mut top_violators: Vec<TopViolator> = per_plate
            .into_iter()
            .map(|(plate, n)| TopViolator {
                numberplate: plate.to_string(),
                violation_count: n,
            })
            .collect();
        top_violators.sort_by(|a, b| {
            b.violation_count
                .cmp(&a.violation_count)
                .then_with(|| a.numberplate.cmp(&b.numberplate))
        });
        top_violators.truncate(TOP_VIOLATORS_LIMIT);

        Self {
            total_vehicles,
            average_speed,
            overspeeding: count(Status::OverSpeed),
            blacklisted: count(Status::Blacklisted),
            top_violators,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub trait ViolationStore: Send {
    fn insert_violation(&mut self, record: &ViolationRecord) -> Result<()>;
}

/// Read side for dashboards and the admin API.
pub trait StatsSource: Send + Sync {
    fn stats(&self) -> Result<ViolationStats>;
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteViolationStore {
    conn: Connection,
}

impl SqliteViolationStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              date TEXT NOT NULL,
              time TEXT NOT NULL,
              track_id INTEGER NOT NULL,
              class_name TEXT NOT NULL,
              speed REAL NOT NULL,
              numberplate TEXT NOT NULL,
              status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_plate ON violations(numberplate);
            "#,
        )?;
        Ok(())
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ViolationRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, time, track_id, class_name, speed, numberplate, status
            FROM violations ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let track_id: i64 = row.get(2)?;
            let status: String = row.get(6)?;
            out.push(ViolationRecord {
                date: row.get(0)?,
                time: row.get(1)?,
                track_id: u64::try_from(track_id)
                    .map_err(|_| anyhow!("corrupt violations row: negative track_id"))?,
                class_name: row.get(3)?,
                speed: row.get(4)?,
                numberplate: row.get(5)?,
                status: status.parse()?,
            });
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<ViolationStats> {
        query_stats(&self.conn)
    }
}

impl ViolationStore for SqliteViolationStore {
    fn insert_violation(&mut self, record: &ViolationRecord) -> Result<()> {
        let track_id = i64::try_from(record.track_id)
            .map_err(|_| anyhow!("track id {} exceeds i64 range", record.track_id))?;
        self.conn.execute(
            r#"
            INSERT INTO violations(date, time, track_id, class_name, speed, numberplate, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.date,
                record.time,
                track_id,
                record.class_name,
                record.speed,
                record.numberplate,
                record.status.as_str()
            ],
        )?;
        Ok(())
    }
}

fn query_stats(conn: &Connection) -> Result<ViolationStats> {
    let (total, average): (i64, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), AVG(speed) FROM violations",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let count_status = |status: Status| -> Result<u64> {
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM violations WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    };

    let mut stmt = conn.prepare(
        r#"
        SELECT numberplate, COUNT(*) AS violation_count
        FROM violations
        WHERE status IN (?1, ?2)
        GROUP BY numberplate
        ORDER BY violation_count DESC, numberplate ASC
        LIMIT ?3
        "#,
    )?;
    let mut rows = stmt.query(params![
        Status::OverSpeed.as_str(),
        Status::Blacklisted.as_str(),
        TOP_VIOLATORS_LIMIT as i64
    ])?;
    let mut top_violators = Vec::new();
    while let Some(row) = rows.next()? {
        let n: i64 = row.get(1)?;
        top_violators.push(TopViolator {
            numberplate: row.get(0)?,
            violation_count: n as u64,
        });
    }

    Ok(ViolationStats {
        total_vehicles: total as u64,
        average_speed: average.map(round2).unwrap_or(0.0),
        overspeeding: count_status(Status::OverSpeed)?,
        blacklisted: count_status(Status::Blacklisted)?,
        top_violators,
    })
}

/// Opens a fresh connection per query so it can be shared across threads.
pub struct SqliteStats {
    db_path: String,
}

impl SqliteStats {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl StatsSource for SqliteStats {
    fn stats(&self) -> Result<ViolationStats> {
        SqliteViolationStore::open(&self.db_path)?.stats()
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

/// Clones share the same record list.
#[derive(Clone, Debug, Default)]
pub struct InMemoryViolationStore {
    records: Arc<Mutex<Vec<ViolationRecord>>>,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ViolationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn insert_violation(&mut self, record: &ViolationRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("violation store lock poisoned"))?;
        records.push(record.clone());
        Ok(())
    }
}

impl StatsSource for InMemoryViolationStore {
    fn stats(&self) -> Result<ViolationStats> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("violation store lock poisoned"))?;
        Ok(ViolationStats::from_records(&records))
    }
}
