use std::path::Path;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;

/// Source tag of records that so far only carry data from the discovery seed.
pub const DISCOVERY_SOURCE: &str = "google-places";
/// Source tag once the record's own website has contributed data.
pub const ENRICHED_SOURCE: &str = "website";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
    )?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            city                TEXT NOT NULL DEFAULT '',
            address             TEXT,
            website_url         TEXT,
            pricing_url         TEXT,
            schedule_url        TEXT,
            price               REAL,
            trial_price         REAL,
            single_class_price  REAL,
            pricing_notes       TEXT,
            phone               TEXT,
            email               TEXT,
            description_raw     TEXT,
            description         TEXT,
            source              TEXT NOT NULL DEFAULT 'google-places',
            last_price_check    TEXT,
            schedule_checked_at TEXT,
            about_checked_at    TEXT,
            last_updated        TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_records_city ON records(city);

        CREATE TABLE IF NOT EXISTS tags (
            id    INTEGER PRIMARY KEY,
            name  TEXT UNIQUE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS record_tags (
            record_id  TEXT NOT NULL REFERENCES records(id),
            tag_id     INTEGER NOT NULL REFERENCES tags(id),
            PRIMARY KEY (record_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS schedule_entries (
            id          INTEGER PRIMARY KEY,
            record_id   TEXT NOT NULL REFERENCES records(id),
            day         TEXT NOT NULL,
            time        TEXT NOT NULL,
            class_name  TEXT NOT NULL,
            instructor  TEXT,
            level       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_schedule_record ON schedule_entries(record_id);
        ",
    )?;
    Ok(())
}

// ── Seeds ──

/// A record as handed over by the discovery step.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub pricing_url: Option<String>,
    #[serde(default)]
    pub schedule_url: Option<String>,
}

/// Insert unknown seeds; known ids only gain URL hints they don't have yet.
/// Returns (inserted, updated).
pub fn insert_seeds(conn: &Connection, seeds: &[RecordSeed]) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    let mut updated = 0;
    {
        let mut insert = tx.prepare(
            "INSERT OR IGNORE INTO records
             (id, name, city, address, website_url, pricing_url, schedule_url, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for s in seeds {
            let n = insert.execute(rusqlite::params![
                s.id,
                s.name,
                s.city,
                s.address,
                s.website,
                non_empty(s.pricing_url.as_deref()),
                non_empty(s.schedule_url.as_deref()),
                DISCOVERY_SOURCE,
            ])?;
            if n > 0 {
                inserted += 1;
            } else {
                updated += update_hints(
                    &tx,
                    &s.id,
                    s.pricing_url.as_deref(),
                    s.schedule_url.as_deref(),
                    false,
                )?;
            }
        }
    }
    tx.commit()?;
    Ok((inserted, updated))
}

/// Write discovered URL hints. Without `overwrite`, only empty hints are filled.
pub fn update_hints(
    conn: &Connection,
    id: &str,
    pricing_url: Option<&str>,
    schedule_url: Option<&str>,
    overwrite: bool,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE records SET
            pricing_url = CASE
                WHEN ?2 IS NOT NULL AND (?4 OR pricing_url IS NULL OR pricing_url = '')
                THEN ?2 ELSE pricing_url END,
            schedule_url = CASE
                WHEN ?3 IS NOT NULL AND (?4 OR schedule_url IS NULL OR schedule_url = '')
                THEN ?3 ELSE schedule_url END
         WHERE id = ?1
           AND (?2 IS NOT NULL OR ?3 IS NOT NULL)",
        rusqlite::params![id, non_empty(pricing_url), non_empty(schedule_url), overwrite],
    )?;
    Ok(n)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ── Records ──

#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub city: String,
    pub address: Option<String>,
    pub website: Option<String>,
    pub pricing_url: Option<String>,
    pub schedule_url: Option<String>,
    pub price: Option<f64>,
    pub trial_price: Option<f64>,
    pub single_class_price: Option<f64>,
    pub pricing_notes: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub description_raw: Option<String>,
    pub source: String,
    pub last_price_check: Option<String>,
    pub schedule_checked_at: Option<String>,
    pub about_checked_at: Option<String>,
    pub last_updated: Option<String>,
    pub schedule_len: usize,
}

impl Record {
    pub fn website(&self) -> Option<&str> {
        non_empty(self.website.as_deref())
    }

    pub fn pricing_hint(&self) -> Option<&str> {
        non_empty(self.pricing_url.as_deref())
    }

    pub fn schedule_hint(&self) -> Option<&str> {
        non_empty(self.schedule_url.as_deref())
    }

    pub fn has_description(&self) -> bool {
        self.description_raw
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
    }
}

/// Which records a command operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    One(String),
    City(String),
}

const RECORD_COLUMNS: &str = "
    r.id, r.name, r.city, r.address, r.website_url, r.pricing_url, r.schedule_url,
    r.price, r.trial_price, r.single_class_price, r.pricing_notes,
    r.phone, r.email, r.description_raw, r.source,
    r.last_price_check, r.schedule_checked_at, r.about_checked_at, r.last_updated,
    (SELECT COUNT(*) FROM schedule_entries e WHERE e.record_id = r.id)";

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        name: row.get(1)?,
        city: row.get(2)?,
        address: row.get(3)?,
        website: row.get(4)?,
        pricing_url: row.get(5)?,
        schedule_url: row.get(6)?,
        price: row.get(7)?,
        trial_price: row.get(8)?,
        single_class_price: row.get(9)?,
        pricing_notes: row.get(10)?,
        phone: row.get(11)?,
        email: row.get(12)?,
        description_raw: row.get(13)?,
        source: row.get(14)?,
        last_price_check: row.get(15)?,
        schedule_checked_at: row.get(16)?,
        about_checked_at: row.get(17)?,
        last_updated: row.get(18)?,
        schedule_len: row.get(19)?,
    })
}

pub fn fetch_record(conn: &Connection, id: &str) -> Result<Option<Record>> {
    let sql = format!("SELECT {} FROM records r WHERE r.id = ?1", RECORD_COLUMNS);
    let record = conn
        .query_row(&sql, rusqlite::params![id], record_from_row)
        .optional()?;
    Ok(record)
}

/// Records in scope, ordered by city then name.
pub fn fetch_records(conn: &Connection, scope: &Scope) -> Result<Vec<Record>> {
    if let Scope::One(id) = scope {
        return Ok(fetch_record(conn, id)?.into_iter().collect());
    }

    let sql = format!(
        "SELECT {} FROM records r ORDER BY r.city, r.name",
        RECORD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    // SQLite's LOWER() only folds ASCII, city names here are not.
    Ok(match scope {
        Scope::City(city) => {
            let city = city.to_lowercase();
            rows.into_iter()
                .filter(|r| r.city.to_lowercase() == city)
                .collect()
        }
        _ => rows,
    })
}

pub fn record_tags(conn: &Connection, id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM record_tags rt
         JOIN tags t ON t.id = rt.tag_id
         WHERE rt.record_id = ?1
         ORDER BY t.name",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRow {
    pub day: String,
    pub time: String,
    pub class_name: String,
    pub instructor: Option<String>,
    pub level: Option<String>,
}

pub fn schedule_entries(conn: &Connection, id: &str) -> Result<Vec<ScheduleRow>> {
    let mut stmt = conn.prepare(
        "SELECT day, time, class_name, instructor, level
         FROM schedule_entries WHERE record_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![id], |row| {
            Ok(ScheduleRow {
                day: row.get(0)?,
                time: row.get(1)?,
                class_name: row.get(2)?,
                instructor: row.get(3)?,
                level: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub with_website: usize,
    pub price_checked: usize,
    pub priced: usize,
    pub with_schedule: usize,
    pub with_description: usize,
    pub tags: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |sql: &str| -> Result<usize> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(Stats {
        total: count("SELECT COUNT(*) FROM records")?,
        with_website: count(
            "SELECT COUNT(*) FROM records WHERE website_url IS NOT NULL AND website_url != ''",
        )?,
        price_checked: count("SELECT COUNT(*) FROM records WHERE last_price_check IS NOT NULL")?,
        priced: count(
            "SELECT COUNT(*) FROM records
             WHERE price IS NOT NULL OR trial_price IS NOT NULL OR single_class_price IS NOT NULL",
        )?,
        with_schedule: count("SELECT COUNT(DISTINCT record_id) FROM schedule_entries")?,
        with_description: count(
            "SELECT COUNT(*) FROM records WHERE description_raw IS NOT NULL AND description_raw != ''",
        )?,
        tags: count("SELECT COUNT(DISTINCT tag_id) FROM record_tags")?,
    })
}

#[cfg(test)]
pub(crate) fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    conn
}

#[cfg(test)]
pub(crate) fn seed(id: &str, city: &str, website: &str) -> RecordSeed {
    RecordSeed {
        id: id.into(),
        name: id.replace('-', " "),
        city: city.into(),
        address: None,
        website: Some(website.into()),
        pricing_url: None,
        schedule_url: None,
    }
}
