//! `sensor_readings` table.

use apex_core::SensorSample;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::errors::Result;

/// A stored reading, as read back for inspection.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadingRow {
    /// Row ID.
    pub id: i64,
    /// Asset.
    pub asset_id: i64,
    /// Sensor.
    pub sensor_id: String,
    /// Measurement series.
    pub measurement: String,
    /// Reading.
    pub value: f64,
    /// RFC 3339 sample time.
    pub recorded_at: String,
}

/// Sensor reading repository.
pub struct ReadingRepo;

impl ReadingRepo {
    /// Insert one reading. Returns the new row ID.
    pub fn insert(conn: &Connection, sample: &SensorSample) -> Result<i64> {
        let tags = serde_json::to_string(&sample.tags)?;
        let fields = serde_json::to_string(&sample.fields)?;
        let _ = conn.execute(
            "INSERT INTO sensor_readings
                 (asset_id, sensor_id, measurement, value, tags, fields, recorded_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sample.asset_id,
                sample.sensor_id,
                sample.measurement,
                sample.value,
                tags,
                fields,
                sample.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Total stored readings.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?)
    }

    /// Most recent readings for an asset, newest first.
    pub fn recent_for_asset(conn: &Connection, asset_id: i64, limit: u32) -> Result<Vec<ReadingRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, asset_id, sensor_id, measurement, value, recorded_at
             FROM sensor_readings
             WHERE asset_id = ?1
             ORDER BY recorded_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![asset_id, limit], |row| {
                Ok(ReadingRow {
                    id: row.get(0)?,
                    asset_id: row.get(1)?,
                    sensor_id: row.get(2)?,
                    measurement: row.get(3)?,
                    value: row.get(4)?,
                    recorded_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::sample;
    use crate::sqlite::migrations::run_migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn insert_and_count() {
        let conn = conn();
        let first = ReadingRepo::insert(&conn, &sample(1, 10.0)).unwrap();
        let second = ReadingRepo::insert(&conn, &sample(1, 11.0)).unwrap();
        assert!(second > first);
        assert_eq!(ReadingRepo::count(&conn).unwrap(), 2);
    }

    #[test]
    fn recent_filters_by_asset() {
        let conn = conn();
        let _ = ReadingRepo::insert(&conn, &sample(1, 10.0)).unwrap();
        let _ = ReadingRepo::insert(&conn, &sample(2, 20.0)).unwrap();
        let _ = ReadingRepo::insert(&conn, &sample(1, 12.0)).unwrap();
        let rows = ReadingRepo::recent_for_asset(&conn, 1, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.asset_id == 1));
        assert_eq!(rows[0].sensor_id, "temp-1");
    }

    #[test]
    fn tags_stored_as_json() {
        let conn = conn();
        let id = ReadingRepo::insert(&conn, &sample(3, 1.0)).unwrap();
        let tags: String = conn
            .query_row("SELECT tags FROM sensor_readings WHERE id = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(tags, r#"{"line":"A"}"#);
    }
}
