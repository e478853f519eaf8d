//! `alerts` table.

use apex_core::{Alert, AlertId, AlertStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::sink::{UpsertOutcome, decide_upsert};

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn corrupt(field: &str, value: &str) -> StoreError {
    StoreError::Internal(format!("unreadable {field} in alerts row: {value}"))
}

/// Raw `alerts` columns before enum and timestamp parsing.
struct AlertRow {
    id: String,
    title: String,
    description: Option<String>,
    severity: String,
    status: String,
    asset_id: Option<i64>,
    alert_type: Option<String>,
    source: String,
    threshold_value: Option<f64>,
    actual_value: Option<f64>,
    occurred_at: String,
}

impl AlertRow {
    fn into_alert(self) -> Result<Alert> {
        Ok(Alert {
            severity: self
                .severity
                .parse()
                .map_err(|_| corrupt("severity", &self.severity))?,
            status: self.status.parse().map_err(|_| corrupt("status", &self.status))?,
            occurred_at: DateTime::parse_from_rfc3339(&self.occurred_at)
                .map_err(|_| corrupt("occurred_at", &self.occurred_at))?
                .with_timezone(&Utc),
            id: AlertId::from(self.id),
            title: self.title,
            description: self.description,
            asset_id: self.asset_id,
            alert_type: self.alert_type,
            source: self.source,
            threshold_value: self.threshold_value,
            actual_value: self.actual_value,
        })
    }
}

/// Alert repository.
pub struct AlertRepo;

impl AlertRepo {
    /// Insert or advance an alert inside one transaction.
    pub fn upsert(conn: &Connection, alert: &Alert) -> Result<UpsertOutcome> {
        let tx = conn.unchecked_transaction()?;
        let stored: Option<String> = tx
            .query_row(
                "SELECT status FROM alerts WHERE id = ?1",
                params![alert.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let stored = stored
            .map(|s| s.parse::<AlertStatus>().map_err(|_| corrupt("status", &s)))
            .transpose()?;

        let outcome = decide_upsert(stored, alert.status)?;
        let now = now();
        let resolved_at = matches!(alert.status, AlertStatus::Resolved | AlertStatus::Closed)
            .then(|| now.clone());
        match outcome {
            UpsertOutcome::Created => {
                let _ = tx.execute(
                    "INSERT INTO alerts (id, title, description, severity, status, asset_id,
                         alert_type, source, threshold_value, actual_value, occurred_at,
                         created_at, updated_at, resolved_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?13)",
                    params![
                        alert.id.as_str(),
                        alert.title,
                        alert.description,
                        alert.severity.as_str(),
                        alert.status.as_str(),
                        alert.asset_id,
                        alert.alert_type,
                        alert.source,
                        alert.threshold_value,
                        alert.actual_value,
                        alert.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                        now,
                        resolved_at,
                    ],
                )?;
            }
            UpsertOutcome::Updated => {
                let _ = tx.execute(
                    "UPDATE alerts
                     SET status = ?1, updated_at = ?2, resolved_at = COALESCE(resolved_at, ?3)
                     WHERE id = ?4",
                    params![alert.status.as_str(), now, resolved_at, alert.id.as_str()],
                )?;
            }
            UpsertOutcome::Unchanged => {}
        }
        tx.commit()?;
        Ok(outcome)
    }

    /// Look up an alert by ID.
    pub fn get(conn: &Connection, id: &AlertId) -> Result<Option<Alert>> {
        let row = conn
            .query_row(
                "SELECT id, title, description, severity, status, asset_id, alert_type, source,
                        threshold_value, actual_value, occurred_at
                 FROM alerts WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(AlertRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        severity: row.get(3)?,
                        status: row.get(4)?,
                        asset_id: row.get(5)?,
                        alert_type: row.get(6)?,
                        source: row.get(7)?,
                        threshold_value: row.get(8)?,
                        actual_value: row.get(9)?,
                        occurred_at: row.get(10)?,
                    })
                },
            )
            .optional()?;
        row.map(AlertRow::into_alert).transpose()
    }

    /// Count alerts in a given status.
    pub fn count_with_status(conn: &Connection, status: AlertStatus) -> Result<i64> {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_support::alert;
    use crate::sqlite::migrations::run_migrations;
    use assert_matches::assert_matches;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn create_then_read_back() {
        let conn = conn();
        let a = alert("a-1", AlertStatus::Open);
        assert_eq!(AlertRepo::upsert(&conn, &a).unwrap(), UpsertOutcome::Created);
        let stored = AlertRepo::get(&conn, &a.id).unwrap().unwrap();
        assert_eq!(stored.title, a.title);
        assert_eq!(stored.severity, a.severity);
        assert_eq!(stored.asset_id, Some(7));
        assert_eq!(stored.occurred_at.timestamp_millis(), a.occurred_at.timestamp_millis());
    }

    #[test]
    fn missing_alert_is_none() {
        assert!(AlertRepo::get(&conn(), &AlertId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn advances_and_stamps_resolution() {
        let conn = conn();
        let _ = AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::Open)).unwrap();
        assert_eq!(
            AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::Resolved)).unwrap(),
            UpsertOutcome::Updated
        );
        let resolved_at: Option<String> = conn
            .query_row("SELECT resolved_at FROM alerts WHERE id = 'a-1'", [], |r| r.get(0))
            .unwrap();
        assert!(resolved_at.is_some());
        assert_eq!(AlertRepo::count_with_status(&conn, AlertStatus::Resolved).unwrap(), 1);
    }

    #[test]
    fn same_status_is_unchanged() {
        let conn = conn();
        let _ = AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::Acknowledged)).unwrap();
        assert_eq!(
            AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::Acknowledged)).unwrap(),
            UpsertOutcome::Unchanged
        );
    }

    #[test]
    fn regression_rejected_and_rolled_back() {
        let conn = conn();
        let _ = AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::Closed)).unwrap();
        let err = AlertRepo::upsert(&conn, &alert("a-1", AlertStatus::InProgress)).unwrap_err();
        assert_matches!(err, StoreError::InvalidTransition { from: AlertStatus::Closed, .. });
        let stored = AlertRepo::get(&conn, &AlertId::from("a-1")).unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Closed);
    }
}
