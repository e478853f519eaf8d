//! The persistence sink contract and its in-memory implementation.

use std::collections::HashMap;

use apex_core::{Alert, AlertId, AlertStatus, SensorSample};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{Result, StoreError};

/// What an [`PersistenceSink::upsert_alert`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No alert with that ID existed; it was inserted.
    Created,
    /// The stored alert moved to a later status.
    Updated,
    /// The stored alert already had the requested status.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether readers of the alert set could observe a difference.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Durable destination for normalized telemetry.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store one sensor reading.
    async fn write_sample(&self, sample: &SensorSample) -> Result<()>;

    /// Insert an alert, or advance the status of an existing one.
    ///
    /// A status regression fails with [`StoreError::InvalidTransition`].
    async fn upsert_alert(&self, alert: &Alert) -> Result<UpsertOutcome>;

    /// The stored alert with this ID, if any.
    async fn find_alert(&self, id: &AlertId) -> Result<Option<Alert>>;
}

/// Decide what an upsert does given the stored status, if any.
pub fn decide_upsert(stored: Option<AlertStatus>, requested: AlertStatus) -> Result<UpsertOutcome> {
    match stored {
        None => Ok(UpsertOutcome::Created),
        Some(from) if from == requested => Ok(UpsertOutcome::Unchanged),
        Some(from) if from.can_transition_to(requested) => Ok(UpsertOutcome::Updated),
        Some(from) => Err(StoreError::InvalidTransition {
            from,
            to: requested,
        }),
    }
}

#[derive(Default)]
struct MemoryState {
    samples: Vec<SensorSample>,
    alerts: HashMap<AlertId, Alert>,
}

/// Sink that keeps everything in process memory.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored samples.
    pub fn sample_count(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Snapshot of stored samples in write order.
    pub fn samples(&self) -> Vec<SensorSample> {
        self.state.lock().samples.clone()
    }

    /// Look up an alert.
    pub fn alert(&self, id: &AlertId) -> Option<Alert> {
        self.state.lock().alerts.get(id).cloned()
    }

    /// Number of stored alerts.
    pub fn alert_count(&self) -> usize {
        self.state.lock().alerts.len()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn write_sample(&self, sample: &SensorSample) -> Result<()> {
        self.state.lock().samples.push(sample.clone());
        Ok(())
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<UpsertOutcome> {
        let mut state = self.state.lock();
        let stored = state.alerts.get(&alert.id).map(|a| a.status);
        let outcome = decide_upsert(stored, alert.status)?;
        match outcome {
            UpsertOutcome::Created => {
                let _ = state.alerts.insert(alert.id.clone(), alert.clone());
            }
            UpsertOutcome::Updated => {
                if let Some(existing) = state.alerts.get_mut(&alert.id) {
                    existing.status = alert.status;
                }
            }
            UpsertOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    async fn find_alert(&self, id: &AlertId) -> Result<Option<Alert>> {
        Ok(self.alert(id))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use apex_core::{AlertSeverity, AlertStatus};
    use chrono::Utc;

    use super::*;

    pub(crate) fn alert(id: &str, status: AlertStatus) -> Alert {
        Alert {
            id: AlertId::from(id),
            title: "Overheat".into(),
            description: Some("bearing temperature above limit".into()),
            severity: AlertSeverity::High,
            status,
            asset_id: Some(7),
            alert_type: Some("threshold".into()),
            source: "bus".into(),
            threshold_value: Some(80.0),
            actual_value: Some(91.2),
            occurred_at: Utc::now(),
        }
    }

    pub(crate) fn sample(asset_id: i64, value: f64) -> SensorSample {
        SensorSample {
            asset_id,
            sensor_id: "temp-1".into(),
            value,
            measurement: "sensor_reading".into(),
            tags: [("line".to_string(), "A".to_string())].into_iter().collect(),
            fields: serde_json::Map::new(),
            timestamp: Utc::now(),
            payload: serde_json::json!({"asset_id": asset_id, "value": value}),
        }
    }
}
