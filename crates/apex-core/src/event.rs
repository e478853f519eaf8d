//! Normalized events built from raw bus messages.
//!
//! A raw message is a channel name plus a JSON body. The channel's first
//! segment selects the kind:
//!
//! | Channel prefix  | Kind                 | Push topic   |
//! |-----------------|----------------------|--------------|
//! | `sensors/...`   | [`SensorSample`]     | `sensors`    |
//! | `alerts/...`    | [`AlertRaised`]      | `alerts`     |
//! | `production/...`| [`ProductionReport`] | `production` |

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::alert::{Alert, AlertSeverity, AlertStatus};
use crate::ids::AlertId;
use crate::topics;

/// Title given to alerts that arrive without one.
pub const DEFAULT_ALERT_TITLE: &str = "Bus alert";
/// Measurement name given to samples that arrive without one.
pub const DEFAULT_MEASUREMENT: &str = "sensor_reading";
/// Recorded as [`Alert::source`] for alerts raised from the bus.
pub const BUS_SOURCE: &str = "bus";

/// Why a raw bus message could not be normalized.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The channel does not map to any event kind.
    #[error("unroutable channel: {0}")]
    UnknownChannel(String),
    /// The body is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The body is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// A required field is absent or null.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A field is present but unusable.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Discriminant of [`IngestedEvent`], used for metric labels and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A sensor reading.
    SensorSample,
    /// A raised (or updated) alert.
    AlertRaised,
    /// A production metric report.
    ProductionReport,
}

impl EventKind {
    /// Label value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorSample => "sensor_sample",
            Self::AlertRaised => "alert_raised",
            Self::ProductionReport => "production_report",
        }
    }
}

/// One sensor reading.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorSample {
    /// Asset the sensor is mounted on.
    pub asset_id: i64,
    /// Sensor identifier.
    pub sensor_id: String,
    /// Reading.
    pub value: f64,
    /// Measurement series name.
    pub measurement: String,
    /// Extra indexed tags.
    pub tags: BTreeMap<String, String>,
    /// Extra unindexed fields.
    pub fields: Map<String, Value>,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
    /// The original message body, pushed to clients as-is.
    pub payload: Value,
}

/// An alert raised on the bus, or a status update to an existing alert.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertRaised {
    /// Existing alert ID when the message carried one, otherwise fresh.
    pub id: AlertId,
    /// Whether the message named an existing alert.
    pub is_update: bool,
    /// Summary.
    pub title: String,
    /// Details.
    pub description: Option<String>,
    /// Urgency.
    pub severity: AlertSeverity,
    /// Requested status (`open` for new alerts).
    pub status: AlertStatus,
    /// Affected asset.
    pub asset_id: Option<i64>,
    /// Classification.
    pub alert_type: Option<String>,
    /// Limit that was crossed.
    pub threshold_value: Option<f64>,
    /// Observed value.
    pub actual_value: Option<f64>,
    /// When the condition occurred.
    pub timestamp: DateTime<Utc>,
    /// The original message body.
    pub payload: Value,
}

impl AlertRaised {
    /// Build the persisted entity for this event.
    pub fn to_alert(&self) -> Alert {
        Alert {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            severity: self.severity,
            status: self.status,
            asset_id: self.asset_id,
            alert_type: self.alert_type.clone(),
            source: BUS_SOURCE.to_owned(),
            threshold_value: self.threshold_value,
            actual_value: self.actual_value,
            occurred_at: self.timestamp,
        }
    }

    /// Whether the message itself set `field`, as opposed to a default.
    fn carried(&self, field: &str) -> bool {
        self.payload.get(field).is_some_and(|v| !v.is_null())
    }

    /// Push data for an update that could not be checked against the store.
    ///
    /// Only `id`, `status` and the summary fields the message actually set
    /// are included, so defaults never overwrite what clients already show.
    pub fn update_data(&self) -> Value {
        let mut data = Map::new();
        let _ = data.insert("id".into(), json!(self.id));
        let _ = data.insert("status".into(), json!(self.status));
        if self.carried("title") {
            let _ = data.insert("title".into(), json!(self.title));
        }
        if self.carried("severity") {
            let _ = data.insert("severity".into(), json!(self.severity));
        }
        if self.carried("asset_id") {
            let _ = data.insert("asset_id".into(), json!(self.asset_id));
        }
        Value::Object(data)
    }
}

/// A production metric report. Only pushed, never persisted by the core.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductionReport {
    /// Asset the report concerns, if given.
    pub asset_id: Option<i64>,
    /// Report time.
    pub timestamp: DateTime<Utc>,
    /// The original message body.
    pub payload: Value,
}

/// A normalized external event.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestedEvent {
    /// See [`SensorSample`].
    SensorSample(SensorSample),
    /// See [`AlertRaised`].
    AlertRaised(AlertRaised),
    /// See [`ProductionReport`].
    ProductionReport(ProductionReport),
}

impl IngestedEvent {
    /// Normalize a raw bus message.
    pub fn parse(channel: &str, body: &[u8]) -> Result<Self, ParseError> {
        let root = channel.split('/').next().unwrap_or_default();
        if !matches!(root, "sensors" | "alerts" | "production") {
            return Err(ParseError::UnknownChannel(channel.to_owned()));
        }
        let payload: Value = serde_json::from_slice(body)?;
        let Value::Object(obj) = &payload else {
            return Err(ParseError::NotAnObject);
        };
        match root {
            "sensors" => parse_sensor(obj, &payload).map(Self::SensorSample),
            "alerts" => parse_alert(obj, &payload).map(Self::AlertRaised),
            _ => Ok(Self::ProductionReport(ProductionReport {
                asset_id: optional_i64(obj, "asset_id")?,
                timestamp: optional_timestamp(obj)?,
                payload: payload.clone(),
            })),
        }
    }

    /// Event discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SensorSample(_) => EventKind::SensorSample,
            Self::AlertRaised(_) => EventKind::AlertRaised,
            Self::ProductionReport(_) => EventKind::ProductionReport,
        }
    }

    /// Push topic this event fans out on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SensorSample(_) => topics::SENSORS,
            Self::AlertRaised(_) => topics::ALERTS,
            Self::ProductionReport(_) => topics::PRODUCTION,
        }
    }

    /// Asset the event concerns.
    pub fn asset_id(&self) -> Option<i64> {
        match self {
            Self::SensorSample(s) => Some(s.asset_id),
            Self::AlertRaised(a) => a.asset_id,
            Self::ProductionReport(p) => p.asset_id,
        }
    }

    /// Event time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SensorSample(s) => s.timestamp,
            Self::AlertRaised(a) => a.timestamp,
            Self::ProductionReport(p) => p.timestamp,
        }
    }

    /// The `data` object pushed to subscribed clients.
    pub fn push_data(&self) -> Value {
        match self {
            Self::SensorSample(s) => s.payload.clone(),
            Self::AlertRaised(a) if a.is_update => a.update_data(),
            Self::AlertRaised(a) => a.to_alert().summary(),
            Self::ProductionReport(p) => p.payload.clone(),
        }
    }
}

fn parse_sensor(obj: &Map<String, Value>, payload: &Value) -> Result<SensorSample, ParseError> {
    let asset_id = optional_i64(obj, "asset_id")?.ok_or(ParseError::MissingField("asset_id"))?;
    let sensor_id = optional_str(obj, "sensor_id")?
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingField("sensor_id"))?;
    let value = match obj.get("value") {
        None | Some(Value::Null) => return Err(ParseError::MissingField("value")),
        Some(v) => v.as_f64().ok_or_else(|| invalid("value", "expected a number"))?,
    };
    let tags = match obj.get("tags") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect(),
        Some(_) => return Err(invalid("tags", "expected an object")),
    };
    let fields = match obj.get("fields") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(invalid("fields", "expected an object")),
    };
    Ok(SensorSample {
        asset_id,
        sensor_id: sensor_id.to_owned(),
        value,
        measurement: optional_str(obj, "measurement")?
            .unwrap_or(DEFAULT_MEASUREMENT)
            .to_owned(),
        tags,
        fields,
        timestamp: optional_timestamp(obj)?,
        payload: payload.clone(),
    })
}

fn parse_alert(obj: &Map<String, Value>, payload: &Value) -> Result<AlertRaised, ParseError> {
    let existing = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.is_empty() => Some(AlertId::from(s.as_str())),
        Some(Value::Number(n)) => Some(AlertId::from(n.to_string())),
        Some(_) => return Err(invalid("id", "expected a string or number")),
    };
    let status = match optional_str(obj, "status")? {
        None => AlertStatus::Open,
        Some(raw) => raw.parse().map_err(|e| invalid("status", e))?,
    };
    Ok(AlertRaised {
        is_update: existing.is_some(),
        id: existing.unwrap_or_default(),
        title: optional_str(obj, "title")?
            .unwrap_or(DEFAULT_ALERT_TITLE)
            .to_owned(),
        description: optional_str(obj, "description")?.map(str::to_owned),
        severity: AlertSeverity::parse_lenient(optional_str(obj, "severity")?),
        status,
        asset_id: optional_i64(obj, "asset_id")?,
        alert_type: optional_str(obj, "alert_type")?.map(str::to_owned),
        threshold_value: optional_f64(obj, "threshold_value")?,
        actual_value: optional_f64(obj, "actual_value")?,
        timestamp: optional_timestamp(obj)?,
        payload: payload.clone(),
    })
}

fn invalid(field: &'static str, reason: impl ToString) -> ParseError {
    ParseError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(field, "expected a string")),
    }
}

fn optional_i64(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid(field, "expected an integer")),
    }
}

fn optional_f64(obj: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(field, "expected a number")),
    }
}

/// Read the optional `timestamp` field, defaulting to now.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (taken as UTC).
fn optional_timestamp(obj: &Map<String, Value>) -> Result<DateTime<Utc>, ParseError> {
    match optional_str(obj, "timestamp")? {
        None => Ok(Utc::now()),
        Some(raw) => parse_timestamp(raw).ok_or_else(|| invalid("timestamp", raw)),
    }
}

/// Parse an ISO 8601 timestamp with or without a UTC offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
