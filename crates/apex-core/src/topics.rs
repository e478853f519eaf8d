//! Push topic names.
//!
//! Three topics are well known; clients may subscribe to any other name as
//! well, the registry treats them all the same.

/// Live sensor readings.
pub const SENSORS: &str = "sensors";
/// Raised or updated alerts.
pub const ALERTS: &str = "alerts";
/// Production metrics.
pub const PRODUCTION: &str = "production";

/// Topics the ingestor publishes to.
pub const WELL_KNOWN: [&str; 3] = [SENSORS, ALERTS, PRODUCTION];

/// Longest accepted topic name, in characters.
pub const MAX_TOPIC_LEN: usize = 128;

/// Normalize a client-supplied topic name.
///
/// Surrounding whitespace is trimmed. Returns `None` for empty names or
/// names longer than [`MAX_TOPIC_LEN`].
pub fn normalize(raw: &str) -> Option<&str> {
    let topic = raw.trim();
    (!topic.is_empty() && topic.chars().count() <= MAX_TOPIC_LEN).then_some(topic)
}
