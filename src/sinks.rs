//! Event/decision sinks: a `log`-backed `EventSink` reference implementation.
//! A live MQTT broker client and concrete timeseries/database backends are
//! external collaborators this crate does not ship.

use async_trait::async_trait;

use crate::pipeline::EventSink;

/// Publishes every finished-pipeline envelope through the `log` facade
/// rather than a live broker connection.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, topic: &str, envelope: serde_json::Value) {
        log::debug!("event on {topic}: {envelope}");
    }
}
