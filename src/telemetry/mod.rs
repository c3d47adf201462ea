//! Telemetry sinks.
//!
//! The session hands every composite reading to one sink. Transport
//! failure is a `false` outcome plus a log line; it never aborts a tick.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::TelemetryConfig;
use crate::logging::{log, v_str, Domain, Level};

mod http;
pub mod record;
pub mod retry;
pub mod signing;
mod sqlite;

pub use http::HttpSink;
pub use record::TelemetryRecord;
pub use sqlite::SqliteSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Http,
    Sqlite,
}

impl SinkKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "log" | "stdout" => Some(SinkKind::Log),
            "http" | "iothub" => Some(SinkKind::Http),
            "sqlite" => Some(SinkKind::Sqlite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Log => "log",
            SinkKind::Http => "http",
            SinkKind::Sqlite => "sqlite",
        }
    }

    pub fn build(self, device_id: &str, cfg: &TelemetryConfig) -> Result<Box<dyn TelemetrySink + Send>> {
        match self {
            SinkKind::Log => Ok(Box::new(LogSink::new())),
            SinkKind::Http => {
                let endpoint = cfg.endpoint.as_deref().ok_or_else(|| anyhow!("http sink needs an endpoint"))?;
                let key = cfg.device_key.as_deref().ok_or_else(|| anyhow!("http sink needs a device key"))?;
                Ok(Box::new(HttpSink::new(endpoint, device_id, key, cfg)?))
            }
            SinkKind::Sqlite => Ok(Box::new(SqliteSink::new(&cfg.sqlite_path)?)),
        }
    }
}

#[async_trait]
pub trait TelemetrySink {
    fn name(&self) -> &str;
    async fn connect(&mut self) -> Result<()>;
    async fn send_telemetry(&mut self, record: &TelemetryRecord) -> bool;
    async fn disconnect(&mut self);
}

/// Writes each record as a structured log line.
#[derive(Debug, Default)]
pub struct LogSink {
    connected: bool,
    sent: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn send_telemetry(&mut self, record: &TelemetryRecord) -> bool {
        if !self.connected {
            return false;
        }
        let mut fields = record.to_map();
        fields.insert("device_id".to_string(), v_str(&record.device_id));
        fields.insert("message_seq".to_string(), json!(self.sent));
        log(Level::Info, Domain::Telemetry, "telemetry", fields);
        self.sent += 1;
        true
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
