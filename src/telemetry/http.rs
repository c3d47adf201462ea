//! Device-to-cloud over HTTPS with shared access signatures.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::retry::{is_retryable_http_error, is_retryable_network_error, retry_async, Permanent, RetryConfig};
use super::signing::{sas_token, sign_sas};
use super::{TelemetryRecord, TelemetrySink};
use crate::config::TelemetryConfig;
use crate::logging::{log, obj, v_str, Domain, Level};

const API_VERSION: &str = "2020-03-13";

pub struct HttpSink {
    client: Client,
    endpoint: String,
    device_id: String,
    device_key: String,
    sas_ttl_secs: u64,
    retry: RetryConfig,
    connected: bool,
}

impl HttpSink {
    pub fn new(endpoint: &str, device_id: &str, device_key: &str, cfg: &TelemetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            device_id: device_id.to_string(),
            device_key: device_key.to_string(),
            sas_ttl_secs: cfg.sas_ttl_secs,
            retry: cfg.retry.clone(),
            connected: false,
        })
    }

    pub fn events_url(&self) -> String {
        format!(
            "{}/devices/{}/messages/events?api-version={}",
            self.endpoint, self.device_id, API_VERSION
        )
    }

    /// `<host>/devices/<device>`, the signed resource.
    pub fn resource_uri(&self) -> String {
        let host = self
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        format!("{}/devices/{}", host, self.device_id)
    }

    fn authorization(&self) -> Result<String> {
        let expiry = chrono::Utc::now().timestamp().max(0) as u64 + self.sas_ttl_secs;
        sas_token(&self.resource_uri(), expiry, &self.device_key).map_err(|e| anyhow!(Permanent(e)))
    }

    async fn post(&self, record: &TelemetryRecord) -> Result<()> {
        let auth = self.authorization()?;
        let url = self.events_url();
        retry_async(&self.retry, "telemetry_post", || {
            let req = self
                .client
                .post(&url)
                .header("Authorization", auth.as_str())
                .header("Content-Type", "application/json")
                .header("iothub-contenttype", "application/json")
                .header("iothub-contentencoding", "utf-8")
                .json(record);
            async move {
                let resp = match req.send().await {
                    Ok(resp) => resp,
                    Err(e) if is_retryable_network_error(&e) => return Err(anyhow!(e)),
                    Err(e) => return Err(anyhow!(Permanent(e.to_string()))),
                };
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    Ok(())
                } else if is_retryable_http_error(status) {
                    Err(anyhow!("hub returned {}", status))
                } else {
                    Err(anyhow!(Permanent(format!("hub returned {}", status))))
                }
            }
        })
        .await
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    /// The HTTP transport is connectionless; connecting validates the key.
    async fn connect(&mut self) -> Result<()> {
        sign_sas(&self.resource_uri(), 0, &self.device_key).map_err(|e| anyhow!(Permanent(e)))?;
        self.connected = true;
        log(
            Level::Info,
            Domain::Telemetry,
            "connected",
            obj(&[("sink", v_str("http")), ("endpoint", v_str(&self.endpoint))]),
        );
        Ok(())
    }

    async fn send_telemetry(&mut self, record: &TelemetryRecord) -> bool {
        if !self.connected {
            return false;
        }
        match self.post(record).await {
            Ok(()) => true,
            Err(e) => {
                log(
                    Level::Warn,
                    Domain::Telemetry,
                    "send_failed",
                    obj(&[
                        ("sink", v_str("http")),
                        ("error", v_str(&e.to_string())),
                        ("retries", json!(self.retry.max_retries)),
                    ]),
                );
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
