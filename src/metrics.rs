use serde_json::{json, Map, Value};

use crate::pipeline::CompositeReading;
use crate::sensors::TemperatureBranch;

/// Per-session counters, emitted as the session summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetrics {
    pub ticks: u64,
    pub forced_anomalies: u64,
    pub threshold_anomalies: u64,
    pub detections: u64,
    pub tokens_awarded: f64,
    pub redemptions: u64,
    pub tokens_redeemed: f64,
    pub telemetry_sent: u64,
    pub telemetry_failed: u64,
    pub telemetry_skipped: u64,
    pub connect_failures: u64,
    pub invariant_violations: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reading(&mut self, r: &CompositeReading) {
        self.ticks += 1;
        let t = r.temperature();
        if t.branch == TemperatureBranch::Forced {
            self.forced_anomalies += 1;
        } else if t.is_anomaly {
            self.threshold_anomalies += 1;
        }
        if r.recyclable().detection.is_some() {
            self.detections += 1;
        }
        self.tokens_awarded += r.recyclable().tokens_awarded;
    }

    pub fn record_redemption(&mut self, tokens: f64) {
        self.redemptions += 1;
        self.tokens_redeemed += tokens;
    }

    pub fn summary(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("ticks".to_string(), json!(self.ticks));
        map.insert("forced_anomalies".to_string(), json!(self.forced_anomalies));
        map.insert("threshold_anomalies".to_string(), json!(self.threshold_anomalies));
        map.insert("detections".to_string(), json!(self.detections));
        map.insert("tokens_awarded".to_string(), json!((self.tokens_awarded * 100.0).round() / 100.0));
        map.insert("redemptions".to_string(), json!(self.redemptions));
        map.insert("tokens_redeemed".to_string(), json!((self.tokens_redeemed * 100.0).round() / 100.0));
        map.insert("telemetry_sent".to_string(), json!(self.telemetry_sent));
        map.insert("telemetry_failed".to_string(), json!(self.telemetry_failed));
        map.insert("telemetry_skipped".to_string(), json!(self.telemetry_skipped));
        map.insert("connect_failures".to_string(), json!(self.connect_failures));
        map.insert("invariant_violations".to_string(), json!(self.invariant_violations));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_rounds_tokens() {
        let mut m = SessionMetrics::new();
        m.record_redemption(3.0);
        m.record_redemption(0.1);
        m.tokens_awarded = 0.1 + 0.2;
        let s = m.summary();
        assert_eq!(s["redemptions"], 2);
        assert_eq!(s["tokens_redeemed"], 3.1);
        assert_eq!(s["tokens_awarded"], 0.3);
    }
}
