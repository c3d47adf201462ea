//! Local archive of telemetry records.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{TelemetryRecord, TelemetrySink};
use crate::logging::{log, obj, v_str, Domain, Level};

pub struct SqliteSink {
    path: String,
    conn: Option<Connection>,
}

impl SqliteSink {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            path: path.to_string(),
            conn: None,
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                ts TEXT NOT NULL,
                user_id TEXT,
                tokens_awarded REAL NOT NULL,
                payload TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    fn insert(&mut self, record: &TelemetryRecord) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("sqlite sink not connected"))?;
        let payload = serde_json::to_string(record)?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO telemetry (device_id, ts, user_id, tokens_awarded, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.device_id,
                record.timestamp,
                record.user_id,
                record.tokens_awarded,
                payload
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        match &self.conn {
            Some(conn) => {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
                Ok(n as u64)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TelemetrySink for SqliteSink {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn connect(&mut self) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        Self::init(&conn)?;
        self.conn = Some(conn);
        log(
            Level::Info,
            Domain::Telemetry,
            "connected",
            obj(&[("sink", v_str("sqlite")), ("path", v_str(&self.path))]),
        );
        Ok(())
    }

    async fn send_telemetry(&mut self, record: &TelemetryRecord) -> bool {
        match self.insert(record) {
            Ok(()) => true,
            Err(e) => {
                log(
                    Level::Warn,
                    Domain::Telemetry,
                    "send_failed",
                    obj(&[("sink", v_str("sqlite")), ("error", v_str(&e.to_string()))]),
                );
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        self.conn = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::pipeline::CorrelationPipeline;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Arc;

    fn records(n: u64) -> Vec<TelemetryRecord> {
        let cfg = SimConfig::default();
        let mut p = CorrelationPipeline::new("waste-bin-5555", &cfg, Arc::new(cfg.materials.clone())).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        (0..n)
            .map(|i| TelemetryRecord::from_reading(&p.tick(&mut rng, i, None, None)))
            .collect()
    }

    #[tokio::test]
    async fn test_archives_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.sqlite");
        let mut sink = SqliteSink::new(path.to_str().unwrap()).unwrap();

        let recs = records(3);
        assert!(!sink.send_telemetry(&recs[0]).await);
        sink.connect().await.unwrap();
        for r in &recs {
            assert!(sink.send_telemetry(r).await);
        }
        assert_eq!(sink.count().unwrap(), 3);

        let conn = sink.conn.as_ref().unwrap();
        let (device, payload): (String, String) = conn
            .query_row("SELECT device_id, payload FROM telemetry ORDER BY id LIMIT 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(device, "waste-bin-5555");
        let first: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(first["deviceId"], "waste-bin-5555");
        assert_eq!(first["timestamp"], recs[0].timestamp.as_str());
        sink.disconnect().await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.sqlite");
        let recs = records(2);
        {
            let mut sink = SqliteSink::new(path.to_str().unwrap()).unwrap();
            sink.connect().await.unwrap();
            for r in &recs {
                sink.send_telemetry(r).await;
            }
            sink.disconnect().await;
        }
        let mut sink = SqliteSink::new(path.to_str().unwrap()).unwrap();
        sink.connect().await.unwrap();
        assert_eq!(sink.count().unwrap(), 2);
    }
}
