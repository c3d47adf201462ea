//! Simulation session.
//!
//! Owns the rng, the pipeline, the ledger and the telemetry sink. Ticks
//! run to completion one at a time; the only await between ticks is the
//! interval sleep, raced against the shutdown signal.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::config::SimConfig;
use crate::ledger::{TokenLedger, UserAccount};
use crate::logging::{
    log, log_config, log_invariant_violation, log_reading, log_redemption, log_rejection, log_session_summary,
    log_telemetry, obj, v_num, v_str, Domain, Level, ProfileScope,
};
use crate::metrics::SessionMetrics;
use crate::pipeline::{CompositeReading, CorrelationPipeline};
use crate::reliability::circuit::CircuitBreaker;
use crate::telemetry::retry::retry_with;
use crate::telemetry::{TelemetryRecord, TelemetrySink};
use crate::verify::invariants::{assert_ledger_invariants, assert_reading_bounds};

const MAX_REDEEM_TOKENS: i64 = 10;

/// Final balances, redemption history and counters.
#[derive(Debug, Clone)]
pub struct SessionResults {
    pub device_id: String,
    pub accounts: Vec<UserAccount>,
    pub metrics: SessionMetrics,
}

impl fmt::Display for SessionResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Session results for {} ===", self.device_id)?;
        writeln!(f, "Final token balances:")?;
        for account in &self.accounts {
            writeln!(f, "  {}", account)?;
        }
        writeln!(f, "Redemption history:")?;
        for account in &self.accounts {
            if account.history().is_empty() {
                continue;
            }
            writeln!(f, "  {}:", account.name())?;
            for r in account.history() {
                writeln!(f, "    {} - {} tokens for {} ({:.2})", r.timestamp, r.tokens, r.option, r.reward)?;
            }
        }
        write!(
            f,
            "Ticks: {}  detections: {}  redemptions: {}  telemetry sent/failed/skipped: {}/{}/{}",
            self.metrics.ticks,
            self.metrics.detections,
            self.metrics.redemptions,
            self.metrics.telemetry_sent,
            self.metrics.telemetry_failed,
            self.metrics.telemetry_skipped
        )
    }
}

pub struct Session {
    cfg: SimConfig,
    device_id: String,
    rng: StdRng,
    pipeline: CorrelationPipeline,
    ledger: TokenLedger,
    user_ids: Vec<String>,
    sink: Box<dyn TelemetrySink + Send>,
    breaker: CircuitBreaker,
    metrics: SessionMetrics,
    tick: u64,
}

impl Session {
    /// Builds the sink named in the telemetry config.
    pub fn new(cfg: SimConfig) -> Result<Self> {
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let device_id = resolve_device_id(&cfg, &mut rng);
        let sink = cfg
            .telemetry
            .sink
            .build(&device_id, &cfg.telemetry)
            .context("building telemetry sink")?;
        Self::assemble(cfg, rng, device_id, sink)
    }

    pub fn with_sink(cfg: SimConfig, sink: Box<dyn TelemetrySink + Send>) -> Result<Self> {
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let device_id = resolve_device_id(&cfg, &mut rng);
        Self::assemble(cfg, rng, device_id, sink)
    }

    fn assemble(cfg: SimConfig, rng: StdRng, device_id: String, sink: Box<dyn TelemetrySink + Send>) -> Result<Self> {
        cfg.validate().context("invalid session config")?;
        let materials = Arc::new(cfg.materials.clone());
        let pipeline = CorrelationPipeline::new(&device_id, &cfg, materials.clone())?;
        let mut ledger = TokenLedger::new(materials, cfg.redemptions.clone());

        let mut user_ids = Vec::new();
        for name in cfg.users.iter().filter(|n| !n.trim().is_empty()) {
            let account = ledger
                .register_user(name)
                .with_context(|| format!("registering user {:?}", name))?;
            user_ids.push(account.user_id().to_string());
        }

        log_config(
            &device_id,
            obj(&[
                ("users", json!(cfg.users)),
                ("tick_secs", json!(cfg.tick_secs)),
                ("max_ticks", json!(cfg.max_ticks)),
                ("seed", json!(cfg.seed)),
                ("sink", v_str(cfg.telemetry.sink.as_str())),
                ("redeem_every", json!(cfg.redeem_every)),
                ("fill_level", json!(cfg.active.fill_level)),
                ("odor", json!(cfg.active.odor)),
                ("humidity", json!(cfg.active.humidity)),
                ("air_quality", json!(cfg.active.air_quality)),
            ]),
        );

        let breaker = CircuitBreaker::new(cfg.telemetry.circuit_threshold, cfg.telemetry.cooldown_ticks);
        Ok(Self {
            cfg,
            device_id,
            rng,
            pipeline,
            ledger,
            user_ids,
            sink,
            breaker,
            metrics: SessionMetrics::new(),
            tick: 0,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn pipeline_mut(&mut self) -> &mut CorrelationPipeline {
        &mut self.pipeline
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Connect the sink, retrying with backoff. Permanent errors are not
    /// retried.
    pub async fn connect(&mut self) -> Result<()> {
        let retry = self.cfg.telemetry.retry.clone();
        let name = format!("connect {}", self.sink.name());
        retry_with(&retry, &name, &mut self.sink, |sink| sink.connect())
            .await
            .with_context(|| format!("connecting {} sink", self.sink.name()))
    }

    /// One complete tick: read, maybe redeem, send, check.
    pub async fn step(&mut self) -> CompositeReading {
        let tick = self.tick;
        let user = if self.user_ids.is_empty() {
            None
        } else {
            Some(self.user_ids[(tick as usize) % self.user_ids.len()].clone())
        };

        let reading = self
            .pipeline
            .tick(&mut self.rng, tick, user.as_deref(), Some(&mut self.ledger));
        self.metrics.record_reading(&reading);
        log_reading(tick, user.as_deref().unwrap_or(""), &reading_summary(&reading));

        if self.cfg.redeem_every > 0 && tick > 0 && tick % self.cfg.redeem_every == 0 {
            self.simulate_redemption(reading.timestamp());
        }

        self.send(&reading).await;
        self.check_invariants(&reading);
        self.tick += 1;
        reading
    }

    /// A random user spends part of their balance on an option they can
    /// afford at least one reward unit of.
    fn simulate_redemption(&mut self, timestamp: &str) {
        let Some(user_id) = self.user_ids.choose(&mut self.rng).cloned() else {
            return;
        };
        let balance = self.ledger.balance(&user_id).map(|b| b.as_f64()).unwrap_or(0.0);
        let affordable: Vec<String> = self
            .ledger
            .redemptions()
            .iter()
            .filter(|(_, rate)| balance >= 1.0 / rate)
            .map(|(name, _)| name.to_string())
            .collect();
        let whole = (balance.floor() as i64).min(MAX_REDEEM_TOKENS);
        if affordable.is_empty() || whole < 1 {
            log(
                Level::Debug,
                Domain::Ledger,
                "redemption_skipped",
                obj(&[("user_id", v_str(&user_id)), ("balance", v_num(balance))]),
            );
            return;
        }
        let Some(option) = affordable.choose(&mut self.rng) else {
            return;
        };
        let tokens = self.rng.gen_range(1..=whole) as f64;

        match self.ledger.redeem_tokens_at(&user_id, tokens, option, timestamp) {
            Ok(r) => {
                let after = self.ledger.balance(&user_id).map(|b| b.as_f64()).unwrap_or(0.0);
                log_redemption(&user_id, r.tokens.as_f64(), &r.option, r.reward, after);
                self.metrics.record_redemption(r.tokens.as_f64());
            }
            Err(e) => log_rejection("redeem", &user_id, &e.to_string()),
        }
    }

    async fn send(&mut self, reading: &CompositeReading) {
        let tick = reading.tick();
        if !self.breaker.allow() {
            self.metrics.telemetry_skipped += 1;
            log_telemetry(tick, self.sink.name(), "skipped");
            return;
        }
        let record = TelemetryRecord::from_reading(reading);
        if self.sink.send_telemetry(&record).await {
            self.breaker.record_success();
            self.metrics.telemetry_sent += 1;
            log_telemetry(tick, self.sink.name(), "sent");
        } else {
            self.breaker.record_failure();
            self.metrics.telemetry_failed += 1;
            log_telemetry(tick, self.sink.name(), "failed");
        }
    }

    fn check_invariants(&mut self, reading: &CompositeReading) {
        let checks = [assert_reading_bounds(reading), assert_ledger_invariants(&self.ledger)];
        for result in checks {
            if let Err(v) = result {
                self.metrics.invariant_violations += 1;
                log_invariant_violation(reading.tick(), v.check, &v.msg);
            }
        }
    }

    fn finished(&self) -> bool {
        matches!(self.cfg.max_ticks, Some(max) if self.tick >= max)
    }

    /// Connect, tick until `max_ticks` or shutdown, disconnect. A sink that
    /// never connects does not stop the ticks; its sends fail instead.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<SessionResults> {
        let connected = match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.connect_failures += 1;
                log(
                    Level::Warn,
                    Domain::Telemetry,
                    "connect_failed",
                    obj(&[("sink", v_str(self.sink.name())), ("error", v_str(&format!("{:#}", e)))]),
                );
                false
            }
        };
        log(
            Level::Info,
            Domain::Session,
            "started",
            obj(&[
                ("device_id", v_str(&self.device_id)),
                ("sink", v_str(self.sink.name())),
                ("connected", json!(connected)),
            ]),
        );

        while !self.finished() && !*shutdown.borrow() {
            {
                let _profile = ProfileScope::with_context("tick", &[("tick", json!(self.tick))]);
                self.step().await;
            }
            if self.finished() {
                break;
            }
            tokio::select! {
                _ = sleep(Duration::from_secs(self.cfg.tick_secs)) => {}
                changed = shutdown.changed() => {
                    // A dropped sender also ends the session.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let interrupted = *shutdown.borrow();
        self.sink.disconnect().await;
        let mut summary = self.metrics.summary();
        summary.insert("device_id".to_string(), v_str(&self.device_id));
        summary.insert("interrupted".to_string(), json!(interrupted));
        summary.insert("journal_head".to_string(), v_str(self.ledger.journal_head()));
        log_session_summary(summary);
        Ok(self.results())
    }

    pub fn results(&self) -> SessionResults {
        SessionResults {
            device_id: self.device_id.clone(),
            accounts: self.ledger.accounts().cloned().collect(),
            metrics: self.metrics.clone(),
        }
    }
}

fn resolve_device_id(cfg: &SimConfig, rng: &mut StdRng) -> String {
    match &cfg.device_id {
        Some(id) => id.clone(),
        None => format!("waste-bin-{}", rng.gen_range(1000..=9999)),
    }
}

fn reading_summary(r: &CompositeReading) -> Vec<(&'static str, serde_json::Value)> {
    let mut fields = vec![
        ("temperature", v_num(r.temperature().value)),
        ("temperature_anomaly", json!(r.temperature().is_anomaly)),
        ("tokens_awarded", v_num(r.recyclable().tokens_awarded)),
    ];
    if let Some(d) = &r.recyclable().detection {
        fields.push(("material", v_str(&d.material)));
        fields.push(("weight_kg", v_num(d.weight_kg)));
    }
    if let Some(f) = r.fill_level() {
        fields.push(("fill_level", v_num(f.level)));
        fields.push(("fill_status", v_str(f.status.as_str())));
    }
    if let Some(a) = r.air_quality() {
        fields.push(("aqi", v_num(a.aqi)));
    }
    if let Some(b) = r.token_balance() {
        fields.push(("balance", v_num(b)));
    }
    fields
}
