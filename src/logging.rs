//! Structured logging for the bin simulator.
//!
//! Every record is a single JSON line printed to stdout. When `LOG_DIR` is
//! set, records at info and above are also appended to
//! `$LOG_DIR/<run_id>.jsonl`. `LOG_LEVEL` and `LOG_DOMAINS` filter output.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Sensor,    // Generator output, anomalies
    Ledger,    // Awards, redemptions, journal
    Telemetry, // Sink connect/send/disconnect
    Session,   // Tick loop, user rotation
    System,    // Startup, shutdown, config
    Profile,   // Tick timings
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Sensor => "sensor",
            Domain::Ledger => "ledger",
            Domain::Telemetry => "telemetry",
            Domain::Session => "session",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    file: Option<Mutex<BufWriter<File>>>,
}

fn open_log(dir: &str, run_id: &str) -> Option<Mutex<BufWriter<File>>> {
    let dir = PathBuf::from(dir);
    if let Err(err) = create_dir_all(&dir) {
        eprintln!("[log] failed to create {}: {}", dir.display(), err);
        return None;
    }
    let path = dir.join(format!("{}.jsonl", run_id));
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", Utc::now().timestamp_millis(), process::id()));
        let file = std::env::var("LOG_DIR").ok().and_then(|dir| open_log(&dir, &run_id));
        RunContext { run_id, file }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "device_key", "sig"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["device_id", "user_id", "tick", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if level >= Level::Info {
        write_line(&ctx.file, &line);
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_config(device_id: &str, fields: Map<String, Value>) {
    let mut fields = fields;
    fields.insert("device_id".to_string(), v_str(device_id));
    log(Level::Info, Domain::System, "config", fields);
}

pub fn log_reading(tick: u64, user_id: &str, summary: &[(&str, Value)]) {
    let mut fields = obj(summary);
    fields.insert("tick".to_string(), json!(tick));
    fields.insert("user_id".to_string(), v_str(user_id));
    log(Level::Debug, Domain::Sensor, "reading", fields);
}

pub fn log_temperature_anomaly(tick: u64, value: f64, anomaly_type: &str, branch: &str) {
    log(
        Level::Warn,
        Domain::Sensor,
        "temperature_anomaly",
        obj(&[
            ("tick", json!(tick)),
            ("value", v_num(value)),
            ("anomaly_type", v_str(anomaly_type)),
            ("branch", v_str(branch)),
        ]),
    );
}

pub fn log_award(user_id: &str, material: &str, subtype: &str, weight_kg: f64, tokens: f64) {
    log(
        Level::Info,
        Domain::Ledger,
        "award",
        obj(&[
            ("user_id", v_str(user_id)),
            ("material", v_str(material)),
            ("subtype", v_str(subtype)),
            ("weight_kg", v_num(weight_kg)),
            ("tokens", v_num(tokens)),
        ]),
    );
}

pub fn log_rejection(operation: &str, user_id: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Ledger,
        "rejected",
        obj(&[
            ("operation", v_str(operation)),
            ("user_id", v_str(user_id)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_redemption(user_id: &str, tokens: f64, option: &str, reward: f64, balance: f64) {
    log(
        Level::Info,
        Domain::Ledger,
        "redemption",
        obj(&[
            ("user_id", v_str(user_id)),
            ("tokens", v_num(tokens)),
            ("option", v_str(option)),
            ("reward", v_num(reward)),
            ("balance", v_num(balance)),
        ]),
    );
}

pub fn log_telemetry(tick: u64, sink: &str, result: &str) {
    let level = if result == "sent" { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Telemetry,
        "send",
        obj(&[
            ("tick", json!(tick)),
            ("sink", v_str(sink)),
            ("result", v_str(result)),
        ]),
    );
}

pub fn log_invariant_violation(tick: u64, check: &str, msg: &str) {
    log(
        Level::Error,
        Domain::Session,
        "invariant_violation",
        obj(&[
            ("tick", json!(tick)),
            ("check", v_str(check)),
            ("msg", v_str(msg)),
        ]),
    );
}

/// Session summary on shutdown
pub fn log_session_summary(fields: Map<String, Value>) {
    log(Level::Info, Domain::System, "session_summary", fields);
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Level::Trace >= Level::from_env() && Domain::Profile.is_enabled();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}
