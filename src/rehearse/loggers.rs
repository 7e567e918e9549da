use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use log::Level;

pub const JOB_LOG_TARGET: &str = "rehearse::job";
pub const DEBUG_LOG_TARGET: &str = "rehearse::debug";

/// A structured log record: leveled message plus string fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub level: Level,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl Entry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

/// Destination for structured records.
pub trait LogSink: Send + Sync {
    fn emit(&self, entry: Entry);
}

/// Forwards records to the `log` facade under a fixed target, so `RUST_LOG`
/// can enable each destination on its own.
pub struct TargetSink {
    target: &'static str,
}

impl TargetSink {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl LogSink for TargetSink {
    fn emit(&self, entry: Entry) {
        let mut line = entry.message;
        for (key, value) in &entry.fields {
            let _ = write!(line, " {key}={value:?}");
        }
        log::log!(target: self.target, entry.level, "{line}");
    }
}

/// The job-outcome log and the verbose debug log of a rehearsal run.
#[derive(Clone)]
pub struct Loggers {
    pub job: Arc<dyn LogSink>,
    pub debug: Arc<dyn LogSink>,
}

impl Default for Loggers {
    fn default() -> Self {
        Self {
            job: Arc::new(TargetSink::new(JOB_LOG_TARGET)),
            debug: Arc::new(TargetSink::new(DEBUG_LOG_TARGET)),
        }
    }
}
