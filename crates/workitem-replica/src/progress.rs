//! Sync progress payloads and CLI rendering.
//!
//! Every long-running operation reports through `{type, message}` updates
//! published on the event bus. The CLI subscribes and renders them on
//! **stderr** so stdout stays parseable for scripts.

use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::events::{Emitter, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Progress,
    Success,
    Error,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Progress => "progress",
            UpdateKind::Success => "success",
            UpdateKind::Error => "error",
        }
    }
}

/// Payload of `sync-progress` and `sync-metadata-progress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub message: String,
}

impl SyncUpdate {
    pub fn progress(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Progress,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Error,
            message: message.into(),
        }
    }

    pub fn emit(self, emitter: &dyn Emitter, topic: &str) {
        match serde_json::to_value(&self) {
            Ok(payload) => emitter.emit(topic, payload),
            Err(e) => tracing::warn!("Failed to encode progress update: {}", e),
        }
    }
}

/// `42.00%`. Zero totals read as complete.
pub fn to_percent(n: usize, total: usize) -> String {
    if total == 0 {
        return "100.00%".to_string();
    }
    format!("{:.2}%", n as f64 / total as f64 * 100.0)
}

/// Renders pushed events for a terminal or a log pipe.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &PushEvent);
}

fn as_update(event: &PushEvent) -> Option<SyncUpdate> {
    serde_json::from_value(event.payload.clone()).ok()
}

/// Human-friendly lines: `sync-progress  progress  Fetching ids...`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &PushEvent) {
        let line = match as_update(event) {
            Some(update) => format!(
                "{}  {}  {}\n",
                event.topic,
                update.kind.as_str(),
                update.message
            ),
            None => format!("{}  {}\n", event.topic, event.payload),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &PushEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &PushEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_has_two_decimals() {
        assert_eq!(to_percent(42, 100), "42.00%");
        assert_eq!(to_percent(1, 3), "33.33%");
        assert_eq!(to_percent(0, 0), "100.00%");
    }

    #[test]
    fn update_wire_shape() {
        let value = serde_json::to_value(SyncUpdate::progress("Fetching ids...")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "progress", "message": "Fetching ids..." })
        );
    }
}
