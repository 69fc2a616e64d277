use std::{fs::OpenOptions, io::Write, path::PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{DeletionReport, Mode, UserId},
    errors::Error,
    Result,
};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/telemetry).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

/// One line of the audit trail. Never carries credentials or login codes.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl AuditEvent {
    fn base(event: &str, user_id: UserId, username: Option<&str>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id: Some(user_id.0),
            username: username.map(|s| s.to_string()),
            ..Default::default()
        }
    }

    pub fn auth(user_id: UserId, username: Option<&str>, authorized: bool) -> Self {
        Self {
            authorized: Some(authorized),
            ..Self::base("auth", user_id, username)
        }
    }

    pub fn flow_started(user_id: UserId, username: Option<&str>, mode: Mode) -> Self {
        Self {
            mode: Some(mode.as_str().to_string()),
            ..Self::base("flow_started", user_id, username)
        }
    }

    /// A flow that ended without reaching the deleter.
    pub fn flow_ended(
        user_id: UserId,
        username: Option<&str>,
        mode: Mode,
        outcome: &str,
        error: Option<&str>,
    ) -> Self {
        Self {
            mode: Some(mode.as_str().to_string()),
            outcome: Some(outcome.to_string()),
            error: error.map(|s| s.to_string()),
            ..Self::base("flow_ended", user_id, username)
        }
    }

    pub fn deletion(
        user_id: UserId,
        username: Option<&str>,
        mode: Mode,
        channel_id: i64,
        result: std::result::Result<&DeletionReport, &Error>,
    ) -> Self {
        let mut ev = Self {
            mode: Some(mode.as_str().to_string()),
            channel_id: Some(channel_id),
            ..Self::base("deletion", user_id, username)
        };
        match result {
            Ok(report) => {
                ev.outcome = Some(if report.cancelled { "stopped" } else { "completed" }.into());
                ev.deleted = Some(report.stats.deleted_count);
                ev.errors = Some(report.stats.error_count);
                ev.cancelled = Some(report.cancelled);
                ev.elapsed_secs = Some(report.elapsed.as_secs());
            }
            Err(e) => {
                ev.outcome = Some("failed".into());
                ev.error = Some(e.to_string());
            }
        }
        ev
    }

    pub fn rate_limit(user_id: UserId, username: Option<&str>, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", user_id, username)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    /// Like `write`, but a failing audit sink only warns.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(event) {
            tracing::warn!(path = %self.path.display(), "audit write failed: {e}");
        }
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::DeletionStats;

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.log"))
    }

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert!(t.len() >= AUDIT_MAX_TEXT);
    }

    #[test]
    fn deletion_event_carries_counts() {
        let path = tmp_file("purgebot-audit-test");
        let log = AuditLogger::new(path.clone(), true);
        let report = DeletionReport {
            stats: DeletionStats {
                deleted_count: 700,
                error_count: 300,
            },
            cancelled: false,
            elapsed: Duration::from_secs(12),
        };
        log.write(AuditEvent::deletion(
            UserId(1),
            Some("alice"),
            Mode::User,
            -100123,
            Ok(&report),
        ))
        .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(v["event"], "deletion");
        assert_eq!(v["deleted"], 700);
        assert_eq!(v["errors"], 300);
        assert_eq!(v["outcome"], "completed");
        assert!(v.get("retry_after").is_none());
    }

    #[test]
    fn plain_format_truncates_errors() {
        let path = tmp_file("purgebot-audit-plain");
        let log = AuditLogger::new(path.clone(), false);
        let long = "z".repeat(AUDIT_MAX_TEXT + 10);
        log.write(AuditEvent::flow_ended(
            UserId(2),
            None,
            Mode::Admin,
            "error",
            Some(&long),
        ))
        .unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("event: flow_ended"));
        assert!(written.contains("..."));
        assert!(!written.contains("username"));
    }
}
