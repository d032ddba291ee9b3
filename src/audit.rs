/// Audit logging for firewall changing operations
///
/// Every kill switch operation that reaches the backend is recorded with
/// its outcome, so a user can later tell when the switch was armed or an
/// exception opened.
use crate::core::error::Result;
use crate::core::executor::ExecutionReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Setup,
    Teardown,
    On,
    Off,
    Disconnect,
    Ping,
    OpenDomain,
    OpenIp,
    CloseIp,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds an event from the outcome of an operation.
    ///
    /// Reported backend failures count as unsuccessful and are listed in
    /// `details.failures`.
    pub fn from_outcome(
        event_type: EventType,
        mut details: serde_json::Value,
        outcome: &Result<ExecutionReport>,
    ) -> Self {
        match outcome {
            Ok(report) => {
                if let Some(map) = details.as_object_mut() {
                    map.insert("executed".into(), report.executed.into());
                    map.insert("skipped".into(), report.skipped.into());
                    if !report.is_clean() {
                        let failures: Vec<_> = report
                            .failures
                            .iter()
                            .map(|f| f.invocation.clone())
                            .collect();
                        map.insert("failures".into(), failures.into());
                    }
                }
                Self::new(event_type, report.is_clean(), details, None)
            }
            Err(e) => Self::new(event_type, false, details, Some(e.to_string())),
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates a new audit log instance in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log writing to `path`
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records the outcome of a kill switch operation.
///
/// Write failures are logged and otherwise ignored.
pub async fn log_operation(
    event_type: EventType,
    details: serde_json::Value,
    outcome: &Result<ExecutionReport>,
) {
    if let Ok(audit) = AuditLog::new() {
        let event = AuditEvent::from_outcome(event_type, details, outcome);
        if let Err(e) = audit.log(event).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}
