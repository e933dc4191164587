use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DataAccessError;

/// One recorded write, handed to the activity-logging collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    /// What happened, e.g. `"create"`, `"update"`, `"delete"`.
    pub action: String,
    /// Table the write touched.
    pub table: String,
    /// Affected record id, when the write produced or targeted one.
    pub record_id: Option<i64>,
    /// Actor metadata supplied by the caller (user id, service name).
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

/// Caller-side context attached to a write so the activity log can be
/// informed. The record id is filled in from the write result when the
/// statement inserted a row.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub action: String,
    pub table: String,
    pub actor: Option<String>,
}

impl ActivityContext {
    pub fn new(action: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            table: table.into(),
            actor: None,
        }
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub(crate) fn into_event(self, record_id: Option<i64>) -> ActivityEvent {
        ActivityEvent {
            action: self.action,
            table: self.table,
            record_id,
            actor: self.actor,
            at: Utc::now(),
        }
    }
}

/// Collaborator informed of every successful write, best-effort.
///
/// Implementations may persist events, ship them elsewhere, or drop them. A
/// failure to log is logged and swallowed by the data layer; it never fails
/// the underlying write.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record(&self, event: ActivityEvent) -> Result<(), DataAccessError>;
}
