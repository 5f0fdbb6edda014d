//! Append-only audit trail.
//!
//! Every state transition the Approval Gate makes — and, by convention,
//! anything else in the CORE worth a record — is appended here. Entries are
//! never edited or removed; `query` only ever returns a filtered snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use warden_types::{now, AuditEntry, Json};

/// Optional filters for [`AuditLog::query`]. All present filters are ANDed
/// together; `None` means "no constraint on this field".
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Exact match on `action`.
    pub action: Option<String>,
    /// Exact match on `actor`.
    pub actor: Option<String>,
    /// Prefix match on `subject`.
    pub subject_prefix: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of entries to return, most recent first. `None` means
    /// unbounded (still subject to the log's own retention, if any).
    pub limit: Option<usize>,
}

/// The append-only audit trail.
///
/// Persistence is a deliberate non-requirement (§4.3): "if persistence is
/// absent, the log lives only in memory and is lost on restart." This type
/// is always in-memory; a storage-backed variant can wrap it later without
/// changing this contract. The limitation is disclosed once via
/// `tracing::warn!` at construction.
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    next_seq: AtomicU64,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    /// Creates an empty, in-memory audit log.
    pub fn new() -> Self {
        tracing::warn!("audit log has no storage backend configured; entries are lost on restart");
        Self { entries: RwLock::new(Vec::new()), next_seq: AtomicU64::new(1) }
    }

    /// Appends a new entry and returns its assigned `seq`.
    pub async fn append(&self, action: impl Into<String>, actor: impl Into<String>, subject: impl Into<String>, details: Json) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = AuditEntry { seq, timestamp: now(), action: action.into(), actor: actor.into(), subject: subject.into(), details };
        tracing::info!(seq, action = %entry.action, actor = %entry.actor, subject = %entry.subject, "audit entry recorded");
        self.entries.write().await.push(entry);
        seq
    }

    /// Returns a filtered, most-recent-last snapshot of the log.
    pub async fn query(&self, filter: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.entries.read().await;
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filter.action.as_deref().map_or(true, |a| a == e.action))
            .filter(|e| filter.actor.as_deref().map_or(true, |a| a == e.actor))
            .filter(|e| filter.subject_prefix.as_deref().map_or(true, |p| e.subject.starts_with(p)))
            .filter(|e| filter.since.map_or(true, |s| e.timestamp >= s))
            .filter(|e| filter.until.map_or(true, |u| e.timestamp <= u))
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            if matched.len() > limit {
                let excess = matched.len() - limit;
                matched.drain(0..excess);
            }
        }
        matched
    }

    /// Total number of entries ever appended (monotonic, never decreases).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seq_is_monotonic_across_appends() {
        let log = AuditLog::new();
        let a = log.append("x", "actor", "subject", Json::Null).await;
        let b = log.append("x", "actor", "subject", Json::Null).await;
        assert!(b > a);
    }

    #[tokio::test]
    async fn query_filters_by_action_and_subject_prefix() {
        let log = AuditLog::new();
        log.append("approval.requested", "mod-a", "req-1", Json::Null).await;
        log.append("approval.approved", "mod-a", "req-1", Json::Null).await;
        log.append("approval.requested", "mod-b", "req-2", Json::Null).await;

        let result = log
            .query(&AuditQuery { action: Some("approval.requested".into()), subject_prefix: Some("req-1".into()), ..Default::default() })
            .await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].actor, "mod-a");
    }

    #[tokio::test]
    async fn query_limit_keeps_most_recent() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.append("x", "a", format!("s{i}"), Json::Null).await;
        }
        let result = log.query(&AuditQuery { limit: Some(2), ..Default::default() }).await;
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].subject, "s3");
        assert_eq!(result[1].subject, "s4");
    }
}
