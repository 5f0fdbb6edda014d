//! The Approval Gate — the non-negotiable safety kernel.
//!
//! Proposals become short-lived tokens which are the only key that unlocks
//! execution. Token validation never trusts the caller's object beyond its
//! `id`, the same validate-by-lookup discipline the teacher's
//! `toka-auth::TokenValidator` trait applies to capability tokens.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use warden_bus::EventBus;
use warden_types::{
    event::kind, now, new_prefixed_id, ActionApprovedPayload, ActionDeniedPayload, ApprovalRequest, ApprovalRequestParams, ApprovalStatus,
    ApprovalToken, Event,
};

use crate::audit::AuditLog;

/// Default token lifetime: 15 minutes (§4.3, §6).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);
/// Default pending-request lifetime before `expireSweep` marks it `expired`.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

/// Errors raised by [`ApprovalGate`] operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// No request exists with the given id.
    #[error("unknown approval request: {0}")]
    UnknownRequest(String),
    /// The request exists but is not in `pending` status.
    #[error("approval request {0} is not pending")]
    NotPending(String),
    /// The request has already expired and cannot be decided.
    #[error("approval request {0} has already expired")]
    AlreadyExpired(String),
}

/// The Approval Gate: mints and validates short-lived execution tokens.
///
/// Owns the canonical request and token tables exclusively (§3, "Ownership")
/// — no other component may mutate them directly.
pub struct ApprovalGate {
    bus: Arc<dyn EventBus>,
    audit: Arc<AuditLog>,
    requests: RwLock<HashMap<String, ApprovalRequest>>,
    tokens: RwLock<HashMap<String, ApprovalToken>>,
    consumed: RwLock<HashSet<String>>,
    request_ttl: Duration,
    token_ttl: Duration,
}

impl ApprovalGate {
    /// Builds a gate with the default TTLs.
    pub fn new(bus: Arc<dyn EventBus>, audit: Arc<AuditLog>) -> Self {
        Self::with_ttls(bus, audit, DEFAULT_REQUEST_TTL, DEFAULT_TOKEN_TTL)
    }

    /// Builds a gate with explicit request/token TTLs, e.g. from
    /// `ModuleConfig`.
    pub fn with_ttls(bus: Arc<dyn EventBus>, audit: Arc<AuditLog>, request_ttl: Duration, token_ttl: Duration) -> Self {
        Self {
            bus,
            audit,
            requests: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            consumed: RwLock::new(HashSet::new()),
            request_ttl,
            token_ttl,
        }
    }

    /// Creates a new pending request, records `approval.requested`, and
    /// publishes `action.proposed`.
    pub async fn request_approval(&self, params: ApprovalRequestParams) -> ApprovalRequest {
        let request = ApprovalRequest {
            id: new_prefixed_id("REQ"),
            action_type: params.action_type,
            description: params.description,
            reasoning: params.reasoning,
            requested_by: params.requested_by,
            metadata: params.metadata,
            created_at: now(),
            status: ApprovalStatus::Pending,
        };

        self.requests.write().await.insert(request.id.clone(), request.clone());
        self.audit
            .append(
                "approval.requested",
                &request.requested_by,
                &request.id,
                serde_json::json!({ "action_type": request.action_type }),
            )
            .await;
        tracing::info!(request_id = %request.id, action_type = %request.action_type, "approval requested");

        let _ = self.bus.publish(Event::new(kind::ACTION_PROPOSED, "approval-gate", request.clone())).await;
        request
    }

    /// Approves `request_id`, minting a fresh token with `expires_at = now +
    /// token_ttl`. Publishes `action.approved` carrying `{request, token}`.
    pub async fn approve(&self, request_id: &str, approver: &str) -> Result<ApprovalToken, GateError> {
        let request = self.transition_to_approved(request_id).await?;

        let token = ApprovalToken {
            id: new_prefixed_id("TOK"),
            request_id: request.id.clone(),
            approved_by: approver.to_string(),
            approved_at: now(),
            expires_at: now() + chrono::Duration::from_std(self.token_ttl).expect("token ttl fits in chrono::Duration"),
        };
        self.tokens.write().await.insert(token.id.clone(), token.clone());

        self.audit
            .append("approval.approved", approver, &request.id, serde_json::json!({ "token_id": token.id }))
            .await;
        tracing::info!(request_id = %request.id, token_id = %token.id, approver, "approval granted");

        let payload = ActionApprovedPayload { request: request.clone(), token: token.clone() };
        let _ = self.bus.publish(Event::new(kind::ACTION_APPROVED, "approval-gate", payload)).await;
        Ok(token)
    }

    /// Denies `request_id`. Publishes `action.denied` carrying `{request, reason}`.
    pub async fn deny(&self, request_id: &str, approver: &str, reason: &str) -> Result<(), GateError> {
        let request = {
            let mut requests = self.requests.write().await;
            let request = requests.get_mut(request_id).ok_or_else(|| GateError::UnknownRequest(request_id.to_string()))?;
            if request.status != ApprovalStatus::Pending {
                return Err(GateError::NotPending(request_id.to_string()));
            }
            request.status = ApprovalStatus::Denied;
            request.clone()
        };

        self.audit.append("approval.denied", approver, &request.id, serde_json::json!({ "reason": reason })).await;
        tracing::info!(request_id = %request.id, approver, reason, "approval denied");

        let payload = ActionDeniedPayload { request, reason: reason.to_string() };
        let _ = self.bus.publish(Event::new(kind::ACTION_DENIED, "approval-gate", payload)).await;
        Ok(())
    }

    async fn transition_to_approved(&self, request_id: &str) -> Result<ApprovalRequest, GateError> {
        let mut requests = self.requests.write().await;
        let request = requests.get_mut(request_id).ok_or_else(|| GateError::UnknownRequest(request_id.to_string()))?;
        if request.status != ApprovalStatus::Pending {
            return Err(GateError::NotPending(request_id.to_string()));
        }
        request.status = ApprovalStatus::Approved;
        Ok(request.clone())
    }

    /// Validates `token` by looking up its `id` in the gate's own table and
    /// checking it against its own authoritative copy of the request —
    /// never trusting any field on the caller-supplied object beyond `id`
    /// (§4.3, "Token forgery defence").
    pub async fn validate_token(&self, token: &ApprovalToken) -> bool {
        let valid = self.validate_token_inner(token).await;
        if !valid {
            self.audit
                .append("token.rejected", "unknown", &token.request_id, serde_json::json!({ "token_id": token.id }))
                .await;
            tracing::warn!(token_id = %token.id, request_id = %token.request_id, "token validation failed");
        }
        valid
    }

    async fn validate_token_inner(&self, token: &ApprovalToken) -> bool {
        let tokens = self.tokens.read().await;
        let Some(authoritative) = tokens.get(&token.id) else {
            return false;
        };
        if authoritative.request_id != token.request_id {
            return false;
        }
        if self.consumed.read().await.contains(&authoritative.id) {
            return false;
        }
        if now() >= authoritative.expires_at {
            return false;
        }

        let requests = self.requests.read().await;
        matches!(requests.get(&authoritative.request_id), Some(r) if r.status == ApprovalStatus::Approved)
    }

    /// Marks `token` consumed, for executors that require single-use
    /// semantics. The default (not calling this) is reusable-within-TTL.
    pub async fn consume_token(&self, token: &ApprovalToken) {
        self.consumed.write().await.insert(token.id.clone());
    }

    /// Periodic sweep: transitions any `pending` request older than
    /// `request_ttl` to `expired`. Directly callable so tests do not depend
    /// on real time (§9, "Timer pattern").
    pub async fn expire_sweep(&self) {
        let now_ts = now();
        let mut requests = self.requests.write().await;
        for request in requests.values_mut() {
            if request.status == ApprovalStatus::Pending {
                let age = now_ts.signed_duration_since(request.created_at);
                if age >= chrono::Duration::from_std(self.request_ttl).expect("request ttl fits in chrono::Duration") {
                    request.status = ApprovalStatus::Expired;
                    tracing::info!(request_id = %request.id, "approval request expired");
                }
            }
        }
    }

    /// Looks up a request by id, regardless of status.
    pub async fn get_request(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.requests.read().await.get(request_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_bus::InMemoryBus;
    use warden_types::Json;

    fn gate() -> ApprovalGate {
        ApprovalGate::new(Arc::new(InMemoryBus::new()), Arc::new(AuditLog::new()))
    }

    fn params() -> ApprovalRequestParams {
        ApprovalRequestParams {
            action_type: "service.restart".into(),
            description: "restart the thing".into(),
            reasoning: "it is stuck".into(),
            requested_by: "anomaly-detector".into(),
            metadata: Json::Null,
        }
    }

    #[tokio::test]
    async fn approved_token_validates_within_ttl() {
        let gate = gate();
        let request = gate.request_approval(params()).await;
        let token = gate.approve(&request.id, "oncall-admin").await.unwrap();
        assert!(gate.validate_token(&token).await);
    }

    #[tokio::test]
    async fn forged_token_with_unknown_id_fails_validation() {
        let gate = gate();
        let request = gate.request_approval(params()).await;
        gate.approve(&request.id, "oncall-admin").await.unwrap();

        let forged = ApprovalToken {
            id: "forged".into(),
            request_id: request.id.clone(),
            approved_by: "hacker".into(),
            approved_at: now(),
            expires_at: now() + chrono::Duration::hours(1),
        };
        assert!(!gate.validate_token(&forged).await);
    }

    #[tokio::test]
    async fn denied_request_cannot_be_approved() {
        let gate = gate();
        let request = gate.request_approval(params()).await;
        gate.deny(&request.id, "oncall-admin", "too risky").await.unwrap();
        assert!(matches!(gate.approve(&request.id, "oncall-admin").await, Err(GateError::NotPending(_))));
    }

    #[tokio::test]
    async fn unknown_request_errors_on_approve_and_deny() {
        let gate = gate();
        assert!(matches!(gate.approve("missing", "a").await, Err(GateError::UnknownRequest(_))));
        assert!(matches!(gate.deny("missing", "a", "r").await, Err(GateError::UnknownRequest(_))));
    }

    #[tokio::test]
    async fn expire_sweep_marks_stale_pending_requests_expired() {
        let gate = ApprovalGate::with_ttls(Arc::new(InMemoryBus::new()), Arc::new(AuditLog::new()), Duration::from_secs(0), DEFAULT_TOKEN_TTL);
        let request = gate.request_approval(params()).await;
        gate.expire_sweep().await;
        let after = gate.get_request(&request.id).await.unwrap();
        assert_eq!(after.status, ApprovalStatus::Expired);
        assert!(matches!(gate.approve(&request.id, "a").await, Err(GateError::NotPending(_))));
    }

    #[tokio::test]
    async fn consumed_token_fails_subsequent_validation() {
        let gate = gate();
        let request = gate.request_approval(params()).await;
        let token = gate.approve(&request.id, "oncall-admin").await.unwrap();
        assert!(gate.validate_token(&token).await);
        gate.consume_token(&token).await;
        assert!(!gate.validate_token(&token).await);
    }
}
