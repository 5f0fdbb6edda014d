#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-audit** – The Approval Gate and its append-only Audit Log.
//!
//! Together these form the non-negotiable safety kernel (§4.3): proposals
//! become short-lived tokens that are the only key unlocking mutating
//! execution, and every transition is recorded for later reconstruction.

mod audit;
mod gate;

pub use audit::{AuditLog, AuditQuery};
pub use gate::{ApprovalGate, GateError, DEFAULT_REQUEST_TTL, DEFAULT_TOKEN_TTL};
