#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-dedup** – Deduplication / Suppression Engine (§4.4).
//!
//! Collapses repeated sightings of the same underlying problem into a
//! single tracked incident within a sliding time window, fingerprinting
//! each `incident.created` event over a configurable set of fields.

mod engine;
mod module;

pub use engine::{fingerprint, DedupConfig, DedupEngine, DedupOutcome};
pub use module::DedupModule;
