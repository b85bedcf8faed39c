//! Incident persistence for dockwatch
//!
//! One durable record per error fingerprint per calendar day. The storage
//! location itself is the dedup guard, so a restarted watcher does not
//! duplicate incidents it already recorded.

mod sink;
mod store;

pub use sink::{IncidentError, IncidentSink};
pub use store::{IncidentStore, incident_id, incident_title};
