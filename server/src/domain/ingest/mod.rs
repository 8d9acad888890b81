//! Ingestion: one supervised task per flow feeding the shared catalog
//!
//! - `supervisor` - the per flow streaming loop and per point mapping
//! - `coordinator` - task spawning and the flow failure policy
//! - `stats` - received / failed / last received counters

mod coordinator;
mod stats;
mod supervisor;

pub use coordinator::{FlowCoordinator, FlowFailurePolicy, RestartPolicy, Supervision};
pub use stats::FlowStats;
pub use supervisor::{FlowError, FlowState, FlowSupervisor, PointError};
