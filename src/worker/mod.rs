//! Worker system: one dispatch loop per protocol identity.
//!
//! Core components:
//! - `identity`: identity rows from the CSV file
//! - `state`: worker lifecycle (Starting → Online ⇄ Offline → Stopped)
//! - `inflight`: tasks dispatched and not yet finished
//! - `worker`: the dispatch loop
//! - `events`: inbound protocol events applied to tasks and tier state
//! - `registry`: running workers keyed by identity
//! - `reload`: identity file watcher

mod events;
pub mod identity;
pub mod inflight;
pub mod registry;
pub mod reload;
pub mod state;
pub mod worker;

pub use identity::{BotIdentity, load_identities};
pub use inflight::InFlight;
pub use registry::{GatewayFactory, SyncReport, WorkerRegistry};
pub use reload::{IdentityWatcher, watch_identities};
pub use state::WorkerState;
pub use worker::{Worker, WorkerDeps};
