//! Durable kernel event journal and registry replay.
//!
//! # Responsibility
//! - Persist committed kernel events in SQLite.
//! - Rebuild an observer's view of a kernel from its events.
//!
//! # Invariants
//! - Records are keyed by (kernel, sequence); sequences are gap-free.
//! - Replay folds records strictly in sequence order.
//!
//! # See also
//! - `crate::db` for connection bootstrap and migrations.

mod replay;
mod store;

pub use replay::{ModuleChange, RegistryView, ReplayError};
pub use store::{EventJournal, JournalError, JournalResult, SqliteEventJournal};
