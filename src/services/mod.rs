//! Business-logic layer over `AppState`: locks the shared database handle,
//! applies domain rules, and keeps side effects (CRM queueing, poller
//! wakeups) out of the storage layer.

pub mod donations;
pub mod donors;
pub mod projects;
pub mod stats;
