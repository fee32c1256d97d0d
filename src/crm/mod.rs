//! One-way push sync to the upstream CRM.
//!
//! Donations queue through `crm_sync_state` when they are created or
//! updated; the poller drains the queue with exponential backoff. Donors
//! are never pushed — only donors already linked to a CRM record
//! (`crm_external_id` set) have their donations synced at all.

pub mod client;
pub mod poller;
pub mod sync;

pub use client::{CrmClient, CrmError};
pub use poller::run_crm_sync_poller;
