//! GiveHub: donor relationship backend for small nonprofits.
//!
//! SQLite system of record for donors, donations, and projects; a
//! query-translation layer that turns structured plans or gated raw SQL
//! into audited reads; and the WhatsApp assistant, CRM push sync, email
//! drafting, and donor enrichment built on top of it.

pub mod ai;
pub mod crm;
pub mod db;
pub mod email;
pub mod enrichment;
mod migrations;
pub mod query;
pub mod services;
pub mod state;
pub mod types;
pub mod whatsapp;
