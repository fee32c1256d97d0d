//! Personalized donor email drafting.
//!
//! `context` assembles a bounded prompt block from everything known about a
//! donor; `generate` runs the draft, refine, and polish passes against the
//! LLM. Nothing here sends mail: drafts are returned to the caller and
//! accepted ones are logged as outbound communications.

pub mod context;
pub mod generate;

pub use context::{build_email_context, EmailContext};
pub use generate::{
    generate_email, polish_email, record_sent_email, refine_email, EmailDraft, EmailPurpose,
    EmailRequest,
};
