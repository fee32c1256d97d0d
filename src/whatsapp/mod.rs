//! WhatsApp assistant: inbound staff questions become database queries,
//! answers go back as chat replies.
//!
//! This module owns the conversational plumbing (rate limiting, turn
//! persistence, reply capping); the actual question-to-SQL work lives in
//! `engine`.

use chrono::Utc;
use dashmap::DashMap;
use log::warn;

use crate::ai::LlmProvider;
use crate::db::DonorDb;
use crate::types::Config;

pub mod engine;

pub use engine::answer_question;

/// WhatsApp rejects messages beyond this length.
pub const REPLY_MAX_CHARS: usize = 4000;
const RATE_WINDOW_SECS: i64 = 60;

const RATE_LIMIT_REPLY: &str =
    "You're sending messages faster than I can handle. Give me a minute and try again.";
const FALLBACK_REPLY: &str =
    "Sorry, I couldn't work that one out. Try rephrasing the question, or ask \
     for something specific like \"top donors this year\" or \"donations for \
     the well project\".";

/// Sliding-window limiter keyed by sender phone number. Returns `false`
/// when the sender is over the per-minute budget.
pub fn check_rate_limit(window: &DashMap<String, Vec<i64>>, phone: &str, limit: u32) -> bool {
    let now = Utc::now().timestamp();
    let mut stamps = window.entry(phone.to_string()).or_default();
    stamps.retain(|t| now - *t < RATE_WINDOW_SECS);
    if stamps.len() >= limit as usize {
        return false;
    }
    stamps.push(now);
    true
}

/// Cap a reply at the WhatsApp message limit on a char boundary.
pub fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= REPLY_MAX_CHARS {
        return text.to_string();
    }
    let capped: String = text.chars().take(REPLY_MAX_CHARS - 1).collect();
    format!("{capped}…")
}

/// Handle one inbound message end to end: rate limit, persist the turn,
/// answer, persist and return the reply. Always produces a reply string;
/// engine failures degrade to an apologetic fallback.
pub async fn handle_message(
    db: &DonorDb,
    provider: &dyn LlmProvider,
    config: &Config,
    rate_window: &DashMap<String, Vec<i64>>,
    phone: &str,
    text: &str,
) -> Result<String, String> {
    if !check_rate_limit(rate_window, phone, config.whatsapp.rate_limit_per_minute) {
        return Ok(RATE_LIMIT_REPLY.to_string());
    }

    let conversation = db
        .get_or_create_conversation(&config.organization_id, phone)
        .map_err(|e| e.to_string())?;
    let history = db
        .get_recent_messages(&conversation.id, config.whatsapp.context_turns)
        .map_err(|e| e.to_string())?;
    db.append_message(&conversation.id, "user", text)
        .map_err(|e| e.to_string())?;

    let reply = match engine::answer_question(db, provider, config, &history, text).await {
        Ok(answer) => truncate_reply(&answer),
        Err(e) => {
            warn!("WhatsApp engine failed for {phone}: {e}");
            FALLBACK_REPLY.to_string()
        }
    };
    db.append_message(&conversation.id, "assistant", &reply)
        .map_err(|e| e.to_string())?;
    Ok(reply)
}
