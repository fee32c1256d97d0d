//! Question-answering engines.
//!
//! Two variants, selected by config: the structured engine has the LLM emit
//! a query plan which the compiler turns into SQL, the raw engine has it
//! write a SELECT directly which the validator gates. Both get exactly one
//! retry, with the failure appended, before giving up. Results go back
//! through the LLM once more to be phrased as a chat answer; if that call
//! fails, a plain rendering of the rows is used instead.

use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::ai::{parse_json_response, ChatMessage, LlmProvider};
use crate::db::{DbWaMessage, DonorDb};
use crate::query::{self, QueryOutcome, QueryRequest, MAX_QUERY_LIMIT};
use crate::types::Config;

/// Bytes of result JSON included in the phrasing prompt.
const MAX_RESULT_PROMPT_BYTES: usize = 8000;

/// Tables the raw engine may describe to the model.
const SCHEMA_SUMMARY: &str = "\
donors(id, organization_id, name, email, phone, status, donor_type, city, country, \
assigned_staff_id, created_at) -- status: active/lapsed/major; donor_type: individual/organization/foundation
donations(id, organization_id, donor_id, project_id, amount, currency, donation_date, \
payment_method, recurring, status, created_at) -- status: pledged/received/refunded; donation_date is YYYY-MM-DD
projects(id, organization_id, name, status, goal_amount, start_date, end_date) -- status: active/completed/paused
staff(id, organization_id, name, email, role, active)";

pub async fn answer_question(
    db: &DonorDb,
    provider: &dyn LlmProvider,
    config: &Config,
    history: &[DbWaMessage],
    question: &str,
) -> Result<String, String> {
    let outcome = match config.whatsapp.engine.as_str() {
        "rawSql" => raw_query(db, provider, config, history, question).await?,
        _ => structured_query(db, provider, config, history, question).await?,
    };
    debug!(
        "Answered via {} in {}ms: {}",
        config.whatsapp.engine, outcome.duration_ms, outcome.description
    );
    Ok(phrase_answer(provider, question, &outcome).await)
}

// ---------------------------------------------------------------------------
// Structured engine
// ---------------------------------------------------------------------------

async fn structured_query(
    db: &DonorDb,
    provider: &dyn LlmProvider,
    config: &Config,
    history: &[DbWaMessage],
    question: &str,
) -> Result<QueryOutcome, String> {
    let schema = serde_json::to_value(schemars::schema_for!(QueryRequest))
        .map_err(|e| e.to_string())?;
    let system = format!(
        "You translate staff questions about a nonprofit's donor database into \
         a single query object. Available fields per query kind:\n{}\n\
         Operators: eq, ne, gt, gte, lt, lte, contains, startsWith, in, \
         between, isNull, notNull. Dates are YYYY-MM-DD. Reply with one JSON \
         object only.",
        query::fields::registry_summary()
    );

    let mut messages = prompt_messages(&system, history, question);
    let mut last_error = String::new();
    for attempt in 0..2 {
        let reply = provider
            .complete_json(&messages, "query_request", &schema)
            .await
            .map_err(|e| e.to_string())?;
        let step = parse_json_response::<QueryRequest>(&reply)
            .map_err(|e| e.to_string())
            .and_then(|request| {
                query::run_structured(db, &request, &config.organization_id, "whatsapp")
                    .map_err(|e| e.to_string())
            });
        match step {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!("Structured engine attempt {} failed: {e}", attempt + 1);
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(format!(
                    "That query failed: {e}. Correct it and reply with one JSON object only."
                )));
                last_error = e;
            }
        }
    }
    Err(last_error)
}

// ---------------------------------------------------------------------------
// Raw-SQL engine
// ---------------------------------------------------------------------------

async fn raw_query(
    db: &DonorDb,
    provider: &dyn LlmProvider,
    config: &Config,
    history: &[DbWaMessage],
    question: &str,
) -> Result<QueryOutcome, String> {
    let system = format!(
        "You translate staff questions about a nonprofit's donor database into \
         one SQLite SELECT statement. Schema:\n{SCHEMA_SUMMARY}\n\
         Rules: a single SELECT only, no semicolons or comments, and every \
         query must filter on organization_id = :organization_id. Reply with \
         the SQL only."
    );

    let mut messages = prompt_messages(&system, history, question);
    let mut last_error = String::new();
    for attempt in 0..2 {
        let reply = provider.complete(&messages).await.map_err(|e| e.to_string())?;
        let sql = extract_sql(&reply);
        match query::run_raw(db, &sql, &config.organization_id, "whatsapp", MAX_QUERY_LIMIT) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                warn!("Raw engine attempt {} failed: {e}", attempt + 1);
                messages.push(ChatMessage::assistant(reply));
                messages.push(ChatMessage::user(format!(
                    "That statement was rejected: {e}. Correct it and reply with the SQL only."
                )));
                last_error = e.to_string();
            }
        }
    }
    Err(last_error)
}

/// Pull the SQL out of a reply that may wrap it in a fenced block.
fn extract_sql(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after[body_start..].find("```") {
            return after[body_start..body_start + end].trim().to_string();
        }
    }
    trimmed.to_string()
}

// ---------------------------------------------------------------------------
// Shared prompt plumbing
// ---------------------------------------------------------------------------

fn prompt_messages(
    system: &str,
    history: &[DbWaMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system)];
    for turn in history {
        messages.push(ChatMessage {
            role: turn.role.clone(),
            content: turn.content.clone(),
        });
    }
    messages.push(ChatMessage::user(question));
    messages
}

/// Turn query results into a chat answer.
async fn phrase_answer(
    provider: &dyn LlmProvider,
    question: &str,
    outcome: &QueryOutcome,
) -> String {
    let results_json = serde_json::to_string(&outcome.rows).unwrap_or_default();
    let results_block = if results_json.len() > MAX_RESULT_PROMPT_BYTES {
        let mut end = MAX_RESULT_PROMPT_BYTES;
        while !results_json.is_char_boundary(end) {
            end -= 1;
        }
        format!("{} …(truncated)", &results_json[..end])
    } else {
        results_json
    };

    let messages = vec![
        ChatMessage::system(
            "Answer the staff question using only the query results provided. \
             Be concise and concrete, plain text only (no markdown). If the \
             results are empty, say so plainly.",
        ),
        ChatMessage::user(format!(
            "Question: {question}\nQuery ran: {}\nResults ({} rows): {results_block}",
            outcome.description,
            outcome.rows.len()
        )),
    ];
    match provider.complete(&messages).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Phrasing call failed, rendering rows directly: {e}");
            render_rows(outcome)
        }
    }
}

/// Plain rendering used when the phrasing call fails.
fn render_rows(outcome: &QueryOutcome) -> String {
    if outcome.rows.is_empty() {
        return "No matching records found.".to_string();
    }
    let mut out = format!("{} result(s):\n", outcome.rows.len());
    for row in outcome.rows.iter().take(20) {
        let line = match row {
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", render_value(v)))
                .collect::<Vec<_>>()
                .join(", "),
            other => other.to_string(),
        };
        out.push_str("- ");
        out.push_str(&line);
        out.push('\n');
    }
    if outcome.rows.len() > 20 {
        out.push_str(&format!("…and {} more\n", outcome.rows.len() - 20));
    }
    out
}

fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => "-".to_string(),
        other => other.to_string(),
    }
}
