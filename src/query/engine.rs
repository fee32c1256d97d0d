//! Query execution and audit.
//!
//! Both engines funnel through here: the compiled path binds positional
//! params, the raw path binds only `:organization_id` and re-checks that the
//! prepared statement is read-only. Every run, including rejections, leaves
//! a row in the audit log keyed by the SHA-256 of the original input.

use std::time::Instant;

use log::warn;
use rusqlite::types::ValueRef;
use rusqlite::{named_params, params_from_iter, Row};
use serde_json::{json, Map, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::db::audit::AuditEntry;
use crate::db::DonorDb;

use super::compiler::{self, CompiledQuery};
use super::plan::QueryRequest;
use super::{raw, QueryError};

/// Result of one audited query run.
#[derive(Debug)]
pub struct QueryOutcome {
    pub rows: Vec<JsonValue>,
    /// The SQL that actually executed.
    pub sql: String,
    /// Readable summary of what was asked, for logs and replies.
    pub description: String,
    pub duration_ms: i64,
}

/// SHA-256 hex digest of a query input (plan JSON or raw SQL).
pub fn hash_query(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Execute a compiled statement and collect rows as JSON objects.
pub fn execute_compiled(
    db: &DonorDb,
    compiled: &CompiledQuery,
) -> Result<Vec<JsonValue>, QueryError> {
    let mut stmt = db.conn_ref().prepare(&compiled.sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_json(row, &columns));
    }
    Ok(out)
}

/// Execute validated raw SQL with only `:organization_id` bound.
///
/// The validator already gated the statement; this adds SQLite's own
/// `Statement::readonly()` check as a second opinion before any row is read.
pub fn execute_raw(
    db: &DonorDb,
    sql: &str,
    organization_id: &str,
) -> Result<Vec<JsonValue>, QueryError> {
    let mut stmt = db.conn_ref().prepare(sql)?;
    if !stmt.readonly() {
        return Err(QueryError::Rejected(
            "statement is not read-only".to_string(),
        ));
    }
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query(named_params! { ":organization_id": organization_id })?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_json(row, &columns));
    }
    Ok(out)
}

/// Compile, execute, and audit a structured query request.
pub fn run_structured(
    db: &DonorDb,
    request: &QueryRequest,
    organization_id: &str,
    channel: &str,
) -> Result<QueryOutcome, QueryError> {
    let input = serde_json::to_string(request).unwrap_or_default();
    let hash = hash_query(&input);
    let started = Instant::now();

    let compiled = match compiler::compile_query(request, organization_id) {
        Ok(compiled) => compiled,
        Err(err) => {
            record_audit(db, organization_id, channel, "structured", &hash, None, None, None, outcome_label(&err));
            return Err(err);
        }
    };

    match execute_compiled(db, &compiled) {
        Ok(rows) => {
            let duration_ms = started.elapsed().as_millis() as i64;
            record_audit(
                db,
                organization_id,
                channel,
                "structured",
                &hash,
                Some(&compiled.sql),
                Some(rows.len() as i64),
                Some(duration_ms),
                "ok",
            );
            Ok(QueryOutcome {
                rows,
                sql: compiled.sql,
                description: compiled.description,
                duration_ms,
            })
        }
        Err(err) => {
            record_audit(db, organization_id, channel, "structured", &hash, Some(&compiled.sql), None, None, "error");
            Err(err)
        }
    }
}

/// Validate, execute, and audit a raw SELECT.
pub fn run_raw(
    db: &DonorDb,
    sql_input: &str,
    organization_id: &str,
    channel: &str,
    max_rows: u32,
) -> Result<QueryOutcome, QueryError> {
    let hash = hash_query(sql_input);
    let started = Instant::now();

    let validated = match raw::validate_raw_sql(sql_input, max_rows) {
        Ok(sql) => sql,
        Err(err) => {
            record_audit(db, organization_id, channel, "rawSql", &hash, None, None, None, "rejected");
            return Err(err);
        }
    };

    match execute_raw(db, &validated, organization_id) {
        Ok(rows) => {
            let duration_ms = started.elapsed().as_millis() as i64;
            record_audit(
                db,
                organization_id,
                channel,
                "rawSql",
                &hash,
                Some(&validated),
                Some(rows.len() as i64),
                Some(duration_ms),
                "ok",
            );
            Ok(QueryOutcome {
                rows,
                sql: validated,
                description: "raw SQL query".to_string(),
                duration_ms,
            })
        }
        Err(err) => {
            record_audit(db, organization_id, channel, "rawSql", &hash, Some(&validated), None, None, outcome_label(&err));
            Err(err)
        }
    }
}

fn outcome_label(err: &QueryError) -> &'static str {
    match err {
        QueryError::Sqlite(_) => "error",
        _ => "rejected",
    }
}

#[allow(clippy::too_many_arguments)]
fn record_audit(
    db: &DonorDb,
    organization_id: &str,
    channel: &str,
    engine: &str,
    query_hash: &str,
    sql: Option<&str>,
    row_count: Option<i64>,
    duration_ms: Option<i64>,
    outcome: &str,
) {
    let entry = AuditEntry {
        organization_id: organization_id.to_string(),
        channel: channel.to_string(),
        engine: engine.to_string(),
        query_hash: query_hash.to_string(),
        sql: sql.map(|s| s.to_string()),
        row_count,
        duration_ms,
        outcome: outcome.to_string(),
    };
    // Audit failures must not mask the query result.
    if let Err(e) = db.insert_audit_entry(&entry) {
        warn!("Failed to record query audit entry: {e}");
    }
}

fn row_to_json(row: &Row<'_>, columns: &[String]) -> JsonValue {
    let mut map = Map::new();
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i) {
            Ok(ValueRef::Null) => JsonValue::Null,
            Ok(ValueRef::Integer(n)) => json!(n),
            Ok(ValueRef::Real(f)) => json!(f),
            Ok(ValueRef::Text(t)) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
            // BLOBs have no place in a chat reply.
            Ok(ValueRef::Blob(_)) => continue,
            Err(_) => continue,
        };
        map.insert(name.clone(), value);
    }
    JsonValue::Object(map)
}
