//! Validation for LLM-authored raw SQL.
//!
//! The raw engine never trusts the model: a statement only reaches SQLite
//! after passing every check here, and even then the connection is opened
//! read-only and `Statement::readonly()` is re-checked at execution time.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::{QueryError, MAX_QUERY_LIMIT};

/// Longest raw statement we accept, after normalization.
const MAX_SQL_LEN: usize = 4000;

/// Tables a raw query may read.
const ALLOWED_TABLES: &[&str] = &["donors", "donations", "projects", "staff"];

/// Keywords and functions that have no business in a read-only report query.
const BLOCKED_KEYWORDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "drop",
    "alter",
    "create",
    "truncate",
    "grant",
    "revoke",
    "replace",
    "attach",
    "detach",
    "pragma",
    "vacuum",
    "reindex",
    "transaction",
    "savepoint",
    "load_extension",
    "readfile",
    "writefile",
    "fts3_tokenizer",
    "zeroblob",
    "randomblob",
];

fn blocked_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = BLOCKED_KEYWORDS.join("|");
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("keyword regex")
    })
}

fn table_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)").expect("table regex")
    })
}

fn named_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[:@$][A-Za-z_][A-Za-z0-9_]*").expect("param regex"))
}

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\blimit\s+(\d+)\b").expect("limit regex"))
}

fn org_filter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\borganization_id\s*=\s*:organization_id\b").expect("org filter regex")
    })
}

/// Validate a raw SELECT and return the statement that may be executed.
///
/// The returned SQL is the input after normalization, trailing-semicolon
/// removal, and limit enforcement. Any failed check returns
/// `QueryError::Rejected` with a reason safe to echo back to the asker.
pub fn validate_raw_sql(sql: &str, max_rows: u32) -> Result<String, QueryError> {
    let max_rows = max_rows.clamp(1, MAX_QUERY_LIMIT);
    let normalized: String = sql.nfc().collect();
    let trimmed = normalized.trim();

    if trimmed.is_empty() {
        return Err(QueryError::Rejected("empty statement".to_string()));
    }
    if trimmed.len() > MAX_SQL_LEN {
        return Err(QueryError::Rejected(format!(
            "statement exceeds {} characters",
            MAX_SQL_LEN
        )));
    }

    let lowered = trimmed.to_lowercase();
    if !lowered.starts_with("select") && !lowered.starts_with("with") {
        return Err(QueryError::Rejected(
            "only SELECT statements are allowed".to_string(),
        ));
    }

    // One trailing semicolon is tolerated; anything else that could chain or
    // hide a second statement is not.
    let body = trimmed.trim_end_matches(';').trim_end();
    if body.contains(';') {
        return Err(QueryError::Rejected(
            "multiple statements are not allowed".to_string(),
        ));
    }
    if body.contains("--") || body.contains("/*") {
        return Err(QueryError::Rejected("comments are not allowed".to_string()));
    }

    if let Some(m) = blocked_keyword_re().find(body) {
        return Err(QueryError::Rejected(format!(
            "keyword '{}' is not allowed",
            m.as_str().to_lowercase()
        )));
    }

    for caps in table_re().captures_iter(body) {
        let table = caps[1].to_lowercase();
        if !ALLOWED_TABLES.contains(&table.as_str()) {
            return Err(QueryError::Rejected(format!(
                "table '{}' is not queryable; allowed tables: {}",
                table,
                ALLOWED_TABLES.join(", ")
            )));
        }
    }

    let mut saw_org_param = false;
    for m in named_param_re().find_iter(body) {
        if m.as_str() == ":organization_id" {
            saw_org_param = true;
        } else {
            return Err(QueryError::Rejected(format!(
                "unexpected parameter '{}'; only :organization_id is bound",
                m.as_str()
            )));
        }
    }
    if !saw_org_param || !org_filter_re().is_match(body) {
        return Err(QueryError::Rejected(
            "query must filter on organization_id = :organization_id".to_string(),
        ));
    }

    // Enforce the row cap. Every LIMIT (subqueries included) is checked
    // against the cap; only a LIMIT outside all parentheses counts as
    // bounding the statement, so an inner one never suppresses the
    // appended outer cap.
    let mut has_outer_limit = false;
    for caps in limit_re().captures_iter(body) {
        let requested: u64 = caps[1].parse().unwrap_or(u64::MAX);
        if requested > max_rows as u64 {
            return Err(QueryError::Rejected(format!(
                "LIMIT {} exceeds the row cap of {}",
                &caps[1], max_rows
            )));
        }
        if paren_depth_at(body, caps.get(0).map_or(0, |m| m.start())) == 0 {
            has_outer_limit = true;
        }
    }

    if has_outer_limit {
        Ok(body.to_string())
    } else {
        Ok(format!("{} LIMIT {}", body, max_rows))
    }
}

/// Parenthesis nesting depth at a byte offset, ignoring quoting. Good
/// enough here: every LIMIT is individually checked against the cap
/// before depth decides whether an outer one must be appended.
fn paren_depth_at(body: &str, offset: usize) -> i32 {
    body[..offset].bytes().fold(0i32, |depth, b| match b {
        b'(' => depth + 1,
        b')' => depth.saturating_sub(1),
        _ => depth,
    })
}
