//! The dynamic query-filter translation layer.
//!
//! Takes a structured filter/sort/query-type description (`plan`) and
//! compiles it into parameterized SQL over the donor schema (`compiler`),
//! with a static field registry per query kind (`fields`). The raw-SQL
//! path (`raw`) validates LLM-authored SELECT statements instead of
//! compiling a plan. Both paths execute and audit through `engine`.
//!
//! Nothing in this module ever interpolates a value into SQL text: values
//! travel exclusively through `?N` placeholders or the single
//! `:organization_id` named parameter.

use thiserror::Error;

pub mod compiler;
pub mod engine;
pub mod fields;
pub mod plan;
pub mod raw;

pub use compiler::{compile_aggregate, compile_query, CompiledQuery};
pub use engine::{execute_compiled, execute_raw, hash_query, run_raw, run_structured, QueryOutcome};
pub use plan::{
    AggregateSpec, Filter, FilterOp, FilterValue, GroupBy, QueryKind, QueryRequest, SortDirection,
    SortSpec,
};
pub use raw::validate_raw_sql;

/// Row-limit bounds shared by the compiled and raw paths.
pub const DEFAULT_QUERY_LIMIT: u32 = 50;
pub const MAX_QUERY_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown field '{field}' for {kind}. Allowed fields: {allowed}")]
    UnknownField {
        field: String,
        kind: String,
        allowed: String,
    },

    #[error("Operator {op} cannot be applied to field '{field}': {reason}")]
    OperatorMismatch {
        op: String,
        field: String,
        reason: String,
    },

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Query rejected: {0}")]
    Rejected(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
