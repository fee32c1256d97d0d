//! Plan → SQL compilation.
//!
//! Invariants the compiler holds, in order of importance:
//! 1. The base table is always scoped by `organization_id = ?1`, supplied by
//!    the caller, never by the request.
//! 2. Values only travel through `?N` placeholders.
//! 3. Operator/value/field compatibility is checked before any SQL is built.
//! 4. Predicates on computed donor fields land in HAVING; everything else in
//!    WHERE. Joins are deduplicated and emitted in registry order.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rusqlite::types::Value;

use super::fields::{self, FieldDef, JoinId, ValueKind};
use super::plan::{
    AggregateSpec, Filter, FilterOp, FilterValue, GroupBy, QueryKind, QueryRequest, SortDirection,
};
use super::{QueryError, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};

/// A compiled statement: SQL with positional placeholders, the values to
/// bind, and a readable summary for logs and audit rows.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub description: String,
}

/// Clamp a requested row limit into 1..=MAX_QUERY_LIMIT.
pub fn clamp_limit(requested: Option<u32>) -> u32 {
    match requested {
        Some(0) | None => DEFAULT_QUERY_LIMIT,
        Some(n) => n.min(MAX_QUERY_LIMIT),
    }
}

/// Compile a structured query request into parameterized SQL.
pub fn compile_query(
    request: &QueryRequest,
    organization_id: &str,
) -> Result<CompiledQuery, QueryError> {
    let kind = request.kind;
    let mut params: Vec<Value> = vec![Value::Text(organization_id.to_string())];
    let mut joins: BTreeSet<JoinId> = BTreeSet::new();
    if kind == QueryKind::Donations {
        joins.extend(fields::DONATION_BASE_JOINS.iter().copied());
    }

    let mut where_clauses = vec![format!("{}.organization_id = ?1", fields::base_alias(kind))];
    match kind {
        QueryKind::Donors => where_clauses.push("d.archived = 0".to_string()),
        QueryKind::Projects => where_clauses.push("p.archived = 0".to_string()),
        QueryKind::Donations => {}
    }

    let mut having_clauses: Vec<String> = Vec::new();
    let mut grouped = false;
    let mut descriptions: Vec<String> = Vec::new();

    for filter in &request.filters {
        let def = resolve_field(kind, &filter.field)?;
        if let Some(join) = def.join {
            joins.insert(join);
        }
        let (predicate, desc) = build_predicate(def, filter, &mut params)?;
        if def.computed {
            grouped = true;
            having_clauses.push(predicate);
        } else {
            where_clauses.push(predicate);
        }
        descriptions.push(desc);
    }

    // Sort resolves through the same registry; computed sort fields force
    // the grouped form too.
    let order_by = match &request.sort {
        Some(sort) => {
            let def = resolve_field(kind, &sort.field)?;
            if let Some(join) = def.join {
                joins.insert(join);
            }
            if def.computed {
                grouped = true;
            }
            format!("{} {}", def.expr, sort.direction.as_sql())
        }
        None => default_order(kind).to_string(),
    };

    if grouped {
        joins.insert(JoinId::Donations);
    }

    let mut sql = String::from("SELECT ");
    sql.push_str(fields::projection(kind));
    if grouped {
        sql.push_str(", ");
        sql.push_str(fields::DONOR_COMPUTED_PROJECTION);
    }
    sql.push_str(" FROM ");
    sql.push_str(fields::base_clause(kind));
    for join in &joins {
        sql.push(' ');
        sql.push_str(fields::join_sql(kind, *join));
    }
    sql.push_str(" WHERE ");
    sql.push_str(&where_clauses.join(" AND "));
    if grouped {
        sql.push_str(" GROUP BY d.id");
        if !having_clauses.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&having_clauses.join(" AND "));
        }
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&order_by);

    let limit = clamp_limit(request.limit);
    let offset = request.offset.unwrap_or(0);
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));

    let description = if descriptions.is_empty() {
        format!("{} (no filters), limit {}", kind.as_str(), limit)
    } else {
        format!("{} where {}, limit {}", kind.as_str(), descriptions.join(" and "), limit)
    };

    Ok(CompiledQuery { sql, params, description })
}

/// Compile an aggregate over donations, optionally grouped.
pub fn compile_aggregate(
    spec: &AggregateSpec,
    organization_id: &str,
) -> Result<CompiledQuery, QueryError> {
    let kind = QueryKind::Donations;
    let mut params: Vec<Value> = vec![Value::Text(organization_id.to_string())];
    let mut joins: BTreeSet<JoinId> = BTreeSet::new();
    let mut where_clauses = vec!["dn.organization_id = ?1".to_string()];
    let mut descriptions: Vec<String> = Vec::new();

    for filter in &spec.filters {
        let def = resolve_field(kind, &filter.field)?;
        if let Some(join) = def.join {
            joins.insert(join);
        }
        let (predicate, desc) = build_predicate(def, filter, &mut params)?;
        where_clauses.push(predicate);
        descriptions.push(desc);
    }

    const TOTALS: &str = "COALESCE(SUM(dn.amount), 0) AS total_amount, COUNT(dn.id) AS donation_count";
    let (select, group_order) = match spec.group_by {
        GroupBy::None => (
            format!(
                "{}, AVG(dn.amount) AS average_amount, \
                 MIN(dn.donation_date) AS first_donation_at, \
                 MAX(dn.donation_date) AS last_donation_at",
                TOTALS
            ),
            String::new(),
        ),
        GroupBy::Project => {
            joins.insert(JoinId::Project);
            (
                format!(
                    "dn.project_id AS group_id, COALESCE(p.name, 'Unassigned') AS label, {}",
                    TOTALS
                ),
                " GROUP BY dn.project_id ORDER BY total_amount DESC".to_string(),
            )
        }
        GroupBy::Donor => {
            joins.insert(JoinId::Donor);
            (
                format!("dn.donor_id AS group_id, d.name AS label, {}", TOTALS),
                " GROUP BY dn.donor_id ORDER BY total_amount DESC".to_string(),
            )
        }
        GroupBy::Month => (
            format!(
                "strftime('%Y-%m', dn.donation_date) AS label, {}",
                TOTALS
            ),
            " GROUP BY label ORDER BY label ASC".to_string(),
        ),
    };

    let mut sql = format!("SELECT {} FROM donations dn", select);
    for join in &joins {
        sql.push(' ');
        sql.push_str(fields::join_sql(kind, *join));
    }
    sql.push_str(" WHERE ");
    sql.push_str(&where_clauses.join(" AND "));
    sql.push_str(&group_order);
    if spec.group_by != GroupBy::None {
        sql.push_str(&format!(" LIMIT {}", MAX_QUERY_LIMIT));
    }

    let group_desc = match spec.group_by {
        GroupBy::None => String::new(),
        GroupBy::Project => " by project".to_string(),
        GroupBy::Donor => " by donor".to_string(),
        GroupBy::Month => " by month".to_string(),
    };
    let description = if descriptions.is_empty() {
        format!("donation totals{}", group_desc)
    } else {
        format!("donation totals{} where {}", group_desc, descriptions.join(" and "))
    };

    Ok(CompiledQuery { sql, params, description })
}

// ---------------------------------------------------------------------------
// Predicate construction
// ---------------------------------------------------------------------------

fn resolve_field(kind: QueryKind, name: &str) -> Result<&'static FieldDef, QueryError> {
    fields::field_def(kind, name).ok_or_else(|| QueryError::UnknownField {
        field: name.to_string(),
        kind: kind.as_str().to_string(),
        allowed: fields::allowed_fields(kind),
    })
}

fn build_predicate(
    def: &FieldDef,
    filter: &Filter,
    params: &mut Vec<Value>,
) -> Result<(String, String), QueryError> {
    let op = filter.op;
    match op {
        FilterOp::Eq | FilterOp::Ne => {
            let n = bind_scalar(def, &filter.value, params)?;
            let sql_op = if op == FilterOp::Eq { "=" } else { "!=" };
            Ok((
                format!("{} {} ?{}", def.expr, sql_op, n),
                format!("{} {} {}", def.name, op.as_str(), describe_value(&filter.value)),
            ))
        }
        FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
            if !matches!(def.kind, ValueKind::Number | ValueKind::Date) {
                return Err(QueryError::OperatorMismatch {
                    op: op.as_str().to_string(),
                    field: def.name.to_string(),
                    reason: format!("ordering requires a number or date field, not {}", def.kind.as_str()),
                });
            }
            let n = bind_scalar(def, &filter.value, params)?;
            let sql_op = match op {
                FilterOp::Gt => ">",
                FilterOp::Gte => ">=",
                FilterOp::Lt => "<",
                _ => "<=",
            };
            Ok((
                format!("{} {} ?{}", def.expr, sql_op, n),
                format!("{} {} {}", def.name, op.as_str(), describe_value(&filter.value)),
            ))
        }
        FilterOp::Contains | FilterOp::StartsWith => {
            if def.kind != ValueKind::Text {
                return Err(QueryError::OperatorMismatch {
                    op: op.as_str().to_string(),
                    field: def.name.to_string(),
                    reason: "pattern matching requires a text field".to_string(),
                });
            }
            let text = match &filter.value {
                FilterValue::Text(s) => s,
                other => {
                    return Err(QueryError::InvalidValue {
                        field: def.name.to_string(),
                        reason: format!("expected text, got {}", describe_value(other)),
                    })
                }
            };
            let escaped = escape_like(text);
            let pattern = if op == FilterOp::Contains {
                format!("%{}%", escaped)
            } else {
                format!("{}%", escaped)
            };
            params.push(Value::Text(pattern));
            let n = params.len();
            Ok((
                format!("{} LIKE ?{} ESCAPE '\\'", def.expr, n),
                format!("{} {} '{}'", def.name, op.as_str(), text),
            ))
        }
        FilterOp::In => {
            let items = match &filter.value {
                FilterValue::List(items) if !items.is_empty() => items,
                FilterValue::List(_) => {
                    return Err(QueryError::InvalidValue {
                        field: def.name.to_string(),
                        reason: "'in' requires a non-empty list".to_string(),
                    })
                }
                other => {
                    return Err(QueryError::InvalidValue {
                        field: def.name.to_string(),
                        reason: format!("'in' requires a list, got {}", describe_value(other)),
                    })
                }
            };
            let mut placeholders = Vec::with_capacity(items.len());
            for item in items {
                let n = bind_scalar(def, item, params)?;
                placeholders.push(format!("?{}", n));
            }
            Ok((
                format!("{} IN ({})", def.expr, placeholders.join(", ")),
                format!("{} in [{} values]", def.name, items.len()),
            ))
        }
        FilterOp::Between => {
            if !matches!(def.kind, ValueKind::Number | ValueKind::Date) {
                return Err(QueryError::OperatorMismatch {
                    op: "between".to_string(),
                    field: def.name.to_string(),
                    reason: "ranges require a number or date field".to_string(),
                });
            }
            let items = match &filter.value {
                FilterValue::List(items) if items.len() == 2 => items,
                _ => {
                    return Err(QueryError::InvalidValue {
                        field: def.name.to_string(),
                        reason: "'between' requires exactly two values".to_string(),
                    })
                }
            };
            let lo = bind_scalar(def, &items[0], params)?;
            let hi = bind_scalar(def, &items[1], params)?;
            Ok((
                format!("{} BETWEEN ?{} AND ?{}", def.expr, lo, hi),
                format!(
                    "{} between {} and {}",
                    def.name,
                    describe_value(&items[0]),
                    describe_value(&items[1])
                ),
            ))
        }
        FilterOp::IsNull | FilterOp::NotNull => {
            if filter.value != FilterValue::Null {
                return Err(QueryError::InvalidValue {
                    field: def.name.to_string(),
                    reason: format!("'{}' takes no value", op.as_str()),
                });
            }
            let suffix = if op == FilterOp::IsNull { "IS NULL" } else { "IS NOT NULL" };
            Ok((
                format!("{} {}", def.expr, suffix),
                format!("{} {}", def.name, op.as_str()),
            ))
        }
    }
}

/// Bind one scalar value, returning its `?N` index.
fn bind_scalar(
    def: &FieldDef,
    value: &FilterValue,
    params: &mut Vec<Value>,
) -> Result<usize, QueryError> {
    let bound = match (def.kind, value) {
        (ValueKind::Text, FilterValue::Text(s)) => Value::Text(s.clone()),
        (ValueKind::Number, FilterValue::Number(n)) => Value::Real(*n),
        (ValueKind::Bool, FilterValue::Bool(b)) => Value::Integer(*b as i64),
        (ValueKind::Date, FilterValue::Text(s)) => {
            validate_date(s).ok_or_else(|| QueryError::InvalidValue {
                field: def.name.to_string(),
                reason: format!("'{}' is not a date (expected YYYY-MM-DD or RFC3339)", s),
            })?;
            Value::Text(s.clone())
        }
        (kind, other) => {
            return Err(QueryError::InvalidValue {
                field: def.name.to_string(),
                reason: format!(
                    "expected {}, got {}",
                    kind.as_str(),
                    describe_value(other)
                ),
            })
        }
    };
    params.push(bound);
    Ok(params.len())
}

fn validate_date(s: &str) -> Option<()> {
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return Some(());
    }
    chrono::DateTime::parse_from_rfc3339(s).ok().map(|_| ())
}

fn describe_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Null => "null".to_string(),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Number(n) => n.to_string(),
        FilterValue::Text(s) => format!("'{}'", s),
        FilterValue::List(items) => format!("[{} values]", items.len()),
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn default_order(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Donors => "d.name ASC",
        QueryKind::Donations => "dn.donation_date DESC",
        QueryKind::Projects => "p.name ASC",
    }
}
