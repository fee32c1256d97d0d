//! Structured query plan types.
//!
//! These are the JSON surface handed to the structured WhatsApp engine: the
//! LLM answers with one `QueryRequest` object, so every type derives
//! `JsonSchema` and the schema rides along with the prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A structured query over the donor schema.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub kind: QueryKind,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    /// Rows to return; defaults to 50, capped at 200.
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Which base table the query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    Donors,
    Donations,
    Projects,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Donors => "donors",
            QueryKind::Donations => "donations",
            QueryKind::Projects => "projects",
        }
    }
}

/// One predicate: field, operator, value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    StartsWith,
    In,
    Between,
    IsNull,
    NotNull,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Contains => "contains",
            FilterOp::StartsWith => "startsWith",
            FilterOp::In => "in",
            FilterOp::Between => "between",
            FilterOp::IsNull => "isNull",
            FilterOp::NotNull => "notNull",
        }
    }
}

/// Filter operand. Untagged so the LLM writes plain JSON scalars/arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FilterValue>),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Null
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Aggregate over donations: totals, optionally grouped.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub group_by: GroupBy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum GroupBy {
    #[default]
    None,
    Project,
    Donor,
    Month,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_from_llm_style_json() {
        let json = r#"{
            "kind": "donors",
            "filters": [
                {"field": "status", "op": "eq", "value": "lapsed"},
                {"field": "totalDonated", "op": "gte", "value": 1000}
            ],
            "sort": {"field": "totalDonated", "direction": "desc"},
            "limit": 10
        }"#;
        let req: QueryRequest = serde_json::from_str(json).expect("parse");
        assert_eq!(req.kind, QueryKind::Donors);
        assert_eq!(req.filters.len(), 2);
        assert_eq!(req.filters[0].value, FilterValue::Text("lapsed".to_string()));
        assert_eq!(req.filters[1].value, FilterValue::Number(1000.0));
        assert_eq!(req.limit, Some(10));
    }

    #[test]
    fn test_missing_value_defaults_to_null() {
        let json = r#"{"field": "email", "op": "notNull"}"#;
        let filter: Filter = serde_json::from_str(json).expect("parse");
        assert_eq!(filter.value, FilterValue::Null);
    }

    #[test]
    fn test_list_value_parses() {
        let json = r#"{"field": "status", "op": "in", "value": ["active", "lapsed"]}"#;
        let filter: Filter = serde_json::from_str(json).expect("parse");
        match &filter.value {
            FilterValue::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_generation_includes_kinds() {
        let schema = schemars::schema_for!(QueryRequest);
        let json = serde_json::to_string(&schema).expect("schema json");
        assert!(json.contains("donations"));
        assert!(json.contains("startsWith"));
    }
}
