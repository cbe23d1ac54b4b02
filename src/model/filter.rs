use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};

/// Filter expression tree that can be deserialized straight from the JSON
/// `filter` argument of search and aggregate operations.
///
/// Field references are attribute codes, qualified (`product.label`) or
/// bare (`label`); managers resolve both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    /// Logical AND - all conditions must be true
    All { all: Vec<FilterExpr> },
    /// Logical OR - any condition must be true
    Any { any: Vec<FilterExpr> },
    /// Logical NOT - condition must be false
    Not { not: Box<FilterExpr> },
    /// Equality check
    Eq { eq: (String, Value) },
    /// Not equal check
    Ne { ne: (String, Value) },
    /// Greater than check
    Gt { gt: (String, Value) },
    /// Greater than or equal check
    Gte { gte: (String, Value) },
    /// Less than check
    Lt { lt: (String, Value) },
    /// Less than or equal check
    Lte { lte: (String, Value) },
    /// Check if value is in a list
    In { r#in: (String, Vec<Value>) },
    /// Check if value is not in a list
    NotIn { not_in: (String, Vec<Value>) },
    /// Check if string contains substring
    Contains { contains: (String, String) },
    /// Check if field is set
    Exists { exists: String },
    /// Check if field is not set
    NotExists { not_exists: String },
}

/// Convert a raw JSON value into a typed filter expression.
pub fn parse_filter_expr(value: &Value) -> Result<FilterExpr> {
    serde_json::from_value(value.clone())
        .map_err(|e| ApiError::InvalidInput(format!("invalid filter expression: {}", e)))
}

/// One sort criterion. The wire form is the field name with an optional
/// leading `-` for descending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: raw.to_string(),
                descending: false,
            },
        }
    }
}

fn default_search_limit() -> usize {
    100
}

fn default_aggregate_limit() -> usize {
    10000
}

/// Search request passed to a manager: filter, sort keys and slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    #[serde(default)]
    pub sort: Vec<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: Vec::new(),
            offset: 0,
            limit: default_search_limit(),
        }
    }
}

impl SearchQuery {
    pub fn by_ids(ids: impl IntoIterator<Item = String>) -> Self {
        let values: Vec<Value> = ids.into_iter().map(Value::String).collect();
        let limit = values.len().max(1);
        Self {
            filter: Some(FilterExpr::In {
                r#in: ("id".to_string(), values),
            }),
            sort: Vec::new(),
            offset: 0,
            limit,
        }
    }

    pub fn sort_keys(&self) -> Vec<SortKey> {
        self.sort.iter().map(|s| SortKey::parse(s)).collect()
    }
}

/// How grouped values are folded. Absent aggregation counts group members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Count,
    Sum,
    Avg,
}

impl Aggregation {
    pub fn from_code(code: Option<&str>) -> Result<Self> {
        match code {
            None | Some("") => Ok(Aggregation::Count),
            Some("sum") => Ok(Aggregation::Sum),
            Some("avg") => Ok(Aggregation::Avg),
            Some(other) => Err(ApiError::InvalidInput(format!(
                "unknown aggregation type \"{}\"",
                other
            ))),
        }
    }
}

/// Aggregation request: group-by keys, optional value column and fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub keys: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub filter: Option<FilterExpr>,
    #[serde(default = "default_aggregate_limit")]
    pub limit: usize,
}

/// One aggregation result group. Composite keys are JSON-encoded arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub key: String,
    pub value: Value,
}
