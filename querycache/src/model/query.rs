//! Query descriptions and the read operations that can be cached

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use crate::error::CacheError;
use std::fmt;
use std::str::FromStr;

/// Read operations recognized by key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryOp {
    Get,
    Find,
    FindAll,
    Count,
    Distinct,
    Aggregate,
    First,
    EachBatch,
    Each,
    Map,
    Reduce,
    Filter,
    /// Live subscription; keyed like the rest but never cached
    Subscribe,
}

impl QueryOp {
    /// All operations, in declaration order
    pub const ALL: [QueryOp; 13] = [
        QueryOp::Get,
        QueryOp::Find,
        QueryOp::FindAll,
        QueryOp::Count,
        QueryOp::Distinct,
        QueryOp::Aggregate,
        QueryOp::First,
        QueryOp::EachBatch,
        QueryOp::Each,
        QueryOp::Map,
        QueryOp::Reduce,
        QueryOp::Filter,
        QueryOp::Subscribe,
    ];

    /// Operation name as it appears in derived keys
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOp::Get => "get",
            QueryOp::Find => "find",
            QueryOp::FindAll => "findAll",
            QueryOp::Count => "count",
            QueryOp::Distinct => "distinct",
            QueryOp::Aggregate => "aggregate",
            QueryOp::First => "first",
            QueryOp::EachBatch => "eachBatch",
            QueryOp::Each => "each",
            QueryOp::Map => "map",
            QueryOp::Reduce => "reduce",
            QueryOp::Filter => "filter",
            QueryOp::Subscribe => "subscribe",
        }
    }

    /// Whether results of this operation may be stored
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, QueryOp::Subscribe)
    }
}

impl FromStr for QueryOp {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CacheError::Other(format!("unknown query operation: {}", s)))
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query against one entity class
///
/// The `where` clause uses the object database's JSON constraint syntax
/// (`{"status": "open", "total": {"$gt": 10}}`); this crate only needs it to be
/// serializable and, for scoped invalidation, to inspect equality constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub class_name: String,

    #[serde(rename = "where", default)]
    pub where_clause: Map<String, JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

impl Query {
    /// Create an unconstrained query over a class
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            where_clause: Map::new(),
            limit: None,
            skip: None,
            order: Vec::new(),
            keys: Vec::new(),
            include: Vec::new(),
        }
    }

    /// Require `field == value`
    pub fn equal_to(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.where_clause.insert(field.into(), value.into());
        self
    }

    /// Add an operator constraint such as `$gt` or `$in`
    pub fn constraint(
        mut self,
        field: impl Into<String>,
        operator: &str,
        value: impl Into<JsonValue>,
    ) -> Self {
        let entry = self
            .where_clause
            .entry(field.into())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(Map::new());
        }
        if let JsonValue::Object(ops) = entry {
            ops.insert(operator.to_string(), value.into());
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.order.push(field.into());
        self
    }

    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.order.push(format!("-{}", field.into()));
        self
    }

    /// Restrict returned fields
    pub fn select<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.include.push(field.into());
        self
    }

    /// Query body without the class name
    pub fn to_json(&self) -> JsonValue {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let JsonValue::Object(map) = &mut value {
            map.remove("className");
        }
        value
    }
}
