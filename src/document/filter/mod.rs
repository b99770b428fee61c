
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::Contents;
use crate::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
}

impl FilterOp {
    pub const ALL: [FilterOp; 10] = [
        FilterOp::Equal,
        FilterOp::NotEqual,
        FilterOp::LessThan,
        FilterOp::LessThanOrEqual,
        FilterOp::GreaterThan,
        FilterOp::GreaterThanOrEqual,
        FilterOp::In,
        FilterOp::NotIn,
        FilterOp::ArrayContains,
        FilterOp::ArrayContainsAny,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Equal => "==",
            FilterOp::NotEqual => "!=",
            FilterOp::LessThan => "<",
            FilterOp::LessThanOrEqual => "<=",
            FilterOp::GreaterThan => ">",
            FilterOp::GreaterThanOrEqual => ">=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not-in",
            FilterOp::ArrayContains => "array-contains",
            FilterOp::ArrayContainsAny => "array-contains-any",
        }
    }
}

impl fmt::Display for FilterOp {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = GatewayError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("Unknown filter operator: {}", s)))
    }
}

/// A `(field, operator, value)` predicate narrowing a read.
///
/// `field` may be a dotted path into nested maps (`"address.city"`). A key
/// that literally contains dots takes precedence over the nested path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    #[inline]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    #[inline]
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Equal, value)
    }

    /// Evaluate this predicate against a document's contents.
    ///
    /// A document lacking the field never matches, whatever the operator.
    #[inline]
    pub fn matches(&self, contents: &Contents) -> bool {
        let Some(actual) = lookup_field(contents, &self.field) else {
            return false;
        };

        match self.op {
            FilterOp::Equal => values_equal(actual, &self.value),
            FilterOp::NotEqual => !values_equal(actual, &self.value),
            FilterOp::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            FilterOp::LessThanOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::GreaterThanOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => self
                .value
                .as_array()
                .is_some_and(|options| options.iter().any(|o| values_equal(actual, o))),
            FilterOp::NotIn => self
                .value
                .as_array()
                .is_some_and(|options| !options.iter().any(|o| values_equal(actual, o))),
            FilterOp::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|i| values_equal(i, &self.value))),
            FilterOp::ArrayContainsAny => match (actual.as_array(), self.value.as_array()) {
                (Some(items), Some(options)) => items
                    .iter()
                    .any(|i| options.iter().any(|o| values_equal(i, o))),
                _ => false,
            },
        }
    }
}

/// True when every filter matches; an empty filter list matches everything.
#[inline]
pub fn matches_all(filters: &[Filter], contents: &Contents) -> bool {
    filters.iter().all(|filter| filter.matches(contents))
}

impl fmt::Display for Filter {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

impl FromStr for Filter {
    type Err = GatewayError;

    /// Parse `"<field> <op> <value>"`. The value is read as JSON when it
    /// parses, otherwise as a bare string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || {
            GatewayError::InvalidRequest(format!(
                "Filter must look like '<field> <op> <value>': {}",
                s
            ))
        };

        let (field, rest) = s.trim().split_once(char::is_whitespace).ok_or_else(malformed)?;
        let (op, raw_value) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let raw_value = raw_value.trim();
        if raw_value.is_empty() {
            return Err(malformed());
        }

        let value = serde_json::from_str(raw_value)
            .unwrap_or_else(|_| Value::String(raw_value.to_string()));

        Ok(Self::new(field, op.parse()?, value))
    }
}

fn lookup_field<'a>(contents: &'a Contents, path: &str) -> Option<&'a Value> {
    if let Some(value) = contents.get(path) {
        return Some(value);
    }

    let mut segments = path.split('.');
    let mut current = contents.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
