// ── Filter and sort evaluation ──
//
// Field access is by dotted path over the JSON form of a document.
// Filter values arrive as strings from query strings, so they are
// coerced to the kind of the field they are compared against.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use super::{Filter, Operator, SortBy, SortOrder, StorageError};

/// Resolve `a.b.c` inside a document. Array segments accept indices.
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

// ── Compilation ─────────────────────────────────────────────────────

struct Compiled {
    key: String,
    operator: Operator,
    value: Value,
    regex: Option<Regex>,
}

/// Filters with their regexes compiled once per query.
pub(crate) struct CompiledFilters(Vec<Compiled>);

impl CompiledFilters {
    pub(crate) fn compile(filters: &[Filter]) -> Result<Self, StorageError> {
        let mut compiled = Vec::with_capacity(filters.len());
        for filter in filters {
            if filter.key.is_empty() {
                return Err(StorageError::invalid_filter("", "empty key"));
            }
            let regex = match filter.operator {
                Operator::Regex => {
                    let pattern = filter.value.as_str().ok_or_else(|| {
                        StorageError::invalid_filter(&filter.key, "regex value must be a string")
                    })?;
                    Some(
                        Regex::new(pattern)
                            .map_err(|e| StorageError::invalid_filter(&filter.key, e.to_string()))?,
                    )
                }
                Operator::RangeIn | Operator::RangeNotIn => {
                    if range_bounds(&filter.value).is_none() {
                        return Err(StorageError::invalid_filter(
                            &filter.key,
                            "range value must hold exactly two bounds",
                        ));
                    }
                    None
                }
                _ => None,
            };
            compiled.push(Compiled {
                key: filter.key.clone(),
                operator: filter.operator,
                value: filter.value.clone(),
                regex,
            });
        }
        Ok(Self(compiled))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the document satisfies every predicate.
    pub(crate) fn matches(&self, document: &Value) -> bool {
        self.0.iter().all(|f| f.matches(document))
    }
}

impl Compiled {
    fn matches(&self, document: &Value) -> bool {
        let field = lookup_path(document, &self.key);
        match self.operator {
            Operator::Eq => field.is_some_and(|f| equals(f, &self.value)),
            Operator::Ne => !field.is_some_and(|f| equals(f, &self.value)),
            Operator::In => field.is_some_and(|f| list(&self.value).iter().any(|v| equals(f, v))),
            Operator::Nin => !field.is_some_and(|f| list(&self.value).iter().any(|v| equals(f, v))),
            Operator::Gt => ordered(field, &self.value, Ordering::is_gt),
            Operator::Lt => ordered(field, &self.value, Ordering::is_lt),
            Operator::Gte => ordered(field, &self.value, Ordering::is_ge),
            Operator::Lte => ordered(field, &self.value, Ordering::is_le),
            Operator::RangeIn => field.is_some_and(|f| in_range(f, &self.value)),
            Operator::RangeNotIn => !field.is_some_and(|f| in_range(f, &self.value)),
            Operator::Exists => {
                let want = coerce_bool(&self.value).unwrap_or(true);
                field.is_some() == want
            }
            Operator::Regex => match (field, &self.regex) {
                (Some(Value::String(s)), Some(re)) => re.is_match(s),
                (Some(other), Some(re)) if !other.is_object() && !other.is_array() => {
                    re.is_match(&other.to_string())
                }
                _ => false,
            },
        }
    }
}

// ── Comparison ──────────────────────────────────────────────────────

/// Coerce `value` to the JSON kind of `field` where that is lossless.
fn coerce<'a>(field: &Value, value: &'a Value) -> std::borrow::Cow<'a, Value> {
    use std::borrow::Cow;
    match (field, value) {
        (Value::Number(_), Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(Cow::Borrowed(value), |n| Cow::Owned(Value::Number(n))),
        (Value::Bool(_), _) => {
            coerce_bool(value).map_or(Cow::Borrowed(value), |b| Cow::Owned(Value::Bool(b)))
        }
        (Value::String(_), Value::Number(n)) => Cow::Owned(Value::String(n.to_string())),
        (Value::String(_), Value::Bool(b)) => Cow::Owned(Value::String(b.to_string())),
        _ => Cow::Borrowed(value),
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f.abs() > f64::EPSILON),
        _ => None,
    }
}

fn equals(field: &Value, value: &Value) -> bool {
    let value = coerce(field, value);
    compare(field, &value) == Some(Ordering::Equal)
}

fn ordered(field: Option<&Value>, value: &Value, accept: fn(Ordering) -> bool) -> bool {
    let Some(field) = field else {
        return false;
    };
    let value = coerce(field, value);
    compare(field, &value).is_some_and(accept)
}

fn in_range(field: &Value, bounds: &Value) -> bool {
    let Some((low, high)) = range_bounds(bounds) else {
        return false;
    };
    let low = coerce(field, low);
    let high = coerce(field, high);
    compare(field, &low).is_some_and(Ordering::is_ge)
        && compare(field, &high).is_some_and(Ordering::is_le)
}

/// `[low, high]`, both inclusive.
fn range_bounds(value: &Value) -> Option<(&Value, &Value)> {
    match value {
        Value::Array(items) if items.len() == 2 => Some((&items[0], &items[1])),
        _ => None,
    }
}

/// Members of an `in` list. A bare string is split on commas.
fn list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(|part| Value::String(part.trim().to_owned()))
            .collect(),
        other => vec![other.clone()],
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Total-ish order over JSON scalars. Mismatched kinds do not compare.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => Some(tx.cmp(&ty)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

// ── Sorting ─────────────────────────────────────────────────────────

/// Stable multi-key sort. Missing fields sort first; `id` breaks ties.
pub fn sort_documents(documents: &mut [Value], sort_by: &[SortBy]) {
    documents.sort_by(|a, b| {
        for key in sort_by {
            let ord = sort_key_cmp(lookup_path(a, &key.field), lookup_path(b, &key.field));
            let ord = match key.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        sort_key_cmp(lookup_path(a, "id"), lookup_path(b, "id"))
    });
}

fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string())),
    }
}
