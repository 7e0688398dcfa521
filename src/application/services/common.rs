use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::domain::DomainError;

/// Ordering and window applied to list endpoints.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub page: usize,
    pub page_size: usize,
    pub orderby: String,
    pub desc: bool,
}

impl PageQuery {
    pub fn new(page: usize, page_size: usize, orderby: impl Into<String>, desc: bool) -> Self {
        Self {
            page,
            page_size,
            orderby: orderby.into(),
            desc,
        }
    }
}

fn compare_field(a: &Value, b: &Value, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Sorts rows by `orderby` and cuts out the requested page (1-based).
/// A zero `page_size` keeps every row.
pub fn order_and_page(mut rows: Vec<Value>, query: &PageQuery) -> Vec<Value> {
    rows.sort_by(|a, b| {
        let ord = compare_field(a, b, &query.orderby);
        if query.desc {
            ord.reverse()
        } else {
            ord
        }
    });

    if query.page_size == 0 {
        return rows;
    }
    let skip = query.page.saturating_sub(1) * query.page_size;
    rows.into_iter().skip(skip).take(query.page_size).collect()
}

/// Overwrites `entity`'s fields with those present in `fields`.
pub fn merge_fields<T: Serialize + DeserializeOwned>(
    entity: &T,
    fields: &Map<String, Value>,
) -> Result<T, DomainError> {
    let mut value = serde_json::to_value(entity)?;
    if let Some(obj) = value.as_object_mut() {
        for (k, v) in fields {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(value).map_err(|e| DomainError::validation(e.to_string()))
}

/// Recursive merge: nested maps are merged key by key, anything else replaced.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            for (k, v) in p {
                match t.get_mut(k) {
                    Some(existing) if existing.is_object() && v.is_object() => {
                        deep_merge(existing, v)
                    }
                    _ => {
                        t.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Unix time in fractional seconds.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"name": "b", "create_time": 2}),
            json!({"name": "a", "create_time": 3}),
            json!({"name": "c", "create_time": 1}),
        ]
    }

    #[test]
    fn test_order_and_page_desc() {
        let page = order_and_page(rows(), &PageQuery::new(1, 2, "create_time", true));
        let names: Vec<_> = page.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_order_and_page_second_page() {
        let page = order_and_page(rows(), &PageQuery::new(2, 2, "name", false));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["name"], "c");
    }

    #[test]
    fn test_zero_page_size_keeps_all() {
        assert_eq!(order_and_page(rows(), &PageQuery::new(1, 0, "name", false)).len(), 3);
    }

    #[test]
    fn test_deep_merge() {
        let mut target = json!({"pages": [[1, 2]], "raptor": {"use_raptor": false, "max": 3}});
        deep_merge(&mut target, &json!({"raptor": {"use_raptor": true}, "chunk_token_num": 64}));
        assert_eq!(
            target,
            json!({"pages": [[1, 2]], "raptor": {"use_raptor": true, "max": 3}, "chunk_token_num": 64})
        );
    }
}
