//! Collection queries: field filters and ordering.
//!
//! Filters and ordering operate on top-level fields of the JSON document
//! body.  Ordering ties are broken by commit sequence, so two documents
//! written with identical field values (e.g. the same millisecond timestamp)
//! always come back in insertion order.

use std::cmp::Ordering;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals value.
    Eq(String, Value),
    /// Field is strictly greater than value.  Absent fields never match.
    Gt(String, Value),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }
}

/// A filtered, optionally ordered read of one collection.
#[derive(Debug, Clone)]
pub struct Query {
    collection: String,
    filters: Vec<Filter>,
    order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub(crate) fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(field, value) => body.get(field).unwrap_or(&Value::Null) == value,
            Filter::Gt(field, value) => match body.get(field) {
                Some(actual) => compare_values(actual, value) == Ordering::Greater,
                None => false,
            },
        })
    }

    /// Sort `(body, seq)` rows in place.  Without an explicit ordering, rows
    /// come back in commit order.
    pub(crate) fn sort(&self, rows: &mut [(Value, i64)]) {
        match &self.order_by {
            Some((field, direction)) => {
                let direction = *direction;
                rows.sort_by(|(a, a_seq), (b, b_seq)| {
                    let a_field = a.get(field).unwrap_or(&Value::Null);
                    let b_field = b.get(field).unwrap_or(&Value::Null);
                    let by_field = match direction {
                        Direction::Asc => compare_values(a_field, b_field),
                        Direction::Desc => compare_values(b_field, a_field),
                    };
                    // Commit sequence breaks ties in insertion order,
                    // regardless of sort direction.
                    by_field.then(a_seq.cmp(b_seq))
                });
            }
            None => rows.sort_by_key(|(_, seq)| *seq),
        }
    }
}

/// Total order over the JSON values we filter and sort on.
///
/// Nulls sort first, then booleans, numbers, and strings; values of other
/// types compare equal (ties fall through to the commit sequence).
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_gt_filters() {
        let query = Query::collection("bookings")
            .filter(Filter::eq("driverId", "d1"))
            .filter(Filter::gt("rating", 0));

        assert!(query.matches(&json!({ "driverId": "d1", "rating": 4 })));
        assert!(!query.matches(&json!({ "driverId": "d1", "rating": 0 })));
        assert!(!query.matches(&json!({ "driverId": "d1", "rating": null })));
        assert!(!query.matches(&json!({ "driverId": "d2", "rating": 5 })));
        assert!(!query.matches(&json!({ "driverId": "d1" })));
    }

    #[test]
    fn test_sort_with_seq_tie_break() {
        let query = Query::collection("messages").order_by("timestamp", Direction::Asc);

        let mut rows = vec![
            (json!({ "timestamp": 200 }), 3),
            (json!({ "timestamp": 100 }), 2),
            (json!({ "timestamp": 100 }), 1),
        ];
        query.sort(&mut rows);

        let seqs: Vec<i64> = rows.iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_desc_sort_keeps_insertion_order_for_ties() {
        let query = Query::collection("messages").order_by("timestamp", Direction::Desc);

        let mut rows = vec![
            (json!({ "timestamp": 100 }), 2),
            (json!({ "timestamp": 200 }), 3),
            (json!({ "timestamp": 100 }), 1),
        ];
        query.sort(&mut rows);

        let seqs: Vec<i64> = rows.iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![3, 1, 2]);
    }
}
