//! Reconciliation rules deciding whether a freshly fetched snapshot differs
//! from the last accepted one.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Tracked fields of a flat daemon object, keyed by the tracked field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldSnapshot {
    values: BTreeMap<&'static str, Value>,
}

impl FieldSnapshot {
    /// Picks `tracked` fields out of `raw`, matching names case-insensitively.
    ///
    /// A tracked field the daemon did not report is stored as `null`.
    pub fn from_raw(tracked: &[&'static str], raw: &Map<String, Value>) -> Self {
        let values = tracked
            .iter()
            .map(|&field| {
                let value = raw
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(field))
                    .map(|(_, value)| value.clone())
                    .unwrap_or(Value::Null);
                (field, value)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Flat property diff: any single differing tracked field is a change.
pub fn fields_differ(previous: Option<&FieldSnapshot>, next: &FieldSnapshot) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    next.values
        .iter()
        .any(|(field, value)| previous.values.get(field) != Some(value))
}

/// Transaction list rule.
///
/// Any confirmed transaction is always a change. Otherwise the unconfirmed
/// ids are compared in order against the previous list; a missing previous
/// list, a length change or any differing id is a change.
pub fn transactions_differ<'a>(
    has_confirmed: bool,
    previous_unconfirmed: Option<impl Iterator<Item = &'a str>>,
    next_unconfirmed: impl Iterator<Item = &'a str>,
) -> bool {
    if has_confirmed {
        return true;
    }
    match previous_unconfirmed {
        Some(previous) => !previous.eq(next_unconfirmed),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TRACKED: &[&str] = &["balance", "newMint", "blocks"];

    fn snapshot(raw: Value) -> FieldSnapshot {
        FieldSnapshot::from_raw(TRACKED, raw.as_object().unwrap())
    }

    #[test]
    fn field_names_match_case_insensitively() {
        let snap = snapshot(json!({"balance": 1.5, "newmint": 0.25, "blocks": 100, "ignored": true}));
        assert_eq!(snap.get_f64("newMint"), Some(0.25));
        assert_eq!(snap.get_u64("blocks"), Some(100));
        assert_eq!(snap.fields().count(), 3);
    }

    #[test]
    fn identical_fields_do_not_differ() {
        let a = snapshot(json!({"balance": 1.5, "newmint": 0.0, "blocks": 100, "connections": 3}));
        let b = snapshot(json!({"balance": 1.5, "newmint": 0.0, "blocks": 100, "connections": 9}));
        assert!(!fields_differ(Some(&a), &b));
    }

    #[test]
    fn single_field_change_differs() {
        let a = snapshot(json!({"balance": 1.5, "newmint": 0.0, "blocks": 100}));
        let b = snapshot(json!({"balance": 1.5, "newmint": 0.0, "blocks": 101}));
        assert!(fields_differ(Some(&a), &b));
        assert!(fields_differ(None, &b));
    }

    #[test]
    fn missing_field_is_null() {
        let snap = snapshot(json!({"balance": 2.0}));
        assert_eq!(snap.get("blocks"), None);
    }

    #[test]
    fn confirmed_transactions_always_differ() {
        let same = ["a", "b"];
        assert!(transactions_differ(true, Some(same.into_iter()), same.into_iter()));
    }

    #[test]
    fn unconfirmed_ids_compared_in_order() {
        let prev = ["a", "b"];
        assert!(!transactions_differ(false, Some(prev.into_iter()), ["a", "b"].into_iter()));
        assert!(transactions_differ(false, Some(prev.into_iter()), ["b", "a"].into_iter()));
        assert!(transactions_differ(false, Some(prev.into_iter()), ["a"].into_iter()));
        assert!(transactions_differ(false, None::<std::array::IntoIter<&str, 0>>, ["a"].into_iter()));
    }
}
