//! Listing helpers shared by the bundled connections.

use std::cmp::Ordering;

use serde_json::Value;

use crate::connection::Record;

/// Split an order expression (`"Name"`, `"Name DESC"`) into field and direction.
pub(crate) fn parse_order(order: &str) -> Option<(&str, bool)> {
    let mut parts = order.split_whitespace();
    let field = parts.next()?;
    let descending = parts
        .next()
        .map(|d| d.eq_ignore_ascii_case("desc"))
        .unwrap_or(false);
    Some((field, descending))
}

/// Total order over JSON values: nulls first, numbers numerically,
/// strings lexically, everything else by its JSON text.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Less,
        (_, Some(Value::Null) | None) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Sort records by an order expression in place.
pub(crate) fn sort_records(records: &mut [Record], order: Option<&str>) {
    if let Some((field, descending)) = order.and_then(parse_order) {
        records.sort_by(|a, b| {
            let ord = compare_values(a.get(field), b.get(field));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

/// Keep the identifier and the listed fields.
pub(crate) fn project(record: &Record, id_field: &str, fields: &[String]) -> Record {
    let mut out = Record::new();
    if let Some(id) = record.get(id_field) {
        out.insert(id_field.to_string(), id.clone());
    }
    for field in fields {
        if let Some(v) = record.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nulls_sort_first() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!(2)), Some(&json!(10))),
            Ordering::Less
        );
    }

    #[test]
    fn sorts_descending() {
        let mut rows: Vec<Record> = [json!({"n": 1}), json!({"n": 3}), json!({"n": 2})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        sort_records(&mut rows, Some("n desc"));
        let ns: Vec<_> = rows.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(ns, vec![json!(3), json!(2), json!(1)]);
    }
}
