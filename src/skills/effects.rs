//! Best-effort flattening of a level's `extra_effects` JSON into display tables.
//!
//! Rules, in order:
//! - `null` renders nothing.
//! - An object carrying `stack_energy` or `items` gets one section per such
//!   field; its remaining keys form one more untitled section.
//! - An object whose keys are all integers and whose values are not all
//!   primitives is read as an array ordered by key.
//! - An object of primitives becomes `level | value` rows.
//! - An array of objects becomes one row per element, columns being the union
//!   of keys in first-seen order.
//! - Anything else is a single `value` column; non-string scalars are
//!   rendered as JSON text.

use serde::Serialize;
use serde_json::{Map, Value};

const NAMED_SECTIONS: &[&str] = &["stack_energy", "items"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectTable {
    pub title: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl EffectTable {
    fn single(title: Option<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            title,
            columns: vec!["value".into()],
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Object(_) | Value::Array(_))
}

fn json_text(v: &Value) -> Value {
    match v {
        Value::String(_) => v.clone(),
        other => Value::String(other.to_string()),
    }
}

/// Keys sorted numerically when every key is an integer.
fn numeric_keys(obj: &Map<String, Value>) -> Option<Vec<(u64, &String)>> {
    let mut keys = obj
        .keys()
        .map(|k| k.trim().parse::<u64>().ok().map(|n| (n, k)))
        .collect::<Option<Vec<_>>>()?;
    keys.sort();
    Some(keys)
}

fn ordered_entries(obj: &Map<String, Value>) -> Vec<(&String, &Value)> {
    match numeric_keys(obj) {
        Some(keys) => keys.into_iter().map(|(_, k)| (k, &obj[k.as_str()])).collect(),
        None => obj.iter().collect(),
    }
}

fn table(title: Option<String>, value: &Value) -> Option<EffectTable> {
    match value {
        Value::Null => None,
        Value::Object(obj) if obj.is_empty() => None,
        Value::Object(obj) => {
            if obj.values().all(is_primitive) {
                let rows = ordered_entries(obj)
                    .into_iter()
                    .map(|(k, v)| vec![Value::String(k.clone()), v.clone()])
                    .collect();
                return Some(EffectTable {
                    title,
                    columns: vec!["level".into(), "value".into()],
                    rows,
                });
            }
            if numeric_keys(obj).is_some() {
                let items: Vec<Value> = ordered_entries(obj).into_iter().map(|(_, v)| v.clone()).collect();
                return table(title, &Value::Array(items));
            }
            Some(EffectTable::single(title, vec![vec![json_text(value)]]))
        }
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => {
            if items.iter().all(Value::is_object) {
                let mut columns: Vec<String> = Vec::new();
                for item in items {
                    for key in item.as_object().into_iter().flat_map(|o| o.keys()) {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
                let rows = items
                    .iter()
                    .map(|item| {
                        columns
                            .iter()
                            .map(|c| item.get(c).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect();
                return Some(EffectTable { title, columns, rows });
            }
            Some(EffectTable::single(
                title,
                items.iter().map(|v| vec![json_text(v)]).collect(),
            ))
        }
        scalar => Some(EffectTable::single(title, vec![vec![json_text(scalar)]])),
    }
}

pub fn interpret(extra: &Value) -> Vec<EffectTable> {
    if let Value::Object(obj) = extra {
        if NAMED_SECTIONS.iter().any(|k| obj.contains_key(*k)) {
            let mut out: Vec<EffectTable> = NAMED_SECTIONS
                .iter()
                .filter_map(|k| obj.get(*k).and_then(|v| table(Some(k.to_string()), v)))
                .collect();
            let rest: Map<String, Value> = obj
                .iter()
                .filter(|(k, _)| !NAMED_SECTIONS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.extend(table(None, &Value::Object(rest)));
            return out;
        }
    }
    table(None, extra).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stack_energy_flattens_to_level_value_rows() {
        let tables = interpret(&json!({ "stack_energy": { "0": 600, "1": 1020 } }));
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.title.as_deref(), Some("stack_energy"));
        assert_eq!(t.columns, vec!["level", "value"]);
        assert_eq!(t.rows, vec![vec![json!("0"), json!(600)], vec![json!("1"), json!(1020)]]);
    }

    #[test]
    fn scalar_becomes_one_json_text_cell() {
        let tables = interpret(&json!(42));
        assert_eq!(tables[0].columns, vec!["value"]);
        assert_eq!(tables[0].rows, vec![vec![json!("42")]]);
        assert_eq!(interpret(&json!("text"))[0].rows, vec![vec![json!("text")]]);
    }

    #[test]
    fn null_and_empty_render_nothing() {
        assert!(interpret(&Value::Null).is_empty());
        assert!(interpret(&json!({})).is_empty());
        assert!(interpret(&json!([])).is_empty());
    }

    #[test]
    fn numeric_keys_sort_as_numbers() {
        let t = &interpret(&json!({ "10": 3, "2": 1, "9": 2 }))[0];
        let levels: Vec<&Value> = t.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(levels, vec!["2", "9", "10"]);
    }

    #[test]
    fn numeric_keyed_objects_read_as_array() {
        let t = &interpret(&json!({
            "2": { "berry": "Oran", "count": 3 },
            "1": { "berry": "Pecha", "bonus": true }
        }))[0];
        assert_eq!(t.columns, vec!["berry", "bonus", "count"]);
        assert_eq!(t.rows[0], vec![json!("Pecha"), json!(true), Value::Null]);
        assert_eq!(t.rows[1], vec![json!("Oran"), Value::Null, json!(3)]);
    }

    #[test]
    fn column_union_keeps_first_seen_order() {
        let t = &interpret(&json!([{ "name": "a", "amount": 1 }, { "bonus": 2, "name": "b" }]))[0];
        assert_eq!(t.columns, vec!["amount", "name", "bonus"]);
        assert_eq!(t.rows.len(), 2);
    }

    #[test]
    fn named_sections_plus_remainder() {
        let tables = interpret(&json!({
            "items": [{ "name": "Honey", "qty": 2 }],
            "stack_energy": [100, 200],
            "note": "stacks"
        }));
        let titles: Vec<Option<&str>> = tables.iter().map(|t| t.title.as_deref()).collect();
        assert_eq!(titles, vec![Some("stack_energy"), Some("items"), None]);
        assert_eq!(tables[0].rows, vec![vec![json!("100")], vec![json!("200")]]);
        assert_eq!(tables[2].rows, vec![vec![json!("note"), json!("stacks")]]);
    }

    #[test]
    fn mixed_shapes_never_fail() {
        let t = &interpret(&json!({ "a": [1, 2], "b": { "c": 1 } }))[0];
        assert_eq!(t.columns, vec!["value"]);
        assert_eq!(t.rows.len(), 1);
        let t = &interpret(&json!([1, { "a": 1 }, "x"]))[0];
        assert_eq!(t.rows, vec![vec![json!("1")], vec![json!("{\"a\":1}")], vec![json!("x")]]);
    }
}
