use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submitted values keyed by field name.
pub type FormData = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    IsChecked,
    IsNotChecked,
    /// Any operator this engine does not recognise.
    #[serde(other)]
    Unknown,
}

/// Field reference, operator, and comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(alias = "fieldId")]
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Evaluate one condition against the current values. Never panics; unknown operators are false.
pub fn evaluate(condition: &Condition, values: &FormData) -> bool {
    let actual = values.get(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => text_of(actual) == value_text(expected),
        ConditionOperator::NotEquals => text_of(actual) != value_text(expected),
        ConditionOperator::Contains => text_of(actual).contains(&value_text(expected)),
        ConditionOperator::NotContains => !text_of(actual).contains(&value_text(expected)),
        ConditionOperator::StartsWith => text_of(actual).starts_with(&value_text(expected)),
        ConditionOperator::EndsWith => text_of(actual).ends_with(&value_text(expected)),
        ConditionOperator::Gt => compare(actual, expected, |a, b| a > b),
        ConditionOperator::Gte => compare(actual, expected, |a, b| a >= b),
        ConditionOperator::Lt => compare(actual, expected, |a, b| a < b),
        ConditionOperator::Lte => compare(actual, expected, |a, b| a <= b),
        ConditionOperator::In => is_member(actual, expected),
        ConditionOperator::NotIn => !is_member(actual, expected),
        ConditionOperator::IsEmpty => is_empty(actual),
        ConditionOperator::IsNotEmpty => !is_empty(actual),
        ConditionOperator::IsChecked => is_checked(actual),
        ConditionOperator::IsNotChecked => !is_checked(actual),
        ConditionOperator::Unknown => false,
    }
}

/// Missing, `null`, and `""` count as empty.
pub fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

fn is_checked(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text == "true",
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(numeric_value), numeric_value(expected)) {
        (Some(left), Some(right)) => op(left, right),
        _ => false,
    }
}

fn is_member(actual: Option<&Value>, expected: &Value) -> bool {
    let needle = text_of(actual);
    match expected {
        Value::Array(items) => items.iter().any(|item| value_text(item) == needle),
        Value::String(list) => list.split(',').any(|item| item.trim() == needle),
        other => value_text(other) == needle,
    }
}

pub(crate) fn text_of(value: Option<&Value>) -> String {
    value.map(value_text).unwrap_or_default()
}

/// String coercion shared by the evaluator, validator, and export.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Finite numeric reading of a value, if it has one.
pub(crate) fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> FormData {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn check(field: &str, operator: ConditionOperator, value: Value, data: &FormData) -> bool {
        evaluate(&Condition::new(field, operator, value), data)
    }

    #[test]
    fn string_operators_coerce_both_sides() {
        let data = values(&[("grade", json!(10)), ("city", json!("Springfield"))]);
        assert!(check("grade", ConditionOperator::Equals, json!("10"), &data));
        assert!(check("grade", ConditionOperator::StartsWith, json!(1), &data));
        assert!(check("city", ConditionOperator::Contains, json!("field"), &data));
        assert!(check("city", ConditionOperator::EndsWith, json!("eld"), &data));
        assert!(check("city", ConditionOperator::NotContains, json!("Shelby"), &data));
        assert!(check("city", ConditionOperator::NotEquals, json!("Ogdenville"), &data));
    }

    #[test]
    fn numeric_operators_require_finite_numbers() {
        let data = values(&[("age", json!("12")), ("note", json!("twelve"))]);
        assert!(check("age", ConditionOperator::Gt, json!(11), &data));
        assert!(check("age", ConditionOperator::Gte, json!(12), &data));
        assert!(check("age", ConditionOperator::Lt, json!("12.5"), &data));
        assert!(check("age", ConditionOperator::Lte, json!(12), &data));
        assert!(!check("note", ConditionOperator::Gt, json!(0), &data));
        assert!(!check("note", ConditionOperator::Lt, json!(0), &data));
        assert!(!check("age", ConditionOperator::Gt, json!("NaN"), &data));
    }

    #[test]
    fn membership_accepts_arrays_and_comma_lists() {
        let data = values(&[("house", json!("Blue"))]);
        assert!(check("house", ConditionOperator::In, json!(["Red", "Blue"]), &data));
        assert!(check("house", ConditionOperator::In, json!("Red, Blue"), &data));
        assert!(check("house", ConditionOperator::NotIn, json!(["Green"]), &data));
    }

    #[test]
    fn emptiness_covers_missing_null_and_blank() {
        let data = values(&[("blank", json!("")), ("nothing", Value::Null), ("zero", json!(0))]);
        assert!(check("blank", ConditionOperator::IsEmpty, Value::Null, &data));
        assert!(check("nothing", ConditionOperator::IsEmpty, Value::Null, &data));
        assert!(check("missing", ConditionOperator::IsEmpty, Value::Null, &data));
        assert!(check("zero", ConditionOperator::IsNotEmpty, Value::Null, &data));
    }

    #[test]
    fn checked_only_for_true_or_true_string() {
        let data = values(&[
            ("a", json!(true)),
            ("b", json!("true")),
            ("c", json!(1)),
            ("d", json!("yes")),
        ]);
        assert!(check("a", ConditionOperator::IsChecked, Value::Null, &data));
        assert!(check("b", ConditionOperator::IsChecked, Value::Null, &data));
        assert!(check("c", ConditionOperator::IsNotChecked, Value::Null, &data));
        assert!(check("d", ConditionOperator::IsNotChecked, Value::Null, &data));
    }

    #[test]
    fn unknown_operator_deserializes_and_is_false() {
        let condition: Condition = serde_json::from_value(json!({
            "fieldId": "grade",
            "operator": "matches_regex",
            "value": "x"
        }))
        .expect("condition parses");
        assert_eq!(condition.operator, ConditionOperator::Unknown);
        assert_eq!(condition.field, "grade");
        assert!(!evaluate(&condition, &values(&[("grade", json!("x"))])));
    }
}
