use serde_json::Value;

use crate::draft::ValueMap;
use crate::spec::field::{ConditionMode, ConditionOperator, FieldDefinition, VisibilityCondition};
use crate::spec::form::FormSchema;

pub type VisibilityMap = std::collections::BTreeMap<String, bool>;

/// Recomputes the visible set for every field from scratch. Visibility never
/// writes back into the value map, so one linear pass always suffices.
pub fn resolve_visibility(schema: &FormSchema, values: &ValueMap) -> VisibilityMap {
    schema
        .fields
        .iter()
        .map(|field| (field.name.clone(), is_visible(field, values)))
        .collect()
}

/// Decides whether a single field is currently shown. A field with no
/// conditions is always visible regardless of its combination mode.
pub fn is_visible(field: &FieldDefinition, values: &ValueMap) -> bool {
    if field.conditions.is_empty() {
        return true;
    }
    let mut outcomes = field
        .conditions
        .iter()
        .map(|condition| condition_holds(condition, values));
    match field.condition_mode {
        ConditionMode::All => outcomes.all(|holds| holds),
        ConditionMode::Any => outcomes.any(|holds| holds),
    }
}

fn condition_holds(condition: &VisibilityCondition, values: &ValueMap) -> bool {
    let current = values
        .get(&condition.field)
        .map(value_text)
        .unwrap_or_default();
    let comparand = value_text(&condition.value);

    match condition.operator {
        ConditionOperator::Equals => current == comparand,
        ConditionOperator::NotEquals => current != comparand,
        ConditionOperator::Contains => current
            .to_lowercase()
            .contains(&comparand.to_lowercase()),
        ConditionOperator::GreaterThan => match (numeric(&current), numeric(&comparand)) {
            (Some(lhs), Some(rhs)) => lhs > rhs,
            _ => false,
        },
        ConditionOperator::LessThan => match (numeric(&current), numeric(&comparand)) {
            (Some(lhs), Some(rhs)) => lhs < rhs,
            _ => false,
        },
        ConditionOperator::IsEmpty => current.is_empty(),
        ConditionOperator::IsNotEmpty => !current.is_empty(),
    }
}

/// Canonical text form of a stored value; absent and null read as empty.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn numeric(text: &str) -> Option<f64> {
    let parsed: f64 = text.trim().parse().ok()?;
    parsed.is_finite().then_some(parsed)
}
