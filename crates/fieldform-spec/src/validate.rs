use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::draft::ValueMap;
use crate::spec::field::{FieldDefinition, RuleKind, ValidationRule};
use crate::spec::form::FormSchema;
use crate::visibility::{is_visible, value_text};

/// Validation failure scoped to a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Validates one candidate value against a field's rules in declaration
/// order, returning the first failing rule's message. `None` means the
/// value passes every rule.
pub fn validate_field(field: &FieldDefinition, value: Option<&Value>) -> Option<String> {
    let text = value.map(value_text).unwrap_or_default();

    if text.is_empty() {
        if field.required {
            return Some(format!("{} is required", field.label));
        }
        return None;
    }

    for rule in &field.rules {
        if let Some(message) = apply_rule(rule, &text) {
            return Some(message);
        }
    }
    None
}

/// Validates every visible field placed on the given page. Hidden fields
/// are exempt from all rules, `required` included.
pub fn validate_page(schema: &FormSchema, values: &ValueMap, page: u32) -> Vec<FieldError> {
    let mut errors = Vec::new();
    for field in schema.fields_on_page(page) {
        if !is_visible(field, values) {
            continue;
        }
        if let Some(message) = validate_field(field, values.get(&field.name)) {
            errors.push(FieldError {
                field: field.name.clone(),
                message,
            });
        }
    }
    errors
}

fn apply_rule(rule: &ValidationRule, text: &str) -> Option<String> {
    let failed = match rule.kind {
        // An unparseable value fails numeric bounds outright.
        RuleKind::Min => match (parse_number(text), rule.bound.as_f64()) {
            (Some(value), Some(bound)) => value < bound,
            _ => true,
        },
        RuleKind::Max => match (parse_number(text), rule.bound.as_f64()) {
            (Some(value), Some(bound)) => value > bound,
            _ => true,
        },
        RuleKind::MinLength => rule
            .bound
            .as_u64()
            .is_some_and(|bound| (text.chars().count() as u64) < bound),
        RuleKind::MaxLength => rule
            .bound
            .as_u64()
            .is_some_and(|bound| (text.chars().count() as u64) > bound),
        RuleKind::Pattern => match rule.bound.as_str().and_then(|p| Regex::new(p).ok()) {
            Some(regex) => !regex.is_match(text),
            None => true,
        },
    };
    failed.then(|| rule.message.clone())
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse().ok()
}
