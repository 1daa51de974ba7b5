//! Schema verification. Every check here is fatal and runs before a form
//! renders; a schema that passes cannot send the evaluators into a cycle
//! or reference state that does not exist.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::formula::Formula;
use crate::spec::field::FieldKind;
use crate::spec::form::FormSchema;

/// Malformed-schema defects surfaced before the form renders.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate field name '{field}'")]
    DuplicateField { field: String },
    #[error("field '{field}' references unknown section '{section_id}'")]
    UnknownSection { field: String, section_id: String },
    #[error("section pages are not contiguous from 1: {pages:?}")]
    NonContiguousPages { pages: Vec<u32> },
    #[error("declared totalPages {declared} does not match section pages {actual}")]
    PageCountMismatch { declared: u32, actual: u32 },
    #[error("field '{field}' condition references itself")]
    SelfReference { field: String },
    #[error("field '{field}' condition references unknown field '{referenced}'")]
    UnknownConditionField { field: String, referenced: String },
    #[error("computed field '{field}' has no calculation")]
    MissingCalculation { field: String },
    #[error("field '{field}' has an invalid formula: {source}")]
    InvalidFormula {
        field: String,
        #[source]
        source: crate::formula::FormulaError,
    },
    #[error("calculation cycle detected: {chain:?}")]
    CalculationCycle { chain: Vec<String> },
}

/// Parses interchange JSON and verifies the result in one step.
pub fn parse(json: &str) -> Result<FormSchema, SchemaError> {
    let schema: FormSchema = serde_json::from_str(json)?;
    verify(&schema)?;
    Ok(schema)
}

/// Checks every structural invariant of a schema.
pub fn verify(schema: &FormSchema) -> Result<(), SchemaError> {
    let mut names = BTreeSet::new();
    for field in &schema.fields {
        if !names.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                field: field.name.clone(),
            });
        }
    }

    for field in &schema.fields {
        if schema.section(&field.section_id).is_none() {
            return Err(SchemaError::UnknownSection {
                field: field.name.clone(),
                section_id: field.section_id.clone(),
            });
        }
        for condition in &field.conditions {
            if condition.field == field.name {
                return Err(SchemaError::SelfReference {
                    field: field.name.clone(),
                });
            }
            if !names.contains(condition.field.as_str()) {
                return Err(SchemaError::UnknownConditionField {
                    field: field.name.clone(),
                    referenced: condition.field.clone(),
                });
            }
        }
        if matches!(field.kind, FieldKind::Computed) && field.calculation.is_none() {
            return Err(SchemaError::MissingCalculation {
                field: field.name.clone(),
            });
        }
    }

    verify_pages(schema)?;
    verify_calculations(schema)
}

fn verify_pages(schema: &FormSchema) -> Result<(), SchemaError> {
    let pages: BTreeSet<u32> = schema
        .sections
        .iter()
        .map(|section| section.page_number)
        .collect();
    if pages.is_empty() {
        return Ok(());
    }

    let expected: BTreeSet<u32> = (1..=pages.len() as u32).collect();
    if pages != expected {
        return Err(SchemaError::NonContiguousPages {
            pages: pages.into_iter().collect(),
        });
    }

    let actual = pages.len() as u32;
    if schema.total_pages != actual {
        return Err(SchemaError::PageCountMismatch {
            declared: schema.total_pages,
            actual,
        });
    }
    Ok(())
}

/// Parses every formula and walks the reference graph so a calculated field
/// that (transitively) feeds itself is rejected here instead of looping at
/// edit time.
fn verify_calculations(schema: &FormSchema) -> Result<(), SchemaError> {
    let mut graph: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for field in &schema.fields {
        let Some(calc) = &field.calculation else {
            continue;
        };
        let formula =
            Formula::parse(&calc.formula).map_err(|source| SchemaError::InvalidFormula {
                field: field.name.clone(),
                source,
            })?;
        graph.insert(
            field.name.as_str(),
            formula.references().map(str::to_string).collect(),
        );
    }

    let mut done = BTreeSet::new();
    for start in graph.keys().copied() {
        let mut chain = Vec::new();
        walk(start, &graph, &mut chain, &mut done)?;
    }
    Ok(())
}

fn walk(
    name: &str,
    graph: &BTreeMap<&str, Vec<String>>,
    chain: &mut Vec<String>,
    done: &mut BTreeSet<String>,
) -> Result<(), SchemaError> {
    if done.contains(name) {
        return Ok(());
    }
    if chain.iter().any(|seen| seen == name) {
        let start = chain.iter().position(|seen| seen == name).unwrap_or(0);
        let mut cycle = chain[start..].to_vec();
        cycle.push(name.to_string());
        return Err(SchemaError::CalculationCycle { chain: cycle });
    }
    // References to non-calculated fields terminate the walk.
    let Some(references) = graph.get(name) else {
        return Ok(());
    };
    chain.push(name.to_string());
    for reference in references {
        walk(reference, graph, chain, done)?;
    }
    chain.pop();
    done.insert(name.to_string());
    Ok(())
}
