use std::collections::BTreeMap;

use serde::Serialize;

use super::condition::{evaluate, ConditionOperator, FormData};
use super::schema::{FieldSchema, FormSchema};
use super::validation::validate;

/// Outcome of validating one step: per-field messages keyed by field name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StepValidation {
    pub ok: bool,
    pub errors: BTreeMap<String, String>,
}

/// First step that failed validation during a full-form check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step: u32,
    pub errors: BTreeMap<String, String>,
}

/// Fields placed on `step`, ordered by `sort_order`.
pub fn fields_for_step(schema: &FormSchema, step: u32) -> Vec<&FieldSchema> {
    let mut fields: Vec<&FieldSchema> = schema
        .fields
        .iter()
        .filter(|field| field.step == step)
        .collect();
    fields.sort_by_key(|field| field.sort_order);
    fields
}

pub fn step_count(schema: &FormSchema) -> u32 {
    schema
        .fields
        .iter()
        .map(|field| field.step)
        .max()
        .unwrap_or(1)
        .max(1)
}

pub fn step_label(schema: &FormSchema, step: u32) -> String {
    step.checked_sub(1)
        .and_then(|index| schema.step_labels.get(index as usize))
        .cloned()
        .unwrap_or_else(|| format!("Step {step}"))
}

/// Conditional fields follow their condition; others follow `is_hidden`.
pub fn is_visible(schema: &FormSchema, field: &FieldSchema, values: &FormData) -> bool {
    match &field.conditional_on {
        Some(condition) if condition.operator == ConditionOperator::Unknown => true,
        Some(condition) => schema.resolves(condition) && evaluate(condition, values),
        None => !field.is_hidden,
    }
}

pub fn visible_fields<'a>(
    schema: &'a FormSchema,
    step: u32,
    values: &FormData,
) -> Vec<&'a FieldSchema> {
    fields_for_step(schema, step)
        .into_iter()
        .filter(|field| is_visible(schema, field, values))
        .collect()
}

/// Validate the visible data fields of one step. Hidden fields are exempt even when required.
pub fn validate_step(schema: &FormSchema, step: u32, values: &FormData) -> StepValidation {
    let errors: BTreeMap<String, String> = visible_fields(schema, step, values)
        .into_iter()
        .filter(|field| !field.field_type.is_layout())
        .filter_map(|field| {
            validate(field, values.get(&field.name))
                .err()
                .map(|message| (field.name.clone(), message))
        })
        .collect();

    StepValidation {
        ok: errors.is_empty(),
        errors,
    }
}

/// Walk every step in order and report the first that does not validate.
pub fn first_invalid_step(schema: &FormSchema, values: &FormData) -> Option<StepFailure> {
    (1..=step_count(schema)).find_map(|step| {
        let outcome = validate_step(schema, step, values);
        (!outcome.ok).then_some(StepFailure {
            step,
            errors: outcome.errors,
        })
    })
}
