//! Form definitions and the pure evaluation engine behind them: field validation, conditional
//! visibility, prefill rules, and step navigation.

pub mod condition;
pub mod logic;
pub mod schema;
pub mod steps;
pub mod validation;

pub use condition::{evaluate, is_empty, Condition, ConditionOperator, FormData};
pub use logic::{apply_rules, ConditionLogic, LogicRule, RuleAction, RuleType};
pub use schema::{
    ApprovalStep, ChoiceOption, EscalationRule, FieldFamily, FieldOptions, FieldSchema,
    FieldType, FieldValidations, FieldWidth, FileConstraints, FormId, FormSchema,
    LockedFieldEdit, RuleWarning, SchemaViolation, SubmissionSettings, MAX_ESCALATION_HOURS,
};
pub use steps::{
    fields_for_step, first_invalid_step, is_visible, step_count, step_label, validate_step,
    visible_fields, StepFailure, StepValidation,
};
pub use validation::{validate, ValidationResult};
