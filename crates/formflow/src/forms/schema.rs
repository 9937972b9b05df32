use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, ConditionOperator, FormData};
use super::logic::{apply_rules_with, LogicRule};

/// Stable identifier of a form definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormId(pub String);

/// Closed set of field types a form may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Url,
    Password,
    Select,
    MultiSelect,
    Radio,
    Checkbox,
    CheckboxGroup,
    Rating,
    Scale,
    Date,
    Time,
    DateTime,
    DateRange,
    File,
    Signature,
    Address,
    FullName,
    StudentDetails,
    ParentGuardian,
    EmergencyContact,
    MedicalInfo,
    PreviousSchool,
    SectionBreak,
    PageBreak,
    Heading,
    Paragraph,
    Divider,
    Hidden,
}

/// Coarse grouping used by publish checks and exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFamily {
    Text,
    Choice,
    DateTime,
    Upload,
    Structured,
    Layout,
}

impl FieldType {
    pub const fn family(self) -> FieldFamily {
        match self {
            Self::Text
            | Self::Textarea
            | Self::Email
            | Self::Phone
            | Self::Number
            | Self::Url
            | Self::Password => FieldFamily::Text,
            Self::Select
            | Self::MultiSelect
            | Self::Radio
            | Self::Checkbox
            | Self::CheckboxGroup
            | Self::Rating
            | Self::Scale => FieldFamily::Choice,
            Self::Date | Self::Time | Self::DateTime | Self::DateRange => FieldFamily::DateTime,
            Self::File | Self::Signature => FieldFamily::Upload,
            Self::Address
            | Self::FullName
            | Self::StudentDetails
            | Self::ParentGuardian
            | Self::EmergencyContact
            | Self::MedicalInfo
            | Self::PreviousSchool => FieldFamily::Structured,
            Self::SectionBreak
            | Self::PageBreak
            | Self::Heading
            | Self::Paragraph
            | Self::Divider
            | Self::Hidden => FieldFamily::Layout,
        }
    }

    /// Layout markers collect no data: never required, validated, or exported.
    pub const fn is_layout(self) -> bool {
        matches!(self.family(), FieldFamily::Layout)
    }
}

/// Rendering width hint. Carries no behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldWidth {
    #[default]
    Full,
    Half,
    Third,
    Quarter,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_types: Vec<String>,
}

/// Optional bounds checked by the validation engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileConstraints>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    pub value: String,
}

/// Per-type configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldOptions {
    Choices {
        choices: Vec<ChoiceOption>,
        #[serde(default)]
        allow_other: bool,
    },
    Rating {
        max: u8,
    },
    Scale {
        min: i32,
        max: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_label: Option<String>,
    },
    Structured {
        #[serde(rename = "subFields")]
        sub_fields: Vec<String>,
    },
    Content {
        text: String,
    },
}

impl FieldOptions {
    pub fn fits(&self, field_type: FieldType) -> bool {
        match self {
            Self::Choices { .. } => matches!(
                field_type,
                FieldType::Select
                    | FieldType::MultiSelect
                    | FieldType::Radio
                    | FieldType::Checkbox
                    | FieldType::CheckboxGroup
            ),
            Self::Rating { .. } => field_type == FieldType::Rating,
            Self::Scale { .. } => field_type == FieldType::Scale,
            Self::Structured { .. } => field_type.family() == FieldFamily::Structured,
            Self::Content { .. } => field_type.is_layout(),
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Choices { .. } => "choices",
            Self::Rating { .. } => "rating",
            Self::Scale { .. } => "scale",
            Self::Structured { .. } => "structured",
            Self::Content { .. } => "content",
        }
    }
}

/// Static description of one form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub validations: FieldValidations,
    #[serde(default)]
    pub width: FieldWidth,
    #[serde(default = "first_step")]
    pub step: u32,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_on: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FieldOptions>,
    #[serde(default)]
    pub is_locked: bool,
}

fn first_step() -> u32 {
    1
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            id: format!("fld-{name}"),
            name,
            label: label.into(),
            field_type,
            is_required: false,
            validations: FieldValidations::default(),
            width: FieldWidth::default(),
            step: 1,
            sort_order: 0,
            is_hidden: false,
            conditional_on: None,
            options: None,
            is_locked: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn on_step(mut self, step: u32, sort_order: i32) -> Self {
        self.step = step;
        self.sort_order = sort_order;
        self
    }

    pub fn with_validations(mut self, validations: FieldValidations) -> Self {
        self.validations = validations;
        self
    }

    pub fn shown_when(mut self, condition: Condition) -> Self {
        self.conditional_on = Some(condition);
        self
    }
}

/// Time-based handoff for an approval step that sits undecided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRule {
    pub after_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to_id: Option<String>,
}

impl EscalationRule {
    pub fn target(&self) -> Option<String> {
        self.escalate_to_id
            .clone()
            .or_else(|| self.escalate_to_role.clone())
    }
}

/// One sign-off in the approval chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStep {
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_id: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRule>,
}

impl ApprovalStep {
    pub fn for_role(step: u32, role: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            step,
            approver_role: Some(role.into()),
            approver_id: None,
            label: label.into(),
            escalation: None,
        }
    }

    /// A specific approver wins over a role.
    pub fn approver(&self) -> Option<String> {
        self.approver_id
            .clone()
            .or_else(|| self.approver_role.clone())
    }
}

/// Availability window and ceiling enforced before a submission is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSettings {
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opens_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_submissions: Option<u32>,
}

fn active_by_default() -> bool {
    true
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            is_active: true,
            opens_at: None,
            closes_at: None,
            max_submissions: None,
        }
    }
}

/// Published form definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    pub id: FormId,
    #[serde(default)]
    pub title: String,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub logic_rules: Vec<LogicRule>,
    #[serde(default)]
    pub is_multi_step: bool,
    #[serde(default)]
    pub step_labels: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_chain: Vec<ApprovalStep>,
    #[serde(default)]
    pub settings: SubmissionSettings,
}

/// Malformed or inconsistent schema, rejected at publish time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("field name '{name}' is used more than once")]
    DuplicateFieldName { name: String },
    #[error("fields '{first}' and '{second}' share sort order {sort_order} on step {step}")]
    DuplicateSortOrder {
        step: u32,
        sort_order: i32,
        first: String,
        second: String,
    },
    #[error("field '{name}' is placed on step {step}; steps start at 1")]
    StepOutOfRange { name: String, step: u32 },
    #[error("single-step form places field '{name}' on step {step}")]
    SingleStepMismatch { name: String, step: u32 },
    #[error("approval chain steps must run 1..={expected_len} without gaps, found {found:?}")]
    NonContiguousApprovalChain { expected_len: usize, found: Vec<u32> },
    #[error("field '{name}' of type {field_type:?} cannot carry '{kind}' options")]
    OptionsMismatch {
        name: String,
        field_type: FieldType,
        kind: &'static str,
    },
    #[error("form closes before it opens")]
    InvertedWindow,
    #[error("approval step {step} escalates after {after_hours} hours, past the {} hour limit", MAX_ESCALATION_HOURS)]
    EscalationOutOfRange { step: u32, after_hours: u32 },
}

/// Upper bound on `EscalationRule::after_hours`, ten years.
pub const MAX_ESCALATION_HOURS: u32 = 24 * 365 * 10;

/// A locked field was edited or removed after submissions started referencing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field}' is locked because submissions reference it")]
pub struct LockedFieldEdit {
    pub field: String,
}

/// Non-fatal problem in a conditional rule that the engine will degrade around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleWarning {
    InvalidPattern { field: String, pattern: String },
    UnknownOperator { location: String },
    DanglingReference { location: String, reference: String },
    DuplicateLabel { label: String, fields: Vec<String> },
}

impl FormSchema {
    pub fn field_by_name(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_id(&self, id: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn needs_review(&self) -> bool {
        self.requires_approval && !self.approval_chain.is_empty()
    }

    pub fn approval_step(&self, step: u32) -> Option<&ApprovalStep> {
        self.approval_chain.iter().find(|entry| entry.step == step)
    }

    /// True when a condition points at a field that still exists.
    pub fn resolves(&self, condition: &Condition) -> bool {
        self.field_by_name(&condition.field).is_some()
    }

    /// Fields that produce data, in step then sort order.
    pub fn data_fields(&self) -> Vec<&FieldSchema> {
        let mut fields: Vec<&FieldSchema> = self
            .fields
            .iter()
            .filter(|field| !field.field_type.is_layout())
            .collect();
        fields.sort_by_key(|field| (field.step, field.sort_order));
        fields
    }

    /// Run the form's logic rules, ignoring conditions on fields that no longer exist.
    pub fn apply_logic(&self, values: &FormData) -> FormData {
        apply_rules_with(&self.logic_rules, values, |condition| self.resolves(condition))
    }

    pub fn check_publishable(&self) -> Result<(), SchemaViolation> {
        let mut names = BTreeSet::new();
        let mut slots: BTreeMap<(u32, i32), &str> = BTreeMap::new();

        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaViolation::DuplicateFieldName {
                    name: field.name.clone(),
                });
            }
            if field.step < 1 {
                return Err(SchemaViolation::StepOutOfRange {
                    name: field.name.clone(),
                    step: field.step,
                });
            }
            if !self.is_multi_step && field.step != 1 {
                return Err(SchemaViolation::SingleStepMismatch {
                    name: field.name.clone(),
                    step: field.step,
                });
            }
            if let Some(first) = slots.insert((field.step, field.sort_order), &field.name) {
                return Err(SchemaViolation::DuplicateSortOrder {
                    step: field.step,
                    sort_order: field.sort_order,
                    first: first.to_string(),
                    second: field.name.clone(),
                });
            }
            if let Some(options) = &field.options {
                if !options.fits(field.field_type) {
                    return Err(SchemaViolation::OptionsMismatch {
                        name: field.name.clone(),
                        field_type: field.field_type,
                        kind: options.kind(),
                    });
                }
            }
        }

        let mut steps: Vec<u32> = self.approval_chain.iter().map(|entry| entry.step).collect();
        steps.sort_unstable();
        let contiguous = steps
            .iter()
            .enumerate()
            .all(|(index, step)| *step as usize == index + 1);
        if !contiguous {
            return Err(SchemaViolation::NonContiguousApprovalChain {
                expected_len: steps.len(),
                found: steps,
            });
        }

        for entry in &self.approval_chain {
            if let Some(rule) = &entry.escalation {
                if rule.after_hours > MAX_ESCALATION_HOURS {
                    return Err(SchemaViolation::EscalationOutOfRange {
                        step: entry.step,
                        after_hours: rule.after_hours,
                    });
                }
            }
        }

        if let (Some(opens), Some(closes)) = (self.settings.opens_at, self.settings.closes_at) {
            if closes < opens {
                return Err(SchemaViolation::InvertedWindow);
            }
        }

        Ok(())
    }

    /// Rewrite id-keyed condition references to field names and order the approval chain.
    pub fn normalized(mut self) -> Self {
        let id_to_name: BTreeMap<String, String> = self
            .fields
            .iter()
            .map(|field| (field.id.clone(), field.name.clone()))
            .collect();
        let names: BTreeSet<String> = self.fields.iter().map(|f| f.name.clone()).collect();

        let canonical = |condition: &mut Condition| {
            if names.contains(&condition.field) {
                return;
            }
            if let Some(name) = id_to_name.get(&condition.field) {
                condition.field = name.clone();
            }
        };

        for field in &mut self.fields {
            if let Some(condition) = field.conditional_on.as_mut() {
                canonical(condition);
            }
        }
        for rule in &mut self.logic_rules {
            rule.conditions.iter_mut().for_each(&canonical);
        }

        self.approval_chain.sort_by_key(|entry| entry.step);
        self
    }

    pub fn lint(&self) -> Vec<RuleWarning> {
        let mut warnings = Vec::new();

        let mut inspect = |location: String, condition: &Condition| {
            if condition.operator == ConditionOperator::Unknown {
                warnings.push(RuleWarning::UnknownOperator {
                    location: location.clone(),
                });
            }
            if !self.resolves(condition) {
                warnings.push(RuleWarning::DanglingReference {
                    location,
                    reference: condition.field.clone(),
                });
            }
        };

        for field in &self.fields {
            if let Some(condition) = &field.conditional_on {
                inspect(format!("field '{}'", field.name), condition);
            }
        }
        for rule in &self.logic_rules {
            for condition in &rule.conditions {
                inspect(format!("rule '{}'", rule.id), condition);
            }
        }

        let mut labels: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for field in self.data_fields() {
            labels
                .entry(field.label.as_str())
                .or_default()
                .push(field.name.clone());
        }
        warnings.extend(
            labels
                .into_iter()
                .filter(|(_, fields)| fields.len() > 1)
                .map(|(label, fields)| RuleWarning::DuplicateLabel {
                    label: label.to_string(),
                    fields,
                }),
        );

        for field in &self.fields {
            if let Some(pattern) = &field.validations.pattern {
                if Regex::new(pattern).is_err() {
                    warnings.push(RuleWarning::InvalidPattern {
                        field: field.name.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }
        }

        warnings
    }

    /// Locked fields may not be edited or removed once submissions exist.
    pub fn check_locked_edits(
        previous: &FormSchema,
        next: &FormSchema,
    ) -> Result<(), LockedFieldEdit> {
        for locked in previous.fields.iter().filter(|field| field.is_locked) {
            match next.field_by_id(&locked.id) {
                Some(candidate) if candidate == locked => {}
                _ => {
                    return Err(LockedFieldEdit {
                        field: locked.name.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}
