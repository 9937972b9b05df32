use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::condition::{numeric_value, value_text};
use super::schema::{FieldSchema, FieldType, FileConstraints};

/// `Ok` or the first failing rule's message.
pub type ValidationResult = Result<(), String>;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

const INVALID_EMAIL: &str = "Please enter a valid email address";
const INVALID_NUMBER: &str = "Please enter a valid number";

/// Check a candidate value against a field's constraints. Total: never panics.
pub fn validate(field: &FieldSchema, value: Option<&Value>) -> ValidationResult {
    if field.field_type.is_layout() {
        return Ok(());
    }

    if is_blank(value) {
        if field.is_required {
            return Err(field
                .validations
                .custom_message
                .clone()
                .unwrap_or_else(|| format!("{} is required", field.label)));
        }
        return Ok(());
    }

    let Some(value) = value else {
        return Ok(());
    };

    check_format(field, value)?;
    check_length(field, value)?;
    check_range(field, value)?;
    check_pattern(field, value)?;
    Ok(())
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn check_format(field: &FieldSchema, value: &Value) -> ValidationResult {
    match field.field_type {
        FieldType::Email => {
            if EMAIL_RE.is_match(&value_text(value)) {
                Ok(())
            } else {
                Err(INVALID_EMAIL.to_string())
            }
        }
        FieldType::Number => numeric_value(value)
            .map(|_| ())
            .ok_or_else(|| INVALID_NUMBER.to_string()),
        FieldType::File => match &field.validations.file {
            Some(constraints) => check_files(constraints, value),
            None => Ok(()),
        },
        FieldType::Text
        | FieldType::Textarea
        | FieldType::Phone
        | FieldType::Url
        | FieldType::Password
        | FieldType::Select
        | FieldType::MultiSelect
        | FieldType::Radio
        | FieldType::Checkbox
        | FieldType::CheckboxGroup
        | FieldType::Rating
        | FieldType::Scale
        | FieldType::Date
        | FieldType::Time
        | FieldType::DateTime
        | FieldType::DateRange
        | FieldType::Signature
        | FieldType::Address
        | FieldType::FullName
        | FieldType::StudentDetails
        | FieldType::ParentGuardian
        | FieldType::EmergencyContact
        | FieldType::MedicalInfo
        | FieldType::PreviousSchool
        | FieldType::SectionBreak
        | FieldType::PageBreak
        | FieldType::Heading
        | FieldType::Paragraph
        | FieldType::Divider
        | FieldType::Hidden => Ok(()),
    }
}

fn check_length(field: &FieldSchema, value: &Value) -> ValidationResult {
    let length = value_text(value).chars().count();
    if let Some(min) = field.validations.min_length {
        if length < min {
            return Err(format!("Must be at least {min} characters"));
        }
    }
    if let Some(max) = field.validations.max_length {
        if length > max {
            return Err(format!("Must be at most {max} characters"));
        }
    }
    Ok(())
}

fn check_range(field: &FieldSchema, value: &Value) -> ValidationResult {
    let (min, max) = (field.validations.min, field.validations.max);
    if min.is_none() && max.is_none() {
        return Ok(());
    }

    let Some(number) = numeric_value(value) else {
        return Err(INVALID_NUMBER.to_string());
    };
    if let Some(min) = min {
        if number < min {
            return Err(format!("Must be at least {}", display_number(min)));
        }
    }
    if let Some(max) = max {
        if number > max {
            return Err(format!("Must be at most {}", display_number(max)));
        }
    }
    Ok(())
}

fn check_pattern(field: &FieldSchema, value: &Value) -> ValidationResult {
    let Some(pattern) = field.validations.pattern.as_deref() else {
        return Ok(());
    };
    // A pattern that does not compile never blocks a submission.
    let Ok(regex) = Regex::new(pattern) else {
        return Ok(());
    };
    if regex.is_match(&value_text(value)) {
        return Ok(());
    }
    Err(field
        .validations
        .pattern_message
        .clone()
        .or_else(|| field.validations.custom_message.clone())
        .unwrap_or_else(|| "Invalid format".to_string()))
}

fn check_files(constraints: &FileConstraints, value: &Value) -> ValidationResult {
    let files: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    if let Some(max_files) = constraints.max_files {
        if files.len() > max_files as usize {
            return Err(format!("At most {max_files} file(s) may be uploaded"));
        }
    }

    for file in files {
        let name = file
            .get("name")
            .map(value_text)
            .unwrap_or_else(|| "file".to_string());

        if let (Some(limit), Some(size)) = (
            constraints.max_size_mb,
            file.get("size").and_then(numeric_value),
        ) {
            if size > limit * 1024.0 * 1024.0 {
                return Err(format!(
                    "{name} exceeds the {} MB limit",
                    display_number(limit)
                ));
            }
        }

        if !constraints.allowed_types.is_empty() {
            let mime = file.get("type").map(value_text).unwrap_or_default();
            let allowed = constraints
                .allowed_types
                .iter()
                .any(|allowed| type_matches(allowed, &mime, &name));
            if !allowed {
                return Err(format!("{name} is not an accepted file type"));
            }
        }
    }
    Ok(())
}

fn type_matches(allowed: &str, mime: &str, name: &str) -> bool {
    if let Some(extension) = allowed.strip_prefix('.') {
        return name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension));
    }
    if let Some(family) = allowed.strip_suffix("/*") {
        return mime
            .split_once('/')
            .is_some_and(|(head, _)| head.eq_ignore_ascii_case(family));
    }
    allowed.eq_ignore_ascii_case(mime)
}

/// Integral bounds render without a trailing `.0`.
pub(crate) fn display_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::schema::FieldValidations;
    use serde_json::json;

    fn number_field(min: Option<f64>, max: Option<f64>) -> FieldSchema {
        FieldSchema::new("age", "Age", FieldType::Number)
            .required()
            .with_validations(FieldValidations {
                min,
                max,
                ..FieldValidations::default()
            })
    }

    #[test]
    fn required_reports_label_or_custom_message() {
        let field = FieldSchema::new("name", "Student name", FieldType::Text).required();
        assert_eq!(
            validate(&field, None),
            Err("Student name is required".to_string())
        );
        assert_eq!(
            validate(&field, Some(&json!(""))),
            Err("Student name is required".to_string())
        );

        let mut custom = field.clone();
        custom.validations.custom_message = Some("Tell us who is enrolling".to_string());
        assert_eq!(
            validate(&custom, Some(&json!([]))),
            Err("Tell us who is enrolling".to_string())
        );
    }

    #[test]
    fn optional_blank_values_pass() {
        let field = number_field(Some(5.0), None);
        let optional = FieldSchema {
            is_required: false,
            ..field
        };
        assert_eq!(validate(&optional, None), Ok(()));
        assert_eq!(validate(&optional, Some(&Value::Null)), Ok(()));
    }

    #[test]
    fn numeric_bounds_use_plain_numbers_in_messages() {
        let field = number_field(Some(5.0), Some(18.0));
        assert_eq!(
            validate(&field, Some(&json!(3))),
            Err("Must be at least 5".to_string())
        );
        assert_eq!(
            validate(&field, Some(&json!("19"))),
            Err("Must be at most 18".to_string())
        );
        assert_eq!(validate(&field, Some(&json!(10))), Ok(()));
    }

    #[test]
    fn non_finite_numbers_fail_the_format_check() {
        let field = number_field(Some(5.0), None);
        for raw in ["NaN", "inf", "twelve"] {
            assert_eq!(
                validate(&field, Some(&json!(raw))),
                Err(INVALID_NUMBER.to_string()),
                "{raw}"
            );
        }

        let text = FieldSchema::new("code", "Code", FieldType::Text).with_validations(
            FieldValidations {
                min: Some(1.0),
                ..FieldValidations::default()
            },
        );
        assert_eq!(
            validate(&text, Some(&json!("abc"))),
            Err(INVALID_NUMBER.to_string())
        );
    }

    #[test]
    fn email_format_is_checked() {
        let field = FieldSchema::new("email", "Email", FieldType::Email);
        assert_eq!(validate(&field, Some(&json!("parent@school.edu"))), Ok(()));
        assert_eq!(
            validate(&field, Some(&json!("parent@school"))),
            Err(INVALID_EMAIL.to_string())
        );
    }

    #[test]
    fn length_bounds_count_characters() {
        let field = FieldSchema::new("motto", "Motto", FieldType::Text).with_validations(
            FieldValidations {
                min_length: Some(3),
                max_length: Some(5),
                ..FieldValidations::default()
            },
        );
        assert_eq!(
            validate(&field, Some(&json!("ab"))),
            Err("Must be at least 3 characters".to_string())
        );
        assert_eq!(
            validate(&field, Some(&json!("abcdef"))),
            Err("Must be at most 5 characters".to_string())
        );
        assert_eq!(validate(&field, Some(&json!("éàü"))), Ok(()));
    }

    #[test]
    fn invalid_pattern_never_blocks() {
        let mut field = FieldSchema::new("code", "Code", FieldType::Text);
        field.validations.pattern = Some("(".to_string());
        assert_eq!(validate(&field, Some(&json!("anything"))), Ok(()));

        field.validations.pattern = Some(r"^[A-Z]{3}-\d{2}$".to_string());
        field.validations.pattern_message = Some("Use the ABC-12 format".to_string());
        assert_eq!(validate(&field, Some(&json!("ABC-12"))), Ok(()));
        assert_eq!(
            validate(&field, Some(&json!("abc"))),
            Err("Use the ABC-12 format".to_string())
        );
    }

    #[test]
    fn first_failing_rule_wins() {
        let field = FieldSchema::new("email", "Email", FieldType::Email).with_validations(
            FieldValidations {
                max_length: Some(3),
                ..FieldValidations::default()
            },
        );
        assert_eq!(
            validate(&field, Some(&json!("not-an-email"))),
            Err(INVALID_EMAIL.to_string())
        );
    }

    #[test]
    fn layout_fields_are_never_validated() {
        let heading = FieldSchema::new("intro", "Intro", FieldType::Heading).required();
        assert_eq!(validate(&heading, None), Ok(()));
    }

    #[test]
    fn file_constraints_apply_to_descriptors() {
        let mut field = FieldSchema::new("transcript", "Transcript", FieldType::File);
        field.validations.file = Some(FileConstraints {
            max_files: Some(1),
            max_size_mb: Some(2.0),
            allowed_types: vec![".pdf".to_string(), "image/*".to_string()],
        });

        let ok = json!([{ "name": "report.PDF", "size": 1024, "type": "application/pdf" }]);
        assert_eq!(validate(&field, Some(&ok)), Ok(()));

        let scan = json!([{ "name": "scan", "size": 10, "type": "image/png" }]);
        assert_eq!(validate(&field, Some(&scan)), Ok(()));

        let too_big = json!([{ "name": "big.pdf", "size": 5_000_000, "type": "application/pdf" }]);
        assert_eq!(
            validate(&field, Some(&too_big)),
            Err("big.pdf exceeds the 2 MB limit".to_string())
        );

        let wrong = json!([{ "name": "notes.docx", "size": 10, "type": "application/msword" }]);
        assert!(validate(&field, Some(&wrong)).is_err());

        let many = json!([{ "name": "a.pdf" }, { "name": "b.pdf" }]);
        assert_eq!(
            validate(&field, Some(&many)),
            Err("At most 1 file(s) may be uploaded".to_string())
        );
    }
}
