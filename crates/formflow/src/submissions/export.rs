use std::io;

use serde::Serialize;
use serde_json::Value;

use super::domain::Submission;
use crate::forms::FormSchema;

const FIXED_HEADERS: [&str; 3] = ["Submission ID", "Status", "Submitted At"];

/// Flat rows, one column per data field keyed by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn export_table(form: &FormSchema, submissions: &[Submission]) -> ExportTable {
    let fields = form.data_fields();

    let headers = FIXED_HEADERS
        .iter()
        .map(|header| header.to_string())
        .chain(fields.iter().map(|field| field.label.clone()))
        .collect();

    let rows = submissions
        .iter()
        .map(|submission| {
            let mut row = vec![
                submission.id.0.clone(),
                submission.status.label().to_string(),
                submission
                    .submitted_at()
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            ];
            row.extend(
                fields
                    .iter()
                    .map(|field| cell(submission.data.get(&field.name))),
            );
            row
        })
        .collect();

    ExportTable { headers, rows }
}

/// Structured values are JSON-stringified into a single cell.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(structured @ (Value::Array(_) | Value::Object(_))) => structured.to_string(),
    }
}

pub fn write_csv<W: io::Write>(table: &ExportTable, writer: W) -> Result<(), csv::Error> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&table.headers)?;
    for row in &table.rows {
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FieldSchema, FieldType, FormData, FormId, SubmissionSettings};
    use crate::submissions::domain::{StatusChange, SubmissionId, SubmissionStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn form() -> FormSchema {
        FormSchema {
            id: FormId("export".to_string()),
            title: "Enrollment".to_string(),
            fields: vec![
                FieldSchema::new("intro", "Welcome", FieldType::Heading).on_step(1, 0),
                FieldSchema::new("address", "Home address", FieldType::Address).on_step(1, 2),
                FieldSchema::new("name", "Student name", FieldType::Text).on_step(1, 1),
                FieldSchema::new("clubs", "Clubs", FieldType::MultiSelect).on_step(1, 3),
            ],
            logic_rules: Vec::new(),
            is_multi_step: false,
            step_labels: Vec::new(),
            requires_approval: false,
            approval_chain: Vec::new(),
            settings: SubmissionSettings::default(),
        }
    }

    fn submission(data: FormData) -> Submission {
        let at = Utc.with_ymd_and_hms(2025, 9, 1, 8, 30, 0).unwrap();
        Submission {
            id: SubmissionId("sub-1".to_string()),
            form_id: FormId("export".to_string()),
            data,
            status: SubmissionStatus::Submitted,
            status_history: vec![StatusChange {
                status: SubmissionStatus::Submitted,
                at,
                by: None,
            }],
            approval_step: 0,
            current_approver: None,
            completion_time: Some(95),
            step_reached: 1,
            created_at: at,
            updated_at: at,
            version: 1,
        }
    }

    #[test]
    fn skips_layout_fields_and_orders_by_sort_order() {
        let table = export_table(&form(), &[]);
        assert_eq!(
            table.headers,
            vec![
                "Submission ID",
                "Status",
                "Submitted At",
                "Student name",
                "Home address",
                "Clubs"
            ]
        );
        assert!(table.rows.is_empty());
    }

    #[test]
    fn structured_values_become_json_cells() {
        let mut data = FormData::new();
        data.insert("name".to_string(), json!("Ada"));
        data.insert(
            "address".to_string(),
            json!({ "street": "1 Elm", "city": "Ames", "state": "IA", "zip": "50010", "country": "US" }),
        );
        data.insert("clubs".to_string(), json!(["chess", "robotics"]));

        let table = export_table(&form(), &[submission(data)]);
        let row = &table.rows[0];
        assert_eq!(row[0], "sub-1");
        assert_eq!(row[1], "submitted");
        assert_eq!(row[2], "2025-09-01T08:30:00+00:00");
        assert_eq!(row[3], "Ada");
        assert!(row[4].starts_with('{') && row[4].contains("\"city\":\"Ames\""));
        assert_eq!(row[5], r#"["chess","robotics"]"#);

        let mut buffer = Vec::new();
        write_csv(&table, &mut buffer).expect("csv written");
        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.starts_with("Submission ID,Status,Submitted At,Student name"));
        assert_eq!(text.lines().count(), 2);
    }
}
