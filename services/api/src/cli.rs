use crate::server;
use clap::{Args, Parser, Subcommand};
use formflow::error::AppError;
use formflow::forms::{
    first_invalid_step, step_count, step_label, validate_step, visible_fields, FormData,
    FormSchema, RuleWarning, StepFailure, StepValidation,
};
use formflow::submissions::SubmissionServiceError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "formflow",
    about = "Serve the form workflow API or check form definitions from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run publish checks on a form definition and list rule warnings
    Lint(LintArgs),
    /// Evaluate a data document against a form, step by step
    Check(CheckArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct LintArgs {
    /// Path to the form definition (JSON)
    #[arg(long)]
    pub(crate) form: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    /// Path to the form definition (JSON)
    #[arg(long)]
    pub(crate) form: PathBuf,
    /// Path to the submission data (JSON object keyed by field name)
    #[arg(long)]
    pub(crate) data: PathBuf,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Lint(args) => {
            let report = lint_report(&load_form(&args.form)?)?;
            print_json(&report)
        }
        Command::Check(args) => {
            let form = load_form(&args.form)?;
            let data: FormData = serde_json::from_str(&fs::read_to_string(&args.data)?)?;
            print_json(&check_report(&form, &data))
        }
    }
}

fn load_form(path: &Path) -> Result<FormSchema, AppError> {
    let raw = fs::read_to_string(path)?;
    let form: FormSchema = serde_json::from_str(&raw)?;
    Ok(form.normalized())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LintReport {
    pub(crate) form_id: String,
    pub(crate) fields: usize,
    pub(crate) steps: u32,
    pub(crate) warnings: Vec<RuleWarning>,
}

pub(crate) fn lint_report(form: &FormSchema) -> Result<LintReport, AppError> {
    form.check_publishable()
        .map_err(SubmissionServiceError::from)?;
    Ok(LintReport {
        form_id: form.id.0.clone(),
        fields: form.fields.len(),
        steps: step_count(form),
        warnings: form.lint(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StepReport {
    pub(crate) step: u32,
    pub(crate) label: String,
    pub(crate) visible_fields: Vec<String>,
    pub(crate) validation: StepValidation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckReport {
    pub(crate) data: FormData,
    pub(crate) steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) first_invalid_step: Option<StepFailure>,
}

pub(crate) fn check_report(form: &FormSchema, data: &FormData) -> CheckReport {
    let data = form.apply_logic(data);
    let steps = (1..=step_count(form))
        .map(|step| StepReport {
            step,
            label: step_label(form, step),
            visible_fields: visible_fields(form, step, &data)
                .into_iter()
                .map(|field| field.name.clone())
                .collect(),
            validation: validate_step(form, step, &data),
        })
        .collect();

    CheckReport {
        first_invalid_step: first_invalid_step(form, &data),
        steps,
        data,
    }
}
