//! formguard CLI - run form validation rules from a YAML rules file
//!
//! Binds a request, runs a form's pipeline and prints the result as JSON.
//! Queries go through an offline executor, so `duplicate_check` rules abort;
//! the CLI is meant for checking rule files and templates, not production use.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use tracing_subscriber::EnvFilter;

use formguard::ambient::AmbientState;
use formguard::query::OfflineExecutor;
use formguard::record::FieldType;
use formguard::rule_registry::RuleRegistry;
use formguard::rules::RuleContext;
use formguard::runtime::{
    bind_request, params_from_json, record_from_json, RulesConfig, Settings, ValidationPipeline,
};
use formguard::sql_template::{Dialect, DirectoryTemplates, SqlTemplateEngine};

/// Environment variable overriding the configured SQL dialect
const DIALECT_ENV: &str = "FORMGUARD_DIALECT";

#[derive(Parser)]
#[command(name = "formguard")]
#[command(version, about = "Declarative form validation with type-directed SQL templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a request against a form's rules
    Check {
        /// Path to the rules file
        #[arg(short, long, default_value = "rules.yaml")]
        config: PathBuf,

        /// Form to validate
        #[arg(short, long)]
        form: String,

        /// Request parameters as a JSON object, or @file
        #[arg(short, long)]
        request: String,

        /// Date treated as today (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,

        /// SQL dialect (postgres, mysql, sqlserver) - overrides config file
        #[arg(short, long)]
        dialect: Option<String>,
    },

    /// Render a SQL template against a record
    Render {
        /// Template file
        #[arg(short, long)]
        template: PathBuf,

        /// Record as a JSON object, or @file
        #[arg(short, long)]
        record: String,

        /// Field types for string values, e.g. start=date,qty=integer
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,

        /// SQL dialect (postgres, mysql, sqlserver)
        #[arg(short, long)]
        dialect: Option<String>,
    },

    /// List registered rule tags
    Rules,

    /// Check a rules file: every rule configures, ordering, declared fields
    Lint {
        /// Path to the rules file
        #[arg(short, long, default_value = "rules.yaml")]
        config: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formguard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Determine the SQL dialect with precedence: CLI > ENV > config file > default
fn resolve_dialect(cli_override: Option<&str>, settings: &Settings) -> Result<Dialect, String> {
    if let Some(name) = cli_override {
        return name.parse();
    }

    if let Ok(name) = std::env::var(DIALECT_ENV) {
        if !name.trim().is_empty() {
            tracing::info!(dialect = %name, "Using dialect from {}", DIALECT_ENV);
            return name.parse();
        }
    }

    settings.dialect()
}

/// Parse a JSON argument given inline or as `@path`.
fn read_json_arg(arg: &str) -> Result<JsonValue, String> {
    let text = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON: {}", e))
}

fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { config, form, request, today, dialect } => {
            check(&config, &form, &request, today, dialect.as_deref())
        }
        Commands::Render { template, record, types, dialect } => {
            render(&template, &record, &types, dialect.as_deref())
        }
        Commands::Rules => {
            for tag in RuleRegistry::builtin().tags() {
                println!("{}", tag);
            }
            Ok(true)
        }
        Commands::Lint { config } => lint(&config),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}

/// Bind and validate one request. Returns whether it passed.
fn check(
    config_path: &Path,
    form_name: &str,
    request: &str,
    today: Option<NaiveDate>,
    dialect: Option<&str>,
) -> Result<bool, String> {
    let config = RulesConfig::load_from_file(config_path)?;
    let form = config
        .form(form_name)
        .ok_or_else(|| format!("Form '{}' not found in {}", form_name, config_path.display()))?;
    let dialect = resolve_dialect(dialect, &config.settings)?;

    let params = params_from_json(&read_json_arg(request)?)?;
    let bound = bind_request(&form.fields, &params, &config.settings).map_err(|e| e.to_string())?;
    if !bound.is_ok() {
        let report = json!({
            "form": form_name,
            "passed": false,
            "binding_errors": bound.errors_by_field(),
        });
        println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
        return Ok(false);
    }

    let mut record = bound.record;
    let mut ambient = AmbientState::with_parameters(params);
    if let Some(today) = today {
        ambient = ambient.with_today(today);
    }

    let registry = RuleRegistry::builtin();
    let mut pipeline = ValidationPipeline::from_form(form, &registry).map_err(|e| e.to_string())?;

    let templates = DirectoryTemplates::new(config.templates_dir());
    let ctx = RuleContext::new(SqlTemplateEngine::new(dialect), &templates, &OfflineExecutor);
    let result = pipeline
        .run(&mut record, &mut ambient, &ctx)
        .map_err(|e| format!("{} (state: {})", e, e.terminal_state()))?;

    let report = json!({
        "form": form_name,
        "state": pipeline.state(),
        "result": &result,
        "errors": result.errors(),
        "record": &record,
        "ambient": &ambient,
    });
    println!("{}", serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?);
    Ok(result.passed)
}

fn render(template: &Path, record: &str, types: &[String], dialect: Option<&str>) -> Result<bool, String> {
    let sql = fs::read_to_string(template)
        .map_err(|e| format!("Failed to read template {}: {}", template.display(), e))?;

    let mut declared = IndexMap::new();
    for entry in types.iter().filter(|t| !t.trim().is_empty()) {
        let (name, type_name) = entry
            .split_once('=')
            .ok_or_else(|| format!("Expected name=type, got '{}'", entry))?;
        let field_type: FieldType = type_name.parse()?;
        declared.insert(name.trim().to_string(), field_type);
    }

    let settings = Settings::default();
    let record = record_from_json(&read_json_arg(record)?, &declared, &settings)?;
    let engine = SqlTemplateEngine::new(resolve_dialect(dialect, &settings)?);
    let rendered = engine.render(&sql, &record).map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(true)
}

/// Lint every form. Returns false when any issue was found.
fn lint(config_path: &Path) -> Result<bool, String> {
    println!("🔍 Linting {}...", config_path.display());

    let config = RulesConfig::load_from_file(config_path)?;
    let registry = RuleRegistry::builtin();
    config.validate(&registry).map_err(|e| e.to_string())?;

    let mut clean = true;
    for (form_name, form) in &config.forms {
        let pipeline = ValidationPipeline::from_form(form, &registry).map_err(|e| e.to_string())?;
        let empty = bind_request(&form.fields, &IndexMap::new(), &config.settings).map_err(|e| e.to_string())?;

        let issues = pipeline.ordering_issues();
        let missing = if form.fields.is_empty() {
            Vec::new()
        } else {
            pipeline.missing_fields(&empty.record)
        };

        if issues.is_empty() && missing.is_empty() {
            println!("  ✓ {} ({} rules)", form_name, pipeline.rules().len());
            continue;
        }

        clean = false;
        println!("  ✗ {}", form_name);
        for issue in issues {
            println!("      ordering: {}", issue);
        }
        for field in missing {
            println!("      undeclared field: {}", field);
        }
    }

    Ok(clean)
}
