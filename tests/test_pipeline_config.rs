//! Pipelines built from rules files on disk

use std::fs;

use chrono::NaiveDate;
use indexmap::IndexMap;
use tempfile::TempDir;

use formguard::ambient::AmbientState;
use formguard::query::{MemoryExecutor, OfflineExecutor, QueryExecutor};
use formguard::rule_registry::RuleRegistry;
use formguard::rules::RuleContext;
use formguard::runtime::{bind_request, PipelineError, PipelineResult, PipelineState, RulesConfig, ValidationPipeline};
use formguard::sql_template::{Dialect, DirectoryTemplates, SqlTemplateEngine};

const RULES: &str = r#"
settings:
  dialect: mssql
  templates: templates
  date_format: "%d.%m.%Y"
forms:
  order:
    fields:
      - { name: item, type: text }
      - { name: due, type: date }
      - { name: urgent, type: bool }
    rules:
      - rule: today_check
        id: due_in_future
        attributes: { parameter: due, rule: not_past, message: Due date is in the past }
      - rule: session_duplicate_check
        id: not_in_basket
        attributes: { recordset: basket, parameter: item }
      - rule: duplicate_check
        id: not_ordered
        attributes: { sql: order-exists }
  basket:
    fields:
      - { name: items, type: text }
    rules:
      - rule: StringToTableValidator
        attributes: { parameter: items, key: basket, scope: session, trim: true }
"#;

const ORDER_SQL: &str = "SELECT 1 FROM orders WHERE item = ${fld:item} AND due = ${fld:due} AND urgent = ${fld:urgent}";

/// Rules file plus its template directory in a temp dir.
fn setup() -> (TempDir, RulesConfig) {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("templates")).unwrap();
    fs::write(dir.path().join("templates/order-exists.sql"), ORDER_SQL).unwrap();
    let path = dir.path().join("rules.yaml");
    fs::write(&path, RULES).unwrap();

    let config = RulesConfig::load_from_file(&path).unwrap();
    (dir, config)
}

fn params(pairs: &[(&str, &str)]) -> IndexMap<String, Vec<String>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), vec![v.to_string()]))
        .collect()
}

fn run(
    config: &RulesConfig,
    form: &str,
    ambient: &mut AmbientState,
    executor: &dyn QueryExecutor,
) -> Result<PipelineResult, PipelineError> {
    let form_config = config.form(form).unwrap();
    let bound = bind_request(&form_config.fields, ambient.parameters(), &config.settings).unwrap();
    assert!(bound.is_ok(), "binding errors: {:?}", bound.errors);

    let mut record = bound.record;
    let templates = DirectoryTemplates::new(config.templates_dir());
    let engine = SqlTemplateEngine::new(config.settings.dialect().unwrap());
    let ctx = RuleContext::new(engine, &templates, executor);
    let mut pipeline = ValidationPipeline::from_form(form_config, &RuleRegistry::builtin()).unwrap();
    pipeline.run(&mut record, ambient, &ctx)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

#[test]
fn test_settings_from_file() {
    let (_dir, config) = setup();
    assert_eq!(config.settings.dialect().unwrap(), Dialect::SqlServer);
    assert_eq!(config.form_names(), vec!["order", "basket"]);
    config.validate(&RuleRegistry::builtin()).unwrap();
}

#[test]
fn test_sqlserver_literals_in_duplicate_query() {
    let (_dir, config) = setup();
    let executor = MemoryExecutor::new();
    let mut ambient = AmbientState::with_parameters(params(&[
        ("item", "Bolt's"),
        ("due", "01.07.2024"),
        ("urgent", "yes"),
    ]))
    .with_today(today());

    let result = run(&config, "order", &mut ambient, &executor).unwrap();
    assert!(result.passed);
    assert_eq!(
        executor.executed(),
        vec![
            "SELECT 1 FROM orders WHERE item = 'Bolt''s' AND due = CONVERT(date, '2024-07-01', 23) AND urgent = 1"
                .to_string()
        ]
    );
}

#[test]
fn test_past_due_date_fails() {
    let (_dir, config) = setup();
    let executor = MemoryExecutor::new();
    let mut ambient = AmbientState::with_parameters(params(&[("item", "nut"), ("due", "14.06.2024")]))
        .with_today(today());

    let result = run(&config, "order", &mut ambient, &executor).unwrap();
    assert!(!result.passed);
    assert_eq!(result.errors()["due_in_future"], "Due date is in the past");
}

#[test]
fn test_basket_then_order_in_same_session() {
    let (_dir, config) = setup();
    let executor = MemoryExecutor::new();
    let mut ambient = AmbientState::with_parameters(params(&[("items", "nut, bolt ,")])).with_today(today());

    let result = run(&config, "basket", &mut ambient, &executor).unwrap();
    assert!(result.passed);
    assert_eq!(ambient.session_record("basket").unwrap().row_count(), 2);

    ambient.begin_request(params(&[("item", "bolt"), ("due", "20.06.2024")]));
    let result = run(&config, "order", &mut ambient, &executor).unwrap();
    assert!(!result.passed);
    assert_eq!(result.errors().keys().collect::<Vec<_>>(), vec!["not_in_basket"]);

    ambient.begin_request(params(&[("item", "washer"), ("due", "20.06.2024")]));
    assert!(run(&config, "order", &mut ambient, &executor).unwrap().passed);
}

#[test]
fn test_offline_database_aborts() {
    let (_dir, config) = setup();
    let form_config = config.form("order").unwrap();
    let mut ambient = AmbientState::with_parameters(params(&[("item", "nut")])).with_today(today());
    let mut record = bind_request(&form_config.fields, ambient.parameters(), &config.settings)
        .unwrap()
        .record;

    let templates = DirectoryTemplates::new(config.templates_dir());
    let ctx = RuleContext::new(SqlTemplateEngine::new(Dialect::SqlServer), &templates, &OfflineExecutor);
    let mut pipeline = ValidationPipeline::from_form(form_config, &RuleRegistry::builtin()).unwrap();

    let err = pipeline.run(&mut record, &mut ambient, &ctx).unwrap_err();
    assert!(matches!(err, PipelineError::Execution { ref rule, .. } if rule == "not_ordered"));
    assert_eq!(pipeline.state(), PipelineState::Aborted);
}
