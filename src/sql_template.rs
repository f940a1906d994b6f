//! Type-directed SQL templating.
//!
//! Templates reference record fields with `${fld:<name>}` markers. Each marker
//! is replaced by a literal rendered from the field's declared type and the
//! value at the record's cursor row:
//!
//! ```text
//! SELECT id FROM customer WHERE code = ${fld:code} AND id <> ${fld:id}
//! ```
//!
//! This is the only path by which request data becomes SQL text. Text values
//! are always emitted as a single quoted literal with embedded quotes doubled,
//! so a value can never terminate the literal early.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::record::{FieldType, FieldValue, RecordError, TypedRecord};

const MARKER_OPEN: &str = "${fld:";

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"\$\{fld:([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("marker regex is valid")
    })
}

/// SQL literal syntax variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// ANSI literals as accepted by PostgreSQL
    #[default]
    Ansi,
    MySql,
    SqlServer,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ansi" | "postgres" | "postgresql" | "pg" => Ok(Dialect::Ansi),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            other => Err(format!("Unknown SQL dialect: {}", other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Ansi => write!(f, "ansi"),
            Dialect::MySql => write!(f, "mysql"),
            Dialect::SqlServer => write!(f, "sqlserver"),
        }
    }
}

/// Error type for template rendering
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// Marker names a field the record does not declare
    UnresolvedMarker(String),
    MalformedMarker {
        offset: usize,
        snippet: String,
    },
    UnsupportedType {
        field: String,
        field_type: FieldType,
    },
    UnsupportedValue {
        field: String,
        reason: String,
    },
    TemplateNotFound(String),
    Record(RecordError),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnresolvedMarker(name) => {
                write!(f, "Template marker references undeclared field '{}'", name)
            }
            TemplateError::MalformedMarker { offset, snippet } => {
                write!(f, "Malformed field marker at offset {}: {}", offset, snippet)
            }
            TemplateError::UnsupportedType { field, field_type } => {
                write!(f, "No SQL rendering for field '{}' of type {}", field, field_type)
            }
            TemplateError::UnsupportedValue { field, reason } => {
                write!(f, "Cannot render value of field '{}': {}", field, reason)
            }
            TemplateError::TemplateNotFound(name) => write!(f, "SQL template not found: {}", name),
            TemplateError::Record(e) => write!(f, "Record error: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<RecordError> for TemplateError {
    fn from(err: RecordError) -> Self {
        TemplateError::Record(err)
    }
}

/// Renders SQL templates against a record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlTemplateEngine {
    dialect: Dialect,
}

impl SqlTemplateEngine {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Field names referenced by a template, in order of appearance.
    ///
    /// Fails on the first malformed marker.
    pub fn markers(template: &str) -> Result<Vec<String>, TemplateError> {
        let mut names = Vec::new();
        let mut last = 0;
        for caps in marker_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            check_gap(template, last, whole.start())?;
            names.push(caps[1].to_string());
            last = whole.end();
        }
        check_gap(template, last, template.len())?;
        Ok(names)
    }

    /// Render `template` using the values at the record's cursor row.
    pub fn render(&self, template: &str, record: &TypedRecord) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in marker_regex().captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            check_gap(template, last, whole.start())?;
            out.push_str(&template[last..whole.start()]);

            let name = &caps[1];
            let field_type = record
                .field_type(name)
                .map_err(|_| TemplateError::UnresolvedMarker(name.to_string()))?;
            let value = record.get_value(name)?;
            out.push_str(&self.render_typed(name, field_type, value)?);

            last = whole.end();
        }

        check_gap(template, last, template.len())?;
        out.push_str(&template[last..]);

        tracing::debug!(dialect = %self.dialect, sql = %out, "Rendered SQL template");
        Ok(out)
    }

    /// Render a single value as a SQL literal.
    pub fn render_value(&self, value: &FieldValue) -> Result<String, TemplateError> {
        let field_type = match value {
            FieldValue::Null => return Ok("NULL".to_string()),
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Timestamp(_) => FieldType::Timestamp,
            FieldValue::Boolean(_) => FieldType::Boolean,
        };
        self.render_typed("<value>", field_type, value)
    }

    fn render_typed(
        &self,
        field: &str,
        field_type: FieldType,
        value: &FieldValue,
    ) -> Result<String, TemplateError> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }

        let unsupported = || TemplateError::UnsupportedType {
            field: field.to_string(),
            field_type,
        };

        match (field_type, value) {
            (FieldType::Text, FieldValue::Text(s)) => Ok(self.quote(s)),
            (FieldType::Integer, FieldValue::Integer(i)) => Ok(signed_literal(*i < 0, i)),
            (FieldType::Decimal, FieldValue::Decimal(d)) => {
                if d.is_finite() {
                    // -0.0 prints as "-0"
                    let d = if *d == 0.0 { 0.0 } else { *d };
                    Ok(signed_literal(d < 0.0, d))
                } else {
                    Err(TemplateError::UnsupportedValue {
                        field: field.to_string(),
                        reason: format!("non-finite decimal {}", d),
                    })
                }
            }
            (FieldType::Date, FieldValue::Date(d)) => {
                Ok(self.date_literal(&d.format("%Y-%m-%d").to_string()))
            }
            (FieldType::Timestamp, FieldValue::Timestamp(ts)) => {
                Ok(self.timestamp_literal(&ts.format("%Y-%m-%d %H:%M:%S").to_string()))
            }
            (FieldType::Boolean, FieldValue::Boolean(b)) => Ok(self.bool_literal(*b).to_string()),
            _ => Err(unsupported()),
        }
    }

    /// Quote a text literal, doubling the delimiter.
    fn quote(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len() + 2);
        out.push('\'');
        for c in s.chars() {
            match c {
                '\'' => out.push_str("''"),
                '\\' if self.dialect == Dialect::MySql => out.push_str("\\\\"),
                c => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    fn date_literal(&self, iso: &str) -> String {
        match self.dialect {
            Dialect::Ansi => format!("DATE '{}'", iso),
            Dialect::MySql => format!("'{}'", iso),
            Dialect::SqlServer => format!("CONVERT(date, '{}', 23)", iso),
        }
    }

    fn timestamp_literal(&self, iso: &str) -> String {
        match self.dialect {
            Dialect::Ansi => format!("TIMESTAMP '{}'", iso),
            Dialect::MySql => format!("'{}'", iso),
            Dialect::SqlServer => format!("CONVERT(datetime2, '{}', 120)", iso),
        }
    }

    fn bool_literal(&self, b: bool) -> &'static str {
        match (self.dialect, b) {
            (Dialect::SqlServer, true) => "1",
            (Dialect::SqlServer, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }
}

/// A `${fld:` opener between two well-formed markers is malformed.
fn check_gap(template: &str, start: usize, end: usize) -> Result<(), TemplateError> {
    if let Some(pos) = template[start..end].find(MARKER_OPEN) {
        let offset = start + pos;
        let snippet: String = template[offset..].chars().take(32).collect();
        return Err(TemplateError::MalformedMarker { offset, snippet });
    }
    Ok(())
}

/// Source of named SQL template resources.
pub trait TemplateSource {
    /// Load the template text registered under `name`.
    fn load(&self, name: &str) -> Result<String, TemplateError>;
}

/// In-memory template resources.
#[derive(Debug, Clone, Default)]
pub struct MemoryTemplates {
    templates: HashMap<String, String>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, sql: impl Into<String>) -> Self {
        self.insert(name, sql);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, sql: impl Into<String>) {
        self.templates.insert(name.into(), sql.into());
    }
}

impl TemplateSource for MemoryTemplates {
    fn load(&self, name: &str) -> Result<String, TemplateError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::TemplateNotFound(name.to_string()))
    }
}

/// Templates read from a directory: `<dir>/<name>`, falling back to
/// `<dir>/<name>.sql`.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    root: PathBuf,
}

impl DirectoryTemplates {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl TemplateSource for DirectoryTemplates {
    fn load(&self, name: &str) -> Result<String, TemplateError> {
        // Names are resource keys, not paths
        if name.contains("..") || name.starts_with('/') {
            return Err(TemplateError::TemplateNotFound(name.to_string()));
        }
        let direct = self.root.join(name);
        let with_ext = self.root.join(format!("{}.sql", name));
        [direct, with_ext]
            .iter()
            .filter(|p| p.is_file())
            .find_map(|p| fs::read_to_string(p).ok())
            .ok_or_else(|| TemplateError::TemplateNotFound(name.to_string()))
    }
}

/// Negative numbers are parenthesised so a preceding `-` in the template
/// cannot form a `--` comment.
fn signed_literal(negative: bool, n: impl fmt::Display) -> String {
    if negative {
        format!("({})", n)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record() -> TypedRecord {
        let mut rs = TypedRecord::new();
        rs.declare_field("name", FieldType::Text).unwrap();
        rs.declare_field("qty", FieldType::Integer).unwrap();
        rs.declare_field("price", FieldType::Decimal).unwrap();
        rs.declare_field("day", FieldType::Date).unwrap();
        rs.declare_field("at", FieldType::Timestamp).unwrap();
        rs.declare_field("active", FieldType::Boolean).unwrap();
        rs.append_row();
        rs
    }

    #[test]
    fn test_render_all_types_ansi() {
        let mut rs = record();
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        rs.set_value("name", "Bob").unwrap();
        rs.set_value("qty", 3i64).unwrap();
        rs.set_value("price", 9.5f64).unwrap();
        rs.set_value("day", day).unwrap();
        rs.set_value("at", day.and_hms_opt(8, 30, 0).unwrap()).unwrap();
        rs.set_value("active", true).unwrap();

        let engine = SqlTemplateEngine::new(Dialect::Ansi);
        let sql = engine
            .render(
                "VALUES (${fld:name}, ${fld:qty}, ${fld:price}, ${fld:day}, ${fld:at}, ${fld:active})",
                &rs,
            )
            .unwrap();
        assert_eq!(
            sql,
            "VALUES ('Bob', 3, 9.5, DATE '2024-01-10', TIMESTAMP '2024-01-10 08:30:00', TRUE)"
        );
    }

    #[test]
    fn test_render_nulls() {
        let rs = record();
        let engine = SqlTemplateEngine::default();
        let sql = engine
            .render("${fld:name},${fld:qty},${fld:price},${fld:day},${fld:at},${fld:active}", &rs)
            .unwrap();
        assert_eq!(sql, "NULL,NULL,NULL,NULL,NULL,NULL");
    }

    #[test]
    fn test_dialect_literals() {
        let mut rs = record();
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        rs.set_value("day", day).unwrap();
        rs.set_value("active", false).unwrap();

        let mysql = SqlTemplateEngine::new(Dialect::MySql);
        assert_eq!(mysql.render("${fld:day} ${fld:active}", &rs).unwrap(), "'2024-01-10' FALSE");

        let mssql = SqlTemplateEngine::new(Dialect::SqlServer);
        assert_eq!(
            mssql.render("${fld:day} ${fld:active}", &rs).unwrap(),
            "CONVERT(date, '2024-01-10', 23) 0"
        );
    }

    #[test]
    fn test_quote_doubling() {
        let mut rs = record();
        rs.set_value("name", "O'Brien").unwrap();
        let engine = SqlTemplateEngine::default();
        assert_eq!(engine.render("${fld:name}", &rs).unwrap(), "'O''Brien'");
    }

    #[test]
    fn test_mysql_backslash_escaped() {
        let mut rs = record();
        rs.set_value("name", "a\\' OR 1=1 --").unwrap();
        let engine = SqlTemplateEngine::new(Dialect::MySql);
        assert_eq!(engine.render("${fld:name}", &rs).unwrap(), "'a\\\\'' OR 1=1 --'");

        // Backslash is ordinary text in ANSI literals
        let ansi = SqlTemplateEngine::new(Dialect::Ansi);
        assert_eq!(ansi.render("${fld:name}", &rs).unwrap(), "'a\\'' OR 1=1 --'");
    }

    #[test]
    fn test_unresolved_marker() {
        let rs = record();
        let err = SqlTemplateEngine::default().render("x = ${fld:nope}", &rs).unwrap_err();
        assert_eq!(err, TemplateError::UnresolvedMarker("nope".to_string()));
    }

    #[test]
    fn test_malformed_marker() {
        let rs = record();
        let engine = SqlTemplateEngine::default();
        assert!(matches!(
            engine.render("x = ${fld:name", &rs),
            Err(TemplateError::MalformedMarker { offset: 4, .. })
        ));
        assert!(matches!(
            engine.render("x = ${fld:} AND ${fld:name}", &rs),
            Err(TemplateError::MalformedMarker { .. })
        ));
    }

    #[test]
    fn test_cursor_out_of_range() {
        let mut rs = TypedRecord::new();
        rs.declare_field("name", FieldType::Text).unwrap();
        let err = SqlTemplateEngine::default().render("${fld:name}", &rs).unwrap_err();
        assert!(matches!(err, TemplateError::Record(RecordError::CursorOutOfRange { .. })));
    }

    #[test]
    fn test_renders_at_cursor_row() {
        let mut rs = TypedRecord::single_column("code", FieldType::Text, vec!["a", "b"]).unwrap();
        rs.move_next();
        assert_eq!(SqlTemplateEngine::default().render("${fld:code}", &rs).unwrap(), "'b'");
    }

    #[test]
    fn test_template_without_markers() {
        let rs = TypedRecord::new();
        let sql = SqlTemplateEngine::default().render("SELECT 1", &rs).unwrap();
        assert_eq!(sql, "SELECT 1");
    }

    #[test]
    fn test_non_finite_decimal() {
        assert!(matches!(
            SqlTemplateEngine::default().render_value(&FieldValue::Decimal(f64::INFINITY)),
            Err(TemplateError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn test_negative_numbers_are_parenthesised() {
        let mut rs = record();
        rs.set_value("qty", -5i64).unwrap();
        rs.set_value("price", -2.5f64).unwrap();

        let engine = SqlTemplateEngine::default();
        let sql = engine
            .render("SELECT 1 FROM t WHERE x > 0-${fld:qty} AND owner = 7", &rs)
            .unwrap();
        assert_eq!(sql, "SELECT 1 FROM t WHERE x > 0-(-5) AND owner = 7");
        assert!(!sql.contains("--"));

        assert_eq!(engine.render("1-${fld:price}", &rs).unwrap(), "1-(-2.5)");

        rs.set_value("qty", 0i64).unwrap();
        rs.set_value("price", -0.0f64).unwrap();
        assert_eq!(engine.render("${fld:qty} ${fld:price}", &rs).unwrap(), "0 0");
    }

    #[test]
    fn test_markers() {
        let names = SqlTemplateEngine::markers("a=${fld:a} and b=${fld:b_1}").unwrap();
        assert_eq!(names, vec!["a", "b_1"]);
        assert!(SqlTemplateEngine::markers("${fld:").is_err());
    }

    #[test]
    fn test_render_value() {
        let engine = SqlTemplateEngine::default();
        assert_eq!(engine.render_value(&FieldValue::Null).unwrap(), "NULL");
        assert_eq!(engine.render_value(&FieldValue::Text("it's".into())).unwrap(), "'it''s'");
    }

    #[test]
    fn test_memory_templates() {
        let templates = MemoryTemplates::new().with("dup", "SELECT 1");
        assert_eq!(templates.load("dup").unwrap(), "SELECT 1");
        assert_eq!(
            templates.load("other").unwrap_err(),
            TemplateError::TemplateNotFound("other".to_string())
        );
    }

    #[test]
    fn test_directory_templates() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("dup.sql"), "SELECT 1").unwrap();

        let templates = DirectoryTemplates::new(dir.path());
        assert_eq!(templates.load("dup").unwrap(), "SELECT 1");
        assert_eq!(templates.load("dup.sql").unwrap(), "SELECT 1");
        assert!(templates.load("../dup").is_err());
        assert!(templates.load("missing").is_err());
    }
}
