//! Duplicate-key checks, against the database or against a session table.

use crate::ambient::AmbientState;
use crate::record::TypedRecord;
use crate::rules::{ConfigurationError, FieldAccess, Rule, RuleConfig, RuleContext, RuleError, Verdict};

/// Runs a SQL template and fails if the query returns any row.
///
/// Attributes: `sql` (template resource name), optional `datasource`.
///
/// ```yaml
/// - rule: duplicate_check
///   attributes:
///     sql: customer-code-exists
///     message: "Customer code already in use"
/// ```
#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    template: String,
    data_source: Option<String>,
    message: String,
}

impl DuplicateCheck {
    pub const TAG: &'static str = "duplicate_check";
}

impl Rule for DuplicateCheck {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            template: config.require("sql")?.to_string(),
            data_source: config.get("datasource").map(str::to_string),
            message: config.message_or("A record with the same key already exists"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let sql = ctx.render(&self.template, record)?;
        let rows = ctx
            .executor
            .query(self.data_source.as_deref(), &sql)
            .map_err(|source| RuleError::Execution {
                rule: Self::TAG.to_string(),
                source,
            })?;

        tracing::debug!(template = %self.template, rows = rows.row_count(), "Duplicate check query ran");
        Ok(Verdict::from_bool(rows.row_count() == 0))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

/// Which session row, if any, is the one being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowExclusion {
    /// Every match counts as a duplicate
    None,
    /// Skip the row whose index is carried by this request parameter.
    /// A missing or unparsable parameter means nothing is skipped.
    FromParameter(String),
}

impl RowExclusion {
    fn resolve(&self, ambient: &AmbientState) -> Option<usize> {
        match self {
            RowExclusion::None => None,
            RowExclusion::FromParameter(name) => {
                let raw = ambient.parameter(name)?;
                match raw.trim().parse::<usize>() {
                    Ok(index) => Some(index),
                    Err(_) => {
                        tracing::warn!(parameter = %name, value = %raw, "Ignoring unparsable row index");
                        None
                    }
                }
            }
        }
    }
}

/// Compares a field against a column of a record held in session scope.
///
/// Attributes: `recordset` (session key), `parameter` (field in the request
/// record), optional `column` (defaults to `parameter`), optional `rowindex`
/// (name of the request parameter holding the row being edited).
#[derive(Debug, Clone)]
pub struct SessionDuplicateCheck {
    recordset: String,
    parameter: String,
    column: String,
    exclusion: RowExclusion,
    message: String,
}

impl SessionDuplicateCheck {
    pub const TAG: &'static str = "session_duplicate_check";
}

impl Rule for SessionDuplicateCheck {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let parameter = config.require("parameter")?.to_string();
        let column = config.get("column").unwrap_or(&parameter).to_string();
        let exclusion = match config.get("rowindex") {
            Some(name) => RowExclusion::FromParameter(name.to_string()),
            None => RowExclusion::None,
        };
        Ok(Self {
            recordset: config.require("recordset")?.to_string(),
            parameter,
            column,
            exclusion,
            message: config.message_or("This value is already in the list"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let value = record.get_value(&self.parameter)?;
        if value.is_null() {
            return Ok(Verdict::Passed);
        }

        let Some(table) = ambient.session_record(&self.recordset) else {
            tracing::debug!(recordset = %self.recordset, "No session recordset, nothing to compare");
            return Ok(Verdict::Passed);
        };

        let excluded = self.exclusion.resolve(ambient);
        let duplicate = table
            .find_all(&self.column, value.clone())?
            .into_iter()
            .any(|row| Some(row) != excluded);

        Ok(Verdict::from_bool(!duplicate))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.parameter.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::Attribute;
    use crate::query::{MemoryExecutor, QueryError};
    use crate::record::FieldType;
    use crate::sql_template::{MemoryTemplates, SqlTemplateEngine, TemplateError};

    fn customer(code: &str) -> TypedRecord {
        let mut rs = TypedRecord::new();
        rs.declare_field("code", FieldType::Text).unwrap();
        rs.append_row();
        rs.set_value("code", code).unwrap();
        rs
    }

    fn dup_rule() -> DuplicateCheck {
        DuplicateCheck::configure(&RuleConfig::new("duplicate_check").with("sql", "code-exists")).unwrap()
    }

    fn templates() -> MemoryTemplates {
        MemoryTemplates::new().with("code-exists", "SELECT 1 FROM customer WHERE code = ${fld:code}")
    }

    #[test]
    fn test_duplicate_check_found() {
        let existing = TypedRecord::single_column("one", FieldType::Integer, vec![1i64]).unwrap();
        let executor = MemoryExecutor::new()
            .with_result("SELECT 1 FROM customer WHERE code = 'C-1'", existing);
        let templates = templates();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &executor);

        let mut rs = customer("C-1");
        let verdict = dup_rule().evaluate(&mut rs, &mut AmbientState::new(), &ctx).unwrap();
        assert_eq!(verdict, Verdict::Failed);

        let mut rs = customer("C-2");
        let verdict = dup_rule().evaluate(&mut rs, &mut AmbientState::new(), &ctx).unwrap();
        assert_eq!(verdict, Verdict::Passed);
    }

    #[test]
    fn test_duplicate_check_escapes_input() {
        let executor = MemoryExecutor::new();
        let templates = templates();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &executor);

        let mut rs = customer("x' OR '1'='1");
        dup_rule().evaluate(&mut rs, &mut AmbientState::new(), &ctx).unwrap();
        assert_eq!(
            executor.executed(),
            vec!["SELECT 1 FROM customer WHERE code = 'x'' OR ''1''=''1'".to_string()]
        );
    }

    #[test]
    fn test_duplicate_check_query_error_is_not_a_failure() {
        let executor = MemoryExecutor::new().with_failure(
            "SELECT 1 FROM customer WHERE code = 'C-1'",
            QueryError::Unavailable("db down".to_string()),
        );
        let templates = templates();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &executor);

        let mut rs = customer("C-1");
        let err = dup_rule().evaluate(&mut rs, &mut AmbientState::new(), &ctx).unwrap_err();
        assert!(err.is_execution());
    }

    #[test]
    fn test_duplicate_check_missing_template() {
        let executor = MemoryExecutor::new();
        let templates = MemoryTemplates::new();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &executor);

        let mut rs = customer("C-1");
        let err = dup_rule().evaluate(&mut rs, &mut AmbientState::new(), &ctx).unwrap_err();
        assert_eq!(
            err,
            RuleError::Template(TemplateError::TemplateNotFound("code-exists".to_string()))
        );
        assert!(executor.executed().is_empty());
    }

    fn session_with_codes(codes: Vec<&str>) -> AmbientState {
        let mut ambient = AmbientState::new();
        let table = TypedRecord::single_column("code", FieldType::Text, codes).unwrap();
        ambient.session_set("codes", Attribute::Record(table));
        ambient
    }

    fn session_rule(rowindex: Option<&str>) -> SessionDuplicateCheck {
        let mut config = RuleConfig::new("session_duplicate_check")
            .with("recordset", "codes")
            .with("parameter", "code");
        if let Some(name) = rowindex {
            config = config.with("rowindex", name);
        }
        SessionDuplicateCheck::configure(&config).unwrap()
    }

    fn eval_session(rule: &SessionDuplicateCheck, rs: &mut TypedRecord, ambient: &mut AmbientState) -> Verdict {
        let templates = MemoryTemplates::new();
        let executor = MemoryExecutor::new();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &executor);
        rule.evaluate(rs, ambient, &ctx).unwrap()
    }

    #[test]
    fn test_session_duplicate() {
        let rule = session_rule(None);
        let mut ambient = session_with_codes(vec!["a", "b"]);

        assert_eq!(eval_session(&rule, &mut customer("b"), &mut ambient), Verdict::Failed);
        assert_eq!(eval_session(&rule, &mut customer("c"), &mut ambient), Verdict::Passed);
    }

    #[test]
    fn test_session_duplicate_excludes_edited_row() {
        let rule = session_rule(Some("rowindex"));

        // Editing row 1 in place: its own value is not a duplicate
        let mut ambient = session_with_codes(vec!["a", "b"]);
        let mut ambient_edit = AmbientState::with_parameters(
            [("rowindex".to_string(), vec!["1".to_string()])].into_iter().collect(),
        );
        ambient_edit.session_set("codes", ambient.session_get("codes").unwrap().clone());
        assert_eq!(eval_session(&rule, &mut customer("b"), &mut ambient_edit), Verdict::Passed);
        assert_eq!(eval_session(&rule, &mut customer("a"), &mut ambient_edit), Verdict::Failed);

        // No row index on the request: any match is a duplicate
        assert_eq!(eval_session(&rule, &mut customer("b"), &mut ambient), Verdict::Failed);
    }

    #[test]
    fn test_session_duplicate_without_table_or_value() {
        let rule = session_rule(None);
        let mut empty = AmbientState::new();
        assert_eq!(eval_session(&rule, &mut customer("a"), &mut empty), Verdict::Passed);

        let mut ambient = session_with_codes(vec!["a"]);
        let mut rs = customer("a");
        rs.set_value("code", None::<String>).unwrap();
        assert_eq!(eval_session(&rule, &mut rs, &mut ambient), Verdict::Passed);
    }
}
