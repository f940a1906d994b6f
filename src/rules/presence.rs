//! Existence and format checks.

use regex::Regex;

use crate::ambient::AmbientState;
use crate::record::{FieldValue, TypedRecord};
use crate::rules::{ConfigurationError, FieldAccess, Rule, RuleConfig, RuleContext, RuleError, Verdict};

/// Fails when any of the listed fields is null or blank text.
///
/// Attributes: `params` (alias `parameter`), a comma separated field list.
#[derive(Debug, Clone)]
pub struct NotEmpty {
    fields: Vec<String>,
    message: String,
}

impl NotEmpty {
    pub const TAG: &'static str = "not_empty";

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

fn is_empty(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

impl Rule for NotEmpty {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            fields: config.require_list(&["params", "parameter"])?,
            message: config.message_or("A required value is missing"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        for field in &self.fields {
            if is_empty(record.get_value(field)?) {
                tracing::debug!(field = %field, "Required field is empty");
                return Ok(Verdict::Failed);
            }
        }
        Ok(Verdict::Passed)
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading(self.fields.iter().cloned())
    }
}

/// Checks a multi-valued request parameter (e.g. a checkbox group) carries
/// at least `min` non-blank values.
#[derive(Debug, Clone)]
pub struct ArrayCheck {
    parameter: String,
    min: usize,
    message: String,
}

impl ArrayCheck {
    pub const TAG: &'static str = "array_check";
}

impl Rule for ArrayCheck {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let min = config.parse_or("min", 1usize)?;
        Ok(Self {
            parameter: config.require("parameter")?.to_string(),
            min,
            message: config.message_or("Select at least one option"),
        })
    }

    fn evaluate(
        &self,
        _record: &mut TypedRecord,
        ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let count = ambient
            .parameter_values(&self.parameter)
            .iter()
            .filter(|v| !v.trim().is_empty())
            .count();
        Ok(Verdict::from_bool(count >= self.min))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }
}

/// Text field must match a regular expression in full. Null passes.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    parameter: String,
    pattern: Regex,
    message: String,
}

impl RegexMatch {
    pub const TAG: &'static str = "regex_match";
}

impl Rule for RegexMatch {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let raw = config.require("pattern")?;
        let pattern = Regex::new(&format!("^(?:{})$", raw))
            .map_err(|e| config.invalid("pattern", raw, e.to_string()))?;
        Ok(Self {
            parameter: config.require("parameter")?.to_string(),
            pattern,
            message: config.message_or("Value has an invalid format"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        match record.get_text(&self.parameter)? {
            None => Ok(Verdict::Passed),
            Some(text) => Ok(Verdict::from_bool(self.pattern.is_match(text))),
        }
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
    use crate::query::OfflineExecutor;
    use crate::record::{FieldType, RecordError};
    use crate::sql_template::{MemoryTemplates, SqlTemplateEngine};

    fn eval<R: Rule>(rule: &R, record: &mut TypedRecord, ambient: &mut AmbientState) -> Result<Verdict, RuleError> {
        let templates = MemoryTemplates::new();
        let ctx = RuleContext::new(SqlTemplateEngine::default(), &templates, &OfflineExecutor);
        rule.evaluate(record, ambient, &ctx)
    }

    fn person(name: Option<&str>, email: Option<&str>) -> TypedRecord {
        let mut rs = TypedRecord::new();
        rs.declare_field("name", FieldType::Text).unwrap();
        rs.declare_field("email", FieldType::Text).unwrap();
        rs.declare_field("age", FieldType::Integer).unwrap();
        rs.append_row();
        rs.set_value("name", name).unwrap();
        rs.set_value("email", email).unwrap();
        rs
    }

    #[test]
    fn test_not_empty() {
        let rule = NotEmpty::configure(&RuleConfig::new("not_empty").with("params", "name, email")).unwrap();
        let mut ambient = AmbientState::new();

        let mut rs = person(Some("Ann"), Some("a@x.org"));
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Passed);

        let mut rs = person(Some("Ann"), None);
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Failed);

        let mut rs = person(Some("   "), Some("a@x.org"));
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Failed);
    }

    #[test]
    fn test_not_empty_non_text_field() {
        let rule = NotEmpty::configure(&RuleConfig::new("not_empty").with("parameter", "age")).unwrap();
        let mut rs = person(None, None);
        let mut ambient = AmbientState::new();
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Failed);
        rs.set_value("age", 0i64).unwrap();
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Passed);
    }

    #[test]
    fn test_not_empty_missing_config() {
        assert!(matches!(
            NotEmpty::configure(&RuleConfig::new("not_empty")),
            Err(ConfigurationError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_not_empty_unknown_field_is_error() {
        let rule = NotEmpty::configure(&RuleConfig::new("not_empty").with("params", "phone")).unwrap();
        let mut rs = person(None, None);
        let err = eval(&rule, &mut rs, &mut AmbientState::new()).unwrap_err();
        assert_eq!(err, RuleError::Record(RecordError::FieldNotFound("phone".to_string())));
    }

    #[test]
    fn test_array_check() {
        let rule = ArrayCheck::configure(
            &RuleConfig::new("array_check").with("parameter", "tags").with("min", "2"),
        )
        .unwrap();
        let mut rs = TypedRecord::new();

        let mut ambient = AmbientState::new().with_parameter("tags", "a").with_parameter("tags", " ");
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Failed);

        let mut ambient = AmbientState::new().with_parameter("tags", "a").with_parameter("tags", "b");
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Passed);
    }

    #[test]
    fn test_regex_match() {
        let rule = RegexMatch::configure(
            &RuleConfig::new("regex_match")
                .with("parameter", "email")
                .with("pattern", r"[^@\s]+@[^@\s]+"),
        )
        .unwrap();
        let mut ambient = AmbientState::new();

        let mut rs = person(None, Some("a@x.org"));
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Passed);

        // Must match in full
        let mut rs = person(None, Some("a@x.org and more"));
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Failed);

        let mut rs = person(None, None);
        assert_eq!(eval(&rule, &mut rs, &mut ambient).unwrap(), Verdict::Passed);
    }

    #[test]
    fn test_regex_invalid_pattern() {
        let result = RegexMatch::configure(
            &RuleConfig::new("regex_match").with("parameter", "email").with("pattern", "(unclosed"),
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidAttribute { .. })));
    }
}
