//! Rule contract and the built-in rule library.
//!
//! A rule is a configured unit of validation and/or transformation. Rules are
//! built once from their string attributes (failing fast on a bad
//! configuration), then evaluated against each request's record and ambient
//! state.
//!
//! # Example
//!
//! ```rust
//! use formguard::rules::{Rule, RuleConfig, RuleContext, RuleError, Verdict, ConfigurationError};
//! use formguard::record::TypedRecord;
//! use formguard::ambient::AmbientState;
//!
//! struct AlwaysFails {
//!     message: String,
//! }
//!
//! impl Rule for AlwaysFails {
//!     fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
//!         Ok(Self { message: config.message_or("nope") })
//!     }
//!
//!     fn evaluate(
//!         &self,
//!         _record: &mut TypedRecord,
//!         _ambient: &mut AmbientState,
//!         _ctx: &RuleContext<'_>,
//!     ) -> Result<Verdict, RuleError> {
//!         Ok(Verdict::Failed)
//!     }
//!
//!     fn error_message(&self) -> Option<String> {
//!         Some(self.message.clone())
//!     }
//! }
//! ```

pub mod duplicate;
pub mod presence;
pub mod range;
pub mod transform;

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

use crate::ambient::AmbientState;
use crate::query::{QueryError, QueryExecutor};
use crate::record::{RecordError, TypedRecord};
use crate::sql_template::{SqlTemplateEngine, TemplateError, TemplateSource};

pub use duplicate::{DuplicateCheck, RowExclusion, SessionDuplicateCheck};
pub use presence::{ArrayCheck, NotEmpty, RegexMatch};
pub use range::{CompareFields, DateRange, IntervalUnit, NumericRange, Operator, TodayCheck, TodayRule};
pub use transform::{CaseMode, CaseTransform, LikeMode, LikePattern, StringToTable};

/// Fatal, operator-facing configuration defect.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    MissingAttribute {
        rule: String,
        attribute: String,
    },
    InvalidAttribute {
        rule: String,
        attribute: String,
        value: String,
        reason: String,
    },
    UnknownRule(String),
    /// Rules file could not be read or parsed
    Load(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MissingAttribute { rule, attribute } => {
                write!(f, "Rule '{}' is missing required attribute '{}'", rule, attribute)
            }
            ConfigurationError::InvalidAttribute { rule, attribute, value, reason } => write!(
                f,
                "Rule '{}' has invalid attribute {}='{}': {}",
                rule, attribute, value, reason
            ),
            ConfigurationError::UnknownRule(id) => write!(f, "Unknown rule identifier: {}", id),
            ConfigurationError::Load(msg) => write!(f, "Failed to load rules: {}", msg),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Error raised while evaluating a rule.
///
/// None of these are validation failures: a rule that cannot check its data
/// reports an error, never `Verdict::Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleError {
    Configuration(ConfigurationError),
    Template(TemplateError),
    /// The record does not have the shape the rule was configured for
    Record(RecordError),
    /// Infrastructure failure, e.g. the query executor is unreachable
    Execution {
        rule: String,
        source: QueryError,
    },
}

impl RuleError {
    pub fn is_execution(&self) -> bool {
        matches!(self, RuleError::Execution { .. })
    }
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Configuration(e) => write!(f, "Configuration error: {}", e),
            RuleError::Template(e) => write!(f, "Template error: {}", e),
            RuleError::Record(e) => write!(f, "Record error: {}", e),
            RuleError::Execution { rule, source } => {
                write!(f, "Rule '{}' could not execute: {}", rule, source)
            }
        }
    }
}

impl std::error::Error for RuleError {}

impl From<ConfigurationError> for RuleError {
    fn from(err: ConfigurationError) -> Self {
        RuleError::Configuration(err)
    }
}

impl From<TemplateError> for RuleError {
    fn from(err: TemplateError) -> Self {
        RuleError::Template(err)
    }
}

impl From<RecordError> for RuleError {
    fn from(err: RecordError) -> Self {
        RuleError::Record(err)
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    pub fn from_bool(passed: bool) -> Self {
        if passed {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// Fields a rule reads and writes.
///
/// Used to detect ordering mistakes (a rule reading a field that a later rule
/// rewrites) and to decide which rules run against a scratch copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAccess {
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    /// Rule stores attributes in session or request scope
    pub writes_ambient: bool,
}

impl FieldAccess {
    pub fn reading<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reads: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn and_writing<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn and_ambient(mut self) -> Self {
        self.writes_ambient = true;
        self
    }

    pub fn mutates(&self) -> bool {
        !self.writes.is_empty() || self.writes_ambient
    }
}

/// Services available to rules during evaluation.
pub struct RuleContext<'a> {
    pub engine: SqlTemplateEngine,
    pub templates: &'a dyn TemplateSource,
    pub executor: &'a dyn QueryExecutor,
}

impl<'a> RuleContext<'a> {
    pub fn new(
        engine: SqlTemplateEngine,
        templates: &'a dyn TemplateSource,
        executor: &'a dyn QueryExecutor,
    ) -> Self {
        Self { engine, templates, executor }
    }

    /// Load the named template and render it against the record.
    pub fn render(&self, template_name: &str, record: &TypedRecord) -> Result<String, TemplateError> {
        let template = self.templates.load(template_name)?;
        self.engine.render(&template, record)
    }
}

/// Contract implemented by every validation/transformation rule.
pub trait Rule {
    /// Build the rule from its attributes. Called once, when the rule is
    /// wired into a pipeline.
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError>
    where
        Self: Sized;

    /// Check (and possibly rewrite) the current request data.
    fn evaluate(
        &self,
        record: &mut TypedRecord,
        ambient: &mut AmbientState,
        ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError>;

    /// Human-readable reason, queried only after `Verdict::Failed`.
    fn error_message(&self) -> Option<String>;

    fn access(&self) -> FieldAccess {
        FieldAccess::default()
    }
}

/// Immutable attribute map for one rule instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleConfig {
    rule: String,
    attributes: IndexMap<String, String>,
}

impl RuleConfig {
    /// Empty configuration for the rule tagged `rule` (used in error messages).
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn from_pairs<I, K, V>(rule: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            rule: rule.into(),
            attributes: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    /// Attribute value; blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First present attribute among `keys` (aliases).
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigurationError> {
        self.get(key).ok_or_else(|| self.missing(key))
    }

    pub fn require_any(&self, keys: &[&str]) -> Result<&str, ConfigurationError> {
        self.get_any(keys).ok_or_else(|| self.missing(keys[0]))
    }

    /// Parse an optional attribute.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| self.invalid(key, raw, e.to_string())),
        }
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Comma separated list; at least one non-blank entry required.
    pub fn require_list(&self, keys: &[&str]) -> Result<Vec<String>, ConfigurationError> {
        let raw = self.require_any(keys)?;
        let items: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if items.is_empty() {
            return Err(self.missing(keys[0]));
        }
        Ok(items)
    }

    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" => Ok(false),
                _ => Err(self.invalid(key, raw, "expected true or false")),
            },
        }
    }

    /// The `message` attribute, or `default`.
    pub fn message_or(&self, default: &str) -> String {
        self.get("message").unwrap_or(default).to_string()
    }

    pub fn missing(&self, key: &str) -> ConfigurationError {
        ConfigurationError::MissingAttribute {
            rule: self.rule.clone(),
            attribute: key.to_string(),
        }
    }

    pub fn invalid(&self, key: &str, value: &str, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidAttribute {
            rule: self.rule.clone(),
            attribute: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_and_aliases() {
        let config = RuleConfig::new("not_empty").with("parameter", "name");
        assert_eq!(config.require_any(&["params", "parameter"]).unwrap(), "name");
        assert_eq!(
            config.require("params").unwrap_err(),
            ConfigurationError::MissingAttribute {
                rule: "not_empty".to_string(),
                attribute: "params".to_string(),
            }
        );
    }

    #[test]
    fn test_blank_attribute_is_missing() {
        let config = RuleConfig::new("x").with("sql", "   ");
        assert!(config.get("sql").is_none());
        assert!(config.require("sql").is_err());
    }

    #[test]
    fn test_require_list() {
        let config = RuleConfig::new("x").with("params", " a, b ,,c ");
        assert_eq!(config.require_list(&["params"]).unwrap(), vec!["a", "b", "c"]);

        let config = RuleConfig::new("x").with("params", ", ,");
        assert!(config.require_list(&["params"]).is_err());
    }

    #[test]
    fn test_parse_and_flag() {
        let config = RuleConfig::from_pairs("x", [("min", "3"), ("fatal", "yes"), ("max", "abc")]);
        assert_eq!(config.parse::<u32>("min").unwrap(), Some(3));
        assert_eq!(config.parse::<u32>("absent").unwrap(), None);
        assert!(matches!(
            config.parse::<f64>("max"),
            Err(ConfigurationError::InvalidAttribute { .. })
        ));
        assert!(config.flag("fatal", false).unwrap());
        assert!(!config.flag("absent", false).unwrap());
    }

    #[test]
    fn test_message_override() {
        let config = RuleConfig::new("x").with("message", "Custom");
        assert_eq!(config.message_or("Default"), "Custom");
        assert_eq!(RuleConfig::new("x").message_or("Default"), "Default");
    }

    #[test]
    fn test_field_access() {
        let access = FieldAccess::reading(["a"]).and_writing(["a"]);
        assert!(access.mutates());
        assert!(!FieldAccess::reading(["a"]).mutates());
        assert!(FieldAccess::reading(["a"]).and_ambient().mutates());
    }
}
