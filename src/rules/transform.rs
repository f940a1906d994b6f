//! Rules that rewrite request data. They always pass.

use std::str::FromStr;

use crate::ambient::{AmbientState, Attribute, Scope};
use crate::record::{FieldType, TypedRecord};
use crate::rules::{ConfigurationError, FieldAccess, Rule, RuleConfig, RuleContext, RuleError, Verdict};

/// Where the user's text is anchored in the generated LIKE pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeMode {
    Contains,
    StartsWith,
    EndsWith,
}

impl FromStr for LikeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "contains" => Ok(LikeMode::Contains),
            "starts_with" | "startswith" | "starts" => Ok(LikeMode::StartsWith),
            "ends_with" | "endswith" | "ends" => Ok(LikeMode::EndsWith),
            other => Err(format!("expected contains, starts_with or ends_with, got '{}'", other)),
        }
    }
}

/// LIKE metacharacters a user must not be able to inject. Brackets open a
/// SQL Server character class; backslash is the MySQL escape.
const LIKE_WILDCARDS: [char; 5] = ['%', '_', '[', ']', '\\'];

/// Rewrites a text field into a LIKE pattern.
///
/// Wildcards typed by the user are removed before the pattern is built, so
/// `"50% off"` with `rule: contains` becomes `"%50 off%"`.
#[derive(Debug, Clone)]
pub struct LikePattern {
    parameter: String,
    mode: LikeMode,
}

impl LikePattern {
    pub const TAG: &'static str = "like_pattern";

    pub fn pattern(&self, input: &str) -> String {
        let stripped: String = input.chars().filter(|c| !LIKE_WILDCARDS.contains(c)).collect();
        match self.mode {
            LikeMode::Contains => format!("%{}%", stripped),
            LikeMode::StartsWith => format!("{}%", stripped),
            LikeMode::EndsWith => format!("%{}", stripped),
        }
    }
}

impl Rule for LikePattern {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            parameter: config.require("parameter")?.to_string(),
            mode: config.parse_or("rule", LikeMode::Contains)?,
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        if let Some(text) = record.get_text(&self.parameter)? {
            let pattern = self.pattern(text);
            record.set_value(&self.parameter, pattern)?;
        }
        Ok(Verdict::Passed)
    }

    fn error_message(&self) -> Option<String> {
        None
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.parameter.clone()]).and_writing([self.parameter.clone()])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Upper,
    Lower,
}

impl FromStr for CaseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upper" | "uppercase" => Ok(CaseMode::Upper),
            "lower" | "lowercase" => Ok(CaseMode::Lower),
            other => Err(format!("expected upper or lower, got '{}'", other)),
        }
    }
}

/// Normalises the case (and optionally surrounding whitespace) of text fields.
#[derive(Debug, Clone)]
pub struct CaseTransform {
    fields: Vec<String>,
    mode: CaseMode,
    trim: bool,
}

impl CaseTransform {
    pub const TAG: &'static str = "case_transform";
}

impl Rule for CaseTransform {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let mode = config
            .parse::<CaseMode>("rule")?
            .ok_or_else(|| config.missing("rule"))?;
        Ok(Self {
            fields: config.require_list(&["params", "parameter"])?,
            mode,
            trim: config.flag("trim", false)?,
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        for field in &self.fields {
            let Some(text) = record.get_text(field)? else {
                continue;
            };
            let text = if self.trim { text.trim() } else { text };
            let normalized = match self.mode {
                CaseMode::Upper => text.to_uppercase(),
                CaseMode::Lower => text.to_lowercase(),
            };
            record.set_value(field, normalized)?;
        }
        Ok(Verdict::Passed)
    }

    fn error_message(&self) -> Option<String> {
        None
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading(self.fields.iter().cloned()).and_writing(self.fields.iter().cloned())
    }
}

/// Splits a delimited text field into a one-column record stored in session
/// or request scope under `key`.
///
/// Empty tokens are dropped, so empty or null input yields an empty table.
#[derive(Debug, Clone)]
pub struct StringToTable {
    parameter: String,
    key: String,
    separator: String,
    column: String,
    scope: Scope,
    trim: bool,
}

impl StringToTable {
    pub const TAG: &'static str = "string_to_table";

    /// Build the table for `input`.
    pub fn expand(&self, input: Option<&str>) -> Result<TypedRecord, RuleError> {
        let tokens: Vec<String> = input
            .unwrap_or("")
            .split(self.separator.as_str())
            .map(|t| if self.trim { t.trim() } else { t })
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(TypedRecord::single_column(&self.column, FieldType::Text, tokens)?)
    }
}

impl Rule for StringToTable {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        // The separator is taken verbatim so that a single space is allowed
        let separator = match config.attributes().get("separator") {
            Some(sep) if !sep.is_empty() => sep.clone(),
            Some(sep) => return Err(config.invalid("separator", sep, "separator must not be empty")),
            None => ",".to_string(),
        };
        Ok(Self {
            parameter: config.require("parameter")?.to_string(),
            key: config.require("key")?.to_string(),
            separator,
            column: config.get("column").unwrap_or("item").to_string(),
            scope: config.parse_or("scope", Scope::Session)?,
            trim: config.flag("trim", false)?,
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let table = self.expand(record.get_text(&self.parameter)?)?;
        tracing::debug!(key = %self.key, rows = table.row_count(), scope = ?self.scope, "Expanded delimited field");
        ambient.store(self.scope, self.key.clone(), Attribute::Record(table));
        Ok(Verdict::Passed)
    }

    fn error_message(&self) -> Option<String> {
        None
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.parameter.clone()]).and_ambient()
    }
}
