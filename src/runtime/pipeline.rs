//! Validation pipeline: runs a form's rules, in order, against one request.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use uuid::Uuid;

use crate::ambient::AmbientState;
use crate::query::QueryError;
use crate::record::{RecordError, TypedRecord};
use crate::rule_registry::RuleRegistry;
use crate::rules::{ConfigurationError, Rule, RuleContext, RuleError};
use crate::runtime::config_loader::FormConfig;
use crate::sql_template::TemplateError;

/// Message reported for a failed rule that has none of its own.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Validation failed";

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Running,
    Passed,
    Failed,
    ConfigurationFailed,
    /// Stopped by an infrastructure error, e.g. the database was unreachable
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineState::Pending | PipelineState::Running)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Pending => "pending",
            PipelineState::Running => "running",
            PipelineState::Passed => "passed",
            PipelineState::Failed => "failed",
            PipelineState::ConfigurationFailed => "configuration_failed",
            PipelineState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Error that stops a pipeline run. Validation failures are not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    Configuration {
        rule: String,
        source: ConfigurationError,
    },
    Template {
        rule: String,
        source: TemplateError,
    },
    Record {
        rule: String,
        source: RecordError,
    },
    Execution {
        rule: String,
        source: QueryError,
    },
    /// `run` called on a pipeline that is no longer pending
    AlreadyRun(PipelineState),
}

impl PipelineError {
    fn from_rule(rule: &str, err: RuleError) -> Self {
        let rule = rule.to_string();
        match err {
            RuleError::Configuration(source) => PipelineError::Configuration { rule, source },
            RuleError::Template(source) => PipelineError::Template { rule, source },
            RuleError::Record(source) => PipelineError::Record { rule, source },
            RuleError::Execution { source, .. } => PipelineError::Execution { rule, source },
        }
    }

    /// State the pipeline is left in after this error.
    pub fn terminal_state(&self) -> PipelineState {
        match self {
            PipelineError::Execution { .. } => PipelineState::Aborted,
            PipelineError::AlreadyRun(state) => *state,
            _ => PipelineState::ConfigurationFailed,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Configuration { rule, source } => write!(f, "Rule '{}': {}", rule, source),
            PipelineError::Template { rule, source } => write!(f, "Rule '{}': {}", rule, source),
            PipelineError::Record { rule, source } => write!(f, "Rule '{}': {}", rule, source),
            PipelineError::Execution { rule, source } => write!(f, "Rule '{}': {}", rule, source),
            PipelineError::AlreadyRun(state) => {
                write!(f, "Pipeline already ran (state: {})", state)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// Result of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Aggregate result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub passed: bool,
    pub outcomes: Vec<RuleOutcome>,
    /// Rules not evaluated because a fatal rule failed
    pub skipped: Vec<String>,
}

impl PipelineResult {
    /// Error messages of failed rules, keyed by rule name.
    pub fn errors(&self) -> IndexMap<String, String> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| {
                let message = o
                    .error_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                (o.rule.clone(), message)
            })
            .collect()
    }
}

/// A rule as wired into a pipeline.
pub struct ConfiguredRule {
    /// Name reported in results
    pub name: String,
    pub tag: String,
    /// Stop the run when this rule fails
    pub fatal: bool,
    pub rule: Box<dyn Rule>,
}

impl fmt::Debug for ConfiguredRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredRule")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("fatal", &self.fatal)
            .finish()
    }
}

/// A rule reading a field that a later rule rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderingIssue {
    pub reader: String,
    pub writer: String,
    pub field: String,
}

impl fmt::Display for OrderingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' reads '{}' before '{}' rewrites it",
            self.reader, self.field, self.writer
        )
    }
}

/// Ordered rules for one form, run once against one request.
///
/// # Example
///
/// ```ignore
/// let registry = RuleRegistry::builtin();
/// let mut pipeline = ValidationPipeline::from_form(config.form("customer")?, &registry)?;
/// let result = pipeline.run(&mut record, &mut ambient, &ctx)?;
/// for (rule, message) in result.errors() {
///     println!("{}: {}", rule, message);
/// }
/// ```
#[derive(Debug)]
pub struct ValidationPipeline {
    rules: Vec<ConfiguredRule>,
    state: PipelineState,
    run_id: Uuid,
}

impl ValidationPipeline {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            state: PipelineState::Pending,
            run_id: Uuid::new_v4(),
        }
    }

    /// Append a rule. Rules run in the order they are pushed.
    pub fn push(&mut self, rule: ConfiguredRule) {
        self.rules.push(rule);
    }

    /// Build a pipeline from a form's configuration.
    ///
    /// Every rule is constructed up front; the first configuration error is
    /// returned and nothing runs.
    pub fn from_form(form: &FormConfig, registry: &RuleRegistry) -> Result<Self, ConfigurationError> {
        let mut pipeline = Self::new();
        for (index, spec) in form.rules.iter().enumerate() {
            let config = spec.config()?;
            let rule = registry.create(&spec.rule, &config)?;
            pipeline.push(ConfiguredRule {
                name: spec.identity(index),
                tag: spec.tag(),
                fatal: spec.fatal,
                rule,
            });
        }

        for issue in pipeline.ordering_issues() {
            tracing::warn!(reader = %issue.reader, writer = %issue.writer, field = %issue.field, "Rule ordering issue");
        }
        Ok(pipeline)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn rules(&self) -> &[ConfiguredRule] {
        &self.rules
    }

    /// Rules that read a field a later rule writes.
    pub fn ordering_issues(&self) -> Vec<OrderingIssue> {
        let accesses: Vec<_> = self.rules.iter().map(|r| r.rule.access()).collect();
        let mut issues = Vec::new();
        for (i, reader) in accesses.iter().enumerate() {
            for field in &reader.reads {
                for (j, writer) in accesses.iter().enumerate().skip(i + 1) {
                    if writer.writes.contains(field) {
                        issues.push(OrderingIssue {
                            reader: self.rules[i].name.clone(),
                            writer: self.rules[j].name.clone(),
                            field: field.clone(),
                        });
                    }
                }
            }
        }
        issues
    }

    /// Fields referenced by rules that `record` does not declare.
    pub fn missing_fields(&self, record: &TypedRecord) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        for configured in &self.rules {
            let access = configured.rule.access();
            for field in access.reads.iter().chain(access.writes.iter()) {
                if !record.has_field(field) && !missing.contains(field) {
                    missing.push(field.clone());
                }
            }
        }
        missing
    }

    /// Run every rule against the request.
    ///
    /// Rules that rewrite data work on a scratch copy of the record and
    /// ambient state; the copy is committed only when the rule returns
    /// without error.
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineResult)` - All rules ran (or a fatal rule failed)
    /// * `Err(PipelineError)` - A rule could not be evaluated; the pipeline
    ///   is left `ConfigurationFailed` or `Aborted`
    pub fn run(
        &mut self,
        record: &mut TypedRecord,
        ambient: &mut AmbientState,
        ctx: &RuleContext<'_>,
    ) -> Result<PipelineResult, PipelineError> {
        if self.state != PipelineState::Pending {
            return Err(PipelineError::AlreadyRun(self.state));
        }
        self.state = PipelineState::Running;

        let span = tracing::info_span!("pipeline", run_id = %self.run_id);
        let _guard = span.enter();
        tracing::info!(rules = self.rules.len(), "Pipeline started");

        let mut outcomes = Vec::with_capacity(self.rules.len());
        let mut skipped = Vec::new();

        for (index, configured) in self.rules.iter().enumerate() {
            tracing::debug!(rule = %configured.name, tag = %configured.tag, "Evaluating rule");

            let evaluated = if configured.rule.access().mutates() {
                let mut scratch_record = record.clone();
                let mut scratch_ambient = ambient.clone();
                let verdict = configured.rule.evaluate(&mut scratch_record, &mut scratch_ambient, ctx);
                if verdict.is_ok() {
                    *record = scratch_record;
                    *ambient = scratch_ambient;
                }
                verdict
            } else {
                configured.rule.evaluate(record, ambient, ctx)
            };

            let verdict = match evaluated {
                Ok(verdict) => verdict,
                Err(err) => {
                    let err = PipelineError::from_rule(&configured.name, err);
                    self.state = err.terminal_state();
                    tracing::error!(rule = %configured.name, state = %self.state, error = %err, "Pipeline stopped");
                    return Err(err);
                }
            };

            let passed = verdict.is_passed();
            let error_message = if passed { None } else { configured.rule.error_message() };
            if !passed {
                tracing::warn!(rule = %configured.name, message = ?error_message, "Rule failed");
            }
            outcomes.push(RuleOutcome {
                rule: configured.name.clone(),
                passed,
                error_message,
            });

            if !passed && configured.fatal {
                skipped = self.rules[index + 1..].iter().map(|r| r.name.clone()).collect();
                tracing::info!(rule = %configured.name, skipped = skipped.len(), "Fatal rule failed, skipping remaining rules");
                break;
            }
        }

        let passed = outcomes.iter().all(|o| o.passed);
        self.state = if passed { PipelineState::Passed } else { PipelineState::Failed };
        tracing::info!(passed, failures = outcomes.iter().filter(|o| !o.passed).count(), "Pipeline finished");

        Ok(PipelineResult {
            run_id: self.run_id,
            passed,
            outcomes,
            skipped,
        })
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new()
    }
}
