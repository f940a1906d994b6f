//! Runtime for loading rule files, binding requests and running pipelines.

pub mod binding;
pub mod config_loader;
pub mod pipeline;

// Re-export key types
pub use binding::{bind_request, params_from_json, parse_value, record_from_json, BindingError, BoundRequest};
pub use config_loader::{FieldDef, FormConfig, RuleSpec, RulesConfig, Settings};
pub use pipeline::{
    ConfiguredRule, OrderingIssue, PipelineError, PipelineResult, PipelineState, RuleOutcome,
    ValidationPipeline,
};
