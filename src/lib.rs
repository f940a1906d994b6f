//! # formguard: Declarative Form Validation
//!
//! formguard validates and normalises form submissions with an ordered list
//! of configured rules, and renders SQL templates whose `${fld:name}` markers
//! are replaced by correctly typed, escaped literals.
//!
//! ## Features
//!
//! - **Typed records**: `TypedRecord` carries named, typed fields and rows with a cursor
//! - **SQL templating**: dialect-aware literal rendering (PostgreSQL/ANSI, MySQL, SQL Server)
//! - **Rule library**: presence, format, range, duplicate and transformation rules
//! - **Rule registry**: closed, startup-time mapping from identifiers to rule constructors
//! - **Pipelines**: ordered evaluation with fatal rules, ordering checks and run ids
//!
//! ## Example: rules file
//!
//! ```yaml
//! settings:
//!   dialect: postgres
//!   templates: sql
//! forms:
//!   customer:
//!     fields:
//!       - { name: code, type: text }
//!       - { name: valid_from, type: date }
//!       - { name: valid_to, type: date }
//!     rules:
//!       - rule: not_empty
//!         id: code_required
//!         fatal: true
//!         attributes: { params: code }
//!       - rule: DateRangeValidator
//!         attributes: { date1: valid_from, date2: valid_to }
//!       - rule: duplicate_check
//!         attributes:
//!           sql: customer-code-exists
//!           message: Customer code already in use
//! ```
//!
//! ## Example: rendering SQL
//!
//! ```
//! use formguard::record::{FieldType, TypedRecord};
//! use formguard::sql_template::{Dialect, SqlTemplateEngine};
//!
//! let mut rs = TypedRecord::new();
//! rs.declare_field("code", FieldType::Text).unwrap();
//! rs.append_row();
//! rs.set_value("code", "O'Brien").unwrap();
//!
//! let engine = SqlTemplateEngine::new(Dialect::Ansi);
//! let sql = engine.render("SELECT 1 FROM customer WHERE code = ${fld:code}", &rs).unwrap();
//! assert_eq!(sql, "SELECT 1 FROM customer WHERE code = 'O''Brien'");
//! ```

// Core data model
pub mod ambient;
pub mod record;

// SQL templates and query execution
pub mod query;
pub mod sql_template;

// Rules and their registry
pub mod rule_registry;
pub mod rules;

// Config loading, binding and pipelines
pub mod runtime;

// Re-export key types
pub use ambient::{AmbientState, Attribute, Scope};
pub use query::{MemoryExecutor, OfflineExecutor, QueryError, QueryExecutor};
pub use record::{FieldType, FieldValue, RecordError, TypedRecord};
pub use rule_registry::RuleRegistry;
pub use rules::{ConfigurationError, FieldAccess, Rule, RuleConfig, RuleContext, RuleError, Verdict};
pub use sql_template::{
    Dialect, DirectoryTemplates, MemoryTemplates, SqlTemplateEngine, TemplateError, TemplateSource,
};

// Re-export runtime types
pub use runtime::{
    bind_request, PipelineError, PipelineResult, PipelineState, RulesConfig, ValidationPipeline,
};
