//! Rules file loader.
//!
//! Loads per-form rule lists and engine settings from YAML.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

use crate::record::FieldType;
use crate::rule_registry::RuleRegistry;
use crate::rules::{ConfigurationError, RuleConfig};
use crate::sql_template::Dialect;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// SQL dialect name (`postgres`, `mysql`, `sqlserver`, ...)
    #[serde(default)]
    pub dialect: Option<String>,

    /// Directory holding SQL templates, relative to the rules file
    #[serde(default)]
    pub templates: Option<PathBuf>,

    /// chrono format used to bind date parameters
    #[serde(default = "default_date_format")]
    pub date_format: String,

    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialect: None,
            templates: None,
            date_format: default_date_format(),
            timestamp_format: default_timestamp_format(),
        }
    }
}

impl Settings {
    /// Parsed dialect; ANSI when none is configured.
    pub fn dialect(&self) -> Result<Dialect, String> {
        match &self.dialect {
            None => Ok(Dialect::default()),
            Some(name) => name.parse(),
        }
    }
}

/// A declared form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// One rule entry in a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule identifier, e.g. `not_empty` or `DateRangeValidator`
    pub rule: String,

    /// Name used in results; defaults to `<tag>[<index>]`
    #[serde(default)]
    pub id: Option<String>,

    /// Stop the pipeline when this rule fails
    #[serde(default)]
    pub fatal: bool,

    #[serde(default)]
    pub attributes: IndexMap<String, YamlValue>,
}

impl RuleSpec {
    /// Normalised registry tag
    pub fn tag(&self) -> String {
        RuleRegistry::normalize(&self.rule)
    }

    /// Name of the rule at `index` within its form.
    pub fn identity(&self, index: usize) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("{}[{}]", self.tag(), index),
        }
    }

    /// String attribute map for the rule.
    ///
    /// YAML scalars are stringified and sequences of scalars are joined with
    /// commas, so `params: [name, email]` equals `params: "name,email"`.
    pub fn config(&self) -> Result<RuleConfig, ConfigurationError> {
        let tag = self.tag();
        let mut config = RuleConfig::new(tag.clone());
        for (key, value) in &self.attributes {
            let text = match value {
                YamlValue::Sequence(items) => items
                    .iter()
                    .map(|item| scalar_to_string(item).ok_or_else(|| not_scalar(&tag, key)))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(","),
                other => scalar_to_string(other).ok_or_else(|| not_scalar(&tag, key))?,
            };
            config = config.with(key.clone(), text);
        }
        Ok(config)
    }
}

fn scalar_to_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::Null => Some(String::new()),
        YamlValue::Bool(b) => Some(b.to_string()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn not_scalar(tag: &str, key: &str) -> ConfigurationError {
    ConfigurationError::InvalidAttribute {
        rule: tag.to_string(),
        attribute: key.to_string(),
        value: "<nested>".to_string(),
        reason: "attribute values must be scalars or lists of scalars".to_string(),
    }
}

/// Fields and ordered rules of one form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormConfig {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

/// Parsed rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub settings: Settings,

    /// Forms keyed by name, in file order
    #[serde(default)]
    pub forms: IndexMap<String, FormConfig>,

    /// Directory of the file this config was loaded from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl RulesConfig {
    /// Load the rules configuration from a YAML file.
    ///
    /// # Arguments
    /// * `path` - Path to the rules file
    ///
    /// # Errors
    /// Returns error if the file doesn't exist or has invalid format
    ///
    /// # Example
    /// ```ignore
    /// use formguard::runtime::RulesConfig;
    ///
    /// let config = RulesConfig::load_from_file("config/examples/customer/rules.yaml")?;
    /// println!("Forms: {:?}", config.form_names());
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let mut config = Self::from_yaml_str(&contents)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        config.base_dir = path.parent().map(Path::to_path_buf);

        tracing::debug!(path = %path.display(), forms = config.forms.len(), "Loaded rules config");
        Ok(config)
    }

    /// Parse a rules configuration from YAML text.
    pub fn from_yaml_str(contents: &str) -> Result<Self, String> {
        serde_yaml::from_str(contents).map_err(|e| format!("Failed to parse YAML: {}", e))
    }

    /// Get form configuration by name.
    pub fn form(&self, name: &str) -> Option<&FormConfig> {
        self.forms.get(name)
    }

    pub fn form_names(&self) -> Vec<&str> {
        self.forms.keys().map(String::as_str).collect()
    }

    /// Template directory, resolved against the rules file location.
    pub fn templates_dir(&self) -> PathBuf {
        let base = self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        match &self.settings.templates {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base,
        }
    }

    /// Check every rule resolves and accepts its attributes, and that rule
    /// ids are unique within a form.
    pub fn validate(&self, registry: &RuleRegistry) -> Result<(), ConfigurationError> {
        self.settings.dialect().map_err(ConfigurationError::Load)?;

        for (form_name, form) in &self.forms {
            let mut seen = HashSet::new();
            for (index, spec) in form.rules.iter().enumerate() {
                let name = spec.identity(index);
                if !seen.insert(name.clone()) {
                    return Err(ConfigurationError::Load(format!(
                        "Form '{}' has duplicate rule id '{}'",
                        form_name, name
                    )));
                }
                registry.create(&spec.rule, &spec.config()?)?;
            }
        }
        Ok(())
    }
}
