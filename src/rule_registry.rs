//! Rule registry: maps rule identifiers to constructors.
//!
//! The registry is closed at startup. Each entry knows how to build one rule
//! type from its `RuleConfig`, so a misconfigured rule is reported when the
//! pipeline is assembled, not when a request arrives.

use convert_case::{Case, Casing};
use indexmap::IndexMap;

use crate::rules::{
    ArrayCheck, CaseTransform, CompareFields, ConfigurationError, DateRange, DuplicateCheck,
    LikePattern, NotEmpty, NumericRange, RegexMatch, Rule, RuleConfig, SessionDuplicateCheck,
    StringToTable, TodayCheck,
};

/// Builds a boxed rule from its configuration.
pub type RuleConstructor = fn(&RuleConfig) -> Result<Box<dyn Rule>, ConfigurationError>;

fn construct<R: Rule + 'static>(config: &RuleConfig) -> Result<Box<dyn Rule>, ConfigurationError> {
    Ok(Box::new(R::configure(config)?))
}

/// Registry for looking up and constructing rules by identifier
pub struct RuleRegistry {
    constructors: IndexMap<String, RuleConstructor>,
}

impl RuleRegistry {
    /// Create a new empty rule registry
    pub fn new() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Registry holding every built-in rule.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_rule::<NotEmpty>(NotEmpty::TAG);
        registry.register_rule::<ArrayCheck>(ArrayCheck::TAG);
        registry.register_rule::<RegexMatch>(RegexMatch::TAG);
        registry.register_rule::<DateRange>(DateRange::TAG);
        registry.register_rule::<NumericRange>(NumericRange::TAG);
        registry.register_rule::<CompareFields>(CompareFields::TAG);
        registry.register_rule::<TodayCheck>(TodayCheck::TAG);
        registry.register_rule::<DuplicateCheck>(DuplicateCheck::TAG);
        registry.register_rule::<SessionDuplicateCheck>(SessionDuplicateCheck::TAG);
        registry.register_rule::<LikePattern>(LikePattern::TAG);
        registry.register_rule::<CaseTransform>(CaseTransform::TAG);
        registry.register_rule::<StringToTable>(StringToTable::TAG);
        registry
    }

    /// Register a constructor under `tag`. The tag is normalised first, so
    /// `register("MyRuleValidator", ..)` is found as `my_rule`.
    pub fn register(&mut self, tag: &str, constructor: RuleConstructor) {
        self.constructors.insert(Self::normalize(tag), constructor);
    }

    /// Register a rule type by its `configure` constructor.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = RuleRegistry::builtin();
    /// registry.register_rule::<PostcodeCheck>("postcode_check");
    /// ```
    pub fn register_rule<R: Rule + 'static>(&mut self, tag: &str) {
        self.register(tag, construct::<R>);
    }

    /// Canonical form of a rule identifier.
    ///
    /// Qualified names keep their last dotted segment, CamelCase becomes
    /// snake_case and a trailing `_validator` is dropped:
    /// `com.acme.DateRangeValidator` → `date_range`.
    pub fn normalize(id: &str) -> String {
        let last = id.trim().rsplit('.').next().unwrap_or_default();
        let snake = last.to_case(Case::Snake);
        match snake.strip_suffix("_validator") {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => snake,
        }
    }

    /// Look up the constructor for an identifier.
    pub fn resolve(&self, id: &str) -> Option<RuleConstructor> {
        self.constructors.get(&Self::normalize(id)).copied()
    }

    /// Construct a rule from its identifier and configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(Box<dyn Rule>)` - Rule configured and ready to evaluate
    /// * `Err(ConfigurationError::UnknownRule)` - No rule registered under `id`
    /// * `Err(ConfigurationError)` - The rule rejected its attributes
    pub fn create(&self, id: &str, config: &RuleConfig) -> Result<Box<dyn Rule>, ConfigurationError> {
        let constructor = self
            .resolve(id)
            .ok_or_else(|| ConfigurationError::UnknownRule(id.to_string()))?;
        constructor(config)
    }

    /// Check if a rule is registered
    pub fn has_rule(&self, id: &str) -> bool {
        self.resolve(id).is_some()
    }

    /// Registered tags, in registration order
    pub fn tags(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
