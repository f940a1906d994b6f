//! Session- and request-scoped state handed to every rule.
//!
//! Rules never reach for process-wide state: whatever lives outside the
//! record (session attributes, multi-valued request parameters, derived
//! tables) travels in an `AmbientState` owned by the request layer.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::Serialize;

use crate::record::TypedRecord;

/// Where a rule stores a derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Session,
    Request,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "session" => Ok(Scope::Session),
            "request" => Ok(Scope::Request),
            other => Err(format!("Unknown scope: {}", other)),
        }
    }
}

/// A value held in session or request scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Attribute {
    Text(String),
    Record(TypedRecord),
}

impl Attribute {
    pub fn as_record(&self) -> Option<&TypedRecord> {
        match self {
            Attribute::Record(rs) => Some(rs),
            Attribute::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Attribute::Text(s) => Some(s),
            Attribute::Record(_) => None,
        }
    }
}

/// Ambient state for a single request.
///
/// Request parameters are read-only once the state is built. Session and
/// request attributes are writable by rules.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AmbientState {
    session: IndexMap<String, Attribute>,
    request_attributes: IndexMap<String, Attribute>,
    #[serde(skip)]
    parameters: IndexMap<String, Vec<String>>,
    /// Date used by rules comparing against "today"
    #[serde(skip)]
    today: Option<NaiveDate>,
}

impl AmbientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ambient state with the raw request parameters.
    pub fn with_parameters(parameters: IndexMap<String, Vec<String>>) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    /// Builder-style helper adding one parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.entry(name.into()).or_default().push(value.into());
        self
    }

    /// Pin the date rules treat as "today".
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// First value of a request parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    /// All values of a multi-valued request parameter.
    pub fn parameter_values(&self, name: &str) -> &[String] {
        self.parameters
            .get(name)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn parameters(&self) -> &IndexMap<String, Vec<String>> {
        &self.parameters
    }

    pub fn session_get(&self, key: &str) -> Option<&Attribute> {
        self.session.get(key)
    }

    pub fn session_set(&mut self, key: impl Into<String>, value: Attribute) {
        self.session.insert(key.into(), value);
    }

    pub fn session_remove(&mut self, key: &str) -> Option<Attribute> {
        self.session.shift_remove(key)
    }

    pub fn session_record(&self, key: &str) -> Option<&TypedRecord> {
        self.session.get(key).and_then(Attribute::as_record)
    }

    pub fn request_get(&self, key: &str) -> Option<&Attribute> {
        self.request_attributes.get(key)
    }

    pub fn request_set(&mut self, key: impl Into<String>, value: Attribute) {
        self.request_attributes.insert(key.into(), value);
    }

    /// Store an attribute in the given scope.
    pub fn store(&mut self, scope: Scope, key: impl Into<String>, value: Attribute) {
        match scope {
            Scope::Session => self.session_set(key, value),
            Scope::Request => self.request_set(key, value),
        }
    }

    pub fn get(&self, scope: Scope, key: &str) -> Option<&Attribute> {
        match scope {
            Scope::Session => self.session_get(key),
            Scope::Request => self.request_get(key),
        }
    }

    /// Drop request-scoped attributes, keeping the session.
    pub fn end_request(&mut self) {
        self.request_attributes.clear();
        self.parameters.clear();
    }

    /// Start the next request of the same session.
    pub fn begin_request(&mut self, parameters: IndexMap<String, Vec<String>>) {
        self.end_request();
        self.parameters = parameters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldType;

    #[test]
    fn test_parameters() {
        let ambient = AmbientState::new()
            .with_parameter("rowindex", "2")
            .with_parameter("tags", "a")
            .with_parameter("tags", "b");

        assert_eq!(ambient.parameter("rowindex"), Some("2"));
        assert_eq!(ambient.parameter_values("tags"), &["a".to_string(), "b".to_string()]);
        assert!(ambient.parameter_values("missing").is_empty());
        assert_eq!(ambient.parameter("missing"), None);
    }

    #[test]
    fn test_scopes() {
        let mut ambient = AmbientState::new();
        let rs = TypedRecord::single_column("item", FieldType::Text, vec!["x"]).unwrap();

        ambient.store(Scope::Session, "items", Attribute::Record(rs.clone()));
        ambient.store(Scope::Request, "note", Attribute::Text("hi".to_string()));

        assert_eq!(ambient.session_record("items"), Some(&rs));
        assert_eq!(ambient.get(Scope::Request, "note").and_then(Attribute::as_text), Some("hi"));
        assert!(ambient.get(Scope::Session, "note").is_none());

        ambient.end_request();
        assert!(ambient.request_get("note").is_none());
        assert!(ambient.session_get("items").is_some());
    }

    #[test]
    fn test_begin_request_keeps_session() {
        let mut ambient = AmbientState::new().with_parameter("a", "1");
        ambient.session_set("user", Attribute::Text("ann".to_string()));

        ambient.begin_request([("b".to_string(), vec!["2".to_string()])].into_iter().collect());
        assert_eq!(ambient.parameter("a"), None);
        assert_eq!(ambient.parameter("b"), Some("2"));
        assert!(ambient.session_get("user").is_some());
    }

    #[test]
    fn test_pinned_today() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let ambient = AmbientState::new().with_today(day);
        assert_eq!(ambient.today(), day);
    }
}
