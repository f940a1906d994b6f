//! Binding raw request parameters to a typed record.
//!
//! Request parameters arrive as strings (possibly several per name). Binding
//! turns them into a one-row `TypedRecord` following the form's declared
//! fields, collecting conversion problems instead of stopping at the first.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::record::{FieldType, FieldValue, RecordError, TypedRecord};
use crate::runtime::config_loader::{FieldDef, Settings};

/// A parameter that could not be converted to its declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingError {
    pub field: String,
    pub field_type: FieldType,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Field '{}' expects {}, got '{}': {}",
            self.field, self.field_type, self.value, self.reason
        )
    }
}

impl std::error::Error for BindingError {}

/// Outcome of binding a request.
#[derive(Debug, Clone)]
pub struct BoundRequest {
    /// One row, positioned on it; unbindable fields are null
    pub record: TypedRecord,
    pub errors: Vec<BindingError>,
}

impl BoundRequest {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Binding errors keyed by field name.
    pub fn errors_by_field(&self) -> IndexMap<String, String> {
        self.errors
            .iter()
            .map(|e| (e.field.clone(), e.to_string()))
            .collect()
    }
}

/// Parse one raw parameter value. Blank input is null.
pub fn parse_value(field_type: FieldType, raw: &str, settings: &Settings) -> Result<FieldValue, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(FieldValue::Null);
    }

    match field_type {
        FieldType::Text => Ok(FieldValue::Text(raw.to_string())),
        FieldType::Integer => trimmed
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|e| e.to_string()),
        FieldType::Decimal => match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(FieldValue::Decimal(n)),
            Ok(_) => Err("value is not a finite number".to_string()),
            Err(e) => Err(e.to_string()),
        },
        FieldType::Date => NaiveDate::parse_from_str(trimmed, &settings.date_format)
            .map(FieldValue::Date)
            .map_err(|e| format!("{} (expected format {})", e, settings.date_format)),
        FieldType::Timestamp => NaiveDateTime::parse_from_str(trimmed, &settings.timestamp_format)
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
            .map(FieldValue::Timestamp)
            .map_err(|e| format!("{} (expected format {})", e, settings.timestamp_format)),
        FieldType::Boolean => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FieldValue::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(FieldValue::Boolean(false)),
            _ => Err("expected true or false".to_string()),
        },
    }
}

/// Bind request parameters to the declared fields.
///
/// Only the first value of a multi-valued parameter is bound; rules that need
/// every value read them from `AmbientState`. Parameters that match no
/// declared field are ignored.
///
/// # Example
///
/// ```ignore
/// let bound = bind_request(&form.fields, ambient.parameters(), &config.settings)?;
/// if !bound.is_ok() {
///     return Err(bound.errors_by_field());
/// }
/// ```
pub fn bind_request(
    fields: &[FieldDef],
    params: &IndexMap<String, Vec<String>>,
    settings: &Settings,
) -> Result<BoundRequest, RecordError> {
    let mut record = TypedRecord::new();
    for field in fields {
        record.declare_field(&field.name, field.field_type)?;
    }
    record.append_row();

    let mut errors = Vec::new();
    for field in fields {
        let Some(raw) = params.get(&field.name).and_then(|values| values.first()) else {
            continue;
        };
        match parse_value(field.field_type, raw, settings) {
            Ok(value) => record.set_value(&field.name, value)?,
            Err(reason) => {
                tracing::debug!(field = %field.name, reason = %reason, "Request parameter not bound");
                errors.push(BindingError {
                    field: field.name.clone(),
                    field_type: field.field_type,
                    value: raw.clone(),
                    reason,
                });
            }
        }
    }

    Ok(BoundRequest { record, errors })
}

/// Request parameters from a JSON object.
///
/// Scalars become one value, arrays several; nulls are dropped.
pub fn params_from_json(value: &JsonValue) -> Result<IndexMap<String, Vec<String>>, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "Request must be a JSON object".to_string())?;

    let mut params = IndexMap::new();
    for (name, value) in object {
        let values = match value {
            JsonValue::Array(items) => items
                .iter()
                .filter_map(|item| json_scalar(name, item).transpose())
                .collect::<Result<Vec<_>, _>>()?,
            other => json_scalar(name, other)?.into_iter().collect(),
        };
        params.insert(name.clone(), values);
    }
    Ok(params)
}

fn json_scalar(name: &str, value: &JsonValue) -> Result<Option<String>, String> {
    match value {
        JsonValue::Null => Ok(None),
        JsonValue::String(s) => Ok(Some(s.clone())),
        JsonValue::Number(n) => Ok(Some(n.to_string())),
        JsonValue::Bool(b) => Ok(Some(b.to_string())),
        _ => Err(format!("Parameter '{}' must be a scalar or a list of scalars", name)),
    }
}

/// One-row record from a JSON object.
///
/// Fields listed in `types` are parsed to that type (strings through
/// `parse_value`); the rest take the type of their JSON value, with strings
/// and nulls as text.
pub fn record_from_json(
    value: &JsonValue,
    types: &IndexMap<String, FieldType>,
    settings: &Settings,
) -> Result<TypedRecord, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "Record must be a JSON object".to_string())?;

    let mut record = TypedRecord::new();
    record.append_row();
    for (name, json) in object {
        let (field_type, value) = match types.get(name) {
            Some(&declared) => (declared, typed_json(name, declared, json, settings)?),
            None => infer_json(name, json)?,
        };
        record.declare_field(name, field_type).map_err(|e| e.to_string())?;
        record.set_value(name, value).map_err(|e| e.to_string())?;
    }
    Ok(record)
}

fn typed_json(name: &str, declared: FieldType, json: &JsonValue, settings: &Settings) -> Result<FieldValue, String> {
    let raw = match json {
        JsonValue::Null => return Ok(FieldValue::Null),
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        _ => return Err(format!("Field '{}' must be a scalar", name)),
    };
    parse_value(declared, &raw, settings).map_err(|reason| format!("Field '{}': {}", name, reason))
}

fn infer_json(name: &str, json: &JsonValue) -> Result<(FieldType, FieldValue), String> {
    match json {
        JsonValue::Null => Ok((FieldType::Text, FieldValue::Null)),
        JsonValue::String(s) => Ok((FieldType::Text, FieldValue::Text(s.clone()))),
        JsonValue::Bool(b) => Ok((FieldType::Boolean, FieldValue::Boolean(*b))),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok((FieldType::Integer, FieldValue::Integer(i))),
            (None, Some(f)) => Ok((FieldType::Decimal, FieldValue::Decimal(f))),
            (None, None) => Err(format!("Field '{}' is not a representable number", name)),
        },
        _ => Err(format!("Field '{}' must be a scalar", name)),
    }
}
