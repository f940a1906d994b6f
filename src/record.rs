//! Typed, cursor-based tabular record.
//!
//! `TypedRecord` is the data-exchange format shared by the binder, the rules,
//! the SQL template engine and query executors. It holds an ordered schema of
//! named, typed fields and zero or more rows, with a single movable cursor.

use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Declared semantic type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[serde(alias = "varchar", alias = "string")]
    Text,
    #[serde(alias = "int", alias = "bigint")]
    Integer,
    #[serde(alias = "numeric", alias = "double")]
    Decimal,
    Date,
    #[serde(alias = "datetime")]
    Timestamp,
    #[serde(alias = "bool")]
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
            FieldType::Boolean => "boolean",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Timestamp)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    /// Accepts the canonical names plus the common SQL spellings
    /// (`varchar`, `int`, `numeric`, `datetime`, `bool`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "varchar" | "string" | "char" => Ok(FieldType::Text),
            "integer" | "int" | "bigint" | "long" => Ok(FieldType::Integer),
            "decimal" | "numeric" | "double" | "float" => Ok(FieldType::Decimal),
            "date" => Ok(FieldType::Date),
            "timestamp" | "datetime" => Ok(FieldType::Timestamp),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            other => Err(format!("Unknown field type: {}", other)),
        }
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Boolean(bool),
}

impl FieldValue {
    /// Name of the runtime kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Date(_) => "date",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Boolean(_) => "boolean",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integer and decimal values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Temporal view; dates resolve to midnight.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::Date(d) => d.and_hms_opt(0, 0, 0),
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Coerce into the declared type of a field.
    ///
    /// Null fits every type. Integer widens to decimal; decimal narrows to
    /// integer only when it carries no fractional part. Everything else must
    /// already be of the declared kind.
    fn coerce_to(self, field_type: FieldType) -> Result<FieldValue, FieldValue> {
        match (field_type, self) {
            (_, FieldValue::Null) => Ok(FieldValue::Null),
            (FieldType::Text, v @ FieldValue::Text(_)) => Ok(v),
            (FieldType::Integer, v @ FieldValue::Integer(_)) => Ok(v),
            (FieldType::Integer, FieldValue::Decimal(d)) => {
                if d.is_finite() && d.fract() == 0.0 && d.abs() < i64::MAX as f64 {
                    Ok(FieldValue::Integer(d as i64))
                } else {
                    Err(FieldValue::Decimal(d))
                }
            }
            (FieldType::Decimal, v @ FieldValue::Decimal(_)) => Ok(v),
            (FieldType::Decimal, FieldValue::Integer(i)) => Ok(FieldValue::Decimal(i as f64)),
            (FieldType::Date, v @ FieldValue::Date(_)) => Ok(v),
            (FieldType::Timestamp, v @ FieldValue::Timestamp(_)) => Ok(v),
            (FieldType::Boolean, v @ FieldValue::Boolean(_)) => Ok(v),
            (_, other) => Err(other),
        }
    }

    /// Type-appropriate equality used by `find_row`.
    fn matches(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => a.as_f64() == b.as_f64(),
            (a, b) if a.as_datetime().is_some() && b.as_datetime().is_some() => {
                a.as_datetime() == b.as_datetime()
            }
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Decimal(d) => write!(f, "{}", d),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
            FieldValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Decimal(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(d: NaiveDate) -> Self {
        FieldValue::Date(d)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(ts: NaiveDateTime) -> Self {
        FieldValue::Timestamp(ts)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Integer(i) => serializer.serialize_i64(*i),
            FieldValue::Decimal(d) => serializer.serialize_f64(*d),
            FieldValue::Boolean(b) => serializer.serialize_bool(*b),
            FieldValue::Date(_) | FieldValue::Timestamp(_) => {
                serializer.serialize_str(&self.to_string())
            }
        }
    }
}

/// Error type for record operations
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Field declared twice
    Schema(String),
    FieldNotFound(String),
    TypeMismatch {
        field: String,
        expected: FieldType,
        actual: &'static str,
    },
    CursorOutOfRange {
        position: usize,
        row_count: usize,
    },
    /// NaN or infinite value stored in a decimal field
    NonFinite(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Schema(name) => write!(f, "Field '{}' is already declared", name),
            RecordError::FieldNotFound(name) => write!(f, "Field '{}' is not declared", name),
            RecordError::TypeMismatch { field, expected, actual } => write!(
                f,
                "Type mismatch on field '{}': expected {}, got {}",
                field, expected, actual
            ),
            RecordError::CursorOutOfRange { position, row_count } => write!(
                f,
                "Cursor position {} is out of range (row count {})",
                position, row_count
            ),
            RecordError::NonFinite(name) => {
                write!(f, "Field '{}' cannot hold a non-finite number", name)
            }
        }
    }
}

impl std::error::Error for RecordError {}

/// Mutable, ordered, schema-carrying table with a cursor.
///
/// # Example
///
/// ```
/// use formguard::record::{TypedRecord, FieldType, FieldValue};
///
/// let mut rs = TypedRecord::new();
/// rs.declare_field("name", FieldType::Text).unwrap();
/// rs.append_row();
/// rs.set_value("name", "Alice").unwrap();
/// assert_eq!(rs.get_value("name").unwrap(), &FieldValue::Text("Alice".into()));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedRecord {
    fields: IndexMap<String, FieldType>,
    /// Each row holds one value per declared field, in declaration order.
    rows: Vec<Vec<FieldValue>>,
    cursor: usize,
}

impl TypedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a one-column record, one row per value.
    pub fn single_column<I, V>(name: &str, field_type: FieldType, values: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        let mut rs = Self::new();
        rs.declare_field(name, field_type)?;
        for value in values {
            let row = rs.append_row();
            rs.set_value_at(row, name, value)?;
        }
        Ok(rs)
    }

    /// Declare a new typed field. Existing rows get a null cell.
    pub fn declare_field(&mut self, name: &str, field_type: FieldType) -> Result<(), RecordError> {
        if self.fields.contains_key(name) {
            return Err(RecordError::Schema(name.to_string()));
        }
        self.fields.insert(name.to_string(), field_type);
        for row in &mut self.rows {
            row.push(FieldValue::Null);
        }
        Ok(())
    }

    /// Append an all-null row and return its index. The cursor does not move.
    pub fn append_row(&mut self) -> usize {
        self.rows.push(vec![FieldValue::Null; self.fields.len()]);
        self.rows.len() - 1
    }

    /// Remove a row. The cursor is clamped so it never points further than
    /// one past the last row.
    pub fn delete_row(&mut self, index: usize) -> Result<(), RecordError> {
        if index >= self.rows.len() {
            return Err(RecordError::CursorOutOfRange {
                position: index,
                row_count: self.rows.len(),
            });
        }
        self.rows.remove(index);
        self.cursor = self.cursor.min(self.rows.len());
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_type(&self, name: &str) -> Result<FieldType, RecordError> {
        self.fields
            .get(name)
            .copied()
            .ok_or_else(|| RecordError::FieldNotFound(name.to_string()))
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(name, t)| (name.as_str(), *t))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(|k| k.as_str()).collect()
    }

    /// Empty record with the same schema.
    pub fn copy_structure(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            rows: Vec::new(),
            cursor: 0,
        }
    }

    // Cursor

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_past_end(&self) -> bool {
        self.cursor >= self.rows.len()
    }

    pub fn move_to(&mut self, index: usize) -> Result<(), RecordError> {
        if index >= self.rows.len() {
            return Err(RecordError::CursorOutOfRange {
                position: index,
                row_count: self.rows.len(),
            });
        }
        self.cursor = index;
        Ok(())
    }

    pub fn move_first(&mut self) {
        self.cursor = 0;
    }

    /// Advance the cursor. Returns `false` once the cursor is past the end.
    pub fn move_next(&mut self) -> bool {
        if self.cursor < self.rows.len() {
            self.cursor += 1;
        }
        self.cursor < self.rows.len()
    }

    // Cell access

    fn field_index(&self, name: &str) -> Result<(usize, FieldType), RecordError> {
        self.fields
            .get_full(name)
            .map(|(idx, _, t)| (idx, *t))
            .ok_or_else(|| RecordError::FieldNotFound(name.to_string()))
    }

    fn check_row(&self, row: usize) -> Result<(), RecordError> {
        if row >= self.rows.len() {
            return Err(RecordError::CursorOutOfRange {
                position: row,
                row_count: self.rows.len(),
            });
        }
        Ok(())
    }

    pub fn value_at(&self, row: usize, name: &str) -> Result<&FieldValue, RecordError> {
        let (idx, _) = self.field_index(name)?;
        self.check_row(row)?;
        Ok(&self.rows[row][idx])
    }

    pub fn set_value_at(
        &mut self,
        row: usize,
        name: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), RecordError> {
        let (idx, field_type) = self.field_index(name)?;
        self.check_row(row)?;
        let value = value.into().coerce_to(field_type).map_err(|v| RecordError::TypeMismatch {
            field: name.to_string(),
            expected: field_type,
            actual: v.kind(),
        })?;
        if matches!(value, FieldValue::Decimal(d) if !d.is_finite()) {
            return Err(RecordError::NonFinite(name.to_string()));
        }
        self.rows[row][idx] = value;
        Ok(())
    }

    /// Value of a field at the cursor row.
    pub fn get_value(&self, name: &str) -> Result<&FieldValue, RecordError> {
        self.value_at(self.cursor, name)
    }

    /// Set a field at the cursor row.
    pub fn set_value(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), RecordError> {
        self.set_value_at(self.cursor, name, value)
    }

    pub fn is_null(&self, name: &str) -> Result<bool, RecordError> {
        Ok(self.get_value(name)?.is_null())
    }

    fn typed<T>(
        &self,
        name: &str,
        expected: FieldType,
        pick: impl FnOnce(&FieldValue) -> Option<T>,
    ) -> Result<Option<T>, RecordError> {
        let field_type = self.field_type(name)?;
        if field_type != expected {
            return Err(RecordError::TypeMismatch {
                field: name.to_string(),
                expected,
                actual: field_type.as_str(),
            });
        }
        Ok(pick(self.get_value(name)?))
    }

    pub fn get_text(&self, name: &str) -> Result<Option<&str>, RecordError> {
        let field_type = self.field_type(name)?;
        if field_type != FieldType::Text {
            return Err(RecordError::TypeMismatch {
                field: name.to_string(),
                expected: FieldType::Text,
                actual: field_type.as_str(),
            });
        }
        Ok(self.get_value(name)?.as_str())
    }

    pub fn get_integer(&self, name: &str) -> Result<Option<i64>, RecordError> {
        self.typed(name, FieldType::Integer, |v| match v {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        })
    }

    pub fn get_decimal(&self, name: &str) -> Result<Option<f64>, RecordError> {
        self.typed(name, FieldType::Decimal, FieldValue::as_f64)
    }

    pub fn get_date(&self, name: &str) -> Result<Option<NaiveDate>, RecordError> {
        self.typed(name, FieldType::Date, |v| match v {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        })
    }

    pub fn get_timestamp(&self, name: &str) -> Result<Option<NaiveDateTime>, RecordError> {
        self.typed(name, FieldType::Timestamp, |v| match v {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        })
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, RecordError> {
        self.typed(name, FieldType::Boolean, |v| match v {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        })
    }

    /// Index of the first row whose `name` cell equals `value`.
    ///
    /// The probe is coerced to the field type first, so an integer probe
    /// finds a decimal cell of the same magnitude.
    pub fn find_row(&self, name: &str, value: impl Into<FieldValue>) -> Result<Option<usize>, RecordError> {
        let (idx, field_type) = self.field_index(name)?;
        let probe = value.into().coerce_to(field_type).map_err(|v| RecordError::TypeMismatch {
            field: name.to_string(),
            expected: field_type,
            actual: v.kind(),
        })?;
        Ok(self.rows.iter().position(|row| row[idx].matches(&probe)))
    }

    /// Indexes of every row whose `name` cell equals `value`, ascending.
    pub fn find_all(&self, name: &str, value: impl Into<FieldValue>) -> Result<Vec<usize>, RecordError> {
        let (idx, field_type) = self.field_index(name)?;
        let probe = value.into().coerce_to(field_type).map_err(|v| RecordError::TypeMismatch {
            field: name.to_string(),
            expected: field_type,
            actual: v.kind(),
        })?;
        Ok(self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row[idx].matches(&probe))
            .map(|(i, _)| i)
            .collect())
    }

    /// Column values in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&FieldValue>, RecordError> {
        let (idx, _) = self.field_index(name)?;
        Ok(self.rows.iter().map(|row| &row[idx]).collect())
    }
}

struct RowView<'a> {
    fields: &'a IndexMap<String, FieldType>,
    values: &'a [FieldValue],
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.fields.keys().zip(self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct FieldView<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    field_type: FieldType,
}

impl Serialize for TypedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields: Vec<FieldView<'_>> = self
            .fields
            .iter()
            .map(|(name, t)| FieldView { name, field_type: *t })
            .collect();
        let rows: Vec<RowView<'_>> = self
            .rows
            .iter()
            .map(|values| RowView { fields: &self.fields, values })
            .collect();

        let mut state = serializer.serialize_struct("TypedRecord", 2)?;
        state.serialize_field("fields", &fields)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}
