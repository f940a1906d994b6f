//! Range and cross-field comparison rules.
//!
//! All rules here are permissive on null: if an operand is missing the rule
//! passes and leaves presence checks to `not_empty`.

use chrono::{Days, Months, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::ambient::AmbientState;
use crate::record::{FieldType, FieldValue, RecordError, TypedRecord};
use crate::rules::{ConfigurationError, FieldAccess, Rule, RuleConfig, RuleContext, RuleError, Verdict};

/// Read a date or timestamp field at the cursor.
fn temporal(record: &TypedRecord, field: &str) -> Result<Option<NaiveDateTime>, RecordError> {
    let value = record.get_value(field)?;
    if value.is_null() {
        return Ok(None);
    }
    value.as_datetime().map(Some).ok_or_else(|| RecordError::TypeMismatch {
        field: field.to_string(),
        expected: FieldType::Date,
        actual: value.kind(),
    })
}

fn numeric(record: &TypedRecord, field: &str) -> Result<Option<f64>, RecordError> {
    let value = record.get_value(field)?;
    if value.is_null() {
        return Ok(None);
    }
    value.as_f64().map(Some).ok_or_else(|| RecordError::TypeMismatch {
        field: field.to_string(),
        expected: FieldType::Decimal,
        actual: value.kind(),
    })
}

/// Unit of the optional maximum span in `date_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Day,
    Month,
    Year,
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "d" | "day" | "days" => Ok(IntervalUnit::Day),
            "m" | "month" | "months" => Ok(IntervalUnit::Month),
            "y" | "year" | "years" => Ok(IntervalUnit::Year),
            other => Err(format!("expected day, month or year, got '{}'", other)),
        }
    }
}

impl IntervalUnit {
    fn add(&self, start: NaiveDateTime, amount: u32) -> Option<NaiveDateTime> {
        match self {
            IntervalUnit::Day => start.checked_add_days(Days::new(u64::from(amount))),
            IntervalUnit::Month => start.checked_add_months(Months::new(amount)),
            IntervalUnit::Year => start.checked_add_months(Months::new(amount.checked_mul(12)?)),
        }
    }
}

/// `date2` must not precede `date1`; optionally the span must not exceed
/// `interval` units of `intervalType`.
#[derive(Debug, Clone)]
pub struct DateRange {
    date1: String,
    date2: String,
    interval: Option<(u32, IntervalUnit)>,
    message: String,
}

impl DateRange {
    pub const TAG: &'static str = "date_range";
}

impl Rule for DateRange {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let date1 = config.require("date1")?.to_string();
        let date2 = config.require("date2")?.to_string();
        let interval = match config.parse::<u32>("interval")? {
            None => None,
            Some(n) => {
                let unit = config.parse_or("intervalType", IntervalUnit::Day)?;
                Some((n, unit))
            }
        };
        Ok(Self {
            date1,
            date2,
            interval,
            message: config.message_or("The end date must not be before the start date"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let (start, end) = match (temporal(record, &self.date1)?, temporal(record, &self.date2)?) {
            (Some(start), Some(end)) => (start, end),
            _ => return Ok(Verdict::Passed),
        };

        if end < start {
            return Ok(Verdict::Failed);
        }

        if let Some((amount, unit)) = self.interval {
            // Overflowing the calendar means no realistic span can exceed it
            if let Some(limit) = unit.add(start, amount) {
                if end > limit {
                    return Ok(Verdict::Failed);
                }
            }
        }

        Ok(Verdict::Passed)
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.date1.clone(), self.date2.clone()])
    }
}

/// Numeric field must lie within `[min, max]`; either bound may be omitted.
#[derive(Debug, Clone)]
pub struct NumericRange {
    parameter: String,
    min: Option<f64>,
    max: Option<f64>,
    message: String,
}

impl NumericRange {
    pub const TAG: &'static str = "numeric_range";
}

impl Rule for NumericRange {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let parameter = config.require("parameter")?.to_string();
        let bound = |key: &str| -> Result<Option<f64>, ConfigurationError> {
            match config.parse::<f64>(key)? {
                Some(v) if !v.is_finite() => {
                    Err(config.invalid(key, &v.to_string(), "bound must be a finite number"))
                }
                v => Ok(v),
            }
        };
        let min = bound("min")?;
        let max = bound("max")?;
        match (min, max) {
            (None, None) => return Err(config.missing("min")),
            (Some(lo), Some(hi)) if lo > hi => {
                return Err(config.invalid("max", &hi.to_string(), "max is lower than min"));
            }
            _ => {}
        }
        Ok(Self {
            parameter,
            min,
            max,
            message: config.message_or("Value is out of range"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let Some(value) = numeric(record, &self.parameter)? else {
            return Ok(Verdict::Passed);
        };
        let above_min = self.min.map_or(true, |lo| value >= lo);
        let below_max = self.max.map_or(true, |hi| value <= hi);
        Ok(Verdict::from_bool(above_min && below_max))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.parameter.clone()])
    }
}

/// Comparison operator for `compare_fields`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" => Ok(Operator::Eq),
            "ne" | "!=" | "<>" => Ok(Operator::Ne),
            "lt" | "<" => Ok(Operator::Lt),
            "le" | "<=" => Ok(Operator::Le),
            "gt" | ">" => Ok(Operator::Gt),
            "ge" | ">=" => Ok(Operator::Ge),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

impl Operator {
    pub fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }
}

/// Order two non-null values of compatible kinds.
fn compare(left: &FieldValue, right: &FieldValue) -> Option<Ordering> {
    match (left, right) {
        (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
        (FieldValue::Boolean(a), FieldValue::Boolean(b)) => Some(a.cmp(b)),
        (FieldValue::Integer(a), FieldValue::Integer(b)) => Some(a.cmp(b)),
        _ => {
            if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
                return a.partial_cmp(&b);
            }
            match (left.as_datetime(), right.as_datetime()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            }
        }
    }
}

/// `field1 <operator> field2` must hold.
#[derive(Debug, Clone)]
pub struct CompareFields {
    field1: String,
    field2: String,
    operator: Operator,
    message: String,
}

impl CompareFields {
    pub const TAG: &'static str = "compare_fields";
}

impl Rule for CompareFields {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let operator = config
            .parse::<Operator>("operator")?
            .ok_or_else(|| config.missing("operator"))?;
        Ok(Self {
            field1: config.require("field1")?.to_string(),
            field2: config.require("field2")?.to_string(),
            operator,
            message: config.message_or("Field values are inconsistent"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        _ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let left = record.get_value(&self.field1)?;
        let right = record.get_value(&self.field2)?;
        if left.is_null() || right.is_null() {
            return Ok(Verdict::Passed);
        }
        let ordering = compare(left, right).ok_or_else(|| RecordError::TypeMismatch {
            field: self.field2.clone(),
            expected: record.field_type(&self.field1).unwrap_or(FieldType::Text),
            actual: right.kind(),
        })?;
        Ok(Verdict::from_bool(self.operator.holds(ordering)))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.field1.clone(), self.field2.clone()])
    }
}

/// How a date relates to today in `today_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodayRule {
    Past,
    Future,
    NotPast,
    NotFuture,
}

impl FromStr for TodayRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "past" | "before" => Ok(TodayRule::Past),
            "future" | "after" => Ok(TodayRule::Future),
            "not_past" | "today_or_later" => Ok(TodayRule::NotPast),
            "not_future" | "today_or_earlier" => Ok(TodayRule::NotFuture),
            other => Err(format!("unknown rule '{}'", other)),
        }
    }
}

impl TodayRule {
    fn holds(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match self {
            TodayRule::Past => date < today,
            TodayRule::Future => date > today,
            TodayRule::NotPast => date >= today,
            TodayRule::NotFuture => date <= today,
        }
    }
}

/// Compares a date field against the ambient "today".
#[derive(Debug, Clone)]
pub struct TodayCheck {
    parameter: String,
    rule: TodayRule,
    message: String,
}

impl TodayCheck {
    pub const TAG: &'static str = "today_check";
}

impl Rule for TodayCheck {
    fn configure(config: &RuleConfig) -> Result<Self, ConfigurationError> {
        let rule = config
            .parse::<TodayRule>("rule")?
            .ok_or_else(|| config.missing("rule"))?;
        Ok(Self {
            parameter: config.require("parameter")?.to_string(),
            rule,
            message: config.message_or("Date is out of the allowed range"),
        })
    }

    fn evaluate(
        &self,
        record: &mut TypedRecord,
        ambient: &mut AmbientState,
        _ctx: &RuleContext<'_>,
    ) -> Result<Verdict, RuleError> {
        let Some(when) = temporal(record, &self.parameter)? else {
            return Ok(Verdict::Passed);
        };
        Ok(Verdict::from_bool(self.rule.holds(when.date(), ambient.today())))
    }

    fn error_message(&self) -> Option<String> {
        Some(self.message.clone())
    }

    fn access(&self) -> FieldAccess {
        FieldAccess::reading([self.parameter.clone()])
    }
}
