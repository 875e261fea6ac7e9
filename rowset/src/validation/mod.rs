use crate::messages;
use crate::schema::{ColumnDefinition, DataType};
use crate::value::{parse_datetime, Value};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Kind of a column-level validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnErrorKind {
    TypeMismatch,
    WidthOverflow,
    RuleViolation,
    StrictReferenceViolation,
    RequiredFieldMissing,
    DuplicateKey,
    /// Raised by a custom column or field hook
    Custom,
}

/// A validation failure recorded against one column of one row.
/// These are values, never `Err`s of the crate error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnError {
    pub kind: ColumnErrorKind,
    pub message: String,
}

impl ColumnError {
    pub fn new(kind: ColumnErrorKind, message: impl Into<String>) -> Self {
        ColumnError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ColumnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Messages collected while validating a set of rows
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !message.is_empty() && !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    /// One line per distinct message
    pub fn message(&self) -> String {
        messages::join_lines(&self.errors)
    }
}

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(-?\d+)(\.\d+)?$").expect("Invalid number regex"));

/// Data-type format check. Calculated columns and blank values always pass.
pub fn check_type(column: &ColumnDefinition, value: &Value) -> Result<(), ColumnError> {
    if column.is_calc || value.is_blank() {
        return Ok(());
    }

    let ok = match (column.data_type, value) {
        (DataType::Number, Value::Number(_)) => true,
        // Conversion keeps only literals it could not parse as text
        (DataType::Number, Value::String(s)) if NUMBER_PATTERN.is_match(s.trim()) => {
            return Err(ColumnError::new(
                ColumnErrorKind::TypeMismatch,
                messages::format(
                    messages::NUMBER_OUT_OF_RANGE,
                    &[column.display_name(), s.trim()],
                ),
            ));
        }
        (DataType::Number, _) => false,
        (DataType::Datetime, Value::DateTime(_)) => true,
        (DataType::Datetime, Value::String(s)) => parse_datetime(s).is_some(),
        (DataType::Datetime, _) => false,
        _ => true,
    };

    if ok {
        Ok(())
    } else {
        Err(ColumnError::new(
            ColumnErrorKind::TypeMismatch,
            messages::format(
                messages::VALIDATE_TYPE,
                &[column.display_name(), &value.to_string()],
            ),
        ))
    }
}

/// Width check. Strings are measured in characters; numbers by integer digits
/// against `width - dec` and by fractional digits against `precision`.
/// A zero width leaves the value unbounded.
pub fn check_width(
    column: &ColumnDefinition,
    value: &Value,
    precision: u32,
) -> Result<(), ColumnError> {
    if column.is_calc || value.is_blank() || column.data_width == 0 {
        return Ok(());
    }

    match (column.data_type, value) {
        (DataType::String, Value::String(s)) => {
            if s.chars().count() > column.data_width as usize {
                return Err(ColumnError::new(
                    ColumnErrorKind::WidthOverflow,
                    messages::format(
                        messages::VALIDATE_LENGTH,
                        &[column.display_name(), &column.data_width.to_string()],
                    ),
                ));
            }
        }
        (DataType::Number, Value::Number(d)) => {
            let max_integer = column.data_width.saturating_sub(column.data_dec);
            let d = d.normalized();
            if d.scale() > precision || d.integer_digits() > max_integer {
                return Err(ColumnError::new(
                    ColumnErrorKind::WidthOverflow,
                    messages::format(
                        messages::VALIDATE_LENGTH_NUM,
                        &[
                            column.display_name(),
                            &max_integer.to_string(),
                            &precision.to_string(),
                        ],
                    ),
                ));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Pattern check against the column's compiled `setRule`
pub fn check_rule(
    column: &ColumnDefinition,
    rule: Option<&Regex>,
    value: &Value,
) -> Result<(), ColumnError> {
    let Some(rule) = rule else {
        return Ok(());
    };
    if value.is_blank() {
        return Ok(());
    }

    let text = value.to_string();
    if rule.is_match(&text) {
        Ok(())
    } else {
        Err(ColumnError::new(
            ColumnErrorKind::RuleViolation,
            messages::format(messages::VALIDATE_RULE, &[column.display_name(), &text]),
        ))
    }
}

pub fn check_required(column: &ColumnDefinition, value: &Value) -> Result<(), ColumnError> {
    if column.is_required && value.is_blank() {
        Err(ColumnError::new(
            ColumnErrorKind::RequiredFieldMissing,
            messages::format(messages::VALUE_REQUIRED, &[column.display_name()]),
        ))
    } else {
        Ok(())
    }
}

pub fn strict_reference_error(column: &ColumnDefinition, value: &Value) -> ColumnError {
    ColumnError::new(
        ColumnErrorKind::StrictReferenceViolation,
        messages::format(
            messages::VALIDATE_STRICT_REF,
            &[column.display_name(), &value.to_string()],
        ),
    )
}
