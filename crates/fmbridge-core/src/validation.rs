//! Tool argument validation.
//!
//! Checks run in two passes: every required argument must be present, then
//! each provided argument is checked against its declaration. The first
//! failure wins. Arguments the tool did not declare are ignored.

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::tool::{ArgumentType, ToolArgument};

/// Why a set of tool arguments was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required argument: {name}")]
    MissingRequired { name: String },

    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: ArgumentError },
}

/// Why a single argument value was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgumentError {
    #[error("expected {expected}, got {actual}")]
    WrongType {
        expected: ArgumentType,
        actual: &'static str,
    },

    #[error("string too short: {len} < {min}")]
    TooShort { len: usize, min: usize },

    #[error("string too long: {len} > {max}")]
    TooLong { len: usize, max: usize },

    #[error("invalid regex pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("string does not match pattern: {pattern}")]
    PatternMismatch { pattern: String },

    #[error("value not in allowed enum values")]
    NotAllowed,

    #[error("number too small: {value} < {minimum}")]
    NumberTooSmall { value: f64, minimum: f64 },

    #[error("number too large: {value} > {maximum}")]
    NumberTooLarge { value: f64, maximum: f64 },

    #[error("expected integer, got float with decimal part")]
    Fractional,

    #[error("integer too small: {value} < {minimum}")]
    IntegerTooSmall { value: i64, minimum: f64 },

    #[error("integer too large: {value} > {maximum}")]
    IntegerTooLarge { value: i64, maximum: f64 },

    /// The integer does not fit in an `i64`.
    #[error("integer out of range: {value}")]
    IntegerOutOfRange { value: String },
}

/// Validates `args` against the declared `parameters`.
///
/// # Errors
///
/// Returns the first missing required argument, or else the first provided
/// argument that violates its declaration.
pub fn validate_arguments(
    args: &Map<String, Value>,
    parameters: &[ToolArgument],
) -> Result<(), ValidationError> {
    if let Some(missing) = parameters
        .iter()
        .find(|param| param.required && !args.contains_key(&param.name))
    {
        return Err(ValidationError::MissingRequired {
            name: missing.name.clone(),
        });
    }

    for param in parameters {
        let Some(value) = args.get(&param.name) else {
            continue;
        };
        validate_value(value, param).map_err(|reason| ValidationError::InvalidArgument {
            name: param.name.clone(),
            reason,
        })?;
    }

    Ok(())
}

fn validate_value(value: &Value, param: &ToolArgument) -> Result<(), ArgumentError> {
    let wrong_type = || ArgumentError::WrongType {
        expected: param.kind,
        actual: json_kind(value),
    };

    match param.kind {
        ArgumentType::String => validate_string(value.as_str().ok_or_else(wrong_type)?, param),
        ArgumentType::Number => validate_number(value.as_f64().ok_or_else(wrong_type)?, param),
        ArgumentType::Integer => match value {
            Value::Number(number) => validate_integer(number, param),
            _ => Err(wrong_type()),
        },
        ArgumentType::Boolean => value.is_boolean().then_some(()).ok_or_else(wrong_type),
        ArgumentType::Array => value.is_array().then_some(()).ok_or_else(wrong_type),
        ArgumentType::Object => value.is_object().then_some(()).ok_or_else(wrong_type),
    }
}

fn validate_string(text: &str, param: &ToolArgument) -> Result<(), ArgumentError> {
    // Lengths are in bytes, matching the token estimate's unit.
    let len = text.len();
    if let Some(min) = param.min_length
        && len < min
    {
        return Err(ArgumentError::TooShort { len, min });
    }
    if let Some(max) = param.max_length
        && len > max
    {
        return Err(ArgumentError::TooLong { len, max });
    }

    if let Some(pattern) = &param.pattern {
        let regex = Regex::new(pattern).map_err(|e| ArgumentError::InvalidPattern {
            reason: e.to_string(),
        })?;
        if !regex.is_match(text) {
            return Err(ArgumentError::PatternMismatch {
                pattern: pattern.clone(),
            });
        }
    }

    if !param.allowed.is_empty() && !param.allowed.iter().any(|allowed| allowed == text) {
        return Err(ArgumentError::NotAllowed);
    }

    Ok(())
}

fn validate_number(value: f64, param: &ToolArgument) -> Result<(), ArgumentError> {
    if let Some(minimum) = param.minimum
        && value < minimum
    {
        return Err(ArgumentError::NumberTooSmall { value, minimum });
    }
    if let Some(maximum) = param.maximum
        && value > maximum
    {
        return Err(ArgumentError::NumberTooLarge { value, maximum });
    }
    Ok(())
}

/// 2^63, the first integral `f64` outside the `i64` range.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "bounds are f64 like JSON numbers; in-range integral floats convert exactly"
)]
fn validate_integer(number: &Number, param: &ToolArgument) -> Result<(), ArgumentError> {
    let out_of_range = || ArgumentError::IntegerOutOfRange {
        value: number.to_string(),
    };
    let value = if let Some(value) = number.as_i64() {
        value
    } else if let Some(value) = number.as_u64() {
        i64::try_from(value).map_err(|_| out_of_range())?
    } else {
        let float = number.as_f64().unwrap_or(f64::NAN);
        if !float.is_finite() || float.fract().abs() > 0.0 {
            return Err(ArgumentError::Fractional);
        }
        if !(-I64_LIMIT..I64_LIMIT).contains(&float) {
            return Err(out_of_range());
        }
        float as i64
    };

    if let Some(minimum) = param.minimum
        && (value as f64) < minimum
    {
        return Err(ArgumentError::IntegerTooSmall { value, minimum });
    }
    if let Some(maximum) = param.maximum
        && (value as f64) > maximum
    {
        return Err(ArgumentError::IntegerTooLarge { value, maximum });
    }
    Ok(())
}

/// JSON kind of `value`, for error messages.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_missing_required_number_is_reported_by_name() {
        let params = [ToolArgument::new("a", ArgumentType::Number).required()];

        let err = validate_arguments(&Map::new(), &params).expect_err("missing");

        assert_eq!(err.to_string(), "missing required argument: a");
    }

    #[test]
    fn test_string_outside_enum_is_rejected() {
        // Arrange
        let params = [ToolArgument::new("operation", ArgumentType::String)
            .required()
            .with_allowed(["add", "subtract"])];

        // Act
        let err = validate_arguments(&args(json!({"operation": "multiply"})), &params)
            .expect_err("not allowed");

        // Assert
        assert_eq!(
            err.to_string(),
            "invalid argument operation: value not in allowed enum values"
        );
    }

    #[test]
    fn test_string_inside_enum_is_accepted() {
        let params = [ToolArgument::new("operation", ArgumentType::String)
            .with_allowed(["add", "subtract"])];

        assert!(validate_arguments(&args(json!({"operation": "add"})), &params).is_ok());
    }

    #[test]
    fn test_integer_below_minimum_is_rejected() {
        let params = [ToolArgument::new("count", ArgumentType::Integer).with_range(Some(0.0), None)];

        let err = validate_arguments(&args(json!({"count": -1})), &params).expect_err("too small");

        let ValidationError::InvalidArgument { name, reason } = err else {
            panic!("expected InvalidArgument, got {err:?}");
        };
        assert_eq!(name, "count");
        assert_eq!(
            reason,
            ArgumentError::IntegerTooSmall {
                value: -1,
                minimum: 0.0
            }
        );
    }

    #[test]
    fn test_integer_rejects_fractional_value() {
        let params = [ToolArgument::new("count", ArgumentType::Integer)];

        let err = validate_arguments(&args(json!({"count": 1.5})), &params).expect_err("fraction");

        assert_eq!(
            err.to_string(),
            "invalid argument count: expected integer, got float with decimal part"
        );
    }

    #[test]
    fn test_integer_accepts_integral_float() {
        let params = [ToolArgument::new("count", ArgumentType::Integer).with_range(Some(0.0), Some(10.0))];

        assert!(validate_arguments(&args(json!({"count": 2.0})), &params).is_ok());
    }

    #[test]
    fn test_integer_above_maximum_is_rejected() {
        let params = [ToolArgument::new("count", ArgumentType::Integer).with_range(None, Some(3.0))];

        let err = validate_arguments(&args(json!({"count": 4})), &params).expect_err("too large");

        assert!(err.to_string().contains("integer too large"));
    }

    #[test]
    fn test_integer_outside_i64_is_rejected_not_clamped() {
        // Arrange
        let params = [ToolArgument::new("count", ArgumentType::Integer).with_range(None, Some(3.0))];
        let test_cases = [json!({"count": u64::MAX}), json!({"count": 1e19}), json!({"count": -1e19})];

        for value in test_cases {
            // Act
            let err = validate_arguments(&args(value.clone()), &params).expect_err("out of range");

            // Assert
            let ValidationError::InvalidArgument { reason, .. } = err else {
                panic!("expected InvalidArgument, got {err:?}");
            };
            assert!(
                matches!(reason, ArgumentError::IntegerOutOfRange { .. }),
                "for {value}: {reason:?}"
            );
        }
    }

    #[test]
    fn test_integer_at_i64_bounds_is_checked_against_range() {
        let params = [ToolArgument::new("count", ArgumentType::Integer).with_range(None, Some(3.0))];

        let err = validate_arguments(&args(json!({"count": i64::MAX})), &params).expect_err("too large");

        assert!(err.to_string().contains(&format!("integer too large: {}", i64::MAX)));
    }

    #[test]
    fn test_number_range_is_inclusive() {
        let params = [ToolArgument::new("t", ArgumentType::Number).with_range(Some(0.0), Some(1.0))];

        assert!(validate_arguments(&args(json!({"t": 0.0})), &params).is_ok());
        assert!(validate_arguments(&args(json!({"t": 1.0})), &params).is_ok());
        assert!(validate_arguments(&args(json!({"t": 1.01})), &params).is_err());
        assert!(validate_arguments(&args(json!({"t": -0.1})), &params).is_err());
    }

    #[test]
    fn test_type_mismatch_names_expected_and_actual_kinds() {
        let params = [ToolArgument::new("flag", ArgumentType::Boolean)];

        let err = validate_arguments(&args(json!({"flag": "yes"})), &params).expect_err("mismatch");

        assert_eq!(err.to_string(), "invalid argument flag: expected boolean, got string");
    }

    #[test]
    fn test_array_and_object_kinds_are_checked() {
        let params = [
            ToolArgument::new("items", ArgumentType::Array),
            ToolArgument::new("meta", ArgumentType::Object),
        ];

        assert!(validate_arguments(&args(json!({"items": [1, 2], "meta": {}})), &params).is_ok());
        assert!(validate_arguments(&args(json!({"items": {}})), &params).is_err());
        assert!(validate_arguments(&args(json!({"meta": []})), &params).is_err());
    }

    #[test]
    fn test_string_length_bounds() {
        let params = [ToolArgument::new("code", ArgumentType::String).with_length(Some(2), Some(3))];

        let short = validate_arguments(&args(json!({"code": "a"})), &params).expect_err("short");
        let long = validate_arguments(&args(json!({"code": "abcd"})), &params).expect_err("long");

        assert_eq!(short.to_string(), "invalid argument code: string too short: 1 < 2");
        assert_eq!(long.to_string(), "invalid argument code: string too long: 4 > 3");
        assert!(validate_arguments(&args(json!({"code": "ab"})), &params).is_ok());
    }

    #[test]
    fn test_string_pattern_is_enforced() {
        let params = [ToolArgument::new("zip", ArgumentType::String).with_pattern(r"^\d{5}$")];

        assert!(validate_arguments(&args(json!({"zip": "12345"})), &params).is_ok());
        let err = validate_arguments(&args(json!({"zip": "12a45"})), &params).expect_err("mismatch");
        assert!(err.to_string().contains("does not match pattern"));
    }

    #[test]
    fn test_invalid_pattern_is_a_validation_error() {
        let params = [ToolArgument::new("x", ArgumentType::String).with_pattern("(unclosed")];

        let err = validate_arguments(&args(json!({"x": "anything"})), &params).expect_err("bad regex");

        assert!(err.to_string().contains("invalid regex pattern"));
    }

    #[test]
    fn test_missing_required_checked_before_provided_values() {
        // Arrange - a bad provided value and a missing required one
        let params = [
            ToolArgument::new("bad", ArgumentType::Number),
            ToolArgument::new("needed", ArgumentType::String).required(),
        ];

        // Act
        let err = validate_arguments(&args(json!({"bad": "nan"})), &params).expect_err("invalid");

        // Assert
        assert_eq!(
            err,
            ValidationError::MissingRequired {
                name: "needed".to_string()
            }
        );
    }

    #[test]
    fn test_undeclared_and_optional_arguments_are_ignored() {
        let params = [ToolArgument::new("opt", ArgumentType::Integer)];

        assert!(validate_arguments(&args(json!({"extra": "whatever"})), &params).is_ok());
    }
}
