//! Two-operand arithmetic tool.

use fmbridge_core::{ArgumentType, Tool, ToolArgument, ToolResult};
use serde_json::{Map, Value};

pub const NAME: &str = "calculate";

/// The model passes the whole expression under this argument name.
const ARGUMENT: &str = "arguments";

const UNSUPPORTED: &str =
    "Unsupported operation. Supported operations are: add (+), subtract (-), multiply (*), and divide (/)";

const UNSUPPORTED_WORDS: &[&str] = &[
    "sqrt", "square root", "power", "^", "**", "sin", "cos", "tan", "log", "ln", "exp", "abs",
    "mod", "%", "factorial", "!", "pi",
];

/// Longer spellings first so they are not split by their prefixes.
const OPERATOR_WORDS: &[(&str, &str)] = &[
    ("multipliedby", "*"),
    ("dividedby", "/"),
    ("subtract", "-"),
    ("multiply", "*"),
    ("divide", "/"),
    ("minus", "-"),
    ("times", "*"),
    ("plus", "+"),
    ("add", "+"),
    ("×", "*"),
    ("÷", "/"),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("invalid expression format: {0}")]
    Format(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// Evaluates `<number> <op> <number>`, accepting word operators.
///
/// # Errors
///
/// Returns an error for anything other than exactly two operands around one
/// operator, or for division by zero.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let normalized = normalize(expression);
    let format_error = || CalcError::Format(normalized.clone());

    let (lhs, operator, rhs) = split_operation(&normalized).ok_or_else(format_error)?;
    let a = parse_operand(lhs).ok_or_else(format_error)?;
    let b = parse_operand(rhs).ok_or_else(format_error)?;

    match operator {
        '+' => Ok(a + b),
        '-' => Ok(a - b),
        '*' => Ok(a * b),
        '/' if b == 0.0 => Err(CalcError::DivisionByZero),
        '/' => Ok(a / b),
        _ => Err(format_error()),
    }
}

fn normalize(expression: &str) -> String {
    let compact: String = expression
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    OPERATOR_WORDS
        .iter()
        .fold(compact, |text, (word, symbol)| text.replace(word, symbol))
}

/// Splits on the first operator after the first character, so a leading
/// minus stays with the left operand.
fn split_operation(text: &str) -> Option<(&str, char, &str)> {
    let (index, operator) = text
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '+' | '-' | '*' | '/'))?;
    Some((&text[..index], operator, &text[index + operator.len_utf8()..]))
}

fn parse_operand(text: &str) -> Option<f64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let well_formed = !digits.is_empty()
        && !digits.starts_with('.')
        && !digits.ends_with('.')
        && digits.chars().filter(|&c| c == '.').count() <= 1
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !well_formed {
        return None;
    }
    text.parse().ok()
}

fn has_unsupported_operation(expression: &str) -> bool {
    let lowered = expression.to_lowercase();
    UNSUPPORTED_WORDS.iter().any(|word| lowered.contains(word))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Calculator;

impl Tool for Calculator {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Calculate mathematical expressions with add, subtract, multiply, or divide operations"
    }

    fn parameters(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new(ARGUMENT, ArgumentType::String)
                .with_description(
                    "Mathematical expression with two numbers and one operation (add, subtract, multiply, divide)",
                )
                .required(),
        ]
    }

    fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<ToolResult> {
        let Some(expression) = args.get(ARGUMENT).and_then(Value::as_str) else {
            return Ok(ToolResult::failure("arguments must be a string"));
        };

        Ok(match evaluate(expression) {
            Ok(value) => ToolResult::success(format!("{value:.2}")),
            Err(CalcError::Format(_)) if has_unsupported_operation(expression) => {
                ToolResult::failure(UNSUPPORTED)
            }
            Err(e) => ToolResult::failure(format!("error evaluating expression '{expression}': {e}")),
        })
    }
}
