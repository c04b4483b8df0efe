//! Key expression language.
//!
//! Expressions are compiled once at startup and evaluated per record against
//! three inputs: `line` (the record text), `fields` (the record split on the
//! delimiter) and, in JSON mode, `this` (the parsed document). Values at
//! runtime are plain JSON values.

mod eval;
mod lexer;
mod parser;

use serde_json::{Number, Value};
use std::borrow::Cow;

use crate::error::ExprError;
use parser::{Expr, Input};

/// A compiled key expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    expr: Expr,
    uses_fields: bool,
}

impl Program {
    /// Compile an expression. `json` enables the `this` input.
    pub fn compile(source: &str, json: bool) -> Result<Self, ExprError> {
        let expr = parser::parse(source, json)?;
        Ok(Self {
            source: source.to_string(),
            uses_fields: expr.uses(Input::Fields),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one record.
    pub fn evaluate(
        &self,
        line: &str,
        delimiter: &str,
        document: Option<&Value>,
    ) -> Result<Value, ExprError> {
        let fields = self.uses_fields.then(|| {
            Value::Array(
                line.split(delimiter)
                    .map(|piece| Value::String(piece.to_string()))
                    .collect(),
            )
        });

        let scope = eval::Scope {
            line,
            fields,
            this: document,
        };
        eval::evaluate(&self.expr, &scope).map(Cow::into_owned)
    }
}

/// Largest magnitude at which every integer is exactly representable.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Build a JSON number, keeping integral values as integers.
pub(crate) fn number_value(n: f64) -> Result<Value, ExprError> {
    if !n.is_finite() {
        return Err(ExprError::NonFiniteNumber);
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExprError::NonFiniteNumber)
}

/// Render a number without a trailing `.0` for integral values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Name of a value's type, as reported in errors.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// String form used by concatenation and the string functions.
pub(crate) fn to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Cow::Owned(i.to_string()),
            None => Cow::Owned(format_number(n.as_f64().unwrap_or(f64::NAN))),
        },
        other => Cow::Owned(other.to_string()),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
