//! Tree-walking evaluator.

use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

use super::parser::{BinaryOp, Expr, Function, Input, UnaryOp};
use super::{format_number, number_value, to_text, truthy, type_name};
use crate::error::ExprError;
use crate::key::resolve_path;

pub(super) struct Scope<'a> {
    pub line: &'a str,
    /// Present only when the program reads `fields`.
    pub fields: Option<Value>,
    pub this: Option<&'a Value>,
}

pub(super) fn evaluate<'a>(expr: &'a Expr, scope: &'a Scope<'a>) -> Result<Cow<'a, Value>, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(Cow::Borrowed(value)),
        Expr::Input(Input::Line) => Ok(Cow::Owned(Value::String(scope.line.to_string()))),
        Expr::Input(Input::Fields) => Ok(scope
            .fields
            .as_ref()
            .map_or(Cow::Owned(Value::Null), Cow::Borrowed)),
        Expr::Input(Input::This) => Ok(scope.this.map_or(Cow::Owned(Value::Null), Cow::Borrowed)),
        Expr::Member(target, name) => Ok(project(evaluate(target, scope)?, name)),
        Expr::Index(target, index) => {
            let target = evaluate(target, scope)?;
            let index = evaluate(index, scope)?;
            let key = match &*index {
                Value::String(s) => Cow::Borrowed(s.as_str()),
                Value::Number(n) => Cow::Owned(format_number(n.as_f64().unwrap_or(f64::NAN))),
                _ => return Ok(Cow::Owned(Value::Null)),
            };
            Ok(project(target, &key))
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, scope)?;
            unary(*op, &value).map(Cow::Owned)
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = evaluate(left, scope)?;
            if truthy(&left) {
                evaluate(right, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = evaluate(left, scope)?;
            if truthy(&left) {
                Ok(left)
            } else {
                evaluate(right, scope)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            binary(*op, &left, &right).map(Cow::Owned)
        }
        Expr::Conditional(condition, then, otherwise) => {
            if truthy(&*evaluate(condition, scope)?) {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        Expr::Call(function, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(*function, &args).map(Cow::Owned)
        }
    }
}

/// Member or element lookup; anything missing is null.
fn project<'a>(target: Cow<'a, Value>, key: &str) -> Cow<'a, Value> {
    match target {
        Cow::Borrowed(value) => {
            resolve_path(value, &[key]).map_or(Cow::Owned(Value::Null), Cow::Borrowed)
        }
        Cow::Owned(value) => Cow::Owned(resolve_path(&value, &[key]).cloned().unwrap_or(Value::Null)),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ExprError {
    ExprError::TypeMismatch {
        op: op.symbol().to_string(),
        left: type_name(left),
        right: type_name(right),
    }
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, ExprError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(value))),
        UnaryOp::Negate => match as_number(value) {
            Some(n) => number_value(-n),
            None => Err(ExprError::TypeMismatch {
                op: "unary -".to_string(),
                left: type_name(value),
                right: "nothing",
            }),
        },
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Add if left.is_string() || right.is_string() => {
            let mut text = to_text(left).into_owned();
            text.push_str(&to_text(right));
            Ok(Value::String(text))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (Value::Number(_), Value::Number(_)) => {
                    as_number(left).and_then(|a| as_number(right).and_then(|b| a.partial_cmp(&b)))
                }
                _ => return Err(mismatch(op, left, right)),
            };
            let result = ordering.is_some_and(|ordering| match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            });
            Ok(Value::Bool(result))
        }
        _ => {
            let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
                return Err(mismatch(op, left, right));
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
                    return Err(ExprError::DivisionByZero);
                }
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            number_value(result)
        }
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => as_number(left) == as_number(right),
        _ => left == right,
    }
}

fn invalid(function: Function, message: String) -> ExprError {
    ExprError::InvalidArgument {
        function: function.name(),
        message,
    }
}

fn number_arg(function: Function, value: &Value) -> Result<f64, ExprError> {
    as_number(value)
        .ok_or_else(|| invalid(function, format!("expected number, got {}", type_name(value))))
}

fn call(function: Function, args: &[Cow<'_, Value>]) -> Result<Value, ExprError> {
    let text = |i: usize| to_text(&args[i]);

    match function {
        Function::Lower => Ok(Value::String(text(0).to_lowercase())),
        Function::Upper => Ok(Value::String(text(0).to_uppercase())),
        Function::Trim => Ok(Value::String(text(0).trim().to_string())),
        Function::Str => Ok(Value::String(text(0).into_owned())),
        Function::Len => {
            let len = match &*args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(invalid(
                        function,
                        format!("expected string, array or object, got {}", type_name(other)),
                    ));
                }
            };
            Ok(Value::from(len))
        }
        Function::Substr => {
            let chars: Vec<char> = text(0).chars().collect();
            let total = chars.len() as i64;

            let start = number_arg(function, &args[1])?.trunc() as i64;
            let start = (if start < 0 { total + start } else { start }).clamp(0, total);

            let end = match args.get(2) {
                Some(len) => {
                    let len = number_arg(function, len)?.trunc() as i64;
                    start.saturating_add(len.max(0)).min(total)
                }
                None => total,
            };

            Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
        }
        Function::Split => {
            let source = text(0);
            let separator = text(1);
            let pieces: Vec<Value> = if separator.is_empty() {
                source.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                source
                    .split(&*separator)
                    .map(|piece| Value::String(piece.to_string()))
                    .collect()
            };
            Ok(Value::Array(pieces))
        }
        Function::Join => {
            let Value::Array(items) = &*args[0] else {
                return Err(invalid(
                    function,
                    format!("expected array, got {}", type_name(&args[0])),
                ));
            };
            let pieces: Vec<Cow<'_, str>> = items.iter().map(to_text).collect();
            Ok(Value::String(pieces.join(&*text(1))))
        }
        Function::Num => match &*args[0] {
            Value::Number(_) => Ok(args[0].clone().into_owned()),
            Value::Bool(b) => Ok(Value::from(u8::from(*b))),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) if !s.trim().is_empty() => number_value(n),
                _ => Err(invalid(function, format!("cannot convert {s:?} to a number"))),
            },
            other => Err(invalid(
                function,
                format!("cannot convert {} to a number", type_name(other)),
            )),
        },
        Function::Floor => number_value(number_arg(function, &args[0])?.floor()),
    }
}
