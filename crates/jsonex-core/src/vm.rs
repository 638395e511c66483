//! Evaluator for parsed [`Expr`](crate::expr::Expr) trees.
//!
//! Direct match on `Expr` variants. Names resolve through the [`Scope`]
//! chain; reading a lazy field re-enters the document (and possibly this
//! evaluator) synchronously.

use crate::error::EvalError;
use crate::expr::Expr;
use crate::scope::Scope;
use crate::value::{ArrayRef, ObjectRef, Value};

pub fn eval_expr(expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    match expr {
        // === Literals ===
        Expr::Literal(v) => Ok(v.clone()),
        Expr::ArrayLit(items) => {
            let out = ArrayRef::new();
            for item in items {
                out.push(eval_expr(item, scope)?);
            }
            Ok(Value::Array(out))
        }
        Expr::ObjectLit(entries) => {
            let out = ObjectRef::new();
            for (key, item) in entries {
                out.insert(key.clone(), eval_expr(item, scope)?);
            }
            Ok(Value::Object(out))
        }

        // === Names ===
        Expr::Ident(name) => Ok(scope.lookup(name)?.unwrap_or(Value::Null)),
        Expr::Member(target, name) => {
            let base = eval_expr(target, scope)?;
            Ok(base.get(name)?.unwrap_or(Value::Null))
        }
        Expr::Index(target, index) => {
            let base = eval_expr(target, scope)?;
            let key = eval_expr(index, scope)?;
            let found = match (&base, &key) {
                (_, Value::Int(i)) if *i >= 0 => base.at(*i as usize)?,
                (_, Value::Str(s)) => base.get(s)?,
                _ => None,
            };
            Ok(found.unwrap_or(Value::Null))
        }

        // === Arithmetic ===
        Expr::Add(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            add_values(av, bv)
        }
        Expr::Sub(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            Ok(match (&av, &bv) {
                (Value::Int(x), Value::Int(y)) => x
                    .checked_sub(*y)
                    .map(Value::Int)
                    .unwrap_or(Value::Float(*x as f64 - *y as f64)),
                _ => Value::Float(number(&av) - number(&bv)),
            })
        }
        Expr::Mul(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            Ok(match (&av, &bv) {
                (Value::Int(x), Value::Int(y)) => x
                    .checked_mul(*y)
                    .map(Value::Int)
                    .unwrap_or(Value::Float(*x as f64 * *y as f64)),
                _ => Value::Float(number(&av) * number(&bv)),
            })
        }
        Expr::Div(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            let denom = number(&bv);
            if denom == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            // Return Int if both operands are Int and result is exact
            if let (Value::Int(x), Value::Int(y)) = (&av, &bv) {
                if x.checked_rem(*y) == Some(0) {
                    if let Some(q) = x.checked_div(*y) {
                        return Ok(Value::Int(q));
                    }
                }
            }
            Ok(Value::Float(number(&av) / denom))
        }
        Expr::Mod(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            match (&av, &bv) {
                (_, Value::Int(0)) => Err(EvalError::ModuloByZero),
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.checked_rem(*y).unwrap_or(0))),
                _ => {
                    let denom = number(&bv);
                    if denom == 0.0 {
                        return Err(EvalError::ModuloByZero);
                    }
                    Ok(Value::Float(number(&av) % denom))
                }
            }
        }
        Expr::Neg(a) => Ok(match eval_expr(a, scope)? {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(n as f64))),
            other => Value::Float(-number(&other)),
        }),
        Expr::Plus(a) => Ok(match eval_expr(a, scope)? {
            Value::Int(n) => Value::Int(n),
            other => Value::Float(number(&other)),
        }),

        // === Comparison ===
        Expr::Eq(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            Ok(Value::Bool(av == bv))
        }
        Expr::Neq(a, b) => {
            let av = eval_expr(a, scope)?;
            let bv = eval_expr(b, scope)?;
            Ok(Value::Bool(av != bv))
        }
        Expr::Gt(a, b) => compare(a, b, scope, |o| o.is_gt()),
        Expr::Lt(a, b) => compare(a, b, scope, |o| o.is_lt()),
        Expr::Gte(a, b) => compare(a, b, scope, |o| o.is_ge()),
        Expr::Lte(a, b) => compare(a, b, scope, |o| o.is_le()),

        // === Logic ===
        Expr::And(a, b) => {
            let av = eval_expr(a, scope)?;
            if !av.is_truthy() {
                return Ok(av);
            }
            eval_expr(b, scope)
        }
        Expr::Or(a, b) => {
            let av = eval_expr(a, scope)?;
            if av.is_truthy() {
                return Ok(av);
            }
            eval_expr(b, scope)
        }
        Expr::Not(a) => Ok(Value::Bool(!eval_expr(a, scope)?.is_truthy())),
        Expr::If(cond, then, otherwise) => {
            if eval_expr(cond, scope)?.is_truthy() {
                eval_expr(then, scope)
            } else {
                eval_expr(otherwise, scope)
            }
        }
    }
}

/// `+`: string concatenation when either side is a string, numeric addition
/// otherwise. A null operand yields the other operand unchanged.
pub(crate) fn add_values(a: Value, b: Value) -> Result<Value, EvalError> {
    match (&a, &b) {
        (Value::Null, _) => Ok(b),
        (_, Value::Null) => Ok(a),
        (Value::Int(x), Value::Int(y)) => Ok(x
            .checked_add(*y)
            .map(Value::Int)
            .unwrap_or(Value::Float(*x as f64 + *y as f64))),
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::Array(_), _) | (_, Value::Array(_))
        | (Value::Object(_), _) | (_, Value::Object(_)) => {
            let mut out = a.display_string()?;
            out.push_str(&b.display_string()?);
            Ok(Value::from(out))
        }
        _ => Ok(Value::Float(number(&a) + number(&b))),
    }
}

#[inline]
fn number(v: &Value) -> f64 {
    v.as_f64().unwrap_or(f64::NAN)
}

fn compare(
    a: &Expr,
    b: &Expr,
    scope: &Scope,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let av = eval_expr(a, scope)?;
    let bv = eval_expr(b, scope)?;
    Ok(Value::Bool(av.cmp_numeric_or_string(&bv).is_some_and(accept)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expression;
    use serde_json::json;

    fn run(source: &str, scope: serde_json::Value) -> Result<Value, EvalError> {
        let scope = match Value::from_json(&scope) {
            Value::Object(obj) => obj,
            _ => ObjectRef::new(),
        };
        Expression::parse(source)
            .expect("parse")
            .evaluate(&Scope::from(scope))
    }

    #[test]
    fn test_arithmetic_keeps_integers_when_exact() {
        assert_eq!(run("a + b", json!({"a": 1, "b": 2})).unwrap(), Value::Int(3));
        assert_eq!(run("a / b", json!({"a": 6, "b": 3})).unwrap(), Value::Int(2));
        assert_eq!(run("a / b", json!({"a": 1, "b": 2})).unwrap(), Value::Float(0.5));
        assert_eq!(run("a % b", json!({"a": 7, "b": 4})).unwrap(), Value::Int(3));
        assert_eq!(run("a * 1.5", json!({"a": 2})).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            run(r#"name + " " + 1"#, json!({"name": "n"})).unwrap(),
            Value::from("n 1")
        );
        assert_eq!(run("missing + 'x'", json!({})).unwrap(), Value::from("x"));
        assert_eq!(
            run("'list=' + list + ' obj=' + obj", json!({"list": [1, "a"], "obj": {"k": true}}))
                .unwrap(),
            Value::from(r#"list=[1,"a"] obj={"k":true}"#)
        );
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(run("1 / a", json!({"a": 0})), Err(EvalError::DivisionByZero));
        assert_eq!(run("1 % 0", json!({})), Err(EvalError::ModuloByZero));
    }

    #[test]
    fn test_logic_returns_operands() {
        assert_eq!(run("a || 'fallback'", json!({"a": ""})).unwrap(), Value::from("fallback"));
        assert_eq!(run("a && b", json!({"a": 1, "b": 2})).unwrap(), Value::Int(2));
        assert_eq!(run("!a", json!({"a": 0})).unwrap(), Value::Bool(true));
        assert_eq!(run("a === 1.0", json!({"a": 1})).unwrap(), Value::Bool(true));
        assert_eq!(run("'b' > 'a'", json!({})).unwrap(), Value::Bool(true));
        assert_eq!(run("a < 1", json!({"a": "x"})).unwrap(), Value::Bool(false));
    }
}
