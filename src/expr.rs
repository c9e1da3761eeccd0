//! Expression evaluation against a single row of named values.
//!
//! Operators build up a [`Tuple`] (qualified column name -> [`Value`]) for
//! each row they produce; this module walks an [`Expr`] tree against that
//! tuple. Aggregate function calls (`MAX`, `COUNT`, ...) are *not* evaluated
//! here — the planner only ever lets an aggregate `Func` node reach the
//! `Group` operator, which calls the function directly over a bucket of
//! rows instead of a single tuple.

use std::cmp::Ordering;

use crate::ast::{BinOp, Expr};
use crate::catalog;
use crate::error::{EngineError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct Tuple {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Tuple { columns, values }
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        if let Some(idx) = self.columns.iter().position(|c| c == name) {
            return Ok(&self.values[idx]);
        }
        // Fall back to matching the unqualified suffix, so a bare `id` can
        // resolve against a tuple whose columns are stored as `t.id`.
        let suffix = format!(".{}", name);
        self.columns
            .iter()
            .position(|c| c.ends_with(&suffix))
            .map(|idx| &self.values[idx])
            .ok_or_else(|| EngineError::ColumnNotFound(name.to_string()))
    }

    pub fn extend(&self, columns: Vec<String>, values: Vec<Value>) -> Tuple {
        let mut cols = self.columns.clone();
        let mut vals = self.values.clone();
        cols.extend(columns);
        vals.extend(values);
        Tuple::new(cols, vals)
    }
}

pub fn eval(expr: &Expr, tuple: &Tuple) -> Result<Value> {
    match expr {
        Expr::Id(name) => Ok(tuple.get(name)?.clone()),
        Expr::Imm(text) => Ok(Value::untyped(text.clone())),
        Expr::Star(_) => Err(EngineError::InvariantViolation("'*' cannot be evaluated as a value".into())),
        Expr::Func { name, args } => {
            let func = catalog::get_function(name)?;
            if func.is_aggregate {
                return Err(EngineError::InvariantViolation(format!(
                    "aggregate function '{}' used outside of a GROUP BY context",
                    name
                )));
            }
            let params: Vec<Value> = args.iter().map(|a| eval(a, tuple)).collect::<Result<_>>()?;
            (func.call)(&params)
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, tuple),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, tuple: &Tuple) -> Result<Value> {
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = eval(lhs, tuple)?.as_bool()?;
        return match op {
            BinOp::And => {
                if !l {
                    Ok(Value::bool(false))
                } else {
                    Ok(Value::bool(eval(rhs, tuple)?.as_bool()?))
                }
            }
            BinOp::Or => {
                if l {
                    Ok(Value::bool(true))
                } else {
                    Ok(Value::bool(eval(rhs, tuple)?.as_bool()?))
                }
            }
            _ => unreachable!(),
        };
    }

    let l = eval(lhs, tuple)?;
    let r = eval(rhs, tuple)?;
    let ord = l.compare(&r)?;
    let result = match op {
        BinOp::Eq => ord == Ordering::Equal,
        BinOp::Ne => ord != Ordering::Equal,
        BinOp::Gt => ord == Ordering::Greater,
        BinOp::Ge => ord != Ordering::Less,
        BinOp::Lt => ord == Ordering::Less,
        BinOp::Le => ord != Ordering::Greater,
        BinOp::And | BinOp::Or => unreachable!(),
    };
    Ok(Value::bool(result))
}

/// Evaluates `expr` as a predicate, defaulting to `true` when there is no
/// predicate at all (an absent WHERE/ON/HAVING clause matches every row).
pub fn eval_predicate(expr: &Option<Expr>, tuple: &Tuple) -> Result<bool> {
    match expr {
        None => Ok(true),
        Some(e) => eval(e, tuple)?.as_bool(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn tuple() -> Tuple {
        Tuple::new(vec!["t.id".into(), "t.name".into()], vec![Value::int(3), Value::str("bob")])
    }

    #[test]
    fn resolves_qualified_and_bare_names() {
        let t = tuple();
        assert_eq!(eval(&Expr::id("t.id"), &t).unwrap().as_int().unwrap(), 3);
        assert_eq!(eval(&Expr::id("id"), &t).unwrap().as_int().unwrap(), 3);
    }

    #[test]
    fn comparison_against_untyped_literal() {
        let t = tuple();
        let e = Expr::binary(BinOp::Eq, Expr::id("t.id"), Expr::imm("3"));
        assert!(eval(&e, &t).unwrap().as_bool().unwrap());
    }

    #[test]
    fn and_short_circuits() {
        let t = tuple();
        let e = Expr::binary(BinOp::And, Expr::imm("false"), Expr::id("does.not.exist"));
        assert!(!eval(&e, &t).unwrap().as_bool().unwrap());
    }

    #[test]
    fn missing_predicate_matches_everything() {
        let t = tuple();
        assert!(eval_predicate(&None, &t).unwrap());
    }

    #[test]
    fn aggregate_call_outside_group_errors() {
        let t = tuple();
        let e = Expr::Func { name: "max".into(), args: vec![Expr::id("t.id")] };
        assert!(eval(&e, &t).is_err());
    }
}
