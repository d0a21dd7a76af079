//! Restricted conditional expression language.
//!
//! Expressions gate conditional actions and workflow branches. The
//! grammar only has literals, context variables, comparisons, boolean
//! connectives and parentheses; there is no call syntax, so evaluation
//! can never reach code outside the interpreter below.
//!
//! ```
//! use std::collections::HashMap;
//! use serde_json::json;
//! use tramita_engine::expression;
//!
//! let mut ctx = HashMap::new();
//! ctx.insert("a".to_string(), json!(5));
//! ctx.insert("b".to_string(), json!("x"));
//! assert!(expression::evaluate("a > 3 && b == 'x'", &ctx).unwrap());
//! ```

mod lexer;
mod parser;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::EngineResult;
use crate::rules::compare::{compare, is_truthy, loose_eq};
use crate::rules::field;

pub use parser::{CompareOp, Expr};

/// A parsed expression, reusable across contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse `source`. Fails with `EngineError::Parse` on malformed input.
    pub fn parse(source: &str) -> EngineResult<Self> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Evaluate against `context`; unresolved variables are null.
    pub fn evaluate(&self, context: &HashMap<String, Value>) -> bool {
        is_truthy(&eval(&self.ast, context))
    }

    /// Variable names referenced by the expression.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_variables(&self.ast, &mut names);
        names
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(expression: &str, context: &HashMap<String, Value>) -> EngineResult<bool> {
    Ok(Expression::parse(expression)?.evaluate(context))
}

fn eval(expr: &Expr, context: &HashMap<String, Value>) -> Value {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Variable(path) => field::resolve_in(context, path),
        Expr::Not(inner) => Value::Bool(!is_truthy(&eval(inner, context))),
        Expr::And(left, right) => Value::Bool(
            is_truthy(&eval(left, context)) && is_truthy(&eval(right, context)),
        ),
        Expr::Or(left, right) => Value::Bool(
            is_truthy(&eval(left, context)) || is_truthy(&eval(right, context)),
        ),
        Expr::Compare { op, left, right } => {
            let l = eval(left, context);
            let r = eval(right, context);
            let result = match op {
                CompareOp::Eq => loose_eq(&l, &r),
                CompareOp::Ne => !loose_eq(&l, &r),
                CompareOp::Gt => compare(&l, &r).is_some_and(|o| o.is_gt()),
                CompareOp::Lt => compare(&l, &r).is_some_and(|o| o.is_lt()),
                CompareOp::Ge => compare(&l, &r).is_some_and(|o| o.is_ge()),
                CompareOp::Le => compare(&l, &r).is_some_and(|o| o.is_le()),
            };
            Value::Bool(result)
        }
    }
}

fn collect_variables<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Variable(name) => {
            if !out.contains(&name.as_str()) {
                out.push(name.as_str());
            }
        }
        Expr::Not(inner) => collect_variables(inner, out),
        Expr::And(l, r) | Expr::Or(l, r) => {
            collect_variables(l, out);
            collect_variables(r, out);
        }
        Expr::Compare { left, right, .. } => {
            collect_variables(left, out);
            collect_variables(right, out);
        }
    }
}
