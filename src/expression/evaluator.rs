//! ExpressionEvaluator - evaluates parsed expressions against a data model

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::binding::{BindingInstance, BindingParser};
use crate::data::{DataModel, DataModelOptions, Updates};
use crate::error::{PlayerError, Result};
use crate::hooks::{BailHook, WaterfallHook};
use crate::util::value::{is_truthy, number_value, to_display_string, to_number};

use super::functions;
use super::parser::{parse, BinaryOp, Expr, LogicalOp, UnaryOp};

/// Signature of functions callable from expressions
pub type ExpressionFn = dyn Fn(&ExpressionContext<'_>, &[Value]) -> Result<Value> + Send + Sync;

/// What an expression may read and write while it runs
pub struct ExpressionContext<'a> {
    pub model: &'a dyn DataModel,
    pub parser: &'a BindingParser,
    pub options: DataModelOptions,
}

impl<'a> ExpressionContext<'a> {
    pub fn new(model: &'a dyn DataModel, parser: &'a BindingParser) -> Self {
        Self {
            model,
            parser,
            options: DataModelOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DataModelOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse a path, resolving nested refs against the model
    pub fn binding(&self, path: &str) -> Result<BindingInstance> {
        let read = |b: &BindingInstance| self.model.get(b, &self.options);
        self.parser.parse_with(path, &read)
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        let binding = self.binding(path)?;
        Ok(self.model.get(&binding, &self.options).unwrap_or(Value::Null))
    }

    pub fn set(&self, path: &str, value: Value) -> Result<Updates> {
        let binding = self.binding(path)?;
        Ok(self.model.set(vec![(binding, value)], &self.options))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        let binding = self.binding(path)?;
        self.model.delete(&binding, &self.options);
        Ok(())
    }
}

#[derive(Default)]
pub struct ExpressionEvaluatorHooks {
    /// Rewrites the raw source before parsing
    pub before_evaluate: WaterfallHook<String>,
    /// A tap returning `Some(true)` handles the error; the result becomes `null`
    pub on_error: BailHook<PlayerError, bool>,
}

/// Evaluator with a function registry and a parse cache
pub struct ExpressionEvaluator {
    pub hooks: ExpressionEvaluatorHooks,
    functions: DashMap<String, Arc<ExpressionFn>>,
    cache: DashMap<String, Arc<Expr>>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        let evaluator = Self {
            hooks: ExpressionEvaluatorHooks::default(),
            functions: DashMap::new(),
            cache: DashMap::new(),
        };
        functions::register_builtins(&evaluator);
        evaluator
    }

    pub fn add_function(
        &self,
        name: &str,
        f: impl Fn(&ExpressionContext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Parse with caching
    pub fn parse(&self, src: &str) -> Result<Arc<Expr>> {
        if let Some(cached) = self.cache.get(src) {
            return Ok(Arc::clone(&cached));
        }
        let expr = Arc::new(parse(src)?);
        self.cache.insert(src.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    /// Evaluate a JSON expression: strings are parsed, arrays evaluate each
    /// entry and yield the last, anything else is returned as-is
    pub fn evaluate(&self, exp: &Value, ctx: &ExpressionContext<'_>) -> Result<Value> {
        match exp {
            Value::String(src) => self.evaluate_str(src, ctx),
            Value::Array(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.evaluate(item, ctx)?;
                }
                Ok(last)
            }
            other => Ok(other.clone()),
        }
    }

    pub fn evaluate_str(&self, src: &str, ctx: &ExpressionContext<'_>) -> Result<Value> {
        let src = self.hooks.before_evaluate.call(src.to_string(), &());
        if src.trim().is_empty() {
            return Ok(Value::Null);
        }

        let result = self.parse(&src).and_then(|expr| self.eval(&expr, ctx, &src));
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.handle_error(err),
        }
    }

    fn handle_error(&self, err: PlayerError) -> Result<Value> {
        if self.hooks.on_error.call(&err) == Some(true) {
            debug!(error = %err, "expression error handled");
            return Ok(Value::Null);
        }
        Err(err)
    }

    fn eval(&self, expr: &Expr, ctx: &ExpressionContext<'_>, src: &str) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::ModelRef(path) => ctx.get(path),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item, ctx, src))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Unary { op, arg } => {
                let value = self.eval(arg, ctx, src)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                    UnaryOp::Negate => number_value(-to_number(&value)),
                    UnaryOp::Plus => number_value(to_number(&value)),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, ctx, src)?;
                let right = self.eval(right, ctx, src)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, ctx, src)?;
                match (op, is_truthy(&left)) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, ctx, src),
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if is_truthy(&self.eval(test, ctx, src)?) {
                    self.eval(consequent, ctx, src)
                } else {
                    self.eval(alternate, ctx, src)
                }
            }
            Expr::Assign { target, value } => {
                let value = self.eval(value, ctx, src)?;
                ctx.set(target, value.clone())?;
                Ok(value)
            }
            Expr::Call { name, args } => {
                let f = self
                    .functions
                    .get(name.as_str())
                    .map(|f| Arc::clone(&f))
                    .ok_or_else(|| PlayerError::UnknownFunction { name: name.clone() })?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, ctx, src))
                    .collect::<Result<Vec<_>>>()?;
                f(ctx, &args).map_err(|err| match err {
                    PlayerError::External { message } => PlayerError::ExpressionEval {
                        expression: src.to_string(),
                        reason: message,
                    },
                    other => other,
                })
            }
            Expr::Sequence(items) => {
                let mut last = Value::Null;
                for item in items {
                    last = self.eval(item, ctx, src)?;
                }
                Ok(last)
            }
        }
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            strict_eq(a, b)
        }
        _ => to_number(a) == to_number(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    let numeric = |f: fn(f64, f64) -> f64| number_value(f(to_number(a), to_number(b)));
    match op {
        BinaryOp::Add if a.is_string() || b.is_string() => {
            Value::String(format!("{}{}", to_display_string(a), to_display_string(b)))
        }
        BinaryOp::Add => numeric(|x, y| x + y),
        BinaryOp::Sub => numeric(|x, y| x - y),
        BinaryOp::Mul => numeric(|x, y| x * y),
        BinaryOp::Div => numeric(|x, y| x / y),
        BinaryOp::Rem => numeric(|x, y| x % y),
        BinaryOp::Eq => Value::Bool(loose_eq(a, b)),
        BinaryOp::Ne => Value::Bool(!loose_eq(a, b)),
        BinaryOp::StrictEq => Value::Bool(strict_eq(a, b)),
        BinaryOp::StrictNe => Value::Bool(!strict_eq(a, b)),
        BinaryOp::Lt => Value::Bool(compare(a, b) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(a, b) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        )),
    }
}
