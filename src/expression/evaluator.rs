// Expression Evaluator
// Evaluates AST expressions against the per-instance context

use crate::expression::functions::BuiltinFunctions;
use crate::expression::parser::{BinaryOp, Expr, Reference, ReferencePart, SyntaxError, UnaryOp};
use crate::workflow::models::Value;

use std::collections::HashMap;

use thiserror::Error;

/// Evaluation error: the expression parsed but cannot be computed
/// (unknown function, bad argument types).
#[derive(Debug, Clone, Error)]
#[error("evaluation error: {message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any failure while handling an expression.
#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Context for expression evaluation.
///
/// A snapshot of what one job instance can see; assembled by the context
/// store, consumed read-only here. Evaluation never mutates it, so
/// repeated evaluation of the same expression yields the same value.
#[derive(Debug, Clone, Default)]
pub struct ExpressionContext {
    /// Run metadata: github.workflow, github.job, ...
    pub github: HashMap<String, Value>,

    /// Merged environment variables visible to the current step
    pub env: HashMap<String, Value>,

    /// Matrix values bound to this instance
    pub matrix: HashMap<String, Value>,

    /// Completed steps of this instance, by step id
    pub steps: HashMap<String, StepContext>,

    /// Terminal results of this job's dependencies
    pub needs: HashMap<String, NeedsContext>,

    /// Accumulated outcome state read by the status predicates
    pub status: StatusContext,
}

/// A completed step as visible to later expressions.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub outputs: HashMap<String, Value>,
    pub outcome: String,
}

/// A terminal dependency as visible through `needs.<job>`.
#[derive(Debug, Clone, Default)]
pub struct NeedsContext {
    pub result: String,
    pub outputs: HashMap<String, Value>,
}

/// Outcome state feeding `success()` / `failure()` / `cancelled()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusContext {
    /// A dependency or an earlier step of this instance failed
    pub failure: bool,
    /// A dependency was cancelled or fail-fast cancellation is underway
    pub cancelled: bool,
}

impl StatusContext {
    pub fn success(&self) -> bool {
        !self.failure && !self.cancelled
    }
}

/// Expression evaluator
pub struct Evaluator<'a> {
    context: &'a ExpressionContext,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ExpressionContext) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Reference(reference) => self.eval_reference(reference),

            Expr::FunctionCall { name, args } => self.eval_function(name, args),

            Expr::Member { object, property } => {
                let obj = self.eval(object)?;
                Ok(Self::member(&obj, property))
            }

            Expr::Index { object, index } => {
                let obj = self.eval(object)?;
                let idx = self.eval(index)?;
                Ok(Self::index(&obj, &idx))
            }

            Expr::Unary { op, expr } => {
                let val = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
                }
            }

            Expr::Binary { op, left, right } => match op {
                // && and || short-circuit and yield the operand value,
                // not a coerced boolean
                BinaryOp::And => {
                    let left_val = self.eval(left)?;
                    if !left_val.is_truthy() {
                        return Ok(left_val);
                    }
                    self.eval(right)
                }
                BinaryOp::Or => {
                    let left_val = self.eval(left)?;
                    if left_val.is_truthy() {
                        return Ok(left_val);
                    }
                    self.eval(right)
                }
                _ => {
                    let left_val = self.eval(left)?;
                    let right_val = self.eval(right)?;
                    self.eval_binary(*op, &left_val, &right_val)
                }
            },
        }
    }

    fn eval_reference(&self, reference: &Reference) -> Result<Value, EvalError> {
        let mut current: Option<Value> = None;

        for (i, part) in reference.parts.iter().enumerate() {
            match part {
                ReferencePart::Property(name) => {
                    if i == 0 {
                        current = Some(self.lookup_context(name));
                    } else {
                        let obj = current.ok_or_else(|| EvalError::new("invalid reference"))?;
                        current = Some(Self::member(&obj, name));
                    }
                }
                ReferencePart::Index(index_expr) => {
                    let obj = current.ok_or_else(|| EvalError::new("invalid index access"))?;
                    let index = self.eval(index_expr)?;
                    current = Some(Self::index(&obj, &index));
                }
            }
        }

        current.ok_or_else(|| EvalError::new("empty reference"))
    }

    /// Top-level context name lookup. Unknown names resolve to null,
    /// matching the tolerant lookup semantics of the hosted runtime.
    fn lookup_context(&self, name: &str) -> Value {
        match name.to_lowercase().as_str() {
            "github" => map_to_object(&self.context.github),
            "env" => map_to_object(&self.context.env),
            "matrix" => map_to_object(&self.context.matrix),
            "steps" => Value::Object(
                self.context
                    .steps
                    .iter()
                    .map(|(k, v)| (k.clone(), step_context_to_value(v)))
                    .collect(),
            ),
            "needs" => Value::Object(
                self.context
                    .needs
                    .iter()
                    .map(|(k, v)| (k.clone(), needs_context_to_value(v)))
                    .collect(),
            ),
            _ => Value::Null,
        }
    }

    /// Property access. Missing keys and non-object bases resolve to
    /// null rather than failing.
    fn member(object: &Value, property: &str) -> Value {
        match object {
            Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Index access with the same tolerant semantics as `member`.
    fn index(object: &Value, index: &Value) -> Value {
        match (object, index) {
            (Value::Array(arr), Value::Number(n)) => {
                arr.get(*n as usize).cloned().unwrap_or(Value::Null)
            }
            (Value::Object(map), Value::String(key)) => {
                map.get(key).cloned().unwrap_or(Value::Null)
            }
            (Value::Object(map), Value::Number(n)) => {
                map.get(&n.to_string()).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        let evaluated_args: Result<Vec<Value>, EvalError> =
            args.iter().map(|a| self.eval(a)).collect();
        self.functions.call(name, evaluated_args?, self.context)
    }

    fn eval_binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
            BinaryOp::Lt => self.eval_comparison(left, right, |a, b| a < b),
            BinaryOp::Le => self.eval_comparison(left, right, |a, b| a <= b),
            BinaryOp::Gt => self.eval_comparison(left, right, |a, b| a > b),
            BinaryOp::Ge => self.eval_comparison(left, right, |a, b| a >= b),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled in eval()"),
        }
    }

    fn eval_comparison<F>(&self, left: &Value, right: &Value, op: F) -> Result<Value, EvalError>
    where
        F: FnOnce(f64, f64) -> bool,
    {
        // Non-numeric operands coerce to NaN, and every ordering against
        // NaN is false
        match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Bool(op(a, b))),
            _ => Ok(Value::Bool(false)),
        }
    }
}

/// Loose equality: case-insensitive for strings, with number/bool
/// coercion across types.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
        (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
        (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => b
            .parse::<f64>()
            .map(|n| (a - n).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
            let b_lower = b.to_lowercase();
            (*a && b_lower == "true") || (!*a && b_lower == "false")
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

fn map_to_object(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn step_context_to_value(step: &StepContext) -> Value {
    let mut map = HashMap::new();
    map.insert(
        "outputs".to_string(),
        map_to_object(&step.outputs),
    );
    map.insert(
        "outcome".to_string(),
        Value::String(step.outcome.clone()),
    );
    Value::Object(map)
}

fn needs_context_to_value(needs: &NeedsContext) -> Value {
    let mut map = HashMap::new();
    map.insert("result".to_string(), Value::String(needs.result.clone()));
    map.insert("outputs".to_string(), map_to_object(&needs.outputs));
    Value::Object(map)
}

/// Parse and evaluate an expression in one call.
pub fn evaluate(expr: &str, context: &ExpressionContext) -> Result<Value, ExpressionError> {
    let ast = Expr::parse(expr)?;
    let evaluator = Evaluator::new(context);
    Ok(evaluator.eval(&ast)?)
}
