// Built-in Expression Functions
// String helpers, JSON conversion, and the status predicates

use crate::expression::evaluator::{values_equal, EvalError, ExpressionContext};
use crate::workflow::models::Value;

/// Registry of built-in functions
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Call a built-in function
    pub fn call(
        &self,
        name: &str,
        args: Vec<Value>,
        context: &ExpressionContext,
    ) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // String functions
            "contains" => self.fn_contains(args),
            "startswith" => self.fn_startswith(args),
            "endswith" => self.fn_endswith(args),
            "format" => self.fn_format(args),
            "join" => self.fn_join(args),

            // JSON conversion
            "tojson" => self.fn_to_json(args),
            "fromjson" => self.fn_from_json(args),

            // Status predicates (context-aware)
            "success" => Ok(Value::Bool(context.status.success())),
            "failure" => Ok(Value::Bool(context.status.failure)),
            "cancelled" => Ok(Value::Bool(context.status.cancelled)),
            "always" => Ok(Value::Bool(true)),

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;

        match (&args[0], &args[1]) {
            (Value::Array(arr), needle) => {
                // Array membership
                for item in arr {
                    if values_equal(item, needle) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            (haystack, needle) => {
                // Case-insensitive substring search
                let haystack = haystack.as_string().to_lowercase();
                let needle = needle.as_string().to_lowercase();
                Ok(Value::Bool(haystack.contains(&needle)))
            }
        }
    }

    fn fn_startswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "startsWith")?;
        let s = args[0].as_string().to_lowercase();
        let prefix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.starts_with(&prefix)))
    }

    fn fn_endswith(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "endsWith")?;
        let s = args[0].as_string().to_lowercase();
        let suffix = args[1].as_string().to_lowercase();
        Ok(Value::Bool(s.ends_with(&suffix)))
    }

    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() {
            return Err(EvalError::new("format() requires at least 1 argument"));
        }

        let template = args[0].as_string();
        let mut result = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    result.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    result.push('}');
                }
                '{' => {
                    let mut index = String::new();
                    for digit in chars.by_ref() {
                        if digit == '}' {
                            break;
                        }
                        index.push(digit);
                    }
                    let i: usize = index
                        .parse()
                        .map_err(|_| EvalError::new("format() placeholder is not a number"))?;
                    let arg = args
                        .get(i + 1)
                        .ok_or_else(|| EvalError::new(format!("format() missing argument {}", i)))?;
                    result.push_str(&arg.as_string());
                }
                _ => result.push(ch),
            }
        }

        Ok(Value::String(result))
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() || args.len() > 2 {
            return Err(EvalError::new("join() requires 1 or 2 arguments"));
        }

        let separator = args
            .get(1)
            .map(|v| v.as_string())
            .unwrap_or_else(|| ",".to_string());

        match &args[0] {
            Value::Array(arr) => {
                let strings: Vec<String> = arr.iter().map(|v| v.as_string()).collect();
                Ok(Value::String(strings.join(&separator)))
            }
            other => Ok(Value::String(other.as_string())),
        }
    }

    fn fn_to_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "toJSON")?;
        Ok(Value::String(args[0].to_json()))
    }

    fn fn_from_json(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 1, "fromJSON")?;
        let text = args[0].as_string();
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| EvalError::new(format!("fromJSON(): {}", e)))?;
        Ok(Value::from_json(&parsed))
    }

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }
}

impl Default for BuiltinFunctions {
    fn default() -> Self {
        Self::new()
    }
}
