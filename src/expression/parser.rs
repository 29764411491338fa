// Expression Parser
// Parses tokens into an AST for workflow expressions

use crate::expression::lexer::{LexError, Lexer, Token};

use std::fmt;

use thiserror::Error;

/// Abstract Syntax Tree node for expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Null literal
    Null,

    /// Boolean literal
    Bool(bool),

    /// Number literal
    Number(f64),

    /// String literal
    String(String),

    /// Context path reference: matrix.os, steps['build'].outputs.artifact
    Reference(Reference),

    /// Function call: contains(a, b), success()
    FunctionCall { name: String, args: Vec<Expr> },

    /// Member access on a computed value: fromJSON(x).field
    Member { object: Box<Expr>, property: String },

    /// Index access on a computed value: fromJSON(x)[0]
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Unary operation: !expr
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Binary operation: a == b, a && b
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Reference to a context value (env, matrix, steps, needs, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub parts: Vec<ReferencePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferencePart {
    /// Property access by name
    Property(String),
    /// Index access by key/index
    Index(Box<Expr>),
}

impl Reference {
    pub fn new(name: String) -> Self {
        Self {
            parts: vec![ReferencePart::Property(name)],
        }
    }

    pub fn with_property(mut self, name: String) -> Self {
        self.parts.push(ReferencePart::Property(name));
        self
    }

    pub fn with_index(mut self, index: Expr) -> Self {
        self.parts.push(ReferencePart::Index(Box::new(index)));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not, // !
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Comparison
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=

    // Logical
    And, // &&
    Or,  // ||
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
        }
    }
}

/// Syntax error: malformed expression text.
///
/// Never coerced to a false condition; callers surface it as a failure of
/// the owning job or step.
#[derive(Debug, Clone, Error)]
#[error("syntax error at position {position}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub position: usize,
}

impl From<LexError> for SyntaxError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

impl Expr {
    /// Parse an expression from its source text.
    pub fn parse(input: &str) -> Result<Expr, SyntaxError> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = ExprParser::new(tokens);
        parser.parse()
    }

    /// Whether the expression calls any of the status predicates
    /// (`success`, `failure`, `always`, `cancelled`).
    ///
    /// An `if` condition that mentions none of them is implicitly
    /// conjoined with `success()`; one that does takes full control of
    /// gating.
    pub fn contains_status_function(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args } => {
                matches!(
                    name.to_lowercase().as_str(),
                    "success" | "failure" | "always" | "cancelled"
                ) || args.iter().any(Expr::contains_status_function)
            }
            Expr::Member { object, .. } => object.contains_status_function(),
            Expr::Index { object, index } => {
                object.contains_status_function() || index.contains_status_function()
            }
            Expr::Unary { expr, .. } => expr.contains_status_function(),
            Expr::Binary { left, right, .. } => {
                left.contains_status_function() || right.contains_status_function()
            }
            Expr::Reference(reference) => reference.parts.iter().any(|part| match part {
                ReferencePart::Index(expr) => expr.contains_status_function(),
                ReferencePart::Property(_) => false,
            }),
            _ => false,
        }
    }
}

/// Recursive descent parser for workflow expressions
pub struct ExprParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse the token stream into an expression
    pub fn parse(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.parse_or()?;

        if !self.is_at_end() && self.peek() != &Token::Eof {
            return Err(self.error(&format!("unexpected token: {}", self.peek())));
        }

        Ok(expr)
    }

    // Precedence (lowest to highest):
    // 1. Or: ||
    // 2. And: &&
    // 3. Equality: == !=
    // 4. Comparison: < <= > >=
    // 5. Unary: !
    // 6. Postfix: . [] ()

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;

        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_equality()?;

        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_comparison()?;

        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                _ => break,
            };

            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };

            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }

        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;

        // References already consume their own path; this covers member
        // and index access on computed values like fromJSON(...)
        loop {
            if self.check(&Token::Dot) {
                self.advance();
                let Token::Identifier(property) = self.advance().clone() else {
                    return Err(self.error("expected property name after '.'"));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.check(&Token::LBracket) {
                self.advance();
                let index = self.parse_or()?;
                self.expect(&Token::RBracket, "expected ']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek().clone() {
            Token::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            Token::Identifier(name) => {
                self.advance();

                // Check if this is a function call
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::FunctionCall { name, args })
                } else {
                    // Build a context path reference
                    let mut reference = Reference::new(name);

                    while self.check(&Token::Dot) || self.check(&Token::LBracket) {
                        if self.check(&Token::Dot) {
                            self.advance();
                            let Token::Identifier(prop) = self.advance().clone() else {
                                return Err(self.error("expected property name after '.'"));
                            };
                            reference = reference.with_property(prop);
                        } else {
                            self.advance();
                            let index = self.parse_or()?;
                            self.expect(&Token::RBracket, "expected ']'")?;
                            reference = reference.with_index(index);
                        }
                    }

                    Ok(Expr::Reference(reference))
                }
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            token => Err(self.error(&format!("unexpected token: {}", token))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(&Token::LParen, "expected '('")?;

        let mut args = Vec::new();

        if !self.check(&Token::RParen) {
            args.push(self.parse_or()?);

            while self.check(&Token::Comma) {
                self.advance();
                if self.check(&Token::RParen) {
                    break; // trailing comma
                }
                args.push(self.parse_or()?);
            }
        }

        self.expect(&Token::RParen, "expected ')'")?;
        Ok(args)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        let token = self.tokens.get(self.position).unwrap_or(&Token::Eof);
        self.position += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token, msg: &str) -> Result<(), SyntaxError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(msg))
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len() || matches!(self.peek(), Token::Eof)
    }

    fn error(&self, message: &str) -> SyntaxError {
        SyntaxError {
            message: message.to_string(),
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(Expr::parse("null").unwrap(), Expr::Null);
        assert_eq!(Expr::parse("true").unwrap(), Expr::Bool(true));
        assert_eq!(Expr::parse("false").unwrap(), Expr::Bool(false));
        assert_eq!(Expr::parse("42").unwrap(), Expr::Number(42.0));
        assert_eq!(
            Expr::parse("'hello'").unwrap(),
            Expr::String("hello".to_string())
        );
    }

    #[test]
    fn test_parse_reference() {
        let expr = Expr::parse("matrix.os").unwrap();

        if let Expr::Reference(r) = expr {
            assert_eq!(r.parts.len(), 2);
            assert_eq!(r.parts[0], ReferencePart::Property("matrix".to_string()));
            assert_eq!(r.parts[1], ReferencePart::Property("os".to_string()));
        } else {
            panic!("expected reference");
        }
    }

    #[test]
    fn test_parse_index_access() {
        let expr = Expr::parse("steps['build']").unwrap();
        assert!(matches!(expr, Expr::Reference(_)));
    }

    #[test]
    fn test_parse_deep_path() {
        let expr = Expr::parse("needs.build.outputs.artifact").unwrap();

        if let Expr::Reference(r) = expr {
            assert_eq!(r.parts.len(), 4);
        } else {
            panic!("expected reference");
        }
    }

    #[test]
    fn test_parse_function_call() {
        let expr = Expr::parse("contains(github.ref, 'main')").unwrap();

        if let Expr::FunctionCall { name, args } = expr {
            assert_eq!(name, "contains");
            assert_eq!(args.len(), 2);
        } else {
            panic!("expected function call");
        }
    }

    #[test]
    fn test_parse_binary_operators() {
        let expr = Expr::parse("a == b").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::Eq,
                ..
            }
        ));

        let expr = Expr::parse("a && b").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_unary_not() {
        let expr = Expr::parse("!cancelled()").unwrap();
        assert!(matches!(
            expr,
            Expr::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_operator_precedence() {
        // && binds tighter than ||
        let expr = Expr::parse("a || b && c").unwrap();

        if let Expr::Binary {
            op: BinaryOp::Or,
            right,
            ..
        } = expr
        {
            assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::And,
                    ..
                }
            ));
        } else {
            panic!("expected or expression");
        }
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = Expr::parse("(a || b) && c").unwrap();
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_unbalanced_parens() {
        assert!(Expr::parse("(a && b").is_err());
        assert!(Expr::parse("contains(a, b").is_err());
    }

    #[test]
    fn test_parse_trailing_garbage() {
        assert!(Expr::parse("a b").is_err());
    }

    #[test]
    fn test_parse_unknown_operator() {
        assert!(Expr::parse("a = b").is_err());
    }

    #[test]
    fn test_contains_status_function() {
        assert!(Expr::parse("always()").unwrap().contains_status_function());
        assert!(Expr::parse("!cancelled()")
            .unwrap()
            .contains_status_function());
        assert!(Expr::parse("failure() && matrix.os == 'linux'")
            .unwrap()
            .contains_status_function());
        assert!(!Expr::parse("matrix.os == 'linux'")
            .unwrap()
            .contains_status_function());
        assert!(!Expr::parse("contains(github.ref, 'main')")
            .unwrap()
            .contains_status_function());
    }
}
