// Expression Module
// The ${{ }} expression dialect: lexing, parsing, evaluation, built-ins

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use evaluator::{
    evaluate, EvalError, Evaluator, ExpressionContext, ExpressionError, NeedsContext,
    StatusContext, StepContext,
};
pub use functions::BuiltinFunctions;
pub use lexer::{extract_segments, LexError, Lexer, Segment, Token};
pub use parser::{BinaryOp, Expr, ExprParser, Reference, ReferencePart, SyntaxError, UnaryOp};
