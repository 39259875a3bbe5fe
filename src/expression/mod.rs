//! Expression Module - the small expression language used by flows and views
//!
//! ```text
//! "{{count}} = {{count}} + 1"  →  lexer  →  parser (cached AST)  →  evaluator
//! ```
//!
//! Reads and writes go through an [`ExpressionContext`], so every model access
//! is visible to dependency tracking and middleware.

mod evaluator;
mod functions;
mod lexer;
mod parser;

pub use evaluator::{ExpressionContext, ExpressionEvaluator, ExpressionEvaluatorHooks, ExpressionFn};
pub use parser::{parse, BinaryOp, Expr, LogicalOp, UnaryOp};
