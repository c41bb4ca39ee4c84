//! Core domain types shared across the Atlas workspace.
//!
//! Atlas turns ordinary functions containing *choice points* (operator calls
//! such as `Select(domain)`) into generators that can be run once, enumerated
//! exhaustively, sampled or traced. This crate holds the pieces that do not
//! depend on any execution semantics:
//!
//! - [`Value`]: runtime values of the atlas language
//! - [`ast`]: the syntax tree of generator functions
//! - [`lexer`] / [`parser`]: source text to syntax tree
//! - [`visit`]: call-site traversal, free-name analysis and line shifting
//!
//! ## The language
//!
//! ```text
//! @generator(strategy="dfs")
//! fn bits(length) {
//!     let s = "";
//!     for i in range(length) {
//!         s += Select(["0", "1"], oid="digit");
//!     }
//!     return s;
//! }
//! ```

pub mod ast;
mod display;
mod error;
pub mod lexer;
pub mod parser;
mod span;
mod value;
pub mod visit;

pub use ast::{
    AssignOp, BinOp, Block, Call, Callee, Decorator, DecoratorArgs, Expr, FnDef, Keyword,
    Literal, Program, Stmt, UnaryOp,
};
pub use error::SyntaxError;
pub use parser::{parse_function, parse_program};
pub use span::{Span, Spanned};
pub use value::Value;
