//! # Expression Language - Abstract Syntax Tree
//!
//! The AST module is organized into focused submodules:
//!
//! - **[tokens]** - Lexical tokens produced by the lexer
//! - **[expressions]** - Expression nodes (literals, references, operations, control flow)
//! - **[operators]** - Binary and unary operators
//!
//! ## Quick Start
//!
//! ```text
//! let bonus = level * 2 as 1; if bonus > 10: "high" else: "low"
//! ```
//!
//! Binds `bonus` for a single read, then picks a branch.
//!
//! ## Core Concepts
//!
//! ### Precedence
//!
//! From tightest to loosest:
//!
//! ```text
//! unary (- not !)  >  ^  >  * / %  >  + -  >  < > <= >=  >  == !=  >  and  >  or  >  ? :
//! ```
//!
//! `let` and `if` are recognized at the start of an expression and extend as far
//! right as possible.
//!
//! ### Usage-limited bindings
//!
//! `let name = value as n; body` allows `name` to be read `n` times within
//! `body`. `as -1` (or no `as`) is unlimited, `as 0` is rejected by the parser.
//!
//! ### Typed casts and hints
//!
//! - `Out<int>(expr)` coerces a result into a type
//! - `f<Material>(args)` passes a type hint to the function `f`
pub mod expressions;
pub mod operators;
pub mod tokens;

pub use expressions::{Branch, Expr, UseLimit};
pub use operators::{BinOp, UnaryOp};
pub use tokens::{Token, TokenKind};
