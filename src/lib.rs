//! An embeddable expression language.
//!
//! Expressions are tokenized, parsed into an immutable tree and walked by an
//! interpreter against caller-supplied variables. The [`Engine`] facade adds
//! a parse cache, an evaluation cache, name filters, recursion and timeout
//! limits, and hooks for logging and error observation.
//!
//! ```text
//! let bonus = level * 2 as 1; if bonus > 10: "high" elif bonus > 4: "mid" else: "low"
//! ```
pub mod ast;
pub mod cache;
pub mod config;
pub mod convert;
pub mod engine;
pub mod environment;
pub mod format;
pub mod functions;
pub mod interpreter;
pub mod lexer;
pub mod operations;
pub mod parser;
pub mod types;
pub mod value;

pub use ast::{BinOp, Expr, Token, TokenKind, UnaryOp, UseLimit};
pub use cache::{Cache, ExpressionCache, ExpressionCacheKey, InMemoryCache};
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, ErrorHandler, Logger};
pub use environment::Environment;
pub use functions::{DefinitionError, FunctionDefinition, FunctionRegistry, FunctionSignature};
pub use interpreter::{ErrorKind, EvalError, Interpreter, MAX_EVALUATION_DEPTH};
pub use lexer::{LexError, Lexer};
pub use operations::{MathOperation, OperationRegistry};
pub use parser::{ParseError, Parser};
pub use types::{EnumResolver, TypeRegistry, TypeResolver};
pub use value::{CastError, DomainValue, FromValue, Value, ValueType, Variables};
