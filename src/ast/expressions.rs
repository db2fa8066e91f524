use crate::ast::{BinOp, UnaryOp};

/// How many times a `let` binding may be read before it is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseLimit {
    /// `as -1`, or no `as` clause at all
    Unlimited,
    /// `as n` with `n > 0`
    Limited(u32),
}

impl UseLimit {
    /// Converts the integer written after `as`. Zero has no meaning and yields `None`.
    pub fn from_count(count: i64) -> Option<UseLimit> {
        match count {
            0 => None,
            n if n < 0 => Some(UseLimit::Unlimited),
            n => Some(UseLimit::Limited(u32::try_from(n).unwrap_or(u32::MAX))),
        }
    }

    pub fn remaining(&self) -> Option<u32> {
        match self {
            UseLimit::Unlimited => None,
            UseLimit::Limited(n) => Some(*n),
        }
    }
}

/// One `if`/`elif` arm of a conditional chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub result: Expr,
}

/// Abstract Syntax Tree node representing a parsed expression.
///
/// Trees are immutable once built and are shared between the parse cache
/// and any evaluation walking them.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    /// Literal integer
    ///
    /// # Example
    /// ```text
    /// 42
    /// ```
    Integer(i64),

    /// Literal decimal number
    ///
    /// # Example
    /// ```text
    /// 42.5
    /// ```
    Float(f64),

    /// String literal
    ///
    /// # Example
    /// ```text
    /// "hello"
    /// ```
    String(String),

    /// Boolean literal
    Boolean(bool),

    /// Null literal
    Null,

    /// Variable reference. Dotted names are looked up as one flat key.
    ///
    /// # Examples
    /// ```text
    /// level
    /// player.health
    /// ```
    Variable(String),

    // Operations
    /// Binary operation
    ///
    /// # Examples
    /// ```text
    /// price * 1.1
    /// level >= 10 and rank == "gold"
    /// ```
    BinaryOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operation
    ///
    /// # Examples
    /// ```text
    /// -x
    /// not done
    /// ```
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    /// `condition ? then : else`
    Ternary {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    /// Scoped binding with an optional read limit
    ///
    /// # Examples
    /// ```text
    /// let bonus = level * 2; bonus + 1
    /// let once = 5 as 1; once
    /// ```
    Let {
        name: String,
        value: Box<Expr>,
        uses: UseLimit,
        body: Box<Expr>,
    },

    /// `if`/`elif`/`else` chain. The first truthy branch wins.
    ///
    /// # Example
    /// ```text
    /// if x > 10: "big" elif x > 5: "medium" else: "small"
    /// ```
    Conditional {
        branches: Vec<Branch>,
        otherwise: Option<Box<Expr>>,
    },

    /// Function call, optionally carrying a type hint
    ///
    /// # Examples
    /// ```text
    /// max(a, b)
    /// lookup<Material>("stone")
    /// ```
    Call {
        name: String,
        type_hint: Option<String>,
        args: Vec<Expr>,
    },

    /// Typed cast
    ///
    /// # Example
    /// ```text
    /// Out<int>(price * 2)
    /// ```
    Cast { type_name: String, inner: Box<Expr> },

    /// Parenthesized expression
    Grouping(Box<Expr>),
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.into(),
            type_hint: None,
            args,
        }
    }

    pub fn variable(name: impl Into<String>) -> Expr {
        Expr::Variable(name.into())
    }
}
