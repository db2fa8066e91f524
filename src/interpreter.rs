use std::{cell::Cell, time::Instant};

use dashmap::DashMap;

use crate::{
    ast::{BinOp, Branch, Expr, UnaryOp},
    config::EngineConfig,
    environment::Environment,
    functions::{FunctionRegistry, FunctionSignature},
    operations::OperationRegistry,
    types::TypeRegistry,
    value::{CastError, Value, ValueType},
};

/// Broad classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Syntax,
    Variable,
    Arithmetic,
    Function,
    Depth,
    Timeout,
    Cast,
    Type,
    Input,
}

/// Errors that can occur while walking an expression tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Variable '{name}' exceeded its allowed uses ({allowed})")]
    UsesExceeded { name: String, allowed: u32 },

    #[error("Access to variable '{0}' is not allowed")]
    VariableNotAllowed(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Modulo by zero")]
    ModuloByZero,

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Unknown math operation: {0}")]
    UnknownOperation(String),

    #[error("Undefined function: {0}")]
    UndefinedFunction(String),

    #[error("Access to function '{0}' is not allowed")]
    FunctionNotAllowed(String),

    #[error("Function '{name}' expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid argument {index} for '{function}': {source}")]
    ArgumentType {
        function: String,
        index: usize,
        #[source]
        source: CastError,
    },

    /// Raised by host functions for invalid input or failed work.
    #[error("Function error: {0}")]
    Function(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Cast(#[from] CastError),

    #[error("Maximum recursion depth of {limit} exceeded")]
    DepthExceeded { limit: usize },

    #[error("Evaluation timed out after {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    #[error("No conditional branch matched and no else branch was given")]
    NoBranchMatched,
}

impl EvalError {
    pub fn function(msg: impl Into<String>) -> Self {
        EvalError::Function(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        use EvalError::*;
        match self {
            UndefinedVariable(_) | UsesExceeded { .. } | VariableNotAllowed(_) => ErrorKind::Variable,
            DivisionByZero | ModuloByZero => ErrorKind::Arithmetic,
            UnknownOperation(_)
            | UndefinedFunction(_)
            | FunctionNotAllowed(_)
            | ArityMismatch { .. }
            | ArgumentType { .. }
            | Function(_) => ErrorKind::Function,
            DepthExceeded { .. } => ErrorKind::Depth,
            Timeout { .. } => ErrorKind::Timeout,
            Cast(_) | UnknownType(_) => ErrorKind::Cast,
            TypeError(_) | NoBranchMatched => ErrorKind::Type,
        }
    }
}

/// Which resolver table a named type is looked up in first.
#[derive(Clone, Copy)]
enum TypeSource {
    Variable,
    Function,
}

/// Hard ceiling on evaluation depth, whatever `max_recursion_depth` says.
/// Keeps runaway recursion on the default thread stack.
pub const MAX_EVALUATION_DEPTH: usize = 256;

/// Tree-walking evaluator for one top-level call.
///
/// Holds borrowed views of the engine's registries and a configuration
/// snapshot. All per-call state (visit counter, deadline, cacheability) lives
/// here, so concurrent calls never share it.
pub struct Interpreter<'a> {
    config: &'a EngineConfig,
    operations: &'a OperationRegistry,
    functions: &'a FunctionRegistry,
    types: &'a TypeRegistry,
    context: &'a DashMap<String, Value>,
    deadline: Option<Instant>,
    visits: Cell<u64>,
    call_depth: Cell<usize>,
    cacheable: Cell<bool>,
}

impl<'a> Interpreter<'a> {
    /// The timeout clock starts here unless replaced with `with_deadline`.
    pub fn new(
        config: &'a EngineConfig,
        operations: &'a OperationRegistry,
        functions: &'a FunctionRegistry,
        types: &'a TypeRegistry,
        context: &'a DashMap<String, Value>,
    ) -> Self {
        Interpreter {
            config,
            operations,
            functions,
            types,
            context,
            deadline: config.timeout().map(|t| Instant::now() + t),
            visits: Cell::new(0),
            call_depth: Cell::new(0),
            cacheable: Cell::new(true),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Reads a value from the engine's context map.
    pub fn context(&self, key: &str) -> Option<Value> {
        self.context.get(key).map(|entry| entry.value().clone())
    }

    /// Depth of the call node currently invoking a function.
    pub fn call_depth(&self) -> usize {
        self.call_depth.get()
    }

    /// Whether the result may be stored in the evaluation cache.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable.get()
    }

    pub fn mark_uncacheable(&self) {
        self.cacheable.set(false);
    }

    /// When the current evaluation times out, if a timeout is configured.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn visits(&self) -> u64 {
        self.visits.get()
    }

    /// Evaluates `expr` at nesting level `depth`.
    pub fn evaluate(&self, expr: &Expr, env: &mut Environment, depth: usize) -> Result<Value, EvalError> {
        let limit = self.config.max_recursion_depth.min(MAX_EVALUATION_DEPTH);
        if depth > limit {
            return Err(EvalError::DepthExceeded { limit });
        }
        self.tick()?;

        if self.config.debug_mode {
            tracing::trace!(depth, node = node_name(expr), "visit");
        }

        let next = depth + 1;
        match expr {
            Expr::Integer(n) => Ok(Value::Integer(*n)),
            Expr::Float(n) => Ok(Value::Float(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Null => Ok(Value::Null),

            Expr::Variable(name) => self.eval_variable(name, env),

            Expr::BinaryOp { op, left, right } => self.eval_binary(*op, left, right, env, next),

            Expr::UnaryOp { op, operand } => {
                let value = self.evaluate(operand, env, next)?;
                self.eval_unary(*op, value)
            }

            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition, env, next)?.is_truthy() {
                    self.evaluate(then_branch, env, next)
                } else {
                    self.evaluate(else_branch, env, next)
                }
            }

            Expr::Let {
                name,
                value,
                uses,
                body,
            } => {
                let value = self.evaluate(value, env, next)?;
                let mut scope = env.scope();
                scope.define(name.clone(), value, *uses);
                self.evaluate(body, &mut scope, next)
            }

            Expr::Conditional {
                branches,
                otherwise,
            } => self.eval_conditional(branches, otherwise.as_deref(), env, next),

            Expr::Call {
                name,
                type_hint,
                args,
            } => self.eval_call(name, type_hint.as_deref(), args, env, next),

            Expr::Cast { type_name, inner } => self.eval_cast(type_name, inner, env, next),

            Expr::Grouping(inner) => self.evaluate(inner, env, next),
        }
    }

    fn tick(&self) -> Result<(), EvalError> {
        let visits = self.visits.get() + 1;
        self.visits.set(visits);

        if let Some(deadline) = self.deadline
            && visits % self.config.timeout_check_interval.max(1) == 0
            && Instant::now() >= deadline
        {
            return Err(EvalError::Timeout {
                limit_ms: self.config.evaluation_timeout_ms,
            });
        }
        Ok(())
    }

    fn eval_variable(&self, name: &str, env: &mut Environment) -> Result<Value, EvalError> {
        if !self.config.is_variable_allowed(name) {
            return Err(EvalError::VariableNotAllowed(name.to_string()));
        }
        match env.get(name) {
            Err(EvalError::UndefinedVariable(_)) if !self.config.strict_mode => {
                Ok(self.config.undefined_value.clone())
            }
            result => result,
        }
    }

    fn eval_binary(
        &self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        env: &mut Environment,
        depth: usize,
    ) -> Result<Value, EvalError> {
        // Short-circuit before touching the right operand.
        match op {
            BinOp::And => {
                let l = self.evaluate(left, env, depth)?;
                if !l.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                let r = self.evaluate(right, env, depth)?;
                return Ok(Value::Boolean(r.is_truthy()));
            }
            BinOp::Or => {
                let l = self.evaluate(left, env, depth)?;
                if l.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                let r = self.evaluate(right, env, depth)?;
                return Ok(Value::Boolean(r.is_truthy()));
            }
            _ => {}
        }

        let l = self.evaluate(left, env, depth)?;
        let r = self.evaluate(right, env, depth)?;
        self.apply_binop(op, &l, &r)
    }

    fn apply_binop(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match op {
            BinOp::Equal => Ok(Value::Boolean(left == right)),
            BinOp::NotEqual => Ok(Value::Boolean(left != right)),

            BinOp::LessThan | BinOp::GreaterThan | BinOp::LessEqual | BinOp::GreaterEqual => {
                let (a, b) = numeric_operands(op, left, right)?;
                let result = match op {
                    BinOp::LessThan => a < b,
                    BinOp::GreaterThan => a > b,
                    BinOp::LessEqual => a <= b,
                    _ => a >= b,
                };
                Ok(Value::Boolean(result))
            }

            BinOp::Add if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }

            BinOp::Add if !(left.is_number() && right.is_number()) => Err(EvalError::TypeError(
                format!(
                    "Operands must be two numbers or at least one string, got {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
            )),

            BinOp::And | BinOp::Or => Ok(Value::Boolean(if op == BinOp::And {
                left.is_truthy() && right.is_truthy()
            } else {
                left.is_truthy() || right.is_truthy()
            })),

            arithmetic => {
                let (a, b) = numeric_operands(arithmetic, left, right)?;
                let name = arithmetic
                    .operation_name()
                    .ok_or_else(|| EvalError::UnknownOperation(arithmetic.symbol().to_string()))?;
                self.operations.perform(name, a, b).map(Value::Float)
            }
        }
    }

    fn eval_unary(&self, op: UnaryOp, value: Value) -> Result<Value, EvalError> {
        match op {
            UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
            UnaryOp::Negate => match value {
                Value::Integer(n) => Ok(n
                    .checked_neg()
                    .map_or(Value::Float(-(n as f64)), Value::Integer)),
                Value::Float(n) => Ok(Value::Float(-n)),
                other => Err(EvalError::TypeError(format!(
                    "Cannot negate {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn eval_conditional(
        &self,
        branches: &[Branch],
        otherwise: Option<&Expr>,
        env: &mut Environment,
        depth: usize,
    ) -> Result<Value, EvalError> {
        for branch in branches {
            if self.evaluate(&branch.condition, env, depth)?.is_truthy() {
                return self.evaluate(&branch.result, env, depth);
            }
        }
        match otherwise {
            Some(expr) => self.evaluate(expr, env, depth),
            None => Err(EvalError::NoBranchMatched),
        }
    }

    fn eval_call(
        &self,
        name: &str,
        type_hint: Option<&str>,
        args: &[Expr],
        env: &mut Environment,
        depth: usize,
    ) -> Result<Value, EvalError> {
        let values = args
            .iter()
            .map(|arg| self.evaluate(arg, env, depth))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.config.is_function_allowed(name) {
            return Err(EvalError::FunctionNotAllowed(name.to_string()));
        }

        let Some(function) = self.functions.get(name) else {
            if self.config.strict_mode {
                return Err(EvalError::UndefinedFunction(name.to_string()));
            }
            return Ok(self.config.undefined_value.clone());
        };

        let signature = &function.signature;
        let values = self.coerce_arguments(name, signature, values)?;
        if !signature.cacheable {
            self.mark_uncacheable();
        }

        let hint = type_hint.or(signature.default_type.as_deref());
        if self.config.debug_mode {
            tracing::debug!(function = name, args = values.len(), hint, "call");
        }

        let previous = self.call_depth.replace(depth);
        let result = function.call(self, &values, hint);
        self.call_depth.set(previous);

        self.coerce_value(&signature.returns, result?, TypeSource::Function)
    }

    fn coerce_arguments(
        &self,
        name: &str,
        signature: &FunctionSignature,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, EvalError> {
        let Some(params) = &signature.params else {
            return Ok(values);
        };
        if params.len() != values.len() {
            return Err(EvalError::ArityMismatch {
                name: name.to_string(),
                expected: params.len(),
                found: values.len(),
            });
        }

        params
            .iter()
            .zip(values)
            .enumerate()
            .map(|(index, (ty, value))| {
                match self.coerce_value(ty, value, TypeSource::Function) {
                    Err(EvalError::Cast(source)) => Err(EvalError::ArgumentType {
                        function: name.to_string(),
                        index: index + 1,
                        source,
                    }),
                    other => other,
                }
            })
            .collect()
    }

    fn eval_cast(
        &self,
        type_name: &str,
        inner: &Expr,
        env: &mut Environment,
        depth: usize,
    ) -> Result<Value, EvalError> {
        let ty = ValueType::from_name(type_name);

        let value = match (strip_grouping(inner), &ty) {
            // The cast type doubles as the call's hint unless it carries its own.
            (
                Expr::Call {
                    name,
                    type_hint,
                    args,
                },
                _,
            ) => self.eval_call(
                name,
                type_hint.as_deref().or(Some(type_name)),
                args,
                env,
                depth,
            )?,
            // `Out<Material>(STONE)`: a bare name is a literal of the domain type.
            (Expr::Variable(name), ValueType::Named(_)) if !env.contains(name) => {
                Value::String(name.clone())
            }
            _ => self.evaluate(inner, env, depth)?,
        };

        self.coerce_value(&ty, value, TypeSource::Variable)
    }

    /// Coerces `value` into the type called `type_name`, consulting domain
    /// resolvers for non-built-in names.
    pub fn coerce_to(&self, value: Value, type_name: &str) -> Result<Value, EvalError> {
        self.coerce_value(&ValueType::from_name(type_name), value, TypeSource::Variable)
    }

    fn coerce_value(&self, ty: &ValueType, value: Value, source: TypeSource) -> Result<Value, EvalError> {
        let ValueType::Named(type_name) = ty else {
            return ty.coerce(value).map_err(EvalError::Cast);
        };

        if let Value::Domain(d) = &value
            && d.type_name.eq_ignore_ascii_case(type_name)
        {
            return Ok(value);
        }

        let resolver = match source {
            TypeSource::Variable => self.types.variable_type(type_name),
            TypeSource::Function => self.types.function_type(type_name),
        }
        .ok_or_else(|| EvalError::UnknownType(type_name.clone()))?;

        let raw = match &value {
            Value::Domain(d) => d.name.clone(),
            other => other.to_string(),
        };
        resolver
            .resolve(&raw)
            .ok_or_else(|| EvalError::Cast(CastError::new(&value, type_name)))
    }
}

fn strip_grouping(expr: &Expr) -> &Expr {
    match expr {
        Expr::Grouping(inner) => strip_grouping(inner),
        other => other,
    }
}

fn numeric_operands(op: BinOp, left: &Value, right: &Value) -> Result<(f64, f64), EvalError> {
    match (left.as_float(), right.as_float()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::TypeError(format!(
            "Operands of '{}' must be numbers, got {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn node_name(expr: &Expr) -> &'static str {
    match expr {
        Expr::Integer(_) | Expr::Float(_) | Expr::String(_) | Expr::Boolean(_) | Expr::Null => {
            "literal"
        }
        Expr::Variable(_) => "variable",
        Expr::BinaryOp { .. } => "binary",
        Expr::UnaryOp { .. } => "unary",
        Expr::Ternary { .. } => "ternary",
        Expr::Let { .. } => "let",
        Expr::Conditional { .. } => "conditional",
        Expr::Call { .. } => "call",
        Expr::Cast { .. } => "cast",
        Expr::Grouping(_) => "grouping",
    }
}
