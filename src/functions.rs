use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;

use crate::{
    ast::{Expr, UseLimit},
    environment::Environment,
    interpreter::{EvalError, Interpreter},
    parser::{self, ParseError},
    value::{Value, ValueType},
};

/// A host function callable from expressions.
///
/// Receives the running interpreter (for context and configuration), the
/// already-coerced arguments and the call's type hint, if any.
pub type NativeFunction =
    dyn Fn(&Interpreter<'_>, &[Value], Option<&str>) -> Result<Value, EvalError> + Send + Sync;

/// Parameter and return typing of a registered function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// `None` accepts any number of untyped arguments.
    pub params: Option<Vec<ValueType>>,
    pub returns: ValueType,
    /// Type hint used when a call carries none.
    pub default_type: Option<String>,
    /// `false` for functions with side effects or non-deterministic results.
    pub cacheable: bool,
}

impl Default for FunctionSignature {
    fn default() -> Self {
        FunctionSignature::any()
    }
}

impl FunctionSignature {
    /// Variadic, untyped, cacheable.
    pub fn any() -> Self {
        FunctionSignature {
            params: None,
            returns: ValueType::Any,
            default_type: None,
            cacheable: true,
        }
    }

    pub fn new(params: Vec<ValueType>, returns: ValueType) -> Self {
        FunctionSignature {
            params: Some(params),
            returns,
            ..FunctionSignature::any()
        }
    }

    pub fn with_default_type(mut self, type_name: impl Into<String>) -> Self {
        self.default_type = Some(type_name.into());
        self
    }

    /// Results of this function are never stored in the evaluation cache.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

pub struct RegisteredFunction {
    pub name: String,
    pub signature: FunctionSignature,
    callable: Arc<NativeFunction>,
}

impl RegisteredFunction {
    pub fn call(
        &self,
        interp: &Interpreter<'_>,
        args: &[Value],
        type_hint: Option<&str>,
    ) -> Result<Value, EvalError> {
        (self.callable)(interp, args, type_hint)
    }
}

/// Functions known to an engine, keyed by exact name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<RegisteredFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callable` under `name`, replacing any previous registration.
    pub fn register<F>(&self, name: impl Into<String>, callable: F, signature: FunctionSignature)
    where
        F: Fn(&Interpreter<'_>, &[Value], Option<&str>) -> Result<Value, EvalError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let function = RegisteredFunction {
            name: name.clone(),
            signature,
            callable: Arc::new(callable),
        };
        self.functions.insert(name, Arc::new(function));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredFunction>> {
        self.functions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn clear(&self) {
        self.functions.clear();
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// A textual function definition could not be understood.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("Invalid function definition '{0}': expected 'name(params) => body'")]
    InvalidHeader(String),

    #[error("Invalid parameter '{0}': expected 'name' or 'name: type'")]
    InvalidParameter(String),

    #[error("Duplicate parameter '{0}'")]
    DuplicateParameter(String),

    #[error("Invalid function body: {0}")]
    Body(#[from] ParseError),
}

static HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:<\s*([A-Za-z_][A-Za-z0-9_]*)\s*>)?\s*\(([^)]*)\)\s*=>\s*(.+?)\s*$",
    )
    .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

static PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*([A-Za-z_][A-Za-z0-9_]*))?$")
        .unwrap_or_else(|e| unreachable!("static pattern: {e}"))
});

/// A function written in the expression language itself.
///
/// # Examples
///
/// ```text
/// double(x) => x * 2
/// clamp<int>(v: number, lo: number, hi: number) => if v < lo: lo elif v > hi: hi else: v
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub return_type: Option<String>,
    pub params: Vec<(String, ValueType)>,
    pub body: Arc<Expr>,
}

impl FunctionDefinition {
    pub fn parse(definition: &str) -> Result<Self, DefinitionError> {
        let caps = HEADER
            .captures(definition)
            .ok_or_else(|| DefinitionError::InvalidHeader(definition.trim().to_string()))?;

        let name = caps[1].to_string();
        let return_type = caps.get(2).map(|m| m.as_str().to_string());

        let mut params: Vec<(String, ValueType)> = Vec::new();
        let raw_params = caps[3].trim();
        if !raw_params.is_empty() {
            for raw in raw_params.split(',') {
                let raw = raw.trim();
                let param = PARAM
                    .captures(raw)
                    .ok_or_else(|| DefinitionError::InvalidParameter(raw.to_string()))?;
                let param_name = param[1].to_string();
                if params.iter().any(|(existing, _)| *existing == param_name) {
                    return Err(DefinitionError::DuplicateParameter(param_name));
                }
                let ty = param
                    .get(2)
                    .map_or(ValueType::Any, |m| ValueType::from_name(m.as_str()));
                params.push((param_name, ty));
            }
        }

        let body = parser::parse(&caps[4])?;

        Ok(FunctionDefinition {
            name,
            return_type,
            params,
            body: Arc::new(body),
        })
    }

    pub fn signature(&self) -> FunctionSignature {
        let params = self.params.iter().map(|(_, ty)| ty.clone()).collect();
        let returns = self
            .return_type
            .as_deref()
            .map_or(ValueType::Any, ValueType::from_name);
        FunctionSignature::new(params, returns)
    }

    /// Registers this definition. The body sees only its parameters.
    pub fn register(self, registry: &FunctionRegistry) {
        let signature = self.signature();
        let FunctionDefinition {
            name, params, body, ..
        } = self;
        let names: Vec<String> = params.into_iter().map(|(name, _)| name).collect();

        registry.register(
            name,
            move |interp, args, type_hint| {
                let mut env = Environment::new();
                for (param, arg) in names.iter().zip(args) {
                    env.define(param.clone(), arg.clone(), UseLimit::Unlimited);
                }
                let result = interp.evaluate(&body, &mut env, interp.call_depth() + 1)?;
                match type_hint {
                    Some(hint) => interp.coerce_to(result, hint),
                    None => Ok(result),
                }
            },
            signature,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_definition() {
        let def = FunctionDefinition::parse("area<number>(w: number, h) => w * h").unwrap();
        assert_eq!(def.name, "area");
        assert_eq!(def.return_type.as_deref(), Some("number"));
        assert_eq!(
            def.params,
            vec![
                ("w".to_string(), ValueType::Number),
                ("h".to_string(), ValueType::Any)
            ]
        );
    }

    #[test]
    fn parameterless_definition() {
        let def = FunctionDefinition::parse("answer() => 42").unwrap();
        assert!(def.params.is_empty());
        assert_eq!(*def.body, Expr::Integer(42));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            FunctionDefinition::parse("double x => x"),
            Err(DefinitionError::InvalidHeader(_))
        ));
        assert!(matches!(
            FunctionDefinition::parse("f(1x) => 1"),
            Err(DefinitionError::InvalidParameter(_))
        ));
        assert!(matches!(
            FunctionDefinition::parse("f(a, a) => a"),
            Err(DefinitionError::DuplicateParameter(_))
        ));
        assert!(matches!(
            FunctionDefinition::parse("f(a) => a +"),
            Err(DefinitionError::Body(_))
        ));
    }

    #[test]
    fn registering_twice_replaces() {
        let registry = FunctionRegistry::new();
        registry.register("f", |_, _, _| Ok(Value::Integer(1)), FunctionSignature::any());
        registry.register("f", |_, _, _| Ok(Value::Integer(2)), FunctionSignature::any().uncached());
        assert_eq!(registry.names(), vec!["f".to_string()]);
        assert!(!registry.get("f").unwrap().signature.cacheable);
    }
}
