use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use crate::value::{DomainValue, Value};

/// Turns an identifier or string into a value of a host-defined type.
pub trait TypeResolver: Send + Sync {
    fn resolve(&self, raw: &str) -> Option<Value>;
}

impl<F> TypeResolver for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn resolve(&self, raw: &str) -> Option<Value> {
        self(raw)
    }
}

/// Resolver for a closed set of names, matched case-insensitively.
///
/// # Examples
///
/// ```
/// use expr_engine::types::{EnumResolver, TypeResolver};
/// use expr_engine::{DomainValue, Value};
///
/// let material = EnumResolver::new("Material", ["STONE", "DIRT"]);
/// assert_eq!(
///     material.resolve("stone"),
///     Some(Value::Domain(DomainValue::new("Material", "STONE")))
/// );
/// assert_eq!(material.resolve("lava"), None);
/// ```
pub struct EnumResolver {
    type_name: String,
    variants: HashSet<String>,
}

impl EnumResolver {
    pub fn new<I, S>(type_name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnumResolver {
            type_name: type_name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }
}

impl TypeResolver for EnumResolver {
    fn resolve(&self, raw: &str) -> Option<Value> {
        self.variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw.trim()))
            .map(|v| Value::Domain(DomainValue::new(&self.type_name, v)))
    }
}

/// Domain types known to an engine.
///
/// Variable types back `Out<Type>(...)`; function types back parameter and
/// return coercion. A lookup in one falls back to the other.
#[derive(Default)]
pub struct TypeRegistry {
    variable_types: DashMap<String, Arc<dyn TypeResolver>>,
    function_types: DashMap<String, Arc<dyn TypeResolver>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_variable_type(&self, name: &str, resolver: impl TypeResolver + 'static) {
        self.variable_types
            .insert(name.to_ascii_lowercase(), Arc::new(resolver));
    }

    pub fn register_function_type(&self, name: &str, resolver: impl TypeResolver + 'static) {
        self.function_types
            .insert(name.to_ascii_lowercase(), Arc::new(resolver));
    }

    pub fn variable_type(&self, name: &str) -> Option<Arc<dyn TypeResolver>> {
        let key = name.to_ascii_lowercase();
        self.variable_types
            .get(&key)
            .or_else(|| self.function_types.get(&key))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn function_type(&self, name: &str) -> Option<Arc<dyn TypeResolver>> {
        let key = name.to_ascii_lowercase();
        self.function_types
            .get(&key)
            .or_else(|| self.variable_types.get(&key))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn unregister(&self, name: &str) {
        let key = name.to_ascii_lowercase();
        self.variable_types.remove(&key);
        self.function_types.remove(&key);
    }
}
