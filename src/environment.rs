use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
};

use crate::{ast::UseLimit, interpreter::EvalError, value::Value};

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    limit: UseLimit,
    remaining: Option<u32>,
}

impl Binding {
    fn new(value: Value, limit: UseLimit) -> Self {
        Binding {
            value,
            limit,
            remaining: limit.remaining(),
        }
    }
}

/// Lexically scoped variable storage for one evaluation.
///
/// `frames[0]` holds the caller's variables and is never popped. Each `let`
/// pushes a frame holding its single binding.
#[derive(Debug, Clone)]
pub struct Environment {
    frames: Vec<HashMap<String, Binding>>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            frames: vec![HashMap::new()],
        }
    }

    /// Seeds the root frame with unlimited bindings.
    pub fn from_variables<'a>(variables: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Self {
        let root = variables
            .into_iter()
            .map(|(k, v)| (k.clone(), Binding::new(v.clone(), UseLimit::Unlimited)))
            .collect();
        Environment { frames: vec![root] }
    }

    /// Binds `name` in the innermost frame, shadowing outer bindings.
    pub fn define(&mut self, name: impl Into<String>, value: Value, uses: UseLimit) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), Binding::new(value, uses));
        }
    }

    /// Reads `name`, consuming one use of a limited binding.
    pub fn get(&mut self, name: &str) -> Result<Value, EvalError> {
        let binding = self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
            .ok_or_else(|| EvalError::UndefinedVariable(name.to_string()))?;

        match binding.remaining {
            None => Ok(binding.value.clone()),
            Some(0) => Err(EvalError::UsesExceeded {
                name: name.to_string(),
                allowed: binding.limit.remaining().unwrap_or(0),
            }),
            Some(left) => {
                binding.remaining = Some(left - 1);
                Ok(binding.value.clone())
            }
        }
    }

    /// Reads `name` without consuming a use.
    pub fn peek(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .map(|b| &b.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.frames.iter().any(|frame| frame.contains_key(name))
    }

    /// Remaining reads of `name`, `None` when unlimited or undefined.
    pub fn remaining_uses(&self, name: &str) -> Option<u32> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .and_then(|b| b.remaining)
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Drops the innermost frame. The root frame stays.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pushes a frame that is popped when the guard drops, including on early return.
    pub fn scope(&mut self) -> ScopeGuard<'_> {
        self.push();
        ScopeGuard { env: self }
    }
}

/// Releases a child scope on drop.
pub struct ScopeGuard<'a> {
    env: &'a mut Environment,
}

impl Deref for ScopeGuard<'_> {
    type Target = Environment;

    fn deref(&self) -> &Environment {
        self.env
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Environment {
        self.env
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.env.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limited_binding_runs_out() {
        let mut env = Environment::new();
        env.define("z", Value::Integer(3), UseLimit::Limited(1));
        assert_eq!(env.get("z").unwrap(), Value::Integer(3));
        let err = env.get("z").unwrap_err();
        assert!(err.to_string().contains("exceeded its allowed uses"));
    }

    #[test]
    fn scope_guard_pops_on_drop() {
        let mut env = Environment::new();
        env.define("outer", Value::Integer(1), UseLimit::Unlimited);
        {
            let mut scope = env.scope();
            scope.define("inner", Value::Integer(2), UseLimit::Unlimited);
            assert!(scope.contains("inner"));
            assert_eq!(scope.depth(), 2);
        }
        assert!(!env.contains("inner"));
        assert_eq!(env.depth(), 1);
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut env = Environment::new();
        env.define("x", Value::Integer(1), UseLimit::Unlimited);
        let mut scope = env.scope();
        scope.define("x", Value::Integer(2), UseLimit::Limited(1));
        assert_eq!(scope.get("x").unwrap(), Value::Integer(2));
        assert!(scope.get("x").is_err());
    }

    #[test]
    fn root_frame_is_never_popped() {
        let mut env = Environment::new();
        env.pop();
        env.define("x", Value::Null, UseLimit::Unlimited);
        assert!(env.contains("x"));
    }
}
