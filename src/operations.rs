use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};

use crate::interpreter::EvalError;

/// A named binary arithmetic operation.
pub trait MathOperation: Send + Sync {
    fn name(&self) -> &str;

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError>;
}

/// Runs `op` on exact decimals when both operands convert, otherwise on floats.
///
/// Decimal results keep `0.1 + 0.2` at `0.3`.
fn decimal_or_float(
    a: f64,
    b: f64,
    op: impl Fn(Decimal, Decimal) -> Option<Decimal>,
    fallback: impl Fn(f64, f64) -> f64,
) -> f64 {
    if let Some(ad) = Decimal::from_f64(a)
        && let Some(bd) = Decimal::from_f64(b)
        && let Some(rd) = op(ad, bd)
        && let Some(r) = rd.to_f64()
    {
        return r;
    }
    fallback(a, b)
}

pub struct Addition;

impl MathOperation for Addition {
    fn name(&self) -> &str {
        "addition"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        Ok(decimal_or_float(a, b, |x, y| x.checked_add(y), |x, y| x + y))
    }
}

pub struct Subtraction;

impl MathOperation for Subtraction {
    fn name(&self) -> &str {
        "subtraction"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        Ok(decimal_or_float(a, b, |x, y| x.checked_sub(y), |x, y| x - y))
    }
}

pub struct Multiplication;

impl MathOperation for Multiplication {
    fn name(&self) -> &str {
        "multiplication"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        Ok(decimal_or_float(a, b, |x, y| x.checked_mul(y), |x, y| x * y))
    }
}

pub struct Division;

impl MathOperation for Division {
    fn name(&self) -> &str {
        "division"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        if b == 0.0 {
            return Err(EvalError::DivisionByZero);
        }
        Ok(decimal_or_float(a, b, |x, y| x.checked_div(y), |x, y| x / y))
    }
}

pub struct Modulo;

impl MathOperation for Modulo {
    fn name(&self) -> &str {
        "modulo"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        if b == 0.0 {
            return Err(EvalError::ModuloByZero);
        }
        Ok(decimal_or_float(a, b, |x, y| x.checked_rem(y), |x, y| x % y))
    }
}

pub struct Power;

impl MathOperation for Power {
    fn name(&self) -> &str {
        "power"
    }

    fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
        Ok(a.powf(b))
    }
}

/// Arithmetic operations resolved by case-insensitive name.
///
/// Each engine owns its registry, so hosts can replace `division` or add
/// operations without affecting other engines.
pub struct OperationRegistry {
    operations: DashMap<String, Arc<dyn MathOperation>>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        let registry = OperationRegistry::empty();
        registry.register(Addition);
        registry.register(Subtraction);
        registry.register(Multiplication);
        registry.register(Division);
        registry.register(Modulo);
        registry.register(Power);
        registry
    }
}

impl OperationRegistry {
    /// Registry holding the six built-in operations.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        OperationRegistry {
            operations: DashMap::new(),
        }
    }

    /// Registers `operation` under its name, replacing any previous one.
    pub fn register(&self, operation: impl MathOperation + 'static) {
        let key = operation.name().to_ascii_lowercase();
        self.operations.insert(key, Arc::new(operation));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MathOperation>> {
        self.operations
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(&name.to_ascii_lowercase())
    }

    pub fn perform(&self, name: &str, a: f64, b: f64) -> Result<f64, EvalError> {
        let operation = self
            .get(name)
            .ok_or_else(|| EvalError::UnknownOperation(name.to_string()))?;
        operation.perform(a, b)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_addition_is_exact() {
        let registry = OperationRegistry::new();
        assert_eq!(registry.perform("addition", 0.1, 0.2).unwrap(), 0.3);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let registry = OperationRegistry::new();
        assert_eq!(registry.perform("division", 1.0, 0.0), Err(EvalError::DivisionByZero));
        assert_eq!(registry.perform("modulo", 1.0, 0.0), Err(EvalError::ModuloByZero));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = OperationRegistry::new();
        assert_eq!(registry.perform("POWER", 2.0, 10.0).unwrap(), 1024.0);
        assert!(registry.contains("Multiplication"));
    }

    #[test]
    fn unknown_operation() {
        let registry = OperationRegistry::empty();
        assert!(matches!(
            registry.perform("addition", 1.0, 2.0),
            Err(EvalError::UnknownOperation(_))
        ));
    }

    #[test]
    fn custom_operation_replaces_builtin() {
        struct Saturating;
        impl MathOperation for Saturating {
            fn name(&self) -> &str {
                "Division"
            }
            fn perform(&self, a: f64, b: f64) -> Result<f64, EvalError> {
                Ok(if b == 0.0 { f64::MAX } else { a / b })
            }
        }

        let registry = OperationRegistry::new();
        registry.register(Saturating);
        assert_eq!(registry.perform("division", 1.0, 0.0).unwrap(), f64::MAX);
        assert_eq!(registry.names().len(), 6);
    }
}
