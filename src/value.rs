use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Caller-supplied variables, keyed by flat (possibly dotted) names.
pub type Variables = HashMap<String, Value>;

/// A value produced by a domain type resolver, such as a member of a host enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainValue {
    pub type_name: String,
    pub name: String,
}

impl DomainValue {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        DomainValue {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

/// A value flowing through the expression language.
///
/// Integers and floats stay distinct until arithmetic touches them; every
/// arithmetic result is a `Float`.
///
/// # Examples
///
/// ```
/// use expr_engine::Value;
///
/// let level = Value::Integer(12);
/// let ratio = Value::Float(0.5);
/// let name = Value::from("steve");
///
/// assert!(level.is_truthy());
/// assert_eq!(ratio.as_float(), Some(0.5));
/// assert_eq!(name.to_string(), "steve");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value
    Null,

    /// `true` or `false`
    Boolean(bool),

    /// Integer number
    Integer(i64),

    /// Floating-point number
    Float(f64),

    /// UTF-8 string
    String(String),

    /// Value of a host-registered domain type
    Domain(DomainValue),
}

impl Value {
    /// Check if the value is truthy (for conditions)
    pub fn is_truthy(&self) -> bool {
        use Value::*;
        match self {
            Null => false,
            Boolean(b) => *b,
            Integer(n) => *n != 0,
            Float(n) => *n != 0.0,
            String(s) => !s.is_empty(),
            Domain(_) => true,
        }
    }

    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as integer, truncating floats
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(n) if n.is_finite() => Some(n.trunc() as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Float(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Human-readable type name used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Domain(d) => &d.type_name,
        }
    }

    /// Get as string (concatenation). Whole floats print without a trailing `.0`.
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", format_float(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Domain(d) => write!(f, "{}", d.name),
        }
    }
}

/// Numbers compare by value across `Integer` and `Float`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.as_float() == b.as_float(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Domain(a), Value::Domain(b)) => a == b,
            _ => false,
        }
    }
}

/// Consistent with `PartialEq`: a whole float hashes like the equal integer.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Integer(n) => {
                2u8.hash(state);
                (*n as f64).to_bits().hash(state);
            }
            Value::Float(n) => {
                2u8.hash(state);
                // -0.0 == 0.0
                let n = if *n == 0.0 { 0.0 } else { *n };
                n.to_bits().hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Domain(d) => {
                4u8.hash(state);
                d.hash(state);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DomainValue> for Value {
    fn from(d: DomainValue) -> Self {
        Value::Domain(d)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A value could not be narrowed into the requested type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Cannot convert {from} '{value}' to {target}")]
pub struct CastError {
    pub from: String,
    pub value: String,
    pub target: String,
}

impl CastError {
    pub fn new(value: &Value, target: impl fmt::Display) -> Self {
        CastError {
            from: value.type_name().to_string(),
            value: value.to_string(),
            target: target.to_string(),
        }
    }
}

/// Types a value can be coerced into.
///
/// Built-in names are matched case-insensitively; anything else names a
/// host-registered domain type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Any,
    Number,
    Integer,
    String,
    Boolean,
    Named(String),
}

impl ValueType {
    /// # Examples
    ///
    /// ```
    /// use expr_engine::ValueType;
    ///
    /// assert_eq!(ValueType::from_name("INT"), ValueType::Integer);
    /// assert_eq!(ValueType::from_name("double"), ValueType::Number);
    /// assert_eq!(ValueType::from_name("Material"), ValueType::Named("Material".into()));
    /// ```
    pub fn from_name(name: &str) -> ValueType {
        match name.to_ascii_lowercase().as_str() {
            "any" | "object" | "value" => ValueType::Any,
            "number" | "double" | "float" => ValueType::Number,
            "int" | "integer" | "long" => ValueType::Integer,
            "string" | "str" => ValueType::String,
            "boolean" | "bool" => ValueType::Boolean,
            _ => ValueType::Named(name.to_string()),
        }
    }

    /// Coerces a value into a built-in type.
    ///
    /// `Named` types are resolved by the interpreter through the type
    /// registry; here they only accept a domain value of the same type.
    pub fn coerce(&self, value: Value) -> Result<Value, CastError> {
        match self {
            ValueType::Any => Ok(value),
            ValueType::Number => match &value {
                Value::Integer(n) => Ok(Value::Float(*n as f64)),
                Value::Float(_) => Ok(value),
                Value::Boolean(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| CastError::new(&value, self)),
                _ => Err(CastError::new(&value, self)),
            },
            ValueType::Integer => match &value {
                Value::Integer(_) => Ok(value),
                Value::Float(n) if n.is_finite() => Ok(Value::Integer(n.trunc() as i64)),
                Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| {
                            s.parse::<f64>()
                                .ok()
                                .filter(|n| n.is_finite())
                                .map(|n| n.trunc() as i64)
                        })
                        .map(Value::Integer)
                        .ok_or_else(|| CastError::new(&value, self))
                }
                _ => Err(CastError::new(&value, self)),
            },
            ValueType::String => match value {
                Value::String(_) => Ok(value),
                other => Ok(Value::String(other.to_string())),
            },
            ValueType::Boolean => match &value {
                Value::Boolean(_) => Ok(value),
                Value::Integer(n) => Ok(Value::Boolean(*n != 0)),
                Value::Float(n) => Ok(Value::Boolean(*n != 0.0)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    _ => Err(CastError::new(&value, self)),
                },
                _ => Err(CastError::new(&value, self)),
            },
            ValueType::Named(name) => match &value {
                Value::Domain(d) if d.type_name.eq_ignore_ascii_case(name) => Ok(value),
                _ => Err(CastError::new(&value, self)),
            },
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => write!(f, "any"),
            ValueType::Number => write!(f, "number"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::String => write!(f, "string"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Rust types an evaluation result can be extracted into.
pub trait FromValue: Sized {
    /// The type the result is coerced into before extraction.
    fn target() -> ValueType;

    /// Extracts from a value already coerced to `target()`.
    fn from_value(value: Value) -> Result<Self, CastError>;

    /// Coerces to `target()`, then extracts.
    fn coerce_from(value: Value) -> Result<Self, CastError> {
        Self::from_value(Self::target().coerce(value)?)
    }
}

impl FromValue for Value {
    fn target() -> ValueType {
        ValueType::Any
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        Ok(value)
    }
}

impl FromValue for f64 {
    fn target() -> ValueType {
        ValueType::Number
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        match value {
            Value::Float(n) => Ok(n),
            other => Err(CastError::new(&other, "number")),
        }
    }
}

impl FromValue for i64 {
    fn target() -> ValueType {
        ValueType::Integer
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        match value {
            Value::Integer(n) => Ok(n),
            other => Err(CastError::new(&other, "integer")),
        }
    }
}

impl FromValue for bool {
    fn target() -> ValueType {
        ValueType::Boolean
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(CastError::new(&other, "boolean")),
        }
    }
}

impl FromValue for String {
    fn target() -> ValueType {
        ValueType::String
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(CastError::new(&other, "string")),
        }
    }
}

impl FromValue for DomainValue {
    fn target() -> ValueType {
        ValueType::Any
    }

    fn from_value(value: Value) -> Result<Self, CastError> {
        match value {
            Value::Domain(d) => Ok(d),
            other => Err(CastError::new(&other, "domain value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn whole_floats_display_without_fraction() {
        assert_eq!(Value::Float(7.0).to_string(), "7");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
    }

    #[test]
    fn numeric_equality_crosses_representations() {
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_eq!(hash_of(&Value::Integer(3)), hash_of(&Value::Float(3.0)));
        assert_ne!(Value::Integer(3), Value::String("3".into()));
    }

    #[test]
    fn boolean_coercion_accepts_digits() {
        assert_eq!(ValueType::Boolean.coerce("1".into()).unwrap(), Value::Boolean(true));
        assert_eq!(ValueType::Boolean.coerce("FALSE".into()).unwrap(), Value::Boolean(false));
        assert!(ValueType::Boolean.coerce("maybe".into()).is_err());
    }

    #[test]
    fn integer_coercion_truncates() {
        assert_eq!(ValueType::Integer.coerce(Value::Float(7.9)).unwrap(), Value::Integer(7));
        assert_eq!(ValueType::Integer.coerce("12.5".into()).unwrap(), Value::Integer(12));
    }

    #[test]
    fn cast_error_message() {
        let err = ValueType::Number.coerce("abc".into()).unwrap_err();
        assert_eq!(err.to_string(), "Cannot convert string 'abc' to number");
    }

    #[test]
    fn extraction_goes_through_target_type() {
        assert_eq!(i64::target(), ValueType::Integer);
        assert_eq!(i64::coerce_from(Value::Float(3.5)).unwrap(), 3);
        assert_eq!(f64::coerce_from("2.25".into()).unwrap(), 2.25);
        assert_eq!(String::coerce_from(Value::Float(4.0)).unwrap(), "4");
        assert!(bool::coerce_from(Value::Integer(0)).is_ok_and(|b| !b));
        // without coercion the representation must already match
        assert!(i64::from_value(Value::Float(3.5)).is_err());
    }
}
