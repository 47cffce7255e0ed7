//! Computed values and the keys that identify them inside a result model.

use std::collections::BTreeMap;
use std::fmt;

/// A value produced by the graph engine for one output.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// A floating point number.
    Double(f64),
    /// An integral number.
    Integer(i64),
    /// A boolean flag.
    Boolean(bool),
    /// Free-form text.
    Text(String),
    /// A vector of numbers, e.g. a curve or a bucketed sensitivity.
    Vector(Vec<f64>),
    /// The engine could not produce a value; the payload says why.
    Missing(String),
}

/// Runtime type of a [`Value`], used to register type-specific delta comparers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueKind {
    /// See [`Value::Double`].
    Double,
    /// See [`Value::Integer`].
    Integer,
    /// See [`Value::Boolean`].
    Boolean,
    /// See [`Value::Text`].
    Text,
    /// See [`Value::Vector`].
    Vector,
    /// See [`Value::Missing`].
    Missing,
}

impl Value {
    /// Runtime type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Double(_) => ValueKind::Double,
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Text(_) => ValueKind::Text,
            Value::Vector(_) => ValueKind::Vector,
            Value::Missing(_) => ValueKind::Missing,
        }
    }

    /// Numeric view of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Exact equality. Floats compare by bit pattern so that a value is always
    /// identical to itself, `NaN` included.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::Missing(a), Value::Missing(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_identical(other)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Category of the object a value is computed for.
///
/// Output visibility is configured per category, see
/// [`ResultModelDefinition`](crate::ResultModelDefinition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ComputationTargetType {
    /// An aggregate grouping node, e.g. a portfolio node.
    PortfolioNode,
    /// An individual item held in a grouping node.
    Position,
    /// A sub-item of a position.
    Trade,
    /// A classifier shared by many items, e.g. a security.
    Security,
    /// A context-free value such as a curve or a currency pair.
    Primitive,
}

/// The object a value is computed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetSpecification {
    /// Category of the target.
    pub target_type: ComputationTargetType,
    /// Identifier of the target within its category.
    pub id: String,
}

impl TargetSpecification {
    /// Create a target specification.
    pub fn new(target_type: ComputationTargetType, id: impl Into<String>) -> Self {
        Self {
            target_type,
            id: id.into(),
        }
    }

    /// Shorthand for a [`ComputationTargetType::Primitive`] target.
    pub fn primitive(id: impl Into<String>) -> Self {
        Self::new(ComputationTargetType::Primitive, id)
    }
}

impl fmt::Display for TargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}~{}", self.target_type, self.id)
    }
}

/// Name and qualifiers of a value on a target, e.g. `PresentValue{Currency=USD}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueKey {
    /// Value name.
    pub name: String,
    /// Qualifiers that distinguish values with the same name.
    pub qualifiers: BTreeMap<String, String>,
}

impl ValueKey {
    /// A key with no qualifiers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qualifiers: BTreeMap::new(),
        }
    }

    /// Add a qualifier.
    pub fn with_qualifier(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifiers.insert(name.into(), value.into());
        self
    }
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.qualifiers.is_empty() {
            let pairs: Vec<String> = self
                .qualifiers
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }
        Ok(())
    }
}

/// Fully qualified identity of a computed value: target plus value key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueSpecification {
    /// The target the value is computed for.
    pub target: TargetSpecification,
    /// Name and qualifiers of the value.
    pub key: ValueKey,
}

impl ValueSpecification {
    /// Create a value specification.
    pub fn new(target: TargetSpecification, key: ValueKey) -> Self {
        Self { target, key }
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_is_identical_to_itself() {
        let nan = Value::Double(f64::NAN);
        assert!(nan.is_identical(&nan.clone()));
        assert_eq!(nan, nan.clone());
    }

    #[test]
    fn test_values_of_different_kinds_differ() {
        assert_ne!(Value::Double(1.0), Value::Integer(1));
        assert_eq!(Value::Integer(1).as_f64(), Some(1.0));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
    }

    #[test]
    fn test_value_spec_display() {
        let spec = ValueSpecification::new(
            TargetSpecification::new(ComputationTargetType::Position, "P1"),
            ValueKey::new("PV").with_qualifier("Currency", "USD"),
        );
        assert_eq!(spec.to_string(), "PV{Currency=USD}@Position~P1");
    }
}
