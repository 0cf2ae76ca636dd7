//! Parameter model: values, declared types, specs and expansion settings
//!
//! A capability method declares its formal parameters as a list of
//! [`ParamSpec`]s. Callers supply concrete values as [`ParamSetting`]s;
//! the variant [`ParamSetting::FromPipeline`] marks a parameter that will
//! be bound to an upstream artifact at run time instead of a literal value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// The tag of a concrete parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    List,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "str",
            ParamType::List => "list",
        };
        write!(f, "{}", name)
    }
}

/// A concrete parameter value
///
/// Values are carried through parameter tables, graph JSON and method
/// invocations. `List` holds small vectors such as a 3-component size;
/// list values are flattened to suffixed columns in tabular storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// The type tag of this value
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Bool(_) => ParamType::Bool,
            ParamValue::Int(_) => ParamType::Int,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Str(_) => ParamType::Str,
            ParamValue::List(_) => ParamType::List,
        }
    }

    /// Numeric view; integers coerce to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric vector view; a scalar yields a one-element vector
    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            ParamValue::List(items) => items.iter().map(|v| v.as_f64()).collect(),
            other => other.as_f64().map(|v| vec![v]),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::List(v.into_iter().map(ParamValue::Float).collect())
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::List(v.into_iter().map(ParamValue::Int).collect())
    }
}

/// Declared formal parameter of a capability method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Accepted value types; more than one entry forms a union
    pub types: Vec<ParamType>,
    /// Default value for optional parameters
    pub default: Option<ParamValue>,
    /// Whether the parameter may be omitted
    pub optional: bool,
}

impl ParamSpec {
    /// A mandatory parameter with the given accepted types
    pub fn required(name: impl Into<String>, types: &[ParamType]) -> Self {
        Self {
            name: name.into(),
            types: types.to_vec(),
            default: None,
            optional: false,
        }
    }

    /// An optional parameter with a default value
    pub fn optional(
        name: impl Into<String>,
        types: &[ParamType],
        default: impl Into<ParamValue>,
    ) -> Self {
        Self {
            name: name.into(),
            types: types.to_vec(),
            default: Some(default.into()),
            optional: true,
        }
    }

    /// Check a value against the declared type union (exact tag membership)
    pub fn accepts(&self, value: &ParamValue) -> bool {
        self.types.contains(&value.param_type())
    }

    /// Validate a value, producing an actionable error on mismatch
    pub fn validate(&self, value: &ParamValue) -> Result<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(EngineError::InvalidParameterType {
                param: self.name.clone(),
                actual: value.param_type(),
                expected: self.types.clone(),
            })
        }
    }
}

/// One caller-supplied parameter setting for [`Step::specify_parameters`]
///
/// [`Step::specify_parameters`]: crate::step::Step::specify_parameters
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSetting {
    /// A single (non-expanded) value, broadcast onto every combination
    Value(ParamValue),
    /// A list of candidate values; two or more entries form an expansion axis
    Values(Vec<ParamValue>),
    /// The value is produced by an upstream pipeline step and bound at run time
    FromPipeline,
}

impl ParamSetting {
    pub fn value(v: impl Into<ParamValue>) -> Self {
        ParamSetting::Value(v.into())
    }

    pub fn values<V: Into<ParamValue>>(vs: impl IntoIterator<Item = V>) -> Self {
        ParamSetting::Values(vs.into_iter().map(Into::into).collect())
    }

    pub fn pipeline() -> Self {
        ParamSetting::FromPipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(ParamValue::Int(3).param_type(), ParamType::Int);
        assert_eq!(ParamValue::Float(3.0).param_type(), ParamType::Float);
        assert_eq!(ParamValue::from("x").param_type(), ParamType::Str);
        assert_eq!(ParamValue::from(vec![1.0, 2.0]).param_type(), ParamType::List);
    }

    #[test]
    fn test_exact_type_membership() {
        let spec = ParamSpec::required("sigma", &[ParamType::Float, ParamType::Int]);
        assert!(spec.accepts(&ParamValue::Float(1.5)));
        assert!(spec.accepts(&ParamValue::Int(2)));
        assert!(!spec.accepts(&ParamValue::from("2")));

        let narrow = ParamSpec::required("mode", &[ParamType::Str]);
        assert!(!narrow.accepts(&ParamValue::Int(1)));
    }

    #[test]
    fn test_validate_reports_actual_and_expected() {
        let spec = ParamSpec::required("snr", &[ParamType::Float]);
        let err = spec.validate(&ParamValue::from("high")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("snr"));
        assert!(msg.contains("str"));
        assert!(msg.contains("Float") || msg.contains("float"));
        assert!(msg.contains("pipeline") || msg.contains("FromPipeline"));
    }

    #[test]
    fn test_as_f64_vec() {
        assert_eq!(ParamValue::Float(2.0).as_f64_vec(), Some(vec![2.0]));
        assert_eq!(
            ParamValue::from(vec![1.0, 2.0, 3.0]).as_f64_vec(),
            Some(vec![1.0, 2.0, 3.0])
        );
        assert_eq!(ParamValue::from("x").as_f64_vec(), None);
    }

    #[test]
    fn test_json_round_trip() {
        let values = vec![
            ParamValue::Bool(true),
            ParamValue::Int(-4),
            ParamValue::Float(2.5),
            ParamValue::from("GT0000"),
            ParamValue::from(vec![10.0, 6.0, 6.0]),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<ParamValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(values, back);
    }
}
