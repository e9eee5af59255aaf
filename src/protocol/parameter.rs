//! Protocol parameter values.
//!
//! OAuth 2.0 messages carry parameters of mixed shape: flat primitives for the
//! classic endpoints, arrays of strings for multi-valued extensions (e.g.
//! `resource`), and nested JSON objects for OIDC claims such as `address`.
//! [`Parameter`] is the tagged variant covering all of them, with a lossless
//! JSON round-trip.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use serde_json::Value;

/// A single protocol parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    Null,
    Bool(bool),
    Integer(i64),
    String(String),
    /// Multi-valued parameter, stored as an ordered string sequence.
    Array(Vec<String>),
    /// Arbitrary JSON for structured claims (`address`, custom extensions).
    Json(Value),
}

impl Parameter {
    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Parameter::Bool(b) => Some(*b),
            Parameter::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Parameter::Integer(i) => Some(*i),
            Parameter::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Returns the value as a string sequence, if it is multi-valued.
    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Parameter::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the individual string values of the parameter.
    ///
    /// A scalar string yields itself; an array yields its elements; every
    /// other variant yields nothing.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Parameter::String(s) => vec![s.as_str()],
            Parameter::Array(values) => values.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the parameter carries no usable value.
    ///
    /// Null, empty strings and empty arrays all count as empty; `set` on a
    /// message removes the entry for any of them.
    pub fn is_empty(&self) -> bool {
        match self {
            Parameter::Null => true,
            Parameter::String(s) => s.is_empty(),
            Parameter::Array(values) => values.is_empty(),
            Parameter::Json(Value::Null) => true,
            _ => false,
        }
    }

    /// Converts the parameter to its JSON representation.
    pub fn to_json(&self) -> Value {
        match self {
            Parameter::Null => Value::Null,
            Parameter::Bool(b) => Value::Bool(*b),
            Parameter::Integer(i) => Value::from(*i),
            Parameter::String(s) => Value::from(s.clone()),
            Parameter::Array(values) => {
                Value::Array(values.iter().cloned().map(Value::from).collect())
            }
            Parameter::Json(value) => value.clone(),
        }
    }

    /// Builds a parameter from a JSON value, picking the most specific
    /// variant: string arrays become [`Parameter::Array`], everything that
    /// does not fit a flat primitive stays as raw JSON.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Parameter::Null,
            Value::Bool(b) => Parameter::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Parameter::Integer(i),
                None => Parameter::Json(Value::Number(n)),
            },
            Value::String(s) => Parameter::String(s),
            Value::Array(items) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in &items {
                    match item {
                        Value::String(s) => strings.push(s.clone()),
                        _ => return Parameter::Json(Value::Array(items)),
                    }
                }
                Parameter::Array(strings)
            }
            other @ Value::Object(_) => Parameter::Json(other),
        }
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::String(value.to_owned())
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::String(value)
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Bool(value)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Integer(value)
    }
}

impl From<Vec<String>> for Parameter {
    fn from(values: Vec<String>) -> Self {
        Parameter::Array(values)
    }
}

impl From<Value> for Parameter {
    fn from(value: Value) -> Self {
        Parameter::from_json(value)
    }
}

impl<T> From<Option<T>> for Parameter
where
    Parameter: From<T>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => Parameter::from(inner),
            None => Parameter::Null,
        }
    }
}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Parameter::from_json(Value::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_picks_specific_variants() {
        assert_eq!(Parameter::from_json(json!(null)), Parameter::Null);
        assert_eq!(Parameter::from_json(json!(true)), Parameter::Bool(true));
        assert_eq!(Parameter::from_json(json!(42)), Parameter::Integer(42));
        assert_eq!(
            Parameter::from_json(json!("openid")),
            Parameter::String("openid".to_string())
        );
        assert_eq!(
            Parameter::from_json(json!(["a", "b"])),
            Parameter::Array(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_from_json_mixed_array_stays_json() {
        let value = json!(["a", 1]);
        assert_eq!(Parameter::from_json(value.clone()), Parameter::Json(value));
    }

    #[test]
    fn test_json_round_trip() {
        let shapes = vec![
            json!(null),
            json!(false),
            json!(-7),
            json!("urn:example"),
            json!(["read", "write"]),
            json!({"street_address": "1 Main St", "locality": "Springfield"}),
        ];

        for shape in shapes {
            let parameter = Parameter::from_json(shape.clone());
            assert_eq!(parameter.to_json(), shape, "round trip failed for {shape}");
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let parameter = Parameter::Array(vec!["a".to_string(), "b".to_string()]);
        let serialized = serde_json::to_string(&parameter).unwrap();
        let deserialized: Parameter = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, parameter);
    }

    #[test]
    fn test_is_empty() {
        assert!(Parameter::Null.is_empty());
        assert!(Parameter::String(String::new()).is_empty());
        assert!(Parameter::Array(Vec::new()).is_empty());
        assert!(!Parameter::Bool(false).is_empty());
        assert!(!Parameter::String("x".to_string()).is_empty());
    }

    #[test]
    fn test_values_flattens_scalars_and_arrays() {
        assert_eq!(Parameter::from("one").values(), vec!["one"]);
        assert_eq!(
            Parameter::Array(vec!["one".to_string(), "two".to_string()]).values(),
            vec!["one", "two"]
        );
        assert!(Parameter::Integer(3).values().is_empty());
    }
}
