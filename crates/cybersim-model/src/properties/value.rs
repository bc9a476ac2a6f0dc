//! Property values and conversions to and from Rust types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically typed property value as it appears in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    String(String),
    /// Sequence of values.
    Vec(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Short type name for error messages.
    pub fn type_name(&self) -> String {
        match self {
            PropertyValue::Null => "null".to_string(),
            PropertyValue::Bool(_) => "bool".to_string(),
            PropertyValue::Integer(_) => "integer".to_string(),
            PropertyValue::Float(_) => "float".to_string(),
            PropertyValue::String(_) => "string".to_string(),
            PropertyValue::Vec(items) => match items.first() {
                Some(first) => format!("array of {}", first.type_name()),
                None => "empty array".to_string(),
            },
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Vec(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

/// Convert a Rust value into a [`PropertyValue`].
pub trait ToPropertyValue {
    /// Perform the conversion.
    fn to_property_value(&self) -> PropertyValue;
}

/// Convert a [`PropertyValue`] into a Rust value.
pub trait FromPropertyValue: Sized {
    /// Perform the conversion. `None` if the value has the wrong type or is
    /// out of range.
    fn from_property_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! integer_property {
    ($($t:ty),*) => {
        $(
            impl ToPropertyValue for $t {
                fn to_property_value(&self) -> PropertyValue {
                    PropertyValue::Integer(*self as i64)
                }
            }

            impl FromPropertyValue for $t {
                fn from_property_value(value: &PropertyValue) -> Option<Self> {
                    match value {
                        PropertyValue::Integer(i) => <$t>::try_from(*i).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_property!(u16, u32, u64, usize, i64);

impl ToPropertyValue for f64 {
    fn to_property_value(&self) -> PropertyValue {
        PropertyValue::Float(*self)
    }
}

impl FromPropertyValue for f64 {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Float(x) => Some(*x),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl ToPropertyValue for bool {
    fn to_property_value(&self) -> PropertyValue {
        PropertyValue::Bool(*self)
    }
}

impl FromPropertyValue for bool {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl ToPropertyValue for String {
    fn to_property_value(&self) -> PropertyValue {
        PropertyValue::String(self.clone())
    }
}

impl FromPropertyValue for String {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl<T: ToPropertyValue> ToPropertyValue for Option<T> {
    fn to_property_value(&self) -> PropertyValue {
        match self {
            Some(v) => v.to_property_value(),
            None => PropertyValue::Null,
        }
    }
}

impl<T: FromPropertyValue> FromPropertyValue for Option<T> {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Null => Some(None),
            other => T::from_property_value(other).map(Some),
        }
    }
}

impl<T: ToPropertyValue> ToPropertyValue for Vec<T> {
    fn to_property_value(&self) -> PropertyValue {
        PropertyValue::Vec(self.iter().map(ToPropertyValue::to_property_value).collect())
    }
}

impl<T: FromPropertyValue> FromPropertyValue for Vec<T> {
    fn from_property_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Vec(items) => items.iter().map(T::from_property_value).collect(),
            _ => None,
        }
    }
}
