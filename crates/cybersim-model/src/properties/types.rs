//! Property definitions and scope markers.

use super::value::PropertyValue;
use std::fmt;
use std::marker::PhantomData;

// ============================================================================
// Scopes
// ============================================================================

/// What a property applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyScope {
    /// One node.
    Node,
    /// One link.
    Link,
    /// The whole simulation.
    Simulation,
}

impl PropertyScope {
    /// All scopes, in display order.
    pub const ALL: &'static [PropertyScope] =
        &[PropertyScope::Node, PropertyScope::Link, PropertyScope::Simulation];
}

impl fmt::Display for PropertyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyScope::Node => write!(f, "node"),
            PropertyScope::Link => write!(f, "link"),
            PropertyScope::Simulation => write!(f, "simulation"),
        }
    }
}

/// Type-level tag for a [`PropertyScope`].
pub trait ScopeMarker: fmt::Debug + Clone + Default + 'static {
    /// The scope this marker stands for.
    const SCOPE: PropertyScope;
}

/// Node scope marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeScope;

impl ScopeMarker for NodeScope {
    const SCOPE: PropertyScope = PropertyScope::Node;
}

/// Link scope marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkScope;

impl ScopeMarker for LinkScope {
    const SCOPE: PropertyScope = PropertyScope::Link;
}

/// Simulation scope marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulationScope;

impl ScopeMarker for SimulationScope {
    const SCOPE: PropertyScope = PropertyScope::Simulation;
}

// ============================================================================
// Value Types
// ============================================================================

/// Scalar type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyBaseType {
    /// Whole number.
    Integer,
    /// Number; integers are accepted too.
    Float,
    /// Text.
    String,
    /// true/false.
    Bool,
}

impl fmt::Display for PropertyBaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyBaseType::Integer => write!(f, "integer"),
            PropertyBaseType::Float => write!(f, "float"),
            PropertyBaseType::String => write!(f, "string"),
            PropertyBaseType::Bool => write!(f, "bool"),
        }
    }
}

/// Full type of a property: a scalar, optionally nullable, optionally an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyType {
    /// Element type.
    pub base: PropertyBaseType,
    /// Whether `null` is accepted.
    pub nullable: bool,
    /// Whether the value is a sequence of `base`.
    pub array: bool,
}

impl PropertyType {
    /// A non-null scalar.
    pub const fn new(base: PropertyBaseType) -> Self {
        PropertyType {
            base,
            nullable: false,
            array: false,
        }
    }

    /// Accept `null`.
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Make this an array type.
    pub const fn array(mut self) -> Self {
        self.array = true;
        self
    }

    fn scalar_matches(&self, value: &PropertyValue) -> bool {
        matches!(
            (self.base, value),
            (PropertyBaseType::Integer, PropertyValue::Integer(_))
                | (PropertyBaseType::Float, PropertyValue::Float(_))
                | (PropertyBaseType::Float, PropertyValue::Integer(_))
                | (PropertyBaseType::String, PropertyValue::String(_))
                | (PropertyBaseType::Bool, PropertyValue::Bool(_))
        )
    }

    /// Check whether a value has this type.
    pub fn matches(&self, value: &PropertyValue) -> bool {
        match value {
            PropertyValue::Null => self.nullable,
            PropertyValue::Vec(items) => self.array && items.iter().all(|v| self.scalar_matches(v)),
            scalar => !self.array && self.scalar_matches(scalar),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "[{}]", self.base)?;
        } else {
            write!(f, "{}", self.base)?;
        }
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Built-in default, in a form usable in `const` items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyDefault {
    /// No value.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(&'static str),
    /// Array of strings.
    Strings(&'static [&'static str]),
}

impl PropertyDefault {
    /// Type implied by the default. Null defaults need an explicit type.
    pub const fn implied_type(&self) -> PropertyType {
        match self {
            PropertyDefault::Bool(_) => PropertyType::new(PropertyBaseType::Bool),
            PropertyDefault::Integer(_) => PropertyType::new(PropertyBaseType::Integer),
            PropertyDefault::Float(_) => PropertyType::new(PropertyBaseType::Float),
            PropertyDefault::String(_) | PropertyDefault::Null => {
                PropertyType::new(PropertyBaseType::String)
            }
            PropertyDefault::Strings(_) => PropertyType::new(PropertyBaseType::String).array(),
        }
    }

    /// Convert to a runtime value.
    pub fn to_value(&self) -> PropertyValue {
        match self {
            PropertyDefault::Null => PropertyValue::Null,
            PropertyDefault::Bool(b) => PropertyValue::Bool(*b),
            PropertyDefault::Integer(i) => PropertyValue::Integer(*i),
            PropertyDefault::Float(x) => PropertyValue::Float(*x),
            PropertyDefault::String(s) => PropertyValue::String(s.to_string()),
            PropertyDefault::Strings(items) => PropertyValue::Vec(
                items
                    .iter()
                    .map(|s| PropertyValue::String(s.to_string()))
                    .collect(),
            ),
        }
    }
}

// ============================================================================
// Property Definitions
// ============================================================================

/// Untyped description of a property, used for lookup and catalogues.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    /// Full name, `namespace/key`.
    pub name: &'static str,
    /// User-facing description.
    pub description: &'static str,
    /// What the property applies to.
    pub scope: PropertyScope,
    /// Accepted values.
    pub value_type: PropertyType,
    /// Built-in default.
    pub default: PropertyDefault,
    /// Unit, for display.
    pub unit: Option<&'static str>,
}

impl PropertyDef {
    /// Namespace part of the name, if any.
    pub fn namespace(&self) -> Option<&'static str> {
        self.name.split_once('/').map(|(ns, _)| ns)
    }

    /// Built-in default as a runtime value.
    pub fn default_value(&self) -> PropertyValue {
        self.default.to_value()
    }
}

/// A property with its Rust type `T` and scope `S` known at compile time.
#[derive(Debug)]
pub struct Property<T, S: ScopeMarker> {
    /// Runtime description.
    pub def: PropertyDef,
    _marker: PhantomData<fn() -> (T, S)>,
}

impl<T, S: ScopeMarker> Property<T, S> {
    /// Define a property. The value type follows from the default.
    pub const fn new(name: &'static str, description: &'static str, default: PropertyDefault) -> Self {
        Property {
            def: PropertyDef {
                name,
                description,
                scope: S::SCOPE,
                value_type: default.implied_type(),
                default,
                unit: None,
            },
            _marker: PhantomData,
        }
    }

    /// Override the implied value type.
    pub const fn with_type(mut self, value_type: PropertyType) -> Self {
        self.def.value_type = value_type;
        self
    }

    /// Attach a display unit.
    pub const fn with_unit(mut self, unit: &'static str) -> Self {
        self.def.unit = Some(unit);
        self
    }

    /// Full property name.
    pub fn name(&self) -> &'static str {
        self.def.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_matching() {
        let float = PropertyType::new(PropertyBaseType::Float);
        assert!(float.matches(&PropertyValue::Integer(3)));
        assert!(!float.matches(&PropertyValue::Null));
        assert!(float.nullable().matches(&PropertyValue::Null));

        let strings = PropertyType::new(PropertyBaseType::String).array();
        assert!(strings.matches(&PropertyValue::Vec(vec![PropertyValue::String("a".into())])));
        assert!(!strings.matches(&PropertyValue::String("a".into())));
        assert!(!strings.matches(&PropertyValue::Vec(vec![PropertyValue::Integer(1)])));
        assert_eq!(strings.nullable().to_string(), "[string]?");
    }
}
