//! Property registry, lookup functions, and property set types.
//!
//! - [`ALL_PROPERTIES`] - every registered property definition
//! - [`ResolvedProperties`] - a complete set of values with defaults filled in
//! - [`UnresolvedProperties`] - the values a scenario file actually set

use super::definitions::*;
use super::types::{Property, PropertyDef, PropertyScope, ScopeMarker};
use super::value::{FromPropertyValue, PropertyValue, ToPropertyValue};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

// ============================================================================
// All Properties Array (for runtime lookup)
// ============================================================================

/// All registered property definitions.
pub const ALL_PROPERTIES: &[&PropertyDef] = &[
    // Node
    &NODE_START_UP_DURATION.def,
    &NODE_SHUT_DOWN_DURATION.def,
    &NODE_SCAN_DURATION.def,
    // Software
    &SOFTWARE_PATCHING_DURATION.def,
    &SOFTWARE_RESTART_DURATION.def,
    &SOFTWARE_INSTALL_DURATION.def,
    &SOFTWARE_MAX_SESSIONS.def,
    // File system
    &FILE_SYSTEM_SCANNING_LIMIT.def,
    &FILE_SYSTEM_REPAIRING_LIMIT.def,
    &FILE_SYSTEM_RESTORING_LIMIT.def,
    // ACL
    &ACL_MAX_RULES.def,
    &ACL_IMPLICIT_ACTION.def,
    // Link
    &LINK_BANDWIDTH_MBPS.def,
    // Simulation
    &SIMULATION_SEED.def,
    &SIMULATION_STEPS.def,
    &NMNE_CAPTURE.def,
    &NMNE_KEYWORDS.def,
];

// ============================================================================
// Lookup Functions
// ============================================================================

/// Check if a property name is registered.
pub fn is_known_property(name: &str) -> bool {
    get_property_def(name).is_some()
}

/// Get a property definition by name.
pub fn get_property_def(name: &str) -> Option<&'static PropertyDef> {
    ALL_PROPERTIES.iter().find(|p| p.name == name).copied()
}

/// All namespaces, sorted.
pub fn known_namespaces() -> Vec<&'static str> {
    let mut namespaces: Vec<&'static str> =
        ALL_PROPERTIES.iter().filter_map(|p| p.namespace()).collect();
    namespaces.sort();
    namespaces.dedup();
    namespaces
}

/// All properties of a scope.
pub fn properties_by_scope(scope: PropertyScope) -> impl Iterator<Item = &'static PropertyDef> {
    ALL_PROPERTIES
        .iter()
        .filter(move |p| p.scope == scope)
        .copied()
}

/// Built-in default of a property by name.
pub fn default_value(name: &str) -> Option<PropertyValue> {
    get_property_def(name).map(PropertyDef::default_value)
}

// ============================================================================
// Property Set Errors
// ============================================================================

/// Errors from reading or writing a property set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertySetError {
    /// Name not in the registry.
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// Known property used in another scope.
    #[error("property '{0}' is a {1} property")]
    InvalidPropertyScope(String, PropertyScope),

    /// YAML value that cannot be a property (mapping, tag).
    #[error("unsupported value for property '{0}': {1}")]
    UnsupportedValueType(String, String),

    /// Value of the wrong type.
    #[error("type mismatch for property '{property}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Property name.
        property: String,
        /// Declared type.
        expected: String,
        /// Type of the value given.
        actual: String,
    },

    /// Value of the right type that does not fit the Rust type.
    #[error("value {value} out of range for property '{property}'")]
    OutOfRange {
        /// Property name.
        property: String,
        /// Value given.
        value: String,
    },
}

// ============================================================================
// Resolved Property Set
// ============================================================================

/// Every property of scope `S`, with defaults filled in.
#[derive(Debug, Clone)]
pub struct ResolvedProperties<S: ScopeMarker> {
    values: BTreeMap<&'static str, PropertyValue>,
    _scope: PhantomData<S>,
}

impl<S: ScopeMarker> ResolvedProperties<S> {
    /// Create a set holding the built-in defaults.
    pub fn new() -> Self {
        let values = properties_by_scope(S::SCOPE)
            .map(|p| (p.name, p.default_value()))
            .collect();
        ResolvedProperties {
            values,
            _scope: PhantomData,
        }
    }

    /// Scope of this set.
    pub fn scope(&self) -> PropertyScope {
        S::SCOPE
    }

    /// Set a value with its type checked at compile time.
    pub fn set<T: ToPropertyValue>(&mut self, prop: &'static Property<T, S>, value: T) {
        self.values.insert(prop.def.name, value.to_property_value());
    }

    /// Read a value as the property's Rust type.
    ///
    /// Types are checked when values are inserted; this fails only for a
    /// value of the right kind outside the Rust type's range (a negative
    /// duration, say).
    pub fn get<T: FromPropertyValue>(&self, prop: &Property<T, S>) -> Result<T, PropertySetError> {
        let value = self.get_raw(prop);
        T::from_property_value(&value).ok_or_else(|| PropertySetError::OutOfRange {
            property: prop.def.name.to_string(),
            value: value.to_string(),
        })
    }

    /// Raw value of a property.
    pub fn get_raw<T>(&self, prop: &Property<T, S>) -> PropertyValue {
        self.values
            .get(prop.def.name)
            .cloned()
            .unwrap_or_else(|| prop.def.default_value())
    }

    /// All values by name.
    pub fn values(&self) -> &BTreeMap<&'static str, PropertyValue> {
        &self.values
    }

    /// Overwrite with the values set in `unresolved`.
    pub fn apply_unresolved(&mut self, unresolved: &UnresolvedProperties<S>) {
        for (name, value) in &unresolved.values {
            self.values.insert(*name, value.clone());
        }
    }
}

impl<S: ScopeMarker> Default for ResolvedProperties<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Unresolved Property Set
// ============================================================================

/// The properties a scenario file set explicitly, without defaults.
#[derive(Debug, Clone, Default)]
pub struct UnresolvedProperties<S: ScopeMarker> {
    values: BTreeMap<&'static str, PropertyValue>,
    _scope: PhantomData<S>,
}

impl<S: ScopeMarker> UnresolvedProperties<S> {
    /// Create an empty set.
    pub fn new() -> Self {
        UnresolvedProperties {
            values: BTreeMap::new(),
            _scope: PhantomData,
        }
    }

    /// Check whether nothing was set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check if a property was set.
    pub fn contains<T>(&self, prop: &Property<T, S>) -> bool {
        self.values.contains_key(prop.def.name)
    }

    /// Value set for a property, if any.
    pub fn get_raw<T>(&self, prop: &Property<T, S>) -> Option<&PropertyValue> {
        self.values.get(prop.def.name)
    }

    /// Insert a value after checking its type.
    pub fn insert<T>(
        &mut self,
        prop: &'static Property<T, S>,
        value: PropertyValue,
    ) -> Result<(), PropertySetError> {
        self.insert_def(&prop.def, value)
    }

    /// Insert a value for a property looked up by name.
    pub fn insert_named(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertySetError> {
        let def = get_property_def(name)
            .ok_or_else(|| PropertySetError::UnknownProperty(name.to_string()))?;
        if def.scope != S::SCOPE {
            return Err(PropertySetError::InvalidPropertyScope(name.to_string(), def.scope));
        }
        self.insert_def(def, value)
    }

    fn insert_def(&mut self, def: &'static PropertyDef, value: PropertyValue) -> Result<(), PropertySetError> {
        if !def.value_type.matches(&value) {
            return Err(PropertySetError::TypeMismatch {
                property: def.name.to_string(),
                expected: def.value_type.to_string(),
                actual: value.type_name(),
            });
        }
        self.values.insert(def.name, value);
        Ok(())
    }

    /// Overwrite with the values of `other`.
    pub fn merge(&mut self, other: &UnresolvedProperties<S>) {
        for (name, value) in &other.values {
            self.values.insert(*name, value.clone());
        }
    }
}

// ============================================================================
// YAML Deserialization
// ============================================================================

impl<'de, S: ScopeMarker> Deserialize<'de> for UnresolvedProperties<S> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(UnresolvedPropertiesVisitor::<S>(PhantomData))
    }
}

struct UnresolvedPropertiesVisitor<S: ScopeMarker>(PhantomData<S>);

impl<'de, S: ScopeMarker> Visitor<'de> for UnresolvedPropertiesVisitor<S> {
    type Value = UnresolvedProperties<S>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a map of {} properties", S::SCOPE)
    }

    fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut result = UnresolvedProperties::<S>::new();
        while let Some((key, value)) = map.next_entry::<String, serde_yaml::Value>()? {
            collect_yaml_property(&mut result, &key, &value).map_err(|e| match e {
                PropertySetError::UnknownProperty(name) => de::Error::custom(format!(
                    "unknown {} property: '{}'. Run \"cybersim properties\" for the list",
                    S::SCOPE,
                    name
                )),
                PropertySetError::InvalidPropertyScope(name, scope) => de::Error::custom(format!(
                    "property '{}' is a {} property, but was used in {} context",
                    name,
                    scope,
                    S::SCOPE
                )),
                other => de::Error::custom(other),
            })?;
        }
        Ok(result)
    }
}

/// Insert one YAML entry, flattening nested maps into `ns/key` names.
fn collect_yaml_property<S: ScopeMarker>(
    result: &mut UnresolvedProperties<S>,
    prefix: &str,
    value: &serde_yaml::Value,
) -> Result<(), PropertySetError> {
    if let serde_yaml::Value::Mapping(map) = value {
        for (k, v) in map {
            let Some(key) = k.as_str() else {
                return Err(PropertySetError::UnsupportedValueType(
                    prefix.to_string(),
                    "non-string key".to_string(),
                ));
            };
            collect_yaml_property(result, &format!("{}/{}", prefix, key), v)?;
        }
        return Ok(());
    }
    let value = yaml_value_to_property(prefix, value)?;
    result.insert_named(prefix, value)
}

fn yaml_value_to_property(name: &str, value: &serde_yaml::Value) -> Result<PropertyValue, PropertySetError> {
    let unsupported = |what: &str| PropertySetError::UnsupportedValueType(name.to_string(), what.to_string());
    match value {
        serde_yaml::Value::Null => Ok(PropertyValue::Null),
        serde_yaml::Value::Bool(b) => Ok(PropertyValue::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(PropertyValue::Integer(i))
            } else if let Some(x) = n.as_f64() {
                Ok(PropertyValue::Float(x))
            } else {
                Err(unsupported("number out of range"))
            }
        }
        serde_yaml::Value::String(s) => Ok(PropertyValue::String(s.clone())),
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .map(|item| yaml_value_to_property(name, item))
            .collect::<Result<Vec<_>, _>>()
            .map(PropertyValue::Vec),
        serde_yaml::Value::Mapping(_) => Err(unsupported("nested mapping")),
        serde_yaml::Value::Tagged(_) => Err(unsupported("tagged value")),
    }
}

impl<S: ScopeMarker> Serialize for UnresolvedProperties<S> {
    fn serialize<Ser>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error>
    where
        Ser: serde::Serializer,
    {
        self.values.serialize(serializer)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::types::{LinkScope, NodeScope, SimulationScope};
    use super::*;

    #[test]
    fn test_defaults() {
        let node: ResolvedProperties<NodeScope> = ResolvedProperties::new();
        assert_eq!(node.get(&NODE_START_UP_DURATION).unwrap(), 3);
        assert_eq!(node.get(&SOFTWARE_MAX_SESSIONS).unwrap(), 100);
        assert_eq!(node.get(&ACL_IMPLICIT_ACTION).unwrap(), None);

        let link: ResolvedProperties<LinkScope> = ResolvedProperties::new();
        assert_eq!(link.get(&LINK_BANDWIDTH_MBPS).unwrap(), 100.0);

        let sim: ResolvedProperties<SimulationScope> = ResolvedProperties::new();
        assert!(sim.get(&NMNE_CAPTURE).unwrap());
        assert_eq!(sim.get(&NMNE_KEYWORDS).unwrap(), vec!["DELETE".to_string()]);
    }

    #[test]
    fn test_set_and_get() {
        let mut node: ResolvedProperties<NodeScope> = ResolvedProperties::new();
        node.set(&ACL_IMPLICIT_ACTION, Some("DENY".to_string()));
        assert_eq!(node.get(&ACL_IMPLICIT_ACTION).unwrap().as_deref(), Some("DENY"));
    }

    #[test]
    fn test_lookup() {
        assert!(is_known_property("software/max_sessions"));
        assert!(!is_known_property("software/colour"));
        assert_eq!(
            get_property_def("link/bandwidth_mbps").map(|p| p.scope),
            Some(PropertyScope::Link)
        );
        assert!(known_namespaces().contains(&"file_system"));
        assert_eq!(default_value("node/scan_duration"), Some(PropertyValue::Integer(3)));
    }

    #[test]
    fn test_every_default_matches_its_type() {
        for def in ALL_PROPERTIES {
            assert!(def.value_type.matches(&def.default_value()), "{}", def.name);
        }
    }

    #[test]
    fn test_nested_yaml_flattens() {
        let yaml = r#"
            node:
                start_up_duration: 0
            software:
                max_sessions: 1
        "#;
        let props: UnresolvedProperties<NodeScope> = serde_yaml::from_str(yaml).unwrap();
        assert!(props.contains(&NODE_START_UP_DURATION));
        assert!(props.contains(&SOFTWARE_MAX_SESSIONS));
        assert!(!props.contains(&NODE_SCAN_DURATION));

        let mut resolved = ResolvedProperties::<NodeScope>::new();
        resolved.apply_unresolved(&props);
        assert_eq!(resolved.get(&NODE_START_UP_DURATION).unwrap(), 0);
        assert_eq!(resolved.get(&SOFTWARE_MAX_SESSIONS).unwrap(), 1);
    }

    #[test]
    fn test_yaml_errors() {
        let unknown = serde_yaml::from_str::<UnresolvedProperties<NodeScope>>("node: {colour: red}");
        assert!(unknown.unwrap_err().to_string().contains("unknown node property: 'node/colour'"));

        let scope = serde_yaml::from_str::<UnresolvedProperties<NodeScope>>("link: {bandwidth_mbps: 10}");
        assert!(scope.unwrap_err().to_string().contains("is a link property"));

        let mismatch = serde_yaml::from_str::<UnresolvedProperties<NodeScope>>("node: {scan_duration: soon}");
        assert!(mismatch.unwrap_err().to_string().contains("type mismatch"));
    }

    #[test]
    fn test_out_of_range_reported_on_get() {
        let props: UnresolvedProperties<NodeScope> =
            serde_yaml::from_str("node: {scan_duration: -2}").unwrap();
        let mut resolved = ResolvedProperties::<NodeScope>::new();
        resolved.apply_unresolved(&props);
        assert!(matches!(
            resolved.get(&NODE_SCAN_DURATION),
            Err(PropertySetError::OutOfRange { .. })
        ));
    }
}
