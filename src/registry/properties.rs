//! Service and component property maps.
//!
//! [`Properties`] is an ordered map of [`PropertyValue`]s. Lookups through
//! [`Properties::get`] are case-insensitive on the key, the way filters address
//! attributes; insertion preserves the caller's spelling.

use std::collections::BTreeMap;
use std::fmt;

/// Interfaces a service is registered under.
pub const OBJECT_CLASS: &str = "objectClass";
/// Registry-assigned service id.
pub const SERVICE_ID: &str = "service.id";
/// Service ranking; higher wins, default `0`.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Service scope (`singleton`, `bundle`, `prototype`).
pub const SERVICE_SCOPE: &str = "service.scope";
/// Name of the component that provides the service.
pub const COMPONENT_NAME: &str = "component.name";
/// Runtime-assigned component id.
pub const COMPONENT_ID: &str = "component.id";
/// Factory identifier of a component factory.
pub const COMPONENT_FACTORY: &str = "component.factory";
/// Marks a service as an aspect of the service whose id is the value.
pub const ASPECT: &str = "org.apache.felix.dependencymanager.aspect";

/// A single property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Returns the string slice when the value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as an integer; strings are parsed.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns the boolean when the value is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Flattens the value into its string elements (used for `objectClass`).
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            PropertyValue::List(items) => items.iter().flat_map(|v| v.to_strings()).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => f.write_str(s),
            PropertyValue::Long(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Long(i64::from(v))
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Long(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(v: Vec<&str>) -> Self {
        PropertyValue::List(v.into_iter().map(PropertyValue::from).collect())
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::List(v.into_iter().map(PropertyValue::Str).collect())
    }
}

/// Ordered property map with case-insensitive lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a value, replacing any key that differs only in case.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        let key = key.into();
        if let Some(existing) = self.find_key(&key) {
            if existing != key {
                self.0.remove(&existing);
            }
        }
        self.0.insert(key, value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key).or_else(|| {
            self.0
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        let existing = self.find_key(key)?;
        self.0.remove(&existing)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copies every entry of `other` over `self`.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in other.iter() {
            self.insert(k.clone(), v.clone());
        }
    }

    /// Returns a copy without private (`.`-prefixed) keys.
    pub fn public(&self) -> Properties {
        Properties(
            self.0
                .iter()
                .filter(|(k, _)| !k.starts_with('.'))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// `service.ranking`, or `0` when absent or not an integer.
    #[inline]
    pub fn ranking(&self) -> i64 {
        self.get(SERVICE_RANKING)
            .and_then(PropertyValue::as_long)
            .unwrap_or(0)
    }

    #[inline]
    pub fn service_id(&self) -> Option<u64> {
        self.get(SERVICE_ID)
            .and_then(PropertyValue::as_long)
            .and_then(|v| u64::try_from(v).ok())
    }

    fn find_key(&self, key: &str) -> Option<String> {
        if self.0.contains_key(key) {
            return Some(key.to_string());
        }
        self.0.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for Properties
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_key_case() {
        let props = Properties::new().with("Service.Ranking", 7);
        assert_eq!(props.get("service.ranking"), Some(&PropertyValue::Long(7)));
        assert_eq!(props.ranking(), 7);
    }

    #[test]
    fn insert_replaces_case_variant() {
        let mut props = Properties::new().with("foo", "a");
        props.insert("FOO", "b");
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("foo").and_then(PropertyValue::as_str), Some("b"));
    }

    #[test]
    fn public_drops_private_keys() {
        let props = Properties::new().with(".secret", "x").with("visible", true);
        let public = props.public();
        assert!(public.contains_key("visible"));
        assert!(!public.contains_key(".secret"));
    }

    #[test]
    fn ranking_defaults_to_zero() {
        assert_eq!(Properties::new().ranking(), 0);
        assert_eq!(Properties::new().with(SERVICE_RANKING, "x").ranking(), 0);
    }
}
