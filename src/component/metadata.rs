//! Component and reference descriptions.
//!
//! Metadata is plain data built with chained setters; it is validated once when
//! the component is added to a runtime.
//!
//! # Example
//! ```
//! use dsvisor::{ComponentMetadata, ReferenceMetadata, Cardinality};
//!
//! let meta = ComponentMetadata::new("greeter", "demo.Greeter")
//!     .provides("Greeter")
//!     .reference(
//!         ReferenceMetadata::new("log", "Logger")
//!             .cardinality(Cardinality::OptionalUnary)
//!             .dynamic(),
//!     );
//! assert!(!meta.is_immediate());
//! assert!(meta.validate().is_ok());
//! ```

use std::collections::HashSet;

use crate::error::RuntimeError;
use crate::registry::{Properties, PropertyValue, ServiceScope};

/// How many services a reference binds, and whether it needs any.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cardinality {
    /// `0..1`
    OptionalUnary,
    /// `1..1`
    #[default]
    MandatoryUnary,
    /// `0..n`
    OptionalMultiple,
    /// `1..n`
    MandatoryMultiple,
}

impl Cardinality {
    #[inline]
    pub fn is_optional(self) -> bool {
        matches!(self, Cardinality::OptionalUnary | Cardinality::OptionalMultiple)
    }

    #[inline]
    pub fn is_multiple(self) -> bool {
        matches!(self, Cardinality::OptionalMultiple | Cardinality::MandatoryMultiple)
    }

    /// Declared minimum number of bound services.
    #[inline]
    pub fn min(self) -> usize {
        if self.is_optional() {
            0
        } else {
            1
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::OptionalUnary => "0..1",
            Cardinality::MandatoryUnary => "1..1",
            Cardinality::OptionalMultiple => "0..n",
            Cardinality::MandatoryMultiple => "1..n",
        }
    }
}

/// Whether bound services may change while the component is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferencePolicy {
    #[default]
    Static,
    Dynamic,
}

/// Whether a better service replaces an already bound one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolicyOption {
    #[default]
    Reluctant,
    Greedy,
}

/// Which service objects a reference receives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceScope {
    /// The consumer-wide use-counted object.
    #[default]
    Bundle,
    /// A prototype object per instance when the service supports it.
    Prototype,
    /// Like `Prototype`, but only prototype-scoped services match.
    PrototypeRequired,
}

/// How a component treats configuration supplied through `reconfigure`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigurationPolicy {
    #[default]
    Optional,
    Require,
    Ignore,
}

/// A dependency on services of one interface.
#[derive(Clone, Debug)]
pub struct ReferenceMetadata {
    pub name: String,
    pub interface: String,
    pub cardinality: Cardinality,
    pub policy: ReferencePolicy,
    pub policy_option: PolicyOption,
    /// Additional LDAP filter services must match.
    pub target: Option<String>,
    pub scope: ReferenceScope,
    /// Track only the best-ranked service per base service (aspects).
    pub hide_aspects: bool,
}

impl ReferenceMetadata {
    /// Mandatory unary, static, reluctant reference.
    pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            cardinality: Cardinality::default(),
            policy: ReferencePolicy::default(),
            policy_option: PolicyOption::default(),
            target: None,
            scope: ReferenceScope::default(),
            hide_aspects: false,
        }
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.policy = ReferencePolicy::Dynamic;
        self
    }

    pub fn greedy(mut self) -> Self {
        self.policy_option = PolicyOption::Greedy;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn scope(mut self, scope: ReferenceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn hide_aspects(mut self) -> Self {
        self.hide_aspects = true;
        self
    }

    /// Configuration property overriding the target filter.
    pub fn target_property(&self) -> String {
        format!("{}.target", self.name)
    }

    /// Configuration property raising the minimum cardinality.
    pub fn min_cardinality_property(&self) -> String {
        format!("{}.cardinality.minimum", self.name)
    }

    #[inline]
    pub fn is_optional(&self) -> bool {
        self.cardinality.is_optional()
    }

    #[inline]
    pub fn is_multiple(&self) -> bool {
        self.cardinality.is_multiple()
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.policy == ReferencePolicy::Static
    }

    #[inline]
    pub fn is_reluctant(&self) -> bool {
        self.policy_option == PolicyOption::Reluctant
    }
}

/// Description of a managed component.
#[derive(Clone, Debug)]
pub struct ComponentMetadata {
    pub name: String,
    /// Key used to look up the constructor in the implementation loader.
    pub implementation: String,
    /// Interfaces the component's service is registered under.
    pub services: Vec<String>,
    pub service_scope: ServiceScope,
    pub references: Vec<ReferenceMetadata>,
    pub properties: Properties,
    /// Explicit immediate flag; see [`ComponentMetadata::is_immediate`].
    pub immediate: Option<bool>,
    /// Factory identifier; makes this a component factory.
    pub factory: Option<String>,
    /// Enabled when the runtime starts.
    pub enabled: bool,
    pub configuration_policy: ConfigurationPolicy,
    /// The implementation handles `modified` without reactivation.
    pub has_modified: bool,
    /// A deleted configuration is also passed to `modified`.
    pub delete_calls_modify: bool,
}

impl ComponentMetadata {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
            services: Vec::new(),
            service_scope: ServiceScope::Singleton,
            references: Vec::new(),
            properties: Properties::new(),
            immediate: None,
            factory: None,
            enabled: true,
            configuration_policy: ConfigurationPolicy::default(),
            has_modified: false,
            delete_calls_modify: false,
        }
    }

    pub fn provides(mut self, interface: impl Into<String>) -> Self {
        self.services.push(interface.into());
        self
    }

    pub fn service_scope(mut self, scope: ServiceScope) -> Self {
        self.service_scope = scope;
        self
    }

    pub fn reference(mut self, reference: ReferenceMetadata) -> Self {
        self.references.push(reference);
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    pub fn factory(mut self, id: impl Into<String>) -> Self {
        self.factory = Some(id.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
        self.configuration_policy = policy;
        self
    }

    pub fn modified(mut self) -> Self {
        self.has_modified = true;
        self
    }

    pub fn delete_calls_modify(mut self) -> Self {
        self.delete_calls_modify = true;
        self
    }

    #[inline]
    pub fn is_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Immediate components are instantiated as soon as they are satisfied.
    ///
    /// Defaults to `true` for components that provide no service. Factories are
    /// never immediate.
    pub fn is_immediate(&self) -> bool {
        if self.is_factory() {
            return false;
        }
        self.immediate.unwrap_or(self.services.is_empty())
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        let invalid = |reason: &str| RuntimeError::InvalidMetadata {
            component: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("component name is empty"));
        }
        if self.immediate == Some(false) && self.services.is_empty() && !self.is_factory() {
            return Err(invalid("a delayed component must provide a service"));
        }
        if self.is_factory() && self.immediate == Some(true) {
            return Err(invalid("a component factory cannot be immediate"));
        }
        if self.service_scope != ServiceScope::Singleton {
            if self.services.is_empty() {
                return Err(invalid("service scope requires a provided service"));
            }
            if self.is_immediate() || self.is_factory() {
                return Err(invalid("bundle and prototype scopes require a delayed component"));
            }
        }
        let mut names = HashSet::new();
        for reference in &self.references {
            if reference.interface.is_empty() {
                return Err(invalid("reference interface is empty"));
            }
            if !names.insert(reference.name.as_str()) {
                return Err(invalid("duplicate reference name"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_defaults() {
        assert!(ComponentMetadata::new("a", "A").is_immediate());
        assert!(!ComponentMetadata::new("a", "A").provides("S").is_immediate());
        assert!(ComponentMetadata::new("a", "A").provides("S").immediate(true).is_immediate());
        assert!(!ComponentMetadata::new("a", "A").factory("f").is_immediate());
    }

    #[test]
    fn rejects_inconsistent_metadata() {
        assert!(ComponentMetadata::new("a", "A").immediate(false).validate().is_err());
        assert!(ComponentMetadata::new("a", "A").factory("f").immediate(true).validate().is_err());
        assert!(ComponentMetadata::new("a", "A")
            .provides("S")
            .service_scope(ServiceScope::Prototype)
            .immediate(true)
            .validate()
            .is_err());
        let dup = ComponentMetadata::new("a", "A")
            .reference(ReferenceMetadata::new("r", "X"))
            .reference(ReferenceMetadata::new("r", "Y"));
        assert!(dup.validate().is_err());
    }

    #[test]
    fn reference_property_names() {
        let r = ReferenceMetadata::new("log", "Logger");
        assert_eq!(r.target_property(), "log.target");
        assert_eq!(r.min_cardinality_property(), "log.cardinality.minimum");
        assert_eq!(r.cardinality.min(), 1);
    }
}
