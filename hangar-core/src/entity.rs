//! Entity registry.
//!
//! Every console entity shares the same resource client; what differs is
//! its key namespace, the label shown in notifications and whether the
//! backend keeps a trash it can restore from.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::error::KeyError;
use crate::key::{normalize_namespace, KeyPrefix, QueryKey};

/// Entities managed by the administration console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Aircraft,
    Product,
    Service,
    ServiceOrder,
    Category,
    ServiceObject,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Client,
        EntityKind::Aircraft,
        EntityKind::Product,
        EntityKind::Service,
        EntityKind::ServiceOrder,
        EntityKind::Category,
        EntityKind::ServiceObject,
    ];

    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Aircraft => "aircraft",
            Self::Product => "products",
            Self::Service => "services",
            Self::ServiceOrder => "service_orders",
            Self::Category => "categories",
            Self::ServiceObject => "service_objects",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Aircraft => "Aircraft",
            Self::Product => "Product",
            Self::Service => "Service",
            Self::ServiceOrder => "Service order",
            Self::Category => "Category",
            Self::ServiceObject => "Service object",
        }
    }

    /// Whether deleted records go to a trash they can be restored from.
    pub fn supports_restore(&self) -> bool {
        !matches!(self, Self::ServiceOrder | Self::Category)
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.namespace() == namespace)
    }
}

/// Per-entity configuration a resource client is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntitySpec {
    namespace: Cow<'static, str>,
    label: Cow<'static, str>,
    supports_restore: bool,
}

impl EntitySpec {
    /// The namespace is trimmed the same way query keys trim it. An empty
    /// namespace is kept and surfaces as `KeyError::EmptyNamespace` on the
    /// first key or prefix built from it.
    pub fn new(namespace: impl Into<Cow<'static, str>>, label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            namespace: trim_cow(namespace.into()),
            label: label.into(),
            supports_restore: false,
        }
    }

    pub fn with_restore(mut self, supports_restore: bool) -> Self {
        self.supports_restore = supports_restore;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn supports_restore(&self) -> bool {
        self.supports_restore
    }

    pub fn list_key<P>(&self, params: &P) -> Result<QueryKey, KeyError>
    where
        P: Serialize + ?Sized,
    {
        QueryKey::list(&self.namespace, params)
    }

    pub fn detail_key(&self, id: &str) -> Result<QueryKey, KeyError> {
        QueryKey::detail(&self.namespace, id)
    }

    /// Prefix covering every list read of this entity, whatever the filters.
    pub fn lists(&self) -> Result<KeyPrefix, KeyError> {
        Ok(KeyPrefix::lists(normalize_namespace(&self.namespace)?))
    }
}

fn trim_cow(value: Cow<'static, str>) -> Cow<'static, str> {
    match value {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
        Cow::Owned(s) if s.trim().len() == s.len() => Cow::Owned(s),
        Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
    }
}

impl From<EntityKind> for EntitySpec {
    fn from(kind: EntityKind) -> Self {
        EntitySpec::new(kind.namespace(), kind.label()).with_restore(kind.supports_restore())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::QueryKind;

    #[test]
    fn test_namespaces_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in EntityKind::ALL {
            assert!(seen.insert(kind.namespace()), "duplicate {}", kind.namespace());
        }
    }

    #[test]
    fn test_namespace_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_namespace(kind.namespace()), Some(kind));
        }
        assert_eq!(EntityKind::from_namespace("invoices"), None);
    }

    #[test]
    fn test_spec_from_kind() {
        let spec = EntitySpec::from(EntityKind::ServiceOrder);
        assert_eq!(spec.namespace(), "service_orders");
        assert_eq!(spec.label(), "Service order");
        assert!(!spec.supports_restore());
        assert!(EntitySpec::from(EntityKind::Client).supports_restore());
    }

    #[test]
    fn test_spec_keys() {
        let spec = EntitySpec::new("widgets", "Widget");
        let key = spec.detail_key("3").unwrap();
        assert_eq!(key.kind(), QueryKind::Detail);
        assert_eq!(key.namespace(), "widgets");
        assert!(spec.lists().unwrap().matches(&spec.list_key(&()).unwrap()));
    }

    #[test]
    fn test_spec_namespace_is_trimmed() {
        let spec = EntitySpec::new(" clients ", "Client");
        assert_eq!(spec.namespace(), "clients");
        let list = spec.list_key(&()).unwrap();
        assert!(spec.lists().unwrap().matches(&list));
        assert!(KeyPrefix::exact(&spec.detail_key("42").unwrap())
            .matches(&QueryKey::detail("clients", "42").unwrap()));

        let owned = EntitySpec::new(String::from("\twidgets\n"), "Widget");
        assert_eq!(owned.namespace(), "widgets");
    }

    #[test]
    fn test_blank_spec_namespace_is_rejected() {
        let spec = EntitySpec::new("   ", "Nothing");
        assert_eq!(spec.lists(), Err(KeyError::EmptyNamespace));
        assert_eq!(spec.detail_key("1"), Err(KeyError::EmptyNamespace));
    }
}
