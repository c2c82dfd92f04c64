//! Backend transport contract.

use async_trait::async_trait;
use hangar_core::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One page of a list response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

impl<T> Page<T> {
    /// A page holding every item, as returned by unpaginated endpoints.
    pub fn complete(items: Vec<T>) -> Self {
        let total = items.len() as u64;
        Self {
            items,
            total: Some(total),
            page: None,
            per_page: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::complete(Vec::new())
    }
}

/// Filters for a list read.
///
/// Absent fields are left out of the serialized form, so
/// `ListParams::default()` and a params value with every field unset
/// address the same cache entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_deleted: bool,
}

impl ListParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the search term. Blank terms clear it.
    pub fn search(mut self, term: impl AsRef<str>) -> Self {
        let term = term.as_ref().trim();
        self.search = (!term.is_empty()).then(|| term.to_string());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Query-string pairs for an HTTP GET, in a stable order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = &self.search {
            pairs.push(("search".to_string(), search.clone()));
        }
        if let Some(page) = self.page {
            pairs.push(("page".to_string(), page.to_string()));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(("per_page".to_string(), per_page.to_string()));
        }
        for (name, value) in &self.filters {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((name.clone(), value));
        }
        if self.include_deleted {
            pairs.push(("include_deleted".to_string(), "true".to_string()));
        }
        pairs
    }
}

/// Network operations for one entity.
///
/// Implementations report failures through the [`TransportError`]
/// taxonomy; the executors decide what to retry from that alone.
#[async_trait]
pub trait ResourceTransport: Send + Sync + 'static {
    /// Record as returned by the backend.
    type Record: Send + Sync + 'static;
    /// Payload for create and update.
    type Draft: Send + 'static;

    async fn list(&self, params: &ListParams) -> Result<Page<Self::Record>, TransportError>;

    async fn get_by_id(&self, id: &str) -> Result<Self::Record, TransportError>;

    async fn create(&self, draft: Self::Draft) -> Result<Self::Record, TransportError>;

    async fn update(&self, id: &str, draft: Self::Draft) -> Result<Self::Record, TransportError>;

    async fn delete(&self, id: &str) -> Result<(), TransportError>;

    /// Bring a soft-deleted record back. Unsupported unless overridden.
    async fn restore(&self, _id: &str) -> Result<Self::Record, TransportError> {
        Err(TransportError::unsupported(
            std::any::type_name::<Self>(),
            "restore",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::canonical_params;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_blank_search_is_cleared() {
        assert_eq!(ListParams::new().search("   ").search, None);
        assert_eq!(
            ListParams::new().search("  joao ").search.as_deref(),
            Some("joao")
        );
    }

    #[test]
    fn test_default_params_serialize_empty() {
        assert_eq!(canonical_params(&ListParams::default()).unwrap(), "{}");
    }

    #[test]
    fn test_query_pairs() {
        let params = ListParams::new()
            .search("oil")
            .page(2)
            .filter("status", "active")
            .filter("min_price", 10)
            .include_deleted(true);
        assert_eq!(
            params.query_pairs(),
            vec![
                ("search".to_string(), "oil".to_string()),
                ("page".to_string(), "2".to_string()),
                ("min_price".to_string(), "10".to_string()),
                ("status".to_string(), "active".to_string()),
                ("include_deleted".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_deserializes_without_counts() {
        let page: Page<u32> = serde_json::from_value(json!({ "items": [1, 2] })).unwrap();
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.total, None);
    }

    proptest! {
        #[test]
        fn prop_filter_insertion_order_is_irrelevant(
            a in "[a-z]{1,8}",
            b in "[A-Z]{1,8}",
            va in any::<i64>(),
            vb in any::<bool>(),
        ) {
            let one = ListParams::new().filter(a.clone(), va).filter(b.clone(), vb);
            let two = ListParams::new().filter(b, vb).filter(a, va);
            prop_assert_eq!(canonical_params(&one).unwrap(), canonical_params(&two).unwrap());
        }
    }
}
