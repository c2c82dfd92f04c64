//! Canonical query keys and key prefixes.
//!
//! A `QueryKey` is the identity of a cacheable read: entity namespace,
//! operation kind and serialized parameters. Parameters are serialized
//! canonically (object members sorted, null members dropped) so two
//! logically identical filter sets always collide to the same key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::KeyError;

/// Operation kind component of a query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    List,
    Detail,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Detail => "detail",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical identifier of a cacheable read.
///
/// Cloning is cheap; the key parts live behind an `Arc` because keys are
/// copied into cache entries, in-flight tables and subscriber lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    inner: Arc<KeyInner>,
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct KeyInner {
    namespace: String,
    kind: QueryKind,
    params: String,
}

impl QueryKey {
    /// Key for a collection read with the given filter parameters.
    pub fn list<P>(namespace: &str, params: &P) -> Result<Self, KeyError>
    where
        P: Serialize + ?Sized,
    {
        Self::from_parts(namespace, QueryKind::List, canonical_params(params)?)
    }

    /// Key for a single-record read.
    ///
    /// The id is used verbatim as the parameter component.
    pub fn detail(namespace: &str, id: &str) -> Result<Self, KeyError> {
        Self::from_parts(namespace, QueryKind::Detail, id.to_string())
    }

    /// Build a key from already-canonical parts.
    pub fn from_parts(
        namespace: &str,
        kind: QueryKind,
        params: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let namespace = normalize_namespace(namespace)?;
        Ok(Self {
            inner: Arc::new(KeyInner {
                namespace: namespace.to_string(),
                kind,
                params: params.into(),
            }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn kind(&self) -> QueryKind {
        self.inner.kind
    }

    pub fn params(&self) -> &str {
        &self.inner.params
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.inner.namespace, self.inner.kind, self.inner.params
        )
    }
}

/// A leading slice of a query key tuple, used to address groups of entries.
///
/// `KeyPrefix::namespace("clients")` matches every key of the clients
/// namespace, `KeyPrefix::lists("clients")` every list read regardless of
/// filters, and `KeyPrefix::exact(&key)` a single key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    namespace: String,
    kind: Option<QueryKind>,
    params: Option<String>,
}

impl KeyPrefix {
    pub fn namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.trim().to_string(),
            kind: None,
            params: None,
        }
    }

    pub fn lists(namespace: &str) -> Self {
        Self {
            namespace: namespace.trim().to_string(),
            kind: Some(QueryKind::List),
            params: None,
        }
    }

    pub fn detail(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.trim().to_string(),
            kind: Some(QueryKind::Detail),
            params: Some(id.to_string()),
        }
    }

    pub fn exact(key: &QueryKey) -> Self {
        Self {
            namespace: key.namespace().to_string(),
            kind: Some(key.kind()),
            params: Some(key.params().to_string()),
        }
    }

    pub fn matches(&self, key: &QueryKey) -> bool {
        if self.namespace != key.namespace() {
            return false;
        }
        if let Some(kind) = self.kind {
            if kind != key.kind() {
                return false;
            }
        }
        match &self.params {
            Some(params) => params == key.params(),
            None => true,
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace)?;
        if let Some(kind) = self.kind {
            write!(f, "/{}", kind)?;
            if let Some(params) = &self.params {
                write!(f, "/{}", params)?;
            }
        }
        Ok(())
    }
}

/// Trim surrounding whitespace from a namespace; empty names are rejected.
///
/// Keys and prefixes both go through this, so a prefix built from the same
/// name always addresses the keys built from it.
pub fn normalize_namespace(namespace: &str) -> Result<&str, KeyError> {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(KeyError::EmptyNamespace);
    }
    Ok(namespace)
}

/// Serialize parameters into their canonical string form.
pub fn canonical_params<P>(params: &P) -> Result<String, KeyError>
where
    P: Serialize + ?Sized,
{
    let value = serde_json::to_value(params).map_err(|e| KeyError::Serialization {
        reason: e.to_string(),
    })?;
    serde_json::to_string(&canonicalize(value)).map_err(|e| KeyError::Serialization {
        reason: e.to_string(),
    })
}

/// Sort object members and drop null members, recursively.
///
/// Rebuilding each map from sorted entries keeps the output ordered even
/// when `serde_json` is compiled with insertion-ordered maps.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
