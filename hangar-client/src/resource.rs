//! Generic resource client.
//!
//! One [`ResourceClient`] per entity, built from an [`EntitySpec`] and a
//! transport. Reads go through the engine's query executor under the
//! entity's key namespace; writes go through the mutation executor with
//! the standard invalidation footprint.

use hangar_core::{EntitySpec, HangarResult, QueryKey, TransportError};
use hangar_sync::{
    CacheEvent, CacheRead, Freshness, MutationKind, MutationRequest, Subscription, SyncEngine,
};
use std::fmt;
use std::sync::Arc;

use crate::transport::{ListParams, Page, ResourceTransport};

/// Result of a detail read.
#[derive(Debug)]
pub enum Lookup<T> {
    /// No id was given; nothing was fetched.
    Disabled,
    Found(Arc<T>),
}

impl<T> Lookup<T> {
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }

    pub fn found(&self) -> Option<&Arc<T>> {
        match self {
            Self::Found(value) => Some(value),
            Self::Disabled => None,
        }
    }

    pub fn into_option(self) -> Option<Arc<T>> {
        match self {
            Self::Found(value) => Some(value),
            Self::Disabled => None,
        }
    }
}

impl<T> Clone for Lookup<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Disabled => Self::Disabled,
            Self::Found(value) => Self::Found(Arc::clone(value)),
        }
    }
}

pub struct ResourceClient<T: ResourceTransport> {
    spec: EntitySpec,
    transport: Arc<T>,
    engine: SyncEngine,
}

impl<T: ResourceTransport> ResourceClient<T> {
    pub fn build(spec: impl Into<EntitySpec>, transport: T, engine: &SyncEngine) -> Self {
        Self::from_shared(spec, Arc::new(transport), engine)
    }

    pub fn from_shared(spec: impl Into<EntitySpec>, transport: Arc<T>, engine: &SyncEngine) -> Self {
        Self {
            spec: spec.into(),
            transport,
            engine: engine.clone(),
        }
    }

    /// Display label used in notifications.
    pub fn label(&self) -> &str {
        self.spec.label()
    }

    pub fn spec(&self) -> &EntitySpec {
        &self.spec
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn default_freshness(&self) -> Freshness {
        Freshness::best_effort(self.engine.config().stale_after())
    }

    pub fn list_key(&self, params: &ListParams) -> HangarResult<QueryKey> {
        Ok(self.spec.list_key(params)?)
    }

    pub fn detail_key(&self, id: &str) -> HangarResult<QueryKey> {
        Ok(self.spec.detail_key(id)?)
    }

    pub async fn list(&self, params: &ListParams) -> HangarResult<Arc<Page<T::Record>>> {
        self.list_with(params, self.default_freshness())
            .await
            .map(CacheRead::into_value)
    }

    pub async fn list_with(
        &self,
        params: &ListParams,
        freshness: Freshness,
    ) -> HangarResult<CacheRead<Page<T::Record>>> {
        let key = self.list_key(params)?;
        let transport = Arc::clone(&self.transport);
        let params = params.clone();
        self.engine
            .queries()
            .read(&key, freshness, move || {
                let transport = Arc::clone(&transport);
                let params = params.clone();
                async move { transport.list(&params).await }
            })
            .await
    }

    /// Read one record. A blank id resolves to [`Lookup::Disabled`]
    /// without touching the cache or the transport.
    pub async fn get_by_id(&self, id: &str) -> HangarResult<Lookup<T::Record>> {
        self.get_by_id_with(id, self.default_freshness()).await
    }

    pub async fn get_by_id_with(
        &self,
        id: &str,
        freshness: Freshness,
    ) -> HangarResult<Lookup<T::Record>> {
        if id.trim().is_empty() {
            return Ok(Lookup::Disabled);
        }
        let key = self.detail_key(id)?;
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        let read = self
            .engine
            .queries()
            .read(&key, freshness, move || {
                let transport = Arc::clone(&transport);
                let id = id.clone();
                async move { transport.get_by_id(&id).await }
            })
            .await?;
        Ok(Lookup::Found(read.into_value()))
    }

    /// Cached list data, stale or not, without fetching.
    pub fn peek_list(&self, params: &ListParams) -> Option<Arc<Page<T::Record>>> {
        let key = self.list_key(params).ok()?;
        self.engine.queries().peek(&key)
    }

    pub fn peek(&self, id: &str) -> Option<Arc<T::Record>> {
        let key = self.detail_key(id).ok()?;
        self.engine.queries().peek(&key)
    }

    pub fn subscribe_list<F>(&self, params: &ListParams, callback: F) -> HangarResult<Subscription>
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        Ok(self.engine.store().subscribe(self.list_key(params)?, callback))
    }

    pub fn subscribe_detail<F>(&self, id: &str, callback: F) -> HangarResult<Subscription>
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        Ok(self.engine.store().subscribe(self.detail_key(id)?, callback))
    }

    pub async fn create(&self, draft: T::Draft) -> HangarResult<T::Record> {
        let request = MutationRequest::new(self.spec.clone(), MutationKind::Create, None, draft)?;
        let transport = Arc::clone(&self.transport);
        self.engine
            .mutations()
            .mutate(request, move |draft| async move { transport.create(draft).await })
            .await
    }

    pub async fn update(&self, id: &str, draft: T::Draft) -> HangarResult<T::Record> {
        let request = MutationRequest::new(
            self.spec.clone(),
            MutationKind::Update,
            Some(id.to_string()),
            draft,
        )?;
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        self.engine
            .mutations()
            .mutate(request, move |draft| async move { transport.update(&id, draft).await })
            .await
    }

    pub async fn delete(&self, id: &str) -> HangarResult<()> {
        let request =
            MutationRequest::new(self.spec.clone(), MutationKind::Delete, Some(id.to_string()), ())?;
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        self.engine
            .mutations()
            .mutate(request, move |()| async move { transport.delete(&id).await })
            .await
    }

    /// Restore a soft-deleted record; invalidates like [`update`](Self::update).
    ///
    /// Entities without a trash fail with `Unsupported` before any request
    /// is sent. The failure still reaches the notification sink.
    pub async fn restore(&self, id: &str) -> HangarResult<T::Record> {
        let request = MutationRequest::new(
            self.spec.clone(),
            MutationKind::Restore,
            Some(id.to_string()),
            (),
        )?;
        let supported = self.spec.supports_restore();
        let namespace = self.spec.namespace().to_string();
        let transport = Arc::clone(&self.transport);
        let id = id.to_string();
        self.engine
            .mutations()
            .mutate(request, move |()| async move {
                if !supported {
                    return Err(TransportError::unsupported(namespace, "restore"));
                }
                transport.restore(&id).await
            })
            .await
    }
}

impl<T: ResourceTransport> Clone for ResourceClient<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            transport: Arc::clone(&self.transport),
            engine: self.engine.clone(),
        }
    }
}

impl<T: ResourceTransport> fmt::Debug for ResourceClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceClient")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
