//! Mutation executor.
//!
//! A write goes to the transport first. Only after it succeeds does the
//! executor touch the cache, applying the request's invalidation set. A
//! failed write leaves the cache alone, and either way the notification
//! sink hears about the outcome.

use hangar_core::{EntitySpec, HangarError, HangarResult, KeyError, KeyPrefix, QueryKey, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, SyncStats};
use crate::notify::{NotificationSink, Outcome};

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Restore,
}

impl MutationKind {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
            Self::Restore => "restored",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One cache change applied after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Keep the data but force the next read to refetch.
    MarkStale(KeyPrefix),
    /// Drop the entry entirely.
    Purge(QueryKey),
}

/// The invalidation footprint of `operation` on `entity`.
///
/// Every write staleness-marks the entity's lists. Updates and restores
/// also mark the target's detail entry; deletes purge it.
pub fn invalidations_for(
    entity: &EntitySpec,
    operation: MutationKind,
    target_id: Option<&str>,
) -> Result<Vec<Invalidation>, KeyError> {
    let mut invalidations = vec![Invalidation::MarkStale(entity.lists()?)];
    let Some(id) = target_id else {
        return Ok(invalidations);
    };
    match operation {
        MutationKind::Create => {}
        MutationKind::Update | MutationKind::Restore => {
            invalidations.push(Invalidation::MarkStale(KeyPrefix::exact(
                &entity.detail_key(id)?,
            )));
        }
        MutationKind::Delete => {
            invalidations.push(Invalidation::Purge(entity.detail_key(id)?));
        }
    }
    Ok(invalidations)
}

/// A write and the cache entries it invalidates.
#[derive(Debug, Clone)]
pub struct MutationRequest<P> {
    pub entity: EntitySpec,
    pub operation: MutationKind,
    pub target_id: Option<String>,
    pub payload: P,
    pub invalidates: Vec<Invalidation>,
}

impl<P> MutationRequest<P> {
    /// Build a request with the standard footprint for `operation`.
    pub fn new(
        entity: EntitySpec,
        operation: MutationKind,
        target_id: Option<String>,
        payload: P,
    ) -> Result<Self, KeyError> {
        let invalidates = invalidations_for(&entity, operation, target_id.as_deref())?;
        Ok(Self {
            entity,
            operation,
            target_id,
            payload,
            invalidates,
        })
    }

    pub fn with_invalidation(mut self, invalidation: Invalidation) -> Self {
        self.invalidates.push(invalidation);
        self
    }
}

#[derive(Clone)]
pub struct MutationExecutor {
    store: CacheStore,
    sink: Arc<dyn NotificationSink>,
    stats: Arc<SyncStats>,
}

impl MutationExecutor {
    pub fn new(store: CacheStore, sink: Arc<dyn NotificationSink>, stats: Arc<SyncStats>) -> Self {
        Self { store, sink, stats }
    }

    /// Run `send` with the request payload, then invalidate and notify.
    ///
    /// Writes are not retried.
    pub async fn mutate<P, R, F, Fut>(&self, request: MutationRequest<P>, send: F) -> HangarResult<R>
    where
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let MutationRequest {
            entity,
            operation,
            target_id,
            payload,
            invalidates,
        } = request;
        let target = target_id.as_deref().unwrap_or("-");

        match send(payload).await {
            Ok(result) => {
                self.apply(&invalidates);
                self.stats.record_mutation();
                info!(
                    entity = entity.namespace(),
                    operation = operation.verb(),
                    target,
                    invalidations = invalidates.len(),
                    "mutation applied"
                );
                self.sink.notify(entity.label(), operation, &Outcome::Success);
                Ok(result)
            }
            Err(error) => {
                warn!(
                    entity = entity.namespace(),
                    operation = operation.verb(),
                    target,
                    error = %error,
                    "mutation failed"
                );
                self.sink
                    .notify(entity.label(), operation, &Outcome::error(error_message(&error)));
                Err(HangarError::from(error))
            }
        }
    }

    fn apply(&self, invalidations: &[Invalidation]) {
        for invalidation in invalidations {
            match invalidation {
                Invalidation::MarkStale(prefix) => {
                    let marked = self.store.mark_stale(prefix);
                    debug!(prefix = %prefix, marked, "marked stale");
                }
                Invalidation::Purge(key) => {
                    let purged = self.store.purge(key);
                    debug!(key = %key, purged, "purged");
                }
            }
        }
    }
}

impl fmt::Debug for MutationExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationExecutor")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Message shown to the user for a failed write.
fn error_message(error: &TransportError) -> String {
    match error {
        TransportError::Validation { message, fields } if !fields.is_empty() => {
            let detail: Vec<String> = fields
                .iter()
                .map(|f| format!("{}: {}", f.field, f.message))
                .collect();
            format!("{} ({})", message, detail.join("; "))
        }
        TransportError::Validation { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
