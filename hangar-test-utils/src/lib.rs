//! Hangar Test Utilities
//!
//! Shared test infrastructure for the Hangar workspace:
//! - An in-memory scripted transport with per-operation call counters
//! - A notification sink that records what it is told
//! - Fixtures for engines and clients
//! - Proptest generators

use async_trait::async_trait;
use hangar_client::{ListParams, Page, ResourceClient, ResourceTransport};
use hangar_core::{EntitySpec, RetryConfig, SyncConfig, TransportError};
use hangar_sync::{MutationKind, Notification, NotificationSink, Outcome, SyncEngine};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: String,
    pub name: String,
    pub status: String,
}

impl TestRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: "active".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDraft {
    pub name: String,
    pub status: String,
}

impl TestDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: "active".to_string(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
}

/// Transport operations, for counting and scripting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
    Restore,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Restore,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, TestRecord>,
    trash: BTreeMap<String, TestRecord>,
    next_id: u64,
    failures: HashMap<Operation, VecDeque<TransportError>>,
}

/// In-memory backend for one namespace.
///
/// Deletes move records to a trash that restore brings them back from.
/// Failures can be queued per operation and are returned, one per call,
/// before the backend state is consulted. Every call is counted,
/// failed ones included.
#[derive(Debug)]
pub struct ScriptedTransport {
    namespace: String,
    restorable: bool,
    latency: Duration,
    state: Mutex<State>,
    calls: [AtomicUsize; 6],
}

impl ScriptedTransport {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            restorable: true,
            latency: Duration::ZERO,
            state: Mutex::new(State {
                next_id: 1,
                ..State::default()
            }),
            calls: Default::default(),
        }
    }

    /// Whether `restore` is implemented. When false the trait default runs.
    pub fn with_restore(mut self, restorable: bool) -> Self {
        self.restorable = restorable;
        self
    }

    /// Delay every call by `latency` (virtual time under `start_paused`).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_records(self, records: impl IntoIterator<Item = TestRecord>) -> Self {
        {
            let mut state = self.lock();
            for record in records {
                state.records.insert(record.id.clone(), record);
            }
        }
        self
    }

    pub fn insert(&self, record: TestRecord) {
        self.lock().records.insert(record.id.clone(), record);
    }

    /// Queue `error` as the outcome of the next call to `operation`.
    pub fn fail_next(&self, operation: Operation, error: TransportError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.calls[operation.index()].load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        Operation::ALL.iter().map(|op| self.calls(*op)).sum()
    }

    pub fn record(&self, id: &str) -> Option<TestRecord> {
        self.lock().records.get(id).cloned()
    }

    pub fn in_trash(&self, id: &str) -> bool {
        self.lock().trash.contains_key(id)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call, wait out the latency and pop a scripted failure.
    async fn begin(&self, operation: Operation) -> Result<(), TransportError> {
        self.calls[operation.index()].fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self
            .lock()
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn not_found(&self, id: &str) -> TransportError {
        TransportError::not_found(self.namespace.as_str(), id)
    }
}

#[async_trait]
impl ResourceTransport for ScriptedTransport {
    type Record = TestRecord;
    type Draft = TestDraft;

    async fn list(&self, params: &ListParams) -> Result<Page<TestRecord>, TransportError> {
        self.begin(Operation::List).await?;
        let needle = params.search.as_deref().map(str::to_lowercase);
        let state = self.lock();
        let deleted = params
            .include_deleted
            .then(|| state.trash.values())
            .into_iter()
            .flatten();
        let items = state
            .records
            .values()
            .chain(deleted)
            .filter(|r| match &needle {
                Some(needle) => r.name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect();
        Ok(Page::complete(items))
    }

    async fn get_by_id(&self, id: &str) -> Result<TestRecord, TransportError> {
        self.begin(Operation::Get).await?;
        self.lock()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| self.not_found(id))
    }

    async fn create(&self, draft: TestDraft) -> Result<TestRecord, TransportError> {
        self.begin(Operation::Create).await?;
        if draft.name.trim().is_empty() {
            return Err(TransportError::Validation {
                message: "Invalid record".to_string(),
                fields: vec![hangar_core::FieldError::new("name", "is required")],
            });
        }
        let mut state = self.lock();
        let id = state.next_id.to_string();
        state.next_id += 1;
        let record = TestRecord {
            id: id.clone(),
            name: draft.name,
            status: draft.status,
        };
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, draft: TestDraft) -> Result<TestRecord, TransportError> {
        self.begin(Operation::Update).await?;
        let mut state = self.lock();
        let record = state.records.get_mut(id).ok_or_else(|| self.not_found(id))?;
        record.name = draft.name;
        record.status = draft.status;
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), TransportError> {
        self.begin(Operation::Delete).await?;
        let mut state = self.lock();
        let record = state.records.remove(id).ok_or_else(|| self.not_found(id))?;
        state.trash.insert(id.to_string(), record);
        Ok(())
    }

    async fn restore(&self, id: &str) -> Result<TestRecord, TransportError> {
        self.begin(Operation::Restore).await?;
        if !self.restorable {
            return Err(TransportError::unsupported(self.namespace.as_str(), "restore"));
        }
        let mut state = self.lock();
        let record = state.trash.remove(id).ok_or_else(|| self.not_found(id))?;
        state.records.insert(id.to_string(), record.clone());
        Ok(record)
    }
}

// ============================================================================
// RECORDING SINK
// ============================================================================

/// Notification sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn last(&self) -> Option<Notification> {
        self.lock().last().cloned()
    }

    pub fn outcomes(&self) -> Vec<(String, MutationKind, Outcome)> {
        self.lock()
            .iter()
            .map(|n| (n.entity_label.clone(), n.operation, n.outcome.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, entity_label: &str, operation: MutationKind, outcome: &Outcome) {
        self.lock()
            .push(Notification::new(entity_label, operation, outcome.clone()));
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// One retry, 100 ms initial backoff, 60 s freshness, 300 ms debounce.
    pub fn test_config() -> SyncConfig {
        SyncConfig::default().with_retry(RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
        })
    }

    pub fn engine() -> (SyncEngine, Arc<RecordingSink>) {
        engine_with(test_config())
    }

    pub fn engine_with(config: SyncConfig) -> (SyncEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let engine = SyncEngine::new(config, Arc::clone(&sink) as Arc<dyn NotificationSink>);
        (engine, sink)
    }

    pub fn sample_records() -> Vec<TestRecord> {
        vec![
            TestRecord::new("42", "Joao Silva"),
            TestRecord::new("43", "Maria Souza"),
            TestRecord::new("44", "Joana Lima"),
        ]
    }

    /// A client over a shared scripted transport seeded with [`sample_records`].
    pub fn client(
        spec: impl Into<EntitySpec>,
        engine: &SyncEngine,
    ) -> (ResourceClient<ScriptedTransport>, Arc<ScriptedTransport>) {
        let spec = spec.into();
        let transport = Arc::new(
            ScriptedTransport::new(spec.namespace().to_string())
                .with_restore(spec.supports_restore())
                .with_records(sample_records()),
        );
        let client = ResourceClient::from_shared(spec, Arc::clone(&transport), engine);
        (client, transport)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use hangar_core::{EntityKind, FieldError};
    use proptest::prelude::*;

    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        proptest::sample::select(EntityKind::ALL.to_vec())
    }

    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[0-9]{1,6}"
    }

    pub fn arb_list_params() -> impl Strategy<Value = ListParams> {
        (
            proptest::option::of("[a-z ]{0,12}"),
            proptest::option::of(1u32..50),
            proptest::collection::btree_map("[a-z_]{1,8}", any::<i32>(), 0..4),
            any::<bool>(),
        )
            .prop_map(|(search, page, filters, include_deleted)| {
                let mut params = ListParams::new().include_deleted(include_deleted);
                if let Some(search) = search {
                    params = params.search(search);
                }
                if let Some(page) = page {
                    params = params.page(page);
                }
                for (name, value) in filters {
                    params = params.filter(name, value);
                }
                params
            })
    }

    pub fn arb_transport_error() -> impl Strategy<Value = TransportError> {
        prop_oneof![
            ("[a-z ]{1,20}", "[a-z]{1,8}").prop_map(|(message, field)| {
                TransportError::Validation {
                    message,
                    fields: vec![FieldError::new(field, "is invalid")],
                }
            }),
            arb_record_id().prop_map(|id| TransportError::not_found("clients", id)),
            (proptest::option::of(500u16..600), "[a-z ]{1,20}")
                .prop_map(|(status, message)| TransportError::transient(status, message)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_transport_lifecycle() {
        let transport = ScriptedTransport::new("clients");
        let created = transport.create(TestDraft::new("Ana")).await.unwrap();
        assert_eq!(created.id, "1");

        transport.delete("1").await.unwrap();
        assert!(transport.in_trash("1"));
        assert_eq!(
            transport.get_by_id("1").await.unwrap_err(),
            TransportError::not_found("clients", "1")
        );

        let restored = transport.restore("1").await.unwrap();
        assert_eq!(restored.name, "Ana");
        assert_eq!(transport.calls(Operation::Get), 1);
        assert_eq!(transport.total_calls(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let transport = ScriptedTransport::new("clients").with_records(fixtures::sample_records());
        transport.fail_next(Operation::Get, TransportError::transient(Some(500), "boom"));
        assert!(transport.get_by_id("42").await.is_err());
        assert!(transport.get_by_id("42").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_search_is_case_insensitive() {
        let transport = ScriptedTransport::new("clients").with_records(fixtures::sample_records());
        let page = transport
            .list(&ListParams::new().search("JOA"))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
