//! Application services: the use cases behind the HTTP API.
//!
//! Every mutating use case runs under one write lock:
//!
//! ```text
//! validate against read models → dispatch → settle
//!                                             ↓
//!                       drain bus → project → react (workflows) → drain ...
//! ```
//!
//! `settle` runs until the bus is empty, so when a use case returns, every
//! read model and every workflow triggered by it is up to date. Results are
//! read back from the snapshots.

mod accounting;
mod inventory;
mod partners;
mod products;
mod purchases;
mod sales;
mod time_off;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use kestrel_core::{AggregateId, TenantId};
use kestrel_events::{Event, EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use kestrel_inventory::{CreateLocation, Location, LocationCommand};

use crate::aggregates::EventSourced;
use crate::bootstrap::DEFAULT_LOCATIONS;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, InMemoryEventStore, StoredEvent};
use crate::projections::{RebuildError, ReadModels, Snapshot, SnapshotProjection};
use crate::sequencer::Sequencer;
use crate::workflows;

pub use accounting::{PaymentInput, PaymentTransition};
pub use inventory::{LineRequest, LocationInput, OperationInput, QuantityView};
pub use partners::{PartnerChanges, PartnerInput};
pub use products::{ProductChanges, ProductInput};
pub use purchases::{PurchaseOrderInput, RequisitionInput, RequisitionLineInput, RequisitionTransition};
pub use sales::SalesOrderInput;
pub use time_off::{LeaveInput, LeaveTransition};

pub type JsonEnvelope = EventEnvelope<JsonValue>;
pub type ServiceResult<T> = Result<T, DispatchError>;

type Bus = Arc<InMemoryEventBus<JsonEnvelope>>;

/// State transitions shared by purchase and sales orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTransition {
    Send,
    Confirm,
    Lock,
    Unlock,
    Cancel,
    ResetToDraft,
}

/// One entry of a document's event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl From<StoredEvent> for HistoryEntry {
    fn from(event: StoredEvent) -> Self {
        Self {
            sequence: event.sequence_number,
            event_type: event.event_type,
            occurred_at: event.occurred_at,
            payload: event.payload,
        }
    }
}

pub struct Services {
    dispatcher: CommandDispatcher<Arc<dyn EventStore>, Bus>,
    subscription: Mutex<Subscription<JsonEnvelope>>,
    write_lock: Mutex<()>,
    views: ReadModels,
    sequencer: Sequencer,
    companies: Mutex<HashSet<TenantId>>,
}

impl Services {
    /// Services over a fresh in-memory event store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()))
    }

    pub fn new(store: Arc<dyn EventStore>) -> Self {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            subscription: Mutex::new(subscription),
            write_lock: Mutex::new(()),
            views: ReadModels::new(),
            sequencer: Sequencer::new(),
            companies: Mutex::new(HashSet::new()),
        }
    }

    pub fn views(&self) -> &ReadModels {
        &self.views
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        self.dispatcher.store()
    }

    /// Create the default locations of a company the first time it is seen.
    pub fn ensure_company(&self, tenant_id: TenantId) -> ServiceResult<()> {
        if self.lock_companies().contains(&tenant_id) {
            return Ok(());
        }

        self.write(|s| {
            for default in DEFAULT_LOCATIONS {
                let location_id = default.id(tenant_id);
                let command = LocationCommand::Create(CreateLocation {
                    tenant_id,
                    location_id,
                    name: default.name.to_string(),
                    usage: default.usage,
                    occurred_at: Utc::now(),
                });
                match s.execute::<Location>(tenant_id, location_id.0, command) {
                    Ok(_) | Err(DispatchError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })?;

        self.lock_companies().insert(tenant_id);
        tracing::info!(tenant_id = %tenant_id, "company bootstrapped");
        Ok(())
    }

    /// Rebuild every read model of a tenant from the event store.
    pub fn rebuild(&self, tenant_id: TenantId) -> Result<(), RebuildError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let envelopes: Vec<JsonEnvelope> = self
            .store()
            .load_tenant(tenant_id)?
            .iter()
            .map(StoredEvent::to_envelope)
            .collect();
        self.views.rebuild(tenant_id, &envelopes)?;
        tracing::info!(tenant_id = %tenant_id, events = envelopes.len(), "read models rebuilt");
        Ok(())
    }

    /// Event log of one document.
    pub fn history(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> ServiceResult<Vec<HistoryEntry>> {
        let events = self.store().load_stream(tenant_id, aggregate_id)?;
        if events.is_empty() {
            return Err(DispatchError::NotFound);
        }
        Ok(events.into_iter().map(HistoryEntry::from).collect())
    }

    /// Dispatch one command without settling.
    pub(crate) fn execute<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        command: A::Command,
    ) -> ServiceResult<Vec<StoredEvent>>
    where
        A: EventSourced,
        A::Event: Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(tenant_id, aggregate_id, A::AGGREGATE_TYPE, command, |_, id| {
                A::empty_stream(id)
            })
    }

    /// Run a use case under the write lock, then settle.
    pub(crate) fn write<T>(&self, use_case: impl FnOnce(&Self) -> ServiceResult<T>) -> ServiceResult<T> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = use_case(self);
        self.settle();
        result
    }

    /// Project and react to everything published so far.
    fn settle(&self) {
        let subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let batch = subscription.drain();
            if batch.is_empty() {
                break;
            }
            for envelope in &batch {
                self.views.apply(envelope);
                workflows::react(self, envelope);
            }
        }
    }

    pub(crate) fn next_reference(&self, tenant_id: TenantId, prefix: &str) -> String {
        self.sequencer.next(tenant_id, prefix)
    }

    fn lock_companies(&self) -> std::sync::MutexGuard<'_, HashSet<TenantId>> {
        self.companies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot lookup that maps a miss to `NotFound`.
pub(crate) fn found<A>(
    projection: &SnapshotProjection<A>,
    tenant_id: TenantId,
    id: AggregateId,
) -> ServiceResult<Snapshot<A>>
where
    A: Clone + Send + Sync + 'static,
{
    projection.get(tenant_id, id).ok_or(DispatchError::NotFound)
}

/// Snapshots of a tenant, oldest first.
pub(crate) fn listed<A>(projection: &SnapshotProjection<A>, tenant_id: TenantId) -> Vec<Snapshot<A>>
where
    A: Clone + Send + Sync + 'static,
{
    let mut all = projection.list(tenant_id);
    all.sort_by_key(|s| s.created_at);
    all
}

pub(crate) fn required(field: &'static str, value: &str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DispatchError::field(field, format!("{field} is required")));
    }
    Ok(value.to_string())
}
