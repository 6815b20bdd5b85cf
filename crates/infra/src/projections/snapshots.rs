//! Document read models.
//!
//! Every business document (partner, operation, order, payment, ...) is read
//! back through a snapshot of its aggregate, rebuilt by folding the published
//! events through the aggregate's own `apply`. Queries never touch the event
//! store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use kestrel_core::{AggregateId, TenantId};
use kestrel_events::{Event, EventEnvelope};

use crate::aggregates::EventSourced;
use crate::projections::cursor_store::{check_sequence, CursorCheck, InMemoryCursorStore, ProjectionCursorStore};
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Current state of one document plus its timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<A> {
    pub aggregate: A,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SnapshotProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {message}")]
    Deserialize {
        aggregate_type: &'static str,
        message: String,
    },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projection: aggregate stream → latest snapshot, per tenant.
pub struct SnapshotProjection<A, S = Arc<InMemoryTenantStore<AggregateId, Snapshot<A>>>>
where
    S: TenantStore<AggregateId, Snapshot<A>>,
{
    store: S,
    cursors: Arc<dyn ProjectionCursorStore>,
    _aggregate: std::marker::PhantomData<fn() -> A>,
}

impl<A> SnapshotProjection<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryTenantStore::new()), Arc::new(InMemoryCursorStore::new()))
    }
}

impl<A> Default for SnapshotProjection<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, S> SnapshotProjection<A, S>
where
    S: TenantStore<AggregateId, Snapshot<A>>,
{
    pub fn with_store(store: S, cursors: Arc<dyn ProjectionCursorStore>) -> Self {
        Self {
            store,
            cursors,
            _aggregate: std::marker::PhantomData,
        }
    }

    pub fn get(&self, tenant_id: TenantId, id: AggregateId) -> Option<Snapshot<A>> {
        self.store.get(tenant_id, &id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<Snapshot<A>> {
        self.store.list(tenant_id)
    }
}

impl<A, S> SnapshotProjection<A, S>
where
    A: EventSourced,
    A::Event: Event + Serialize + DeserializeOwned,
    S: TenantStore<AggregateId, Snapshot<A>>,
{
    fn projection_name() -> String {
        format!("{}.snapshots", A::AGGREGATE_TYPE)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), SnapshotProjectionError> {
        if envelope.aggregate_type() != A::AGGREGATE_TYPE {
            return Ok(());
        }

        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let name = Self::projection_name();
        let last = self.cursors.get_cursor(tenant_id, aggregate_id, &name).unwrap_or(0);

        match check_sequence(last, envelope.sequence_number()) {
            CursorCheck::Skip => return Ok(()),
            CursorCheck::Gap { last, found } => {
                return Err(SnapshotProjectionError::NonMonotonicSequence { last, found });
            }
            CursorCheck::Apply => {}
        }

        let event: A::Event = serde_json::from_value(envelope.payload().clone()).map_err(|e| {
            SnapshotProjectionError::Deserialize {
                aggregate_type: A::AGGREGATE_TYPE,
                message: e.to_string(),
            }
        })?;

        let mut snapshot = self.store.get(tenant_id, &aggregate_id).unwrap_or_else(|| Snapshot {
            aggregate: A::empty_stream(aggregate_id),
            created_at: envelope.occurred_at(),
            updated_at: envelope.occurred_at(),
        });
        snapshot.aggregate.apply(&event);
        snapshot.updated_at = envelope.occurred_at();

        if snapshot.aggregate.owner() != Some(tenant_id) {
            return Err(SnapshotProjectionError::TenantIsolation(format!(
                "{} {aggregate_id} does not belong to the envelope tenant",
                A::AGGREGATE_TYPE
            )));
        }

        self.store.upsert(tenant_id, aggregate_id, snapshot);
        self.cursors.update_cursor(tenant_id, aggregate_id, &name, envelope.sequence_number());
        Ok(())
    }

    /// Drop the tenant's snapshots and replay `envelopes` (one tenant's history).
    pub fn rebuild(
        &self,
        tenant_id: TenantId,
        envelopes: &[EventEnvelope<JsonValue>],
    ) -> Result<(), SnapshotProjectionError> {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_cursors(tenant_id, &Self::projection_name());
        for envelope in envelopes.iter().filter(|e| e.tenant_id() == tenant_id) {
            self.apply_envelope(envelope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use kestrel_partners::{Partner, PartnerEvent, PartnerId, PartnerKind, PartnerRegistered};

    use super::*;

    fn registered(tenant_id: TenantId, partner_id: PartnerId, seq: u64) -> EventEnvelope<JsonValue> {
        let event = PartnerEvent::Registered(PartnerRegistered {
            tenant_id,
            partner_id,
            kind: PartnerKind::Vendor,
            name: "Wood Corner".to_string(),
            contact: Default::default(),
            occurred_at: Utc::now(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            partner_id.0,
            "partners.partner",
            seq,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn snapshots_follow_the_stream() {
        let projection = SnapshotProjection::<Partner>::new();
        let tenant = TenantId::new();
        let partner = PartnerId::new(AggregateId::new());

        projection.apply_envelope(&registered(tenant, partner, 1)).unwrap();

        let snapshot = projection.get(tenant, partner.0).unwrap();
        assert_eq!(snapshot.aggregate.name(), "Wood Corner");
        assert!(projection.get(TenantId::new(), partner.0).is_none());
    }

    #[test]
    fn redelivered_events_are_ignored() {
        let projection = SnapshotProjection::<Partner>::new();
        let tenant = TenantId::new();
        let partner = PartnerId::new(AggregateId::new());
        let envelope = registered(tenant, partner, 1);

        projection.apply_envelope(&envelope).unwrap();
        projection.apply_envelope(&envelope).unwrap();

        assert_eq!(projection.list(tenant).len(), 1);
    }

    #[test]
    fn payload_tenant_must_match_envelope() {
        let projection = SnapshotProjection::<Partner>::new();
        let partner = PartnerId::new(AggregateId::new());
        let payload = registered(TenantId::new(), partner, 1);
        let forged = EventEnvelope::new(
            payload.event_id(),
            TenantId::new(),
            partner.0,
            "partners.partner",
            1,
            payload.event_type(),
            payload.occurred_at(),
            payload.payload().clone(),
        );

        let err = projection.apply_envelope(&forged).unwrap_err();
        assert!(matches!(err, SnapshotProjectionError::TenantIsolation(_)));
    }
}
