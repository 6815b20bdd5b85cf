//! Projection cursors (checkpoints).
//!
//! A cursor is the last sequence number a projection applied for one
//! `(tenant, aggregate)` stream. Cursors make projections idempotent under
//! at-least-once delivery: replays at or below the cursor are skipped, gaps
//! are reported.

use std::collections::HashMap;
use std::sync::RwLock;

use kestrel_core::{AggregateId, TenantId};

/// Projection cursor store.
pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    /// Clear all cursors for a tenant + projection (rebuilds).
    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    projection_name: String,
}

/// Cursor store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64> {
        let cursors = self.cursors.read().ok()?;
        cursors
            .get(&CursorKey {
                tenant_id,
                aggregate_id,
                projection_name: projection_name.to_string(),
            })
            .copied()
    }

    fn update_cursor(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    tenant_id,
                    aggregate_id,
                    projection_name: projection_name.to_string(),
                },
                sequence_number,
            );
        }
    }

    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| !(k.tenant_id == tenant_id && k.projection_name == projection_name));
        }
    }
}

/// Outcome of checking an incoming sequence number against a cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorCheck {
    Apply,
    /// Already applied (duplicate delivery).
    Skip,
    /// Sequence 0, or a gap after the cursor.
    Gap { last: u64, found: u64 },
}

pub fn check_sequence(last: u64, found: u64) -> CursorCheck {
    if found == 0 {
        return CursorCheck::Gap { last, found };
    }
    if found <= last {
        return CursorCheck::Skip;
    }
    if found != last + 1 {
        return CursorCheck::Gap { last, found };
    }
    CursorCheck::Apply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_skipped_and_gaps_reported() {
        assert_eq!(check_sequence(0, 1), CursorCheck::Apply);
        assert_eq!(check_sequence(3, 2), CursorCheck::Skip);
        assert_eq!(check_sequence(3, 3), CursorCheck::Skip);
        assert_eq!(check_sequence(3, 5), CursorCheck::Gap { last: 3, found: 5 });
        assert_eq!(check_sequence(0, 0), CursorCheck::Gap { last: 0, found: 0 });
    }

    #[test]
    fn cursors_are_scoped_per_projection() {
        let store = InMemoryCursorStore::new();
        let (tenant, agg) = (TenantId::new(), AggregateId::new());
        store.update_cursor(tenant, agg, "stock", 4);

        assert_eq!(store.get_cursor(tenant, agg, "stock"), Some(4));
        assert_eq!(store.get_cursor(tenant, agg, "balances"), None);

        store.clear_cursors(tenant, "stock");
        assert_eq!(store.get_cursor(tenant, agg, "stock"), None);
    }
}
