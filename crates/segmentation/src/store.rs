//! Storage collaborators of the segment service, with in-memory
//! implementations for tests and embedded use.

use std::collections::HashSet;

use anyhow::Result;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::records::{Customer, ImportSummary, Order, Record};
use crate::service::Segment;

/// Persists segments. Writes replace the whole segment; last write wins.
pub trait SegmentStore: Send + Sync {
    fn save(&self, segment: Segment) -> Result<()>;

    fn get(&self, id: &Uuid) -> Result<Option<Segment>>;

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Segment>>;

    /// Returns whether a segment was removed.
    fn delete(&self, id: &Uuid) -> Result<bool>;
}

/// Supplies the full record set of an account.
pub trait RecordStore: Send + Sync {
    fn records_for(&self, owner_id: &str) -> Result<Vec<Record>>;
}

#[derive(Default)]
pub struct InMemorySegmentStore {
    segments: DashMap<Uuid, Segment>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentStore for InMemorySegmentStore {
    fn save(&self, segment: Segment) -> Result<()> {
        self.segments.insert(segment.id, segment);
        Ok(())
    }

    fn get(&self, id: &Uuid) -> Result<Option<Segment>> {
        Ok(self.segments.get(id).map(|s| s.clone()))
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Segment>> {
        let mut owned: Vec<Segment> = self
            .segments
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| s.value().clone())
            .collect();
        owned.sort_by_key(|s| s.created_at);
        Ok(owned)
    }

    fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(self.segments.remove(id).is_some())
    }
}

/// Records per owner. Imported customers are flattened on read, so orders
/// imported later are reflected in their derived spend attributes.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<String, Vec<Record>>,
    customers: DashMap<String, Vec<Customer>>,
    orders: DashMap<String, Vec<Order>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, owner_id: impl Into<String>, record: Record) {
        self.records.entry(owner_id.into()).or_default().push(record);
    }

    /// Import customers row by row. Invalid rows are skipped and reported.
    pub fn import_customers(&self, owner_id: &str, customers: Vec<Customer>) -> ImportSummary {
        let mut summary = ImportSummary::default();
        for (idx, customer) in customers.into_iter().enumerate() {
            let checked = if customer.owner_id != owner_id {
                Err("Customer belongs to another account".to_string())
            } else {
                customer.validate()
            };
            match checked {
                Ok(()) => {
                    self.customers
                        .entry(owner_id.to_string())
                        .or_default()
                        .push(customer);
                    summary.record_ok();
                }
                Err(reason) => summary.record_failure(idx, reason),
            }
        }
        info!(
            owner_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "customer import finished"
        );
        summary
    }

    /// Import orders row by row. Each order must be valid and reference a
    /// customer already imported for `owner_id`.
    pub fn import_orders(&self, owner_id: &str, orders: Vec<Order>) -> ImportSummary {
        let known: HashSet<Uuid> = self
            .customers
            .get(owner_id)
            .map(|c| c.iter().map(|c| c.id).collect())
            .unwrap_or_default();
        let mut summary = ImportSummary::default();
        for (idx, order) in orders.into_iter().enumerate() {
            let checked = order.validate().and_then(|()| {
                if known.contains(&order.customer_id) {
                    Ok(())
                } else {
                    Err(format!("Customer with ID '{}' not found", order.customer_id))
                }
            });
            match checked {
                Ok(()) => {
                    self.orders.entry(owner_id.to_string()).or_default().push(order);
                    summary.record_ok();
                }
                Err(reason) => summary.record_failure(idx, reason),
            }
        }
        info!(
            owner_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "order import finished"
        );
        summary
    }
}

impl RecordStore for InMemoryRecordStore {
    fn records_for(&self, owner_id: &str) -> Result<Vec<Record>> {
        let mut records = self
            .records
            .get(owner_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        if let Some(customers) = self.customers.get(owner_id) {
            let orders = self
                .orders
                .get(owner_id)
                .map(|o| o.value().clone())
                .unwrap_or_default();
            records.extend(customers.iter().map(|c| c.to_record(&orders)));
        }
        Ok(records)
    }
}
