//! The ephemeral in-memory backend: maps and lists behind a mutex, no
//! durability. Snapshots of behavior live in the shared conformance suite;
//! anything it does differently from the sqlite backend is a bug.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use async_trait::async_trait;
use common::backend::{
    record_not_found,
    Backend,
    Filter,
    Ordering,
    Record,
    RecordRef,
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    records: BTreeMap<RecordRef, JsonValue>,
    // Refs in creation order; `list`/`keys` without an ordering follow it.
    insertion_order: Vec<RecordRef>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                records: BTreeMap::new(),
                insertion_order: Vec::new(),
            })),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, record_ref: &RecordRef) -> anyhow::Result<Record> {
        let inner = self.inner.lock();
        let data = inner
            .records
            .get(record_ref)
            .ok_or_else(|| record_not_found(record_ref))?;
        Ok(Record {
            record_ref: record_ref.clone(),
            data: data.clone(),
        })
    }

    async fn create(&self, data: JsonValue) -> anyhow::Result<Record> {
        let record_ref = RecordRef::of(&data)?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.records.get(&record_ref) {
            return Ok(Record {
                record_ref,
                data: existing.clone(),
            });
        }
        inner.records.insert(record_ref.clone(), data.clone());
        inner.insertion_order.push(record_ref.clone());
        Ok(Record { record_ref, data })
    }

    async fn bulk_read(&self, refs: &[RecordRef]) -> anyhow::Result<Vec<Record>> {
        let inner = self.inner.lock();
        refs.iter()
            .map(|record_ref| {
                let data = inner
                    .records
                    .get(record_ref)
                    .ok_or_else(|| anyhow::Error::from(record_not_found(record_ref)))?;
                Ok(Record {
                    record_ref: record_ref.clone(),
                    data: data.clone(),
                })
            })
            .collect()
    }

    async fn query(
        &self,
        filters: Vec<Filter>,
        order: Option<Ordering>,
    ) -> anyhow::Result<Vec<Record>> {
        let inner = self.inner.lock();
        let mut results: Vec<Record> = inner
            .insertion_order
            .iter()
            .filter_map(|record_ref| {
                inner.records.get(record_ref).map(|data| Record {
                    record_ref: record_ref.clone(),
                    data: data.clone(),
                })
            })
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .collect();
        if let Some(order) = order {
            order.sort(&mut results);
        }
        Ok(results)
    }

    async fn list(&self, order: Option<Ordering>) -> anyhow::Result<Vec<Record>> {
        self.query(vec![], order).await
    }

    async fn keys(&self) -> anyhow::Result<Vec<RecordRef>> {
        Ok(self.inner.lock().insertion_order.clone())
    }

    async fn delete(&self, record_ref: &RecordRef) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.records.remove(record_ref).is_none() {
            return Err(record_not_found(record_ref).into());
        }
        inner.insertion_order.retain(|r| r != record_ref);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.insertion_order.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{
        run_backend_test_suite,
        testing::backend_test_suite,
    };

    use crate::MemoryBackend;

    run_backend_test_suite!(_db, (), Arc::new(MemoryBackend::new()));
}
