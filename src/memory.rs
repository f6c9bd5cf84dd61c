//! In-memory data source
//!
//! Keeps records per entity type and answers queries by filtering and sorting in
//! memory. Every call is recorded so batching behaviour can be observed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::source::{DataSource, Direction, KeyBounds, SourceError, SourceQueryArgs};
use crate::types::{EntityId, EntityType, RawRecord};

#[derive(Default)]
pub struct MemorySource {
    records: HashMap<EntityType, Vec<RawRecord>>,
    query_calls: AtomicUsize,
    get_calls: Mutex<Vec<(EntityType, Vec<EntityId>)>>,
    failure: Mutex<Option<SourceError>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item = RawRecord>) -> Self {
        for record in records {
            self.insert(record);
        }
        self
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: RawRecord) {
        let rows = self.records.entry(record.entity_type).or_default();
        match rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
    }

    /// Make every following call fail with `error` until cleared
    pub fn fail_with(&self, error: Option<SourceError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(AtomicOrdering::SeqCst)
    }

    /// Every `get_by_ids` call received so far, in order
    pub fn get_calls(&self) -> Vec<(EntityType, Vec<EntityId>)> {
        self.get_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn check_failure(&self) -> Result<(), SourceError> {
        match self.failure.lock() {
            Ok(failure) => match failure.as_ref() {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
            Err(_) => Err(SourceError::Unavailable("poisoned lock".to_string())),
        }
    }
}

/// Equality, or membership when the stored field is a list
fn matches_filter(record: &RawRecord, key: &str, expected: &JsonValue) -> bool {
    match record.field(key) {
        Some(JsonValue::Array(items)) => items.iter().any(|item| loose_eq(item, expected)),
        Some(value) => loose_eq(&value, expected),
        None => expected.is_null(),
    }
}

/// Ids travel as strings, stored foreign keys may be numbers
fn loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(n), JsonValue::String(s)) | (JsonValue::String(s), JsonValue::Number(n)) => {
            n.to_string() == *s
        }
        _ => a == b,
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn query(
        &self,
        args: &SourceQueryArgs,
        limit: u32,
        bounds: &KeyBounds,
        direction: Direction,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.query_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_failure()?;

        let ordering = &args.ordering;
        let mut rows: Vec<_> = self
            .records
            .get(&args.entity_type)
            .map(|rows| rows.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|r| args.filter.iter().all(|(k, v)| matches_filter(r, k, v)))
            .map(|r| (ordering.key_of(&r.id, &r.fields), r))
            .filter(|(key, _)| {
                let after_ok = bounds
                    .after
                    .as_ref()
                    .map_or(true, |a| ordering.compare(key, a) == Ordering::Greater);
                let before_ok = bounds
                    .before
                    .as_ref()
                    .map_or(true, |b| ordering.compare(key, b) == Ordering::Less);
                after_ok && before_ok
            })
            .collect();

        rows.sort_by(|(a, _), (b, _)| ordering.compare(a, b));
        if direction == Direction::Backward {
            rows.reverse();
        }

        Ok(rows
            .into_iter()
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn get_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RawRecord>, SourceError> {
        if let Ok(mut calls) = self.get_calls.lock() {
            calls.push((entity_type, ids.to_vec()));
        }
        self.check_failure()?;

        let rows = self
            .records
            .get(&entity_type)
            .map(|rows| rows.as_slice())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| rows.iter().find(|r| &r.id == id))
            .map(|r| (r.id.clone(), r.clone()))
            .collect())
    }
}
