//! Abstract data source consumed by the planner and the entity loader

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{EntityId, EntityType, OrderedKey, OrderingSpec, RawRecord, WhereFilter};

/// Failure reported by a data source
///
/// Cloneable so one failed batch can be reported to every waiting caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Data source timed out: {0}")]
    Timeout(String),

    #[error("Data source rejected the query: {0}")]
    InvalidQuery(String),

    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

/// Traversal direction of a connection query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Results in ordering order
    Forward,
    /// Results in reverse ordering order, starting from the end of the window
    Backward,
}

/// Exclusive window bounds in ordering terms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBounds {
    /// Only records strictly after this key
    pub after: Option<OrderedKey>,
    /// Only records strictly before this key
    pub before: Option<OrderedKey>,
}

impl KeyBounds {
    pub fn is_unbounded(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }
}

/// Source-level description of what a connection selects
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQueryArgs {
    pub entity_type: EntityType,
    /// Client `where` filter merged with the parent constraint
    pub filter: WhereFilter,
    pub ordering: OrderingSpec,
}

/// Storage capability the engine runs against
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch up to `limit` records matching `args` inside `bounds`
    ///
    /// Results must be sorted by `args.ordering`, reversed for `Direction::Backward`.
    async fn query(
        &self,
        args: &SourceQueryArgs,
        limit: u32,
        bounds: &KeyBounds,
        direction: Direction,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Fetch records by id; missing ids are simply absent from the map
    async fn get_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RawRecord>, SourceError>;
}
