//! Relay-style cursor pagination

use std::collections::BTreeMap;

use async_graphql::{InputObject, Json, Object, SimpleObject};
use serde_json::Value as JsonValue;

use crate::planner::{ConnectionArgs, PlanError};
use crate::types::WhereFilter;

/// Page information
#[derive(SimpleObject, Debug, Clone, PartialEq)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

/// Edge in a connection
#[derive(Debug, Clone)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[Object]
impl<T: async_graphql::OutputType> Edge<T> {
    async fn cursor(&self) -> &str {
        &self.cursor
    }

    async fn node(&self) -> &T {
        &self.node
    }
}

/// Connection (paginated result)
#[derive(Debug, Clone)]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

#[Object]
impl<T: async_graphql::OutputType> Connection<T> {
    async fn edges(&self) -> &[Edge<T>] {
        &self.edges
    }

    async fn page_info(&self) -> &PageInfo {
        &self.page_info
    }
}

impl<T> Connection<T> {
    /// Create connection from already-cursored edges
    ///
    /// Start and end cursors come from the first and last edge.
    pub fn from_edges(edges: Vec<Edge<T>>, has_next: bool, has_previous: bool) -> Self {
        let start_cursor = edges.first().map(|e| e.cursor.clone());
        let end_cursor = edges.last().map(|e| e.cursor.clone());

        Self {
            edges,
            page_info: PageInfo {
                has_next_page: has_next,
                has_previous_page: has_previous,
                start_cursor,
                end_cursor,
            },
        }
    }

    /// Create empty connection
    pub fn empty() -> Self {
        Self::from_edges(Vec::new(), false, false)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

/// Pagination input for GraphQL queries
///
/// Follows the Relay Cursor Connections Specification:
/// https://relay.dev/graphql/connections.htm
#[derive(InputObject, Debug, Clone, Default)]
pub struct PaginationInput {
    /// Number of items to return (forward pagination)
    pub first: Option<i32>,

    /// Cursor to start after (forward pagination)
    pub after: Option<String>,

    /// Number of items to return (backward pagination)
    pub last: Option<i32>,

    /// Cursor to end before (backward pagination)
    pub before: Option<String>,

    /// Equality filters on the connection's allowed fields
    #[graphql(name = "where")]
    pub filter: Option<Json<BTreeMap<String, JsonValue>>>,
}

impl PaginationInput {
    /// Validate pagination input and convert it to connection arguments
    ///
    /// Page size limits are enforced by the planner, not here.
    pub fn into_args(self) -> Result<ConnectionArgs, PlanError> {
        if self.first.is_some() && self.last.is_some() {
            return Err(PlanError::ConflictingPageArgs);
        }

        Ok(ConnectionArgs {
            first: non_negative("first", self.first)?,
            last: non_negative("last", self.last)?,
            after: self.after,
            before: self.before,
            filter: self
                .filter
                .map(|Json(map)| WhereFilter::from(map))
                .unwrap_or_default(),
        })
    }
}

fn non_negative(arg: &'static str, value: Option<i32>) -> Result<Option<u32>, PlanError> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| PlanError::NegativePageSize {
                arg,
                value: i64::from(v),
            })
        })
        .transpose()
}
