//! # press-graphql-connections
//!
//! Connection resolution engine for a CMS GraphQL API.
//!
//! ## Features
//!
//! - **Cursor Pagination** - Relay-style connections with signed, query-bound cursors
//! - **Query Planning** - `first`/`last`/`after`/`before` to bounded source queries with over-fetch
//! - **DataLoader** - Request-scoped batch loading for N+1 prevention
//! - **Visibility** - Post-fetch authorization filtering and field-level checks
//! - **Auth Middleware** - Viewer extraction and per-request context for GraphQL handlers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use press_graphql_connections::{
//!     ConnectionArgs, ConnectionConfig, ConnectionRegistry, ConnectionResolver, EntityType,
//!     MemorySource, RequestContext, ViewerContext, VisibilityPolicy,
//! };
//!
//! # async fn example() -> press_graphql_connections::Result<()> {
//! let resolver = ConnectionResolver::new(
//!     ConnectionConfig::default(),
//!     ConnectionRegistry::cms_defaults(),
//!     Arc::new(MemorySource::new()),
//!     Arc::new(VisibilityPolicy::cms_defaults()),
//! );
//! let request = RequestContext::new(&resolver, ViewerContext::anonymous());
//! let _posts = resolver
//!     .resolve(EntityType::Post, None, &ConnectionArgs::first(5), &request)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod context;
pub mod cursor;
pub mod dataloaders;
pub mod loader;
pub mod memory;
pub mod model;
pub mod pagination;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod types;

pub use auth::{extract_viewer, graphql_handler, resolve_connection};
pub use authz::{Authorizer, ViewerContext, VisibilityPolicy, VisibilityRule};
pub use config::{ConnectionConfig, LoaderConfig};
pub use context::RequestContext;
pub use cursor::{CursorCodec, CursorError, QueryFingerprint};
pub use dataloaders::{BatchLoader, DataLoader, LoadError};
pub use loader::EntityLoader;
pub use memory::MemorySource;
pub use model::Model;
pub use pagination::{Connection, Edge, PageInfo, PaginationInput};
pub use planner::{ConnectionArgs, PlanError, QueryPlan, QueryPlanner};
pub use registry::{ConnectionHook, ConnectionRegistry, EntityConnection};
pub use resolver::ConnectionResolver;
pub use source::{DataSource, Direction, KeyBounds, SourceError, SourceQueryArgs};
pub use types::{DateTime, EntityId, EntityType, OrderingSpec, RawRecord, SortOrder, WhereFilter};

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Errors of a single connection field
///
/// None of these abort sibling fields; each surfaces as a field-level GraphQL error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Invalid connection arguments: {0}")]
    InvalidArguments(PlanError),

    #[error("Requested page size {requested} exceeds the maximum of {max}")]
    PageSizeExceeded { requested: u32, max: u32 },

    #[error("Invalid '{arg}' cursor: {source}")]
    InvalidCursor {
        arg: &'static str,
        #[source]
        source: CursorError,
    },

    #[error("Data source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    #[error("No connection registered for {0}")]
    UnknownConnection(EntityType),
}

impl FieldError {
    /// Stable code exposed in the error's `extensions`
    pub fn code(&self) -> &'static str {
        match self {
            FieldError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            FieldError::PageSizeExceeded { .. } => "PAGE_SIZE_EXCEEDED",
            FieldError::InvalidCursor { .. } => "INVALID_CURSOR",
            FieldError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            FieldError::UnknownConnection(_) => "UNKNOWN_CONNECTION",
        }
    }
}

impl From<PlanError> for FieldError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::PageSizeExceeded { requested, max } => {
                FieldError::PageSizeExceeded { requested, max }
            }
            PlanError::Cursor { arg, source } => FieldError::InvalidCursor { arg, source },
            other => FieldError::InvalidArguments(other),
        }
    }
}

impl From<SourceError> for FieldError {
    fn from(err: SourceError) -> Self {
        FieldError::SourceUnavailable(err)
    }
}

impl From<LoadError> for FieldError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Source(source) => FieldError::SourceUnavailable(source),
            LoadError::Aborted => {
                FieldError::SourceUnavailable(SourceError::Unavailable(err.to_string()))
            }
        }
    }
}

impl ErrorExtensions for FieldError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| {
            e.set("code", self.code());
            if let FieldError::SourceUnavailable(cause) = self {
                e.set("cause", cause.to_string());
            }
        })
    }
}

/// Result type for connection resolution
pub type Result<T> = std::result::Result<T, FieldError>;
