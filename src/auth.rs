//! GraphQL request middleware and context extraction
//!
//! Provides helpers for:
//! - Extracting the viewer from headers set by the upstream authentication layer
//! - Creating a fresh per-request context (viewer + entity loader)
//! - Standard Axum handler for GraphQL endpoints
//! - Resolving connection fields from inside async-graphql resolvers

use std::collections::BTreeSet;
use std::sync::Arc;

use async_graphql::{Context, ErrorExtensions, Request, Response, Schema};
use axum::{extract::Extension, http::HeaderMap, Json};
use tracing::Instrument;

use crate::authz::ViewerContext;
use crate::context::RequestContext;
use crate::model::Model;
use crate::pagination::{Connection, PaginationInput};
use crate::resolver::ConnectionResolver;
use crate::types::{EntityId, EntityType};
use crate::FieldError;

/// Extract user id from x-user-id header
pub fn extract_user_id(headers: &HeaderMap) -> Option<EntityId> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(EntityId::from)
}

/// Extract capabilities from the comma-separated x-user-capabilities header
pub fn extract_capabilities(headers: &HeaderMap) -> BTreeSet<String> {
    headers
        .get("x-user-capabilities")
        .and_then(|v| v.to_str().ok())
        .map(|caps| {
            caps.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the viewer; capabilities without a user are ignored
pub fn extract_viewer(headers: &HeaderMap) -> ViewerContext {
    match extract_user_id(headers) {
        Some(user_id) => ViewerContext {
            user_id: Some(user_id),
            capabilities: extract_capabilities(headers),
        },
        None => ViewerContext::anonymous(),
    }
}

/// Standard GraphQL handler with request context injection
///
/// Every request gets its own [`RequestContext`], so loader caches never leak
/// between requests.
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::post};
/// use press_graphql_connections::auth::graphql_handler;
/// use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema};
///
/// struct Query;
///
/// #[Object]
/// impl Query {
///     async fn ping(&self) -> bool { true }
/// }
///
/// let app: Router = Router::new()
///     .route("/graphql", post(graphql_handler::<Query, EmptyMutation, EmptySubscription>));
/// ```
pub async fn graphql_handler<Query, Mutation, Subscription>(
    Extension(schema): Extension<Schema<Query, Mutation, Subscription>>,
    Extension(resolver): Extension<Arc<ConnectionResolver>>,
    headers: HeaderMap,
    req: Json<Request>,
) -> Json<Response>
where
    Query: async_graphql::ObjectType + 'static,
    Mutation: async_graphql::ObjectType + 'static,
    Subscription: async_graphql::SubscriptionType + 'static,
{
    let viewer = extract_viewer(&headers);
    let context = RequestContext::new(&resolver, viewer);
    let span = tracing::info_span!(
        "graphql_request",
        request_id = %context.request_id(),
        user_id = ?context.viewer().user_id,
    );

    let request = req.0.data(resolver.clone()).data(context);
    let response = schema.execute(request).instrument(span).await;

    Json(response)
}

/// Get the request context from GraphQL context
pub fn get_request_context<'a>(ctx: &'a Context<'_>) -> Option<&'a RequestContext> {
    ctx.data_opt::<RequestContext>()
}

/// Resolve a connection field from inside a GraphQL resolver
///
/// Errors come back as field-level GraphQL errors carrying a `code` extension.
///
/// # Example
///
/// ```rust,no_run
/// use async_graphql::{Context, Object, Result};
/// use press_graphql_connections::{resolve_connection, Connection, EntityType, Model, PaginationInput};
///
/// struct Query;
///
/// #[Object]
/// impl Query {
///     async fn posts(&self, ctx: &Context<'_>, page: Option<PaginationInput>) -> Result<Connection<Model>> {
///         resolve_connection(ctx, EntityType::Post, None, page).await
///     }
/// }
/// ```
pub async fn resolve_connection(
    ctx: &Context<'_>,
    entity_type: EntityType,
    parent: Option<&Model>,
    input: Option<PaginationInput>,
) -> async_graphql::Result<Connection<Model>> {
    let resolver = ctx.data::<Arc<ConnectionResolver>>()?;
    let request = ctx.data::<RequestContext>()?;
    let args = input
        .unwrap_or_default()
        .into_args()
        .map_err(|e| FieldError::from(e).extend())?;

    resolver
        .resolve(entity_type, parent, &args, request)
        .await
        .map_err(|e| e.extend())
}
