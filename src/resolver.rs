//! Connection resolver
//!
//! One generic resolver serves every entity type; what differs per type lives
//! in its [`EntityConnection`](crate::registry::EntityConnection) definition.

use std::sync::Arc;

use crate::authz::{self, Authorizer};
use crate::config::ConnectionConfig;
use crate::context::RequestContext;
use crate::cursor::CursorCodec;
use crate::model::Model;
use crate::pagination::{Connection, Edge};
use crate::planner::{ConnectionArgs, QueryPlan, QueryPlanner};
use crate::registry::ConnectionRegistry;
use crate::source::{DataSource, Direction};
use crate::types::EntityType;
use crate::FieldError;

/// Process-wide resolver; immutable once built and shared across requests
pub struct ConnectionResolver {
    config: ConnectionConfig,
    registry: Arc<ConnectionRegistry>,
    source: Arc<dyn DataSource>,
    authorizer: Arc<dyn Authorizer>,
}

impl ConnectionResolver {
    pub fn new(
        config: ConnectionConfig,
        registry: ConnectionRegistry,
        source: Arc<dyn DataSource>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            source,
            authorizer,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn source(&self) -> Arc<dyn DataSource> {
        self.source.clone()
    }

    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        self.authorizer.clone()
    }

    /// Resolve a connection of `entity_type`, under `parent` when nested
    #[tracing::instrument(
        name = "resolve_connection",
        skip_all,
        fields(entity = %entity_type, request_id = %request.request_id())
    )]
    pub async fn resolve(
        &self,
        entity_type: EntityType,
        parent: Option<&Model>,
        args: &ConnectionArgs,
        request: &RequestContext,
    ) -> Result<Connection<Model>, FieldError> {
        let definition = self
            .registry
            .get(entity_type)
            .ok_or(FieldError::UnknownConnection(entity_type))?;
        let source_args = definition.source_args(parent, &args.filter)?;
        let plan = QueryPlanner::new(&self.config).plan(args, source_args)?;
        for hook in self.registry.hooks() {
            hook.plan_built(&plan);
        }

        let mut records = self
            .source
            .query(plan.source_args(), plan.limit(), plan.bounds(), plan.direction())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Connection query failed");
                FieldError::SourceUnavailable(e)
            })?;
        for hook in self.registry.hooks() {
            hook.records_fetched(&plan, &records);
        }

        let page_size = plan.page_size() as usize;
        let overflow = records.len() > page_size;
        records.truncate(page_size);
        if plan.direction() == Direction::Backward {
            records.reverse();
        }

        let models = request.loader().adopt_records(entity_type, records).await;
        let mut models = authz::filter(self.authorizer.as_ref(), models, request.viewer());
        for hook in self.registry.hooks() {
            hook.models_filtered(&plan, &mut models);
        }

        let (has_next, has_previous) = page_flags(&plan, overflow);
        let connection = Connection::from_edges(edges(&plan, models), has_next, has_previous);

        tracing::debug!(
            edges = connection.edges.len(),
            has_next,
            has_previous,
            "Resolved connection"
        );
        Ok(connection)
    }
}

/// Page flags from the over-fetched record and the cursor bounds
fn page_flags(plan: &QueryPlan, overflow: bool) -> (bool, bool) {
    let bounds = plan.bounds();
    match plan.direction() {
        Direction::Forward => (overflow || bounds.before.is_some(), bounds.after.is_some()),
        Direction::Backward => (bounds.before.is_some(), overflow || bounds.after.is_some()),
    }
}

fn edges(plan: &QueryPlan, models: Vec<Model>) -> Vec<Edge<Model>> {
    let ordering = &plan.source_args().ordering;
    models
        .into_iter()
        .map(|node| Edge {
            cursor: CursorCodec::encode(&node.ordered_key(ordering), plan.fingerprint()),
            node,
        })
        .collect()
}
