//! Connection definitions and extension hooks
//!
//! The registry is assembled once at startup through [`RegistryBuilder`] and
//! is read-only afterwards; resolution only ever borrows it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::model::Model;
use crate::planner::{PlanError, QueryPlan};
use crate::source::SourceQueryArgs;
use crate::types::{EntityType, OrderingSpec, RawRecord, SortOrder, WhereFilter};

/// How one entity type is exposed as a connection
#[derive(Debug, Clone, PartialEq)]
pub struct EntityConnection {
    entity_type: EntityType,
    ordering: OrderingSpec,
    where_fields: BTreeSet<String>,
    /// Child field holding the id of each supported parent type
    parents: HashMap<EntityType, String>,
}

impl EntityConnection {
    pub fn new(entity_type: EntityType, ordering: OrderingSpec) -> Self {
        Self {
            entity_type,
            ordering,
            where_fields: BTreeSet::new(),
            parents: HashMap::new(),
        }
    }

    /// Keys accepted in the `where` argument
    pub fn allow_where(mut self, fields: &[&str]) -> Self {
        self.where_fields.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    /// Allow resolving under a `parent_type` node, matching `field` to its id
    pub fn parent(mut self, parent_type: EntityType, field: &str) -> Self {
        self.parents.insert(parent_type, field.to_string());
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn ordering(&self) -> &OrderingSpec {
        &self.ordering
    }

    /// Source arguments for a client filter, scoped to `parent` when given
    pub fn source_args(&self, parent: Option<&Model>, filter: &WhereFilter) -> Result<SourceQueryArgs, PlanError> {
        if let Some((key, _)) = filter.iter().find(|(k, _)| !self.where_fields.contains(*k)) {
            return Err(PlanError::UnknownFilter(key.clone()));
        }

        let mut filter = filter.clone();
        if let Some(parent) = parent {
            let field = self
                .parents
                .get(&parent.entity_type())
                .ok_or(PlanError::UnsupportedParent {
                    child: self.entity_type,
                    parent: parent.entity_type(),
                })?;
            filter.insert(field, parent.id().as_str());
        }

        Ok(SourceQueryArgs {
            entity_type: self.entity_type,
            filter,
            ordering: self.ordering.clone(),
        })
    }
}

/// Callbacks invoked at fixed stages of every connection resolution
pub trait ConnectionHook: Send + Sync {
    fn plan_built(&self, _plan: &QueryPlan) {}

    fn records_fetched(&self, _plan: &QueryPlan, _records: &[RawRecord]) {}

    /// May drop further models after authorization
    fn models_filtered(&self, _plan: &QueryPlan, _models: &mut Vec<Model>) {}
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<EntityType, EntityConnection>,
    hooks: Vec<Arc<dyn ConnectionHook>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, entity_type: EntityType) -> Option<&EntityConnection> {
        self.connections.get(&entity_type)
    }

    pub fn hooks(&self) -> &[Arc<dyn ConnectionHook>] {
        &self.hooks
    }

    /// Connections for every stock entity type
    pub fn cms_defaults() -> Self {
        Self::builder().cms_defaults().build()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    registry: ConnectionRegistry,
}

impl RegistryBuilder {
    pub fn connection(mut self, connection: EntityConnection) -> Self {
        self.registry
            .connections
            .insert(connection.entity_type(), connection);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn ConnectionHook>) -> Self {
        self.registry.hooks.push(hook);
        self
    }

    pub fn cms_defaults(self) -> Self {
        self.connection(
            EntityConnection::new(EntityType::Post, OrderingSpec::by("date", SortOrder::Desc))
                .allow_where(&["status", "author", "terms", "parent"])
                .parent(EntityType::User, "author")
                .parent(EntityType::Term, "terms"),
        )
        .connection(
            EntityConnection::new(EntityType::Page, OrderingSpec::by("date", SortOrder::Desc))
                .allow_where(&["status", "author", "parent"])
                .parent(EntityType::User, "author")
                .parent(EntityType::Page, "parent"),
        )
        .connection(
            EntityConnection::new(EntityType::Term, OrderingSpec::by("name", SortOrder::Asc))
                .allow_where(&["taxonomy", "parent"])
                .parent(EntityType::Post, "object_ids")
                .parent(EntityType::Term, "parent"),
        )
        .connection(
            EntityConnection::new(EntityType::User, OrderingSpec::by("login", SortOrder::Asc))
                .allow_where(&["roles"]),
        )
        .connection(
            EntityConnection::new(EntityType::Comment, OrderingSpec::by("date", SortOrder::Desc))
                .allow_where(&["status", "user_id", "parent"])
                .parent(EntityType::Post, "post_id")
                .parent(EntityType::Page, "post_id")
                .parent(EntityType::User, "user_id")
                .parent(EntityType::Comment, "parent"),
        )
        .connection(
            EntityConnection::new(EntityType::Menu, OrderingSpec::by("name", SortOrder::Asc))
                .allow_where(&["locations"]),
        )
        .connection(
            EntityConnection::new(EntityType::MenuItem, OrderingSpec::by("menu_order", SortOrder::Asc))
                .allow_where(&["parent_id", "menu_id"])
                .parent(EntityType::Menu, "menu_id")
                .parent(EntityType::MenuItem, "parent_id"),
        )
        .connection(
            EntityConnection::new(EntityType::Plugin, OrderingSpec::by("name", SortOrder::Asc))
                .allow_where(&["status"]),
        )
        .connection(EntityConnection::new(
            EntityType::Theme,
            OrderingSpec::by("name", SortOrder::Asc),
        ))
    }

    pub fn build(self) -> ConnectionRegistry {
        self.registry
    }
}
