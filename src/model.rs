//! Model projection
//!
//! A [`Model`] wraps a raw record with a typed accessor surface and a stable
//! `(type, id)` identity. Projection is pure; visibility of individual fields is
//! decided when a field is resolved.

use std::sync::Arc;

use async_graphql::{Context, Json, Object, ID};
use serde_json::Value as JsonValue;

use crate::types::{
    to_global_id, DateTime, EntityId, EntityType, OrderedKey, OrderingSpec, RawRecord,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    record: Arc<RawRecord>,
}

/// Project a raw record as an entity of `entity_type`
pub fn project(mut raw: RawRecord, entity_type: EntityType) -> Model {
    raw.entity_type = entity_type;
    Model {
        record: Arc::new(raw),
    }
}

impl Model {
    pub fn entity_type(&self) -> EntityType {
        self.record.entity_type
    }

    pub fn id(&self) -> &EntityId {
        &self.record.id
    }

    pub fn global_id(&self) -> String {
        to_global_id(self.entity_type(), self.id())
    }

    pub fn raw(&self) -> &RawRecord {
        &self.record
    }

    pub fn field(&self, name: &str) -> Option<JsonValue> {
        self.record.field(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.record.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn int_field(&self, name: &str) -> Option<i64> {
        self.record.fields.get(name).and_then(|v| match v {
            JsonValue::String(s) => s.parse().ok(),
            other => other.as_i64(),
        })
    }

    pub fn date_field(&self, name: &str) -> Option<DateTime> {
        self.record.fields.get(name).and_then(DateTime::from_field)
    }

    /// Position of this model in `ordering`
    pub fn ordered_key(&self, ordering: &OrderingSpec) -> OrderedKey {
        ordering.key_of(&self.record.id, &self.record.fields)
    }
}

/// GraphQL node surface of a model
#[Object(name = "Node")]
impl Model {
    /// Relay global id
    #[graphql(name = "id")]
    async fn gql_id(&self) -> ID {
        ID(self.global_id())
    }

    #[graphql(name = "databaseId")]
    async fn gql_database_id(&self) -> &str {
        self.record.id.as_str()
    }

    #[graphql(name = "entityType")]
    async fn gql_entity_type(&self) -> EntityType {
        self.record.entity_type
    }

    #[graphql(name = "date")]
    async fn gql_date(&self) -> Option<DateTime> {
        self.date_field("date")
    }

    /// Raw field value, subject to field-level visibility
    #[graphql(name = "field")]
    async fn gql_field(&self, ctx: &Context<'_>, name: String) -> Option<Json<JsonValue>> {
        let request = crate::auth::get_request_context(ctx)?;
        if !request.can_view_field(self, &name) {
            return None;
        }
        self.field(&name).map(Json)
    }
}
