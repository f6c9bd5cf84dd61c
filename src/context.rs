//! Per-request state
//!
//! Everything here lives for one GraphQL request and is dropped with it.

use uuid::Uuid;

use crate::authz::ViewerContext;
use crate::loader::EntityLoader;
use crate::model::Model;
use crate::resolver::ConnectionResolver;

pub struct RequestContext {
    request_id: Uuid,
    viewer: ViewerContext,
    loader: EntityLoader,
}

impl RequestContext {
    /// Fresh context with its own empty loader cache
    pub fn new(resolver: &ConnectionResolver, viewer: ViewerContext) -> Self {
        let loader = EntityLoader::new(
            resolver.source(),
            resolver.authorizer(),
            viewer.clone(),
            resolver.config().loader.clone(),
        );
        Self {
            request_id: Uuid::new_v4(),
            viewer,
            loader,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn viewer(&self) -> &ViewerContext {
        &self.viewer
    }

    pub fn loader(&self) -> &EntityLoader {
        &self.loader
    }

    pub fn can_view_field(&self, model: &Model, field: &str) -> bool {
        self.loader.can_view_field(model, field)
    }
}
