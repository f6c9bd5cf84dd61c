//! Post-fetch visibility filtering
//!
//! Filtering runs after the bounded fetch, so a page may hold fewer edges than
//! requested while `hasNextPage` is still true. Pages are never backfilled.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value as JsonValue;

use crate::model::Model;
use crate::types::{EntityId, EntityType};

/// Who is asking
///
/// Built by the transport from whatever authentication established; the engine
/// only passes it along to the [`Authorizer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewerContext {
    pub user_id: Option<EntityId>,
    pub capabilities: BTreeSet<String>,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<EntityId>, capabilities: &[&str]) -> Self {
        Self {
            user_id: Some(id.into()),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn has_cap(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Per-model visibility decisions
pub trait Authorizer: Send + Sync {
    fn can_view(&self, viewer: &ViewerContext, model: &Model) -> bool;

    fn can_view_field(&self, _viewer: &ViewerContext, _model: &Model, _field: &str) -> bool {
        true
    }
}

/// Drop every model the viewer cannot see, keeping order
pub fn filter(authorizer: &dyn Authorizer, models: Vec<Model>, viewer: &ViewerContext) -> Vec<Model> {
    let before = models.len();
    let visible: Vec<Model> = models
        .into_iter()
        .filter(|m| authorizer.can_view(viewer, m))
        .collect();
    if visible.len() < before {
        tracing::debug!(
            hidden = before - visible.len(),
            visible = visible.len(),
            "Filtered models not visible to viewer"
        );
    }
    visible
}

/// How a type's records become visible
#[derive(Debug, Clone, PartialEq)]
pub enum Visibility {
    Public,
    /// Visible when `field` holds one of `public`; otherwise to the owner or `capability`
    Status {
        field: String,
        public: Vec<String>,
        capability: String,
    },
    /// Visible to the owner or to viewers with `capability`
    Restricted { capability: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityRule {
    pub visibility: Visibility,
    /// Field naming the owning user; `id` means the record is the user itself
    pub owner_field: Option<String>,
    /// Fields only the owner or a `Restricted`/`Status` capability holder may read
    pub private_fields: Vec<String>,
}

impl VisibilityRule {
    pub fn public() -> Self {
        Self {
            visibility: Visibility::Public,
            owner_field: None,
            private_fields: Vec::new(),
        }
    }

    pub fn status(field: &str, public: &[&str], capability: &str) -> Self {
        Self {
            visibility: Visibility::Status {
                field: field.to_string(),
                public: public.iter().map(|s| s.to_string()).collect(),
                capability: capability.to_string(),
            },
            owner_field: None,
            private_fields: Vec::new(),
        }
    }

    pub fn restricted(capability: &str) -> Self {
        Self {
            visibility: Visibility::Restricted {
                capability: capability.to_string(),
            },
            owner_field: None,
            private_fields: Vec::new(),
        }
    }

    pub fn owned_by(mut self, field: &str) -> Self {
        self.owner_field = Some(field.to_string());
        self
    }

    pub fn private_fields(mut self, fields: &[&str]) -> Self {
        self.private_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    fn capability(&self) -> Option<&str> {
        match &self.visibility {
            Visibility::Public => None,
            Visibility::Status { capability, .. } | Visibility::Restricted { capability } => {
                Some(capability.as_str())
            }
        }
    }

    fn is_owner(&self, viewer: &ViewerContext, model: &Model) -> bool {
        let Some(user_id) = viewer.user_id.as_ref() else {
            return false;
        };
        match self.owner_field.as_deref() {
            Some(crate::types::ID_FIELD) => model.id() == user_id,
            Some(field) => match model.field(field) {
                Some(JsonValue::String(s)) => s == user_id.as_str(),
                Some(JsonValue::Number(n)) => n.to_string() == user_id.as_str(),
                _ => false,
            },
            None => false,
        }
    }

    fn allows(&self, viewer: &ViewerContext, model: &Model) -> bool {
        match &self.visibility {
            Visibility::Public => true,
            Visibility::Status {
                field,
                public,
                capability,
            } => {
                let is_public = model
                    .str_field(field)
                    .map_or(false, |status| public.iter().any(|p| p == status));
                is_public || self.is_owner(viewer, model) || viewer.has_cap(capability)
            }
            Visibility::Restricted { capability } => {
                self.is_owner(viewer, model) || viewer.has_cap(capability)
            }
        }
    }

    fn allows_field(&self, viewer: &ViewerContext, model: &Model, field: &str) -> bool {
        if !self.private_fields.iter().any(|f| f == field) {
            return true;
        }
        self.is_owner(viewer, model) || self.capability().map_or(false, |c| viewer.has_cap(c))
    }
}

/// Rule-table authorizer; types without a rule are hidden
#[derive(Debug, Clone, Default)]
pub struct VisibilityPolicy {
    rules: HashMap<EntityType, VisibilityRule>,
}

impl VisibilityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, entity_type: EntityType, rule: VisibilityRule) -> Self {
        self.rules.insert(entity_type, rule);
        self
    }

    /// Rules matching the CMS's stock capabilities
    pub fn cms_defaults() -> Self {
        let content = || {
            VisibilityRule::status("status", &["publish"], "read_private_posts").owned_by("author")
        };
        Self::new()
            .rule(EntityType::Post, content())
            .rule(EntityType::Page, content())
            .rule(
                EntityType::Comment,
                VisibilityRule::status("status", &["approve"], "moderate_comments")
                    .owned_by("user_id")
                    .private_fields(&["author_email", "author_ip"]),
            )
            .rule(
                EntityType::User,
                VisibilityRule::restricted("list_users")
                    .owned_by(crate::types::ID_FIELD)
                    .private_fields(&["email", "roles"]),
            )
            .rule(EntityType::Plugin, VisibilityRule::restricted("activate_plugins"))
            .rule(EntityType::Theme, VisibilityRule::restricted("switch_themes"))
            .rule(EntityType::Term, VisibilityRule::public())
            .rule(EntityType::Menu, VisibilityRule::public())
            .rule(EntityType::MenuItem, VisibilityRule::public())
    }
}

impl Authorizer for VisibilityPolicy {
    fn can_view(&self, viewer: &ViewerContext, model: &Model) -> bool {
        self.rules
            .get(&model.entity_type())
            .map_or(false, |rule| rule.allows(viewer, model))
    }

    fn can_view_field(&self, viewer: &ViewerContext, model: &Model, field: &str) -> bool {
        self.rules
            .get(&model.entity_type())
            .map_or(false, |rule| rule.allows_field(viewer, model, field))
    }
}
