//! Tag models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Scope used when a tag does not name one.
pub const GLOBAL_SCOPE: &str = "global";

/// A `(type, name, scope)` label attached to durable jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub name: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    GLOBAL_SCOPE.to_string()
}

impl Tag {
    pub fn new(tag_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            tag_type: tag_type.into(),
            name: name.into(),
            scope: default_scope(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// Tag database model.
#[derive(Debug, Clone, FromRow)]
pub struct TagDbModel {
    pub id: i64,
    pub tag_type: String,
    pub tag_name: String,
    pub tag_scope: String,
}

impl From<TagDbModel> for Tag {
    fn from(m: TagDbModel) -> Self {
        Self {
            id: Some(m.id),
            tag_type: m.tag_type,
            name: m.tag_name,
            scope: m.tag_scope,
        }
    }
}
