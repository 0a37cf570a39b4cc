use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of one trackable instance, allocated by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who an update cycle belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityInfo {
    pub id: EntityId,
    pub display_name: String,
    pub parent_id: Option<EntityId>,
}

impl EntityInfo {
    pub fn new(id: u64, display_name: &str) -> Self {
        Self {
            id: EntityId(id),
            display_name: display_name.to_string(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent_id = Some(EntityId(parent));
        self
    }
}
