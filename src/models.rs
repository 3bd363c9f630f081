use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property bag of a user or group node.
pub type Properties = Map<String, Value>;

/// One row returned by a store, keyed by column name.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Group,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Group => "Group",
        }
    }
}

/// Opaque identifier of a user or group, compared against the configured identifier properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Body of `POST /group/{group_id}/members`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddMemberPayload {
    #[serde(default, alias = "entity_id")]
    pub user_id: Option<String>,
}

/// Query string of the paginated reads. Both fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchQuery {
    pub batch_size: Option<i64>,
    pub start_index: Option<i64>,
}

/// Uniform response of the paginated reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub count: i64,
    pub batch_size: i64,
    pub start_index: i64,
    pub items: Vec<T>,
}
