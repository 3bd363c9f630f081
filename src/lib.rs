#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod models;
#[cfg(feature = "neo4j")]
pub mod neo4j;
pub mod operations;
pub mod pagination;
pub mod permissions;
pub mod response;
pub mod statements;
pub mod store;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, HasStore, MembershipApp, routes};
    pub use crate::config::{DEFAULT_BATCH_SIZE, MembershipConfig};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::identity::{ActingIdentity, SELF_SENTINEL, resolve};
    pub use crate::memory::MemoryGraph;
    pub use crate::models::{
        AddMemberPayload, BatchQuery, EntityId, EntityKind, Envelope, Properties, Record,
    };
    #[cfg(feature = "neo4j")]
    pub use crate::neo4j::{Neo4jStore, create_membership_indexes};
    pub use crate::operations::{
        MembershipOperation, MembershipOperationResult, MembershipOperations,
    };
    pub use crate::pagination::{BatchWindow, Page, SliceBounds, paginate};
    pub use crate::permissions::AdminGuard;
    pub use crate::response::{SENSITIVE_FIELDS, format_batched_response, redact};
    pub use crate::statements::{Relation, Statement};
    pub use crate::store::{GraphStore, StoreSession};
}
