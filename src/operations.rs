use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MembershipConfig;
use crate::error::{LibError, Result};
use crate::identity::{self, ActingIdentity};
use crate::models::{BatchQuery, EntityId, EntityKind, Envelope, Properties, Record};
use crate::pagination::BatchWindow;
use crate::permissions::AdminGuard;
use crate::response;
use crate::statements::{ENTITY_COLUMN, GROUP_COLUMN, Relation, Statement};
use crate::store::{GraphStore, StoreSession};

/// High-level membership actions for callers that are not HTTP handlers.
///
/// The acting identity is passed separately to [`MembershipOperations::execute`] and must come
/// from validated authentication state, never from the operation payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MembershipOperation {
    GetEntity {
        entity_id: String,
    },
    ListGroupMembers {
        group_id: String,
        #[serde(default)]
        query: BatchQuery,
    },
    ListEntityGroups {
        entity_id: String,
        #[serde(default)]
        query: BatchQuery,
    },
    ListUngrouped {
        #[serde(default)]
        query: BatchQuery,
    },
    AddMember {
        group_id: String,
        entity_id: String,
    },
    RemoveMember {
        group_id: String,
        entity_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MembershipOperationResult {
    Entity { entity: Properties },
    Group { group: Properties },
    Batch { envelope: Envelope<Properties> },
}

pub struct MembershipOperations<G> {
    store: Arc<G>,
    config: Arc<MembershipConfig>,
}

impl<G> Clone for MembershipOperations<G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<G: GraphStore> MembershipOperations<G> {
    pub fn new(store: Arc<G>, config: Arc<MembershipConfig>) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> Arc<G> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        actor: &ActingIdentity,
        operation: MembershipOperation,
    ) -> Result<MembershipOperationResult> {
        match operation {
            MembershipOperation::GetEntity { entity_id } => {
                let entity = self.get_entity(actor, Some(entity_id.as_str())).await?;
                Ok(MembershipOperationResult::Entity { entity })
            }
            MembershipOperation::ListGroupMembers { group_id, query } => {
                let envelope = self.list_group_members(Some(group_id.as_str()), &query).await?;
                Ok(MembershipOperationResult::Batch { envelope })
            }
            MembershipOperation::ListEntityGroups { entity_id, query } => {
                let envelope = self
                    .list_entity_groups(actor, Some(entity_id.as_str()), &query)
                    .await?;
                Ok(MembershipOperationResult::Batch { envelope })
            }
            MembershipOperation::ListUngrouped { query } => {
                let envelope = self.list_ungrouped(&query).await?;
                Ok(MembershipOperationResult::Batch { envelope })
            }
            MembershipOperation::AddMember {
                group_id,
                entity_id,
            } => {
                let group = self
                    .add_member(actor, Some(group_id.as_str()), Some(entity_id.as_str()))
                    .await?;
                Ok(MembershipOperationResult::Group { group })
            }
            MembershipOperation::RemoveMember {
                group_id,
                entity_id,
            } => {
                let group = self
                    .remove_member(actor, Some(group_id.as_str()), Some(entity_id.as_str()))
                    .await?;
                Ok(MembershipOperationResult::Group { group })
            }
        }
    }

    pub async fn get_entity(
        &self,
        actor: &ActingIdentity,
        raw_id: Option<&str>,
    ) -> Result<Properties> {
        let user_id = identity::resolve(raw_id, actor, "User ID not defined")?;
        let records = self
            .run(Statement::FetchEntity {
                kind: EntityKind::User,
                id: user_id.clone(),
            })
            .await?;

        match response::single_entity(records, ENTITY_COLUMN)? {
            Some(entity) => {
                info!(user_id = %user_id, "user queried");
                Ok(entity)
            }
            None => {
                warn!(user_id = %user_id, "user not found");
                Err(LibError::not_found(
                    "User not found",
                    anyhow!("user {} not found", user_id),
                ))
            }
        }
    }

    pub async fn list_group_members(
        &self,
        raw_group_id: Option<&str>,
        query: &BatchQuery,
    ) -> Result<Envelope<Properties>> {
        let group_id = identity::resolve(
            raw_group_id,
            &ActingIdentity::anonymous(),
            "Group ID not defined",
        )?;
        let window = self.window(query)?;
        let records = self
            .run(Statement::ListRelated {
                relation: Relation::MembersOf(group_id.clone()),
                window,
            })
            .await?;

        let envelope = anchored_batch(records, "Group not found", &group_id)?;
        info!(group_id = %group_id, count = envelope.count, "members of group queried");
        Ok(envelope)
    }

    pub async fn list_entity_groups(
        &self,
        actor: &ActingIdentity,
        raw_id: Option<&str>,
        query: &BatchQuery,
    ) -> Result<Envelope<Properties>> {
        let user_id = identity::resolve(raw_id, actor, "User ID not defined")?;
        let window = self.window(query)?;
        let records = self
            .run(Statement::ListRelated {
                relation: Relation::GroupsOf(user_id.clone()),
                window,
            })
            .await?;

        let envelope = anchored_batch(records, "User not found", &user_id)?;
        info!(user_id = %user_id, count = envelope.count, "groups of user queried");
        Ok(envelope)
    }

    pub async fn list_ungrouped(&self, query: &BatchQuery) -> Result<Envelope<Properties>> {
        let window = self.window(query)?;
        let records = self.run(Statement::ListUngrouped { window }).await?;

        let envelope = response::format_batched_response(records)?;
        info!(count = envelope.count, "users with no group queried");
        Ok(envelope)
    }

    pub async fn add_member(
        &self,
        actor: &ActingIdentity,
        raw_group_id: Option<&str>,
        raw_user_id: Option<&str>,
    ) -> Result<Properties> {
        let (guard, user_id) = membership_target(actor, raw_group_id, raw_user_id)?;
        let group_id = guard.group.clone();
        let current_user_id = guard.actor.clone();
        let records = self
            .run(Statement::AddMember {
                guard,
                member: user_id.clone(),
            })
            .await?;

        let group = mutated_group(records, &group_id, &user_id)?;
        info!(
            current_user_id = %current_user_id,
            user_id = %user_id,
            group_id = %group_id,
            "user added to group"
        );
        Ok(group)
    }

    pub async fn remove_member(
        &self,
        actor: &ActingIdentity,
        raw_group_id: Option<&str>,
        raw_user_id: Option<&str>,
    ) -> Result<Properties> {
        let (guard, user_id) = membership_target(actor, raw_group_id, raw_user_id)?;
        let group_id = guard.group.clone();
        let current_user_id = guard.actor.clone();
        let records = self
            .run(Statement::RemoveMember {
                guard,
                member: user_id.clone(),
            })
            .await?;

        let group = mutated_group(records, &group_id, &user_id)?;
        info!(
            current_user_id = %current_user_id,
            user_id = %user_id,
            group_id = %group_id,
            "user removed from group"
        );
        Ok(group)
    }

    fn window(&self, query: &BatchQuery) -> Result<BatchWindow> {
        BatchWindow::from_query(query, self.config.default_batch_size)
    }

    /// Runs one statement in its own session. The session is dropped on every path out.
    async fn run(&self, statement: Statement) -> Result<Vec<Record>> {
        let mut session = self.store.open_session().await?;
        session.run(&statement).await
    }
}

fn membership_target(
    actor: &ActingIdentity,
    raw_group_id: Option<&str>,
    raw_user_id: Option<&str>,
) -> Result<(AdminGuard, EntityId)> {
    let group_id = identity::resolve(
        raw_group_id,
        &ActingIdentity::anonymous(),
        "Group ID not defined",
    )?;
    let user_id = identity::resolve(raw_user_id, actor, "User ID not defined")?;
    let guard = AdminGuard::for_group(actor, group_id)?;
    Ok((guard, user_id))
}

fn anchored_batch(
    records: Vec<Record>,
    public: &'static str,
    anchor: &EntityId,
) -> Result<Envelope<Properties>> {
    if records.is_empty() {
        warn!(anchor = %anchor, "anchor not found");
        return Err(LibError::not_found(
            public,
            anyhow!("anchor {} not found", anchor),
        ));
    }
    response::format_batched_response(records)
}

fn mutated_group(
    records: Vec<Record>,
    group_id: &EntityId,
    user_id: &EntityId,
) -> Result<Properties> {
    response::single_entity(records, GROUP_COLUMN)?.ok_or_else(|| {
        warn!(group_id = %group_id, user_id = %user_id, "membership change matched nothing");
        LibError::not_found(
            "Group, user or membership not found",
            anyhow!(
                "membership change of user {} in group {} matched nothing",
                user_id,
                group_id
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryGraph;

    async fn seeded() -> (MemoryGraph, MembershipOperations<MemoryGraph>) {
        let graph = MemoryGraph::default();
        for (id, extra) in [
            ("admin", json!({})),
            ("root", json!({"isAdmin": true})),
            ("u1", json!({"password_hashed": "$2b$10$abc"})),
            ("u2", json!({})),
            ("u3", json!({})),
            ("loner", json!({})),
        ] {
            let mut properties = json!({"_id": id});
            if let (Some(target), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
                target.extend(extra.clone());
            }
            graph
                .insert_entity(EntityKind::User, properties)
                .await
                .expect("seed user");
        }
        for group in ["g1", "empty"] {
            graph
                .insert_entity(EntityKind::Group, json!({"_id": group, "name": group}))
                .await
                .expect("seed group");
        }
        graph.insert_administrator("g1", "admin").await.expect("seed admin");
        for user in ["admin", "root", "u1", "u2", "u3"] {
            graph.insert_membership(user, "g1").await.expect("seed membership");
        }

        let ops = MembershipOperations::new(
            Arc::new(graph.clone()),
            Arc::new(MembershipConfig::default()),
        );
        (graph, ops)
    }

    fn query(start_index: i64, batch_size: i64) -> BatchQuery {
        BatchQuery {
            batch_size: Some(batch_size),
            start_index: Some(start_index),
        }
    }

    #[tokio::test]
    async fn get_entity_resolves_self_and_redacts() {
        let (graph, ops) = seeded().await;
        let actor = ActingIdentity::new("u1");

        let via_self = ops.get_entity(&actor, Some("self")).await.expect("self found");
        let direct = ops.get_entity(&actor, Some("u1")).await.expect("u1 found");
        assert_eq!(via_self, direct);
        assert!(!via_self.contains_key("password_hashed"));
        assert_eq!(graph.open_sessions(), 0);
    }

    #[tokio::test]
    async fn get_entity_missing_is_not_found() {
        let (_, ops) = seeded().await;
        let err = ops
            .get_entity(&ActingIdentity::new("u1"), Some("ghost"))
            .await
            .expect_err("ghost is missing");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_members_paginates_with_full_count() {
        let (_, ops) = seeded().await;
        let envelope = ops
            .list_group_members(Some("g1"), &query(0, 2))
            .await
            .expect("members listed");
        assert_eq!(envelope.count, 5);
        assert_eq!(envelope.items.len(), 2);
        assert_eq!(envelope.batch_size, 2);
        assert_eq!(envelope.start_index, 0);
        assert!(envelope.items.iter().all(|item| !item.contains_key("password_hashed")));

        let past_end = ops
            .list_group_members(Some("g1"), &query(9, 2))
            .await
            .expect("out of range page");
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.count, 5);
    }

    #[tokio::test]
    async fn list_members_of_empty_group_is_valid() {
        let (_, ops) = seeded().await;
        let envelope = ops
            .list_group_members(Some("empty"), &BatchQuery::default())
            .await
            .expect("empty group listed");
        assert_eq!(envelope.count, 0);
        assert_eq!(envelope.batch_size, 50);
    }

    #[tokio::test]
    async fn list_members_of_missing_group_is_not_found() {
        let (_, ops) = seeded().await;
        let err = ops
            .list_group_members(Some("nope"), &BatchQuery::default())
            .await
            .expect_err("missing group");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_groups_of_self() {
        let (_, ops) = seeded().await;
        let envelope = ops
            .list_entity_groups(&ActingIdentity::new("u2"), Some("self"), &query(0, -1))
            .await
            .expect("groups listed");
        assert_eq!(envelope.count, 1);
        assert_eq!(envelope.items[0].get("_id"), Some(&json!("g1")));

        let none = ops
            .list_entity_groups(&ActingIdentity::new("loner"), Some("self"), &query(0, -1))
            .await
            .expect("user without groups is still found");
        assert_eq!(none.count, 0);
    }

    #[tokio::test]
    async fn list_ungrouped_returns_only_users_without_membership() {
        let (_, ops) = seeded().await;
        let envelope = ops
            .list_ungrouped(&BatchQuery::default())
            .await
            .expect("ungrouped listed");
        assert_eq!(envelope.count, 1);
        assert_eq!(envelope.items[0].get("_id"), Some(&json!("loner")));
    }

    #[tokio::test]
    async fn add_member_twice_keeps_one_membership() {
        let (graph, ops) = seeded().await;
        let admin = ActingIdentity::new("admin");

        let first = ops
            .add_member(&admin, Some("g1"), Some("loner"))
            .await
            .expect("first add");
        let second = ops
            .add_member(&admin, Some("g1"), Some("loner"))
            .await
            .expect("second add");
        assert_eq!(first, second);
        assert_eq!(first.get("_id"), Some(&json!("g1")));
        assert_eq!(graph.membership_count("loner", "g1").await, 1);
    }

    #[tokio::test]
    async fn add_member_requires_group_or_global_admin() {
        let (graph, ops) = seeded().await;

        let err = ops
            .add_member(&ActingIdentity::new("u2"), Some("g1"), Some("loner"))
            .await
            .expect_err("plain member cannot add");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(graph.membership_count("loner", "g1").await, 0);

        ops.add_member(&ActingIdentity::new("root"), Some("g1"), Some("loner"))
            .await
            .expect("store flagged admin can add");
        ops.add_member(&ActingIdentity::admin("u2"), Some("empty"), Some("loner"))
            .await
            .expect("identity flagged admin can add");
        assert_eq!(graph.membership_count("loner", "empty").await, 1);
    }

    #[tokio::test]
    async fn remove_member_then_remove_again_is_not_found() {
        let (graph, ops) = seeded().await;
        let admin = ActingIdentity::new("admin");

        let group = ops
            .remove_member(&admin, Some("g1"), Some("u3"))
            .await
            .expect("remove existing membership");
        assert_eq!(group.get("_id"), Some(&json!("g1")));
        assert_eq!(graph.membership_count("u3", "g1").await, 0);

        let err = ops
            .remove_member(&admin, Some("g1"), Some("u3"))
            .await
            .expect_err("membership already gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_member_by_non_admin_is_not_found() {
        let (graph, ops) = seeded().await;
        let err = ops
            .remove_member(&ActingIdentity::new("u2"), Some("g1"), Some("u3"))
            .await
            .expect_err("plain member cannot remove");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(graph.membership_count("u3", "g1").await, 1);
    }

    #[tokio::test]
    async fn mutations_reject_missing_identifiers() {
        let (_, ops) = seeded().await;
        let admin = ActingIdentity::new("admin");

        let err = ops
            .add_member(&admin, None, Some("u1"))
            .await
            .expect_err("group id required");
        assert_eq!(err.public, "Group ID not defined");

        let err = ops
            .add_member(&admin, Some("g1"), Some(""))
            .await
            .expect_err("user id required");
        assert_eq!(err.public, "User ID not defined");

        let err = ops
            .remove_member(&ActingIdentity::anonymous(), Some("g1"), Some("u1"))
            .await
            .expect_err("acting identity required");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn store_failures_are_database_errors_and_release_sessions() {
        let (graph, ops) = seeded().await;
        graph.set_failing(true);

        let err = ops
            .list_group_members(Some("g1"), &BatchQuery::default())
            .await
            .expect_err("store is failing");
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(graph.open_sessions(), 0);
    }

    #[tokio::test]
    async fn execute_dispatches_tagged_operations() {
        let (_, ops) = seeded().await;
        let operation: MembershipOperation = serde_json::from_value(json!({
            "operation": "list_group_members",
            "group_id": "g1",
            "query": {"batch_size": 1}
        }))
        .expect("operation parses");

        let result = ops
            .execute(&ActingIdentity::new("u1"), operation)
            .await
            .expect("operation runs");
        match result {
            MembershipOperationResult::Batch { envelope } => {
                assert_eq!(envelope.count, 5);
                assert_eq!(envelope.items.len(), 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }
}
