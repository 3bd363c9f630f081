//! In-process store that evaluates statement plans directly.
//!
//! Every statement runs under a single lock acquisition, which gives the same atomicity a
//! graph database gives a single Cypher statement. Used by tests and by embedders that
//! do not need durability.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::MembershipConfig;
use crate::error::{LibError, Result};
use crate::models::{EntityKind, Properties, Record};
use crate::pagination::{BatchWindow, paginate};
use crate::permissions::AdminGuard;
use crate::statements::{
    BATCH_COLUMN, BATCH_SIZE_COLUMN, COUNT_COLUMN, ENTITY_COLUMN, GROUP_COLUMN, Relation,
    START_INDEX_COLUMN, Statement,
};
use crate::store::{GraphStore, StoreSession};

#[derive(Debug, Clone)]
struct Node {
    kind: EntityKind,
    properties: Properties,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: Vec<Node>,
    /// (user, group) pairs. A list so duplicate relationships would be observable.
    memberships: Vec<(usize, usize)>,
    /// (group, user) pairs.
    administrators: Vec<(usize, usize)>,
}

#[derive(Clone)]
pub struct MemoryGraph {
    state: Arc<RwLock<GraphState>>,
    identifiers: Arc<Vec<String>>,
    open_sessions: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

pub struct MemorySession {
    state: Arc<RwLock<GraphState>>,
    identifiers: Arc<Vec<String>>,
    open_sessions: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new(&MembershipConfig::default())
    }
}

impl MemoryGraph {
    pub fn new(config: &MembershipConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            identifiers: Arc::new(config.identifier_properties.clone()),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adds a node. `properties` must be a JSON object.
    pub async fn insert_entity(&self, kind: EntityKind, properties: Value) -> Result<()> {
        let Value::Object(properties) = properties else {
            return Err(LibError::invalid(
                "Entity properties must be an object",
                anyhow!("non-object properties for {:?}", kind),
            ));
        };
        self.state.write().await.nodes.push(Node { kind, properties });
        Ok(())
    }

    pub async fn insert_membership(&self, user: &str, group: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let user = self.require_node(&state, EntityKind::User, user)?;
        let group = self.require_node(&state, EntityKind::Group, group)?;
        state.memberships.push((user, group));
        Ok(())
    }

    pub async fn insert_administrator(&self, group: &str, user: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let group = self.require_node(&state, EntityKind::Group, group)?;
        let user = self.require_node(&state, EntityKind::User, user)?;
        state.administrators.push((group, user));
        Ok(())
    }

    /// Number of membership relationships between the two entities.
    pub async fn membership_count(&self, user: &str, group: &str) -> usize {
        let state = self.state.read().await;
        let users = matching(&state, &self.identifiers, EntityKind::User, user);
        let groups = matching(&state, &self.identifiers, EntityKind::Group, group);
        state
            .memberships
            .iter()
            .filter(|(u, g)| users.contains(u) && groups.contains(g))
            .count()
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Makes every subsequent statement fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn require_node(&self, state: &GraphState, kind: EntityKind, id: &str) -> Result<usize> {
        matching(state, &self.identifiers, kind, id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                LibError::not_found(
                    "Entity not found",
                    anyhow!("no {} node with id {}", kind.label(), id),
                )
            })
    }
}

impl GraphStore for MemoryGraph {
    type Session = MemorySession;

    async fn open_session(&self) -> Result<Self::Session> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("memory session opened");
        Ok(MemorySession {
            state: Arc::clone(&self.state),
            identifiers: Arc::clone(&self.identifiers),
            open_sessions: Arc::clone(&self.open_sessions),
            failing: Arc::clone(&self.failing),
        })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!("memory session closed");
    }
}

impl StoreSession for MemorySession {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LibError::database(
                "Database request failed",
                anyhow!("memory graph is failing {}", statement.name()),
            ));
        }

        let identifiers = self.identifiers.as_slice();
        match statement {
            Statement::FetchEntity { kind, id } => {
                let state = self.state.read().await;
                Ok(matching(&state, identifiers, *kind, id.as_str())
                    .into_iter()
                    .map(|idx| single_column(ENTITY_COLUMN, &state.nodes[idx]))
                    .collect())
            }
            Statement::ListRelated { relation, window } => {
                let state = self.state.read().await;
                let anchors = matching(
                    &state,
                    identifiers,
                    relation.anchor_kind(),
                    relation.anchor().as_str(),
                );
                if anchors.is_empty() {
                    return Ok(Vec::new());
                }

                let items = state
                    .memberships
                    .iter()
                    .filter_map(|&(user, group)| match relation {
                        Relation::MembersOf(_) if anchors.contains(&group) => Some(user),
                        Relation::GroupsOf(_) if anchors.contains(&user) => Some(group),
                        _ => None,
                    })
                    .map(|idx| state.nodes[idx].properties.clone())
                    .collect();
                Ok(vec![batch_row(items, window)])
            }
            Statement::ListUngrouped { window } => {
                let state = self.state.read().await;
                let items: Vec<Properties> = state
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(idx, node)| {
                        node.kind == EntityKind::User
                            && !state.memberships.iter().any(|(user, _)| user == idx)
                    })
                    .map(|(_, node)| node.properties.clone())
                    .collect();
                // Aggregating zero rows with grouping keys yields no row at all.
                if items.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![batch_row(items, window)])
            }
            Statement::AddMember { guard, member } => {
                let mut state = self.state.write().await;
                let groups = permitted_groups(&state, identifiers, guard);
                let users = matching(&state, identifiers, EntityKind::User, member.as_str());
                if groups.is_empty() || users.is_empty() {
                    return Ok(Vec::new());
                }

                for &group in &groups {
                    for &user in &users {
                        if !state.memberships.contains(&(user, group)) {
                            state.memberships.push((user, group));
                        }
                    }
                }
                Ok(groups
                    .iter()
                    .map(|&idx| single_column(GROUP_COLUMN, &state.nodes[idx]))
                    .collect())
            }
            Statement::RemoveMember { guard, member } => {
                let mut state = self.state.write().await;
                let groups = permitted_groups(&state, identifiers, guard);
                let users = matching(&state, identifiers, EntityKind::User, member.as_str());

                let mut touched = Vec::new();
                state.memberships.retain(|&(user, group)| {
                    let remove = users.contains(&user) && groups.contains(&group);
                    if remove && !touched.contains(&group) {
                        touched.push(group);
                    }
                    !remove
                });
                Ok(touched
                    .iter()
                    .map(|&idx| single_column(GROUP_COLUMN, &state.nodes[idx]))
                    .collect())
            }
        }
    }
}

fn matching(state: &GraphState, identifiers: &[String], kind: EntityKind, id: &str) -> Vec<usize> {
    state
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| {
            node.kind == kind
                && identifiers.iter().any(|property| {
                    node.properties.get(property).and_then(Value::as_str) == Some(id)
                })
        })
        .map(|(idx, _)| idx)
        .collect()
}

fn permitted_groups(state: &GraphState, identifiers: &[String], guard: &AdminGuard) -> Vec<usize> {
    let actors = matching(state, identifiers, EntityKind::User, guard.actor.as_str());
    matching(state, identifiers, EntityKind::Group, guard.group.as_str())
        .into_iter()
        .filter(|group| {
            actors.iter().any(|actor| {
                let administrated = state.administrators.contains(&(*group, *actor));
                guard.permits(administrated, &state.nodes[*actor].properties)
            })
        })
        .collect()
}

fn single_column(column: &str, node: &Node) -> Record {
    let mut record = Record::new();
    record.insert(column.to_string(), Value::Object(node.properties.clone()));
    record
}

fn batch_row(items: Vec<Properties>, window: &BatchWindow) -> Record {
    let page = paginate(items, window);
    let mut record = Record::new();
    record.insert(COUNT_COLUMN.to_string(), Value::from(page.count));
    record.insert(
        BATCH_COLUMN.to_string(),
        Value::Array(page.batch.into_iter().map(Value::Object).collect()),
    );
    record.insert(START_INDEX_COLUMN.to_string(), Value::from(window.start_index));
    record.insert(BATCH_SIZE_COLUMN.to_string(), Value::from(window.batch_size));
    record
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identity::ActingIdentity;
    use crate::models::EntityId;

    async fn seeded() -> MemoryGraph {
        let graph = MemoryGraph::default();
        for user in ["admin", "u1", "u2"] {
            graph
                .insert_entity(EntityKind::User, json!({"_id": user}))
                .await
                .expect("seed user");
        }
        graph
            .insert_entity(EntityKind::Group, json!({"_id": "g1"}))
            .await
            .expect("seed group");
        graph
            .insert_administrator("g1", "admin")
            .await
            .expect("seed admin");
        graph
    }

    fn add(actor: &str, member: &str) -> Statement {
        Statement::AddMember {
            guard: AdminGuard::for_group(&ActingIdentity::new(actor), EntityId::from("g1"))
                .expect("guard"),
            member: EntityId::from(member),
        }
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let graph = seeded().await;
        let mut session = graph.open_session().await.expect("session");

        let first = session.run(&add("admin", "u1")).await.expect("first add");
        let second = session.run(&add("admin", "u1")).await.expect("second add");
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        drop(session);

        assert_eq!(graph.membership_count("u1", "g1").await, 1);
    }

    #[tokio::test]
    async fn guard_failure_matches_nothing_and_writes_nothing() {
        let graph = seeded().await;
        let mut session = graph.open_session().await.expect("session");

        let rows = session.run(&add("u2", "u1")).await.expect("statement runs");
        assert!(rows.is_empty());
        drop(session);

        assert_eq!(graph.membership_count("u1", "g1").await, 0);
    }

    #[tokio::test]
    async fn sessions_are_released_on_drop() {
        let graph = seeded().await;
        {
            let _a = graph.open_session().await.expect("session");
            let _b = graph.open_session().await.expect("session");
            assert_eq!(graph.open_sessions(), 2);
        }
        assert_eq!(graph.open_sessions(), 0);
    }

    #[tokio::test]
    async fn ungrouped_without_candidates_yields_no_row() {
        let graph = seeded().await;
        graph.insert_membership("admin", "g1").await.expect("seed");
        graph.insert_membership("u1", "g1").await.expect("seed");
        graph.insert_membership("u2", "g1").await.expect("seed");

        let mut session = graph.open_session().await.expect("session");
        let rows = session
            .run(&Statement::ListUngrouped {
                window: BatchWindow::new(0, 10).expect("window"),
            })
            .await
            .expect("statement runs");
        assert!(rows.is_empty());
    }

    #[test]
    fn batch_row_carries_every_aggregate_column() {
        let items = (0..3)
            .map(|idx| json!({"_id": format!("u{idx}")}))
            .filter_map(|value| value.as_object().cloned())
            .collect();
        let row = batch_row(items, &BatchWindow::new(1, 1).expect("window"));

        assert_eq!(row.len(), 4);
        assert_eq!(row.get(COUNT_COLUMN), Some(&json!(3)));
        assert_eq!(row.get(BATCH_COLUMN), Some(&json!([{"_id": "u1"}])));
        assert_eq!(row.get(START_INDEX_COLUMN), Some(&json!(1)));
        assert_eq!(row.get(BATCH_SIZE_COLUMN), Some(&json!(1)));
    }

    #[tokio::test]
    async fn seeding_requires_existing_nodes() {
        let graph = seeded().await;
        graph
            .insert_membership("ghost", "g1")
            .await
            .expect_err("unknown user");
        graph
            .insert_entity(EntityKind::User, json!(["not", "an", "object"]))
            .await
            .expect_err("properties must be an object");
    }
}
