//! Statement plans for every membership use case.
//!
//! A plan names the anchor, the authorization guard and the batch window of one use case.
//! Each plan renders to a single Cypher statement, so everything it checks and everything it
//! changes happens in one store round-trip.

use crate::models::{EntityId, EntityKind};
use crate::pagination::{BatchWindow, SliceBounds};
use crate::permissions::AdminGuard;

/// Relationship from a user to each group it belongs to.
pub const BELONGS_TO: &str = "BELONGS_TO";

pub const ENTITY_COLUMN: &str = "entity";
pub const GROUP_COLUMN: &str = "group";
pub const COUNT_COLUMN: &str = "count";
pub const BATCH_COLUMN: &str = "batch";
pub const START_INDEX_COLUMN: &str = "start_index";
pub const BATCH_SIZE_COLUMN: &str = "batch_size";

const BATCH_COLUMNS: &[&str] = &[
    COUNT_COLUMN,
    BATCH_COLUMN,
    START_INDEX_COLUMN,
    BATCH_SIZE_COLUMN,
];

/// Which side of the membership relation is listed for an anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Users belonging to the anchor group.
    MembersOf(EntityId),
    /// Groups the anchor user belongs to.
    GroupsOf(EntityId),
}

impl Relation {
    pub fn anchor(&self) -> &EntityId {
        match self {
            Relation::MembersOf(id) | Relation::GroupsOf(id) => id,
        }
    }

    pub const fn anchor_kind(&self) -> EntityKind {
        match self {
            Relation::MembersOf(_) => EntityKind::Group,
            Relation::GroupsOf(_) => EntityKind::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    FetchEntity {
        kind: EntityKind,
        id: EntityId,
    },
    ListRelated {
        relation: Relation,
        window: BatchWindow,
    },
    ListUngrouped {
        window: BatchWindow,
    },
    AddMember {
        guard: AdminGuard,
        member: EntityId,
    },
    RemoveMember {
        guard: AdminGuard,
        member: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
}

/// Rendered statement text plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherStatement {
    pub text: String,
    pub params: Vec<(&'static str, ParamValue)>,
}

impl CypherStatement {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

impl Statement {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Statement::FetchEntity { .. } => &[ENTITY_COLUMN],
            Statement::ListRelated { .. } | Statement::ListUngrouped { .. } => BATCH_COLUMNS,
            Statement::AddMember { .. } | Statement::RemoveMember { .. } => &[GROUP_COLUMN],
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Statement::FetchEntity { .. } => "fetch_entity",
            Statement::ListRelated { .. } => "list_related",
            Statement::ListUngrouped { .. } => "list_ungrouped",
            Statement::AddMember { .. } => "add_member",
            Statement::RemoveMember { .. } => "remove_member",
        }
    }

    pub fn to_cypher(&self, identifiers: &[String]) -> CypherStatement {
        match self {
            Statement::FetchEntity { kind, id } => CypherStatement {
                text: format!(
                    "MATCH (entity:{label})\n\
                     WHERE {filter}\n\
                     RETURN properties(entity) AS {ENTITY_COLUMN}",
                    label = kind.label(),
                    filter = id_filter("entity", "entity_id", identifiers),
                ),
                params: vec![("entity_id", ParamValue::Text(id.0.clone()))],
            },
            Statement::ListRelated { relation, window } => {
                let pattern = match relation {
                    Relation::MembersOf(_) => {
                        format!("(related:User)-[:{BELONGS_TO}]->(anchor)")
                    }
                    Relation::GroupsOf(_) => {
                        format!("(anchor)-[:{BELONGS_TO}]->(related:Group)")
                    }
                };
                let mut params = vec![(
                    "anchor_id",
                    ParamValue::Text(relation.anchor().0.clone()),
                )];
                params.extend(window_params(window));
                CypherStatement {
                    // OPTIONAL so an anchor without relations still yields its (empty) row.
                    text: format!(
                        "MATCH (anchor:{label})\n\
                         WHERE {filter}\n\
                         WITH anchor\n\
                         OPTIONAL MATCH {pattern}\n\
                         WITH related AS item\n\
                         {batch}",
                        label = relation.anchor_kind().label(),
                        filter = id_filter("anchor", "anchor_id", identifiers),
                        batch = batch_clause(window),
                    ),
                    params,
                }
            }
            Statement::ListUngrouped { window } => CypherStatement {
                text: format!(
                    "MATCH (item:User)\n\
                     WHERE NOT (item)-[:{BELONGS_TO}]->(:Group)\n\
                     {batch}",
                    batch = batch_clause(window),
                ),
                params: window_params(window),
            },
            Statement::AddMember { guard, member } => CypherStatement {
                text: format!(
                    "{guarded}\n\
                     MATCH (user:User)\n\
                     WHERE {filter}\n\
                     MERGE (user)-[:{BELONGS_TO}]->(group)\n\
                     RETURN DISTINCT properties(group) AS {GROUP_COLUMN}",
                    guarded = guarded_group_clause(guard, identifiers),
                    filter = id_filter("user", "user_id", identifiers),
                ),
                params: mutation_params(guard, member),
            },
            Statement::RemoveMember { guard, member } => CypherStatement {
                text: format!(
                    "{guarded}\n\
                     MATCH (user:User)-[membership:{BELONGS_TO}]->(group)\n\
                     WHERE {filter}\n\
                     DELETE membership\n\
                     RETURN DISTINCT properties(group) AS {GROUP_COLUMN}",
                    guarded = guarded_group_clause(guard, identifiers),
                    filter = id_filter("user", "user_id", identifiers),
                ),
                params: mutation_params(guard, member),
            },
        }
    }
}

fn id_filter(variable: &str, param: &str, identifiers: &[String]) -> String {
    let properties = identifiers
        .iter()
        .map(|property| format!("{variable}.{property}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("${param} IN [{properties}]")
}

fn guarded_group_clause(guard: &AdminGuard, identifiers: &[String]) -> String {
    format!(
        "MATCH (current_user:User)\n\
         WHERE {actor_filter}\n\
         WITH current_user\n\
         MATCH (group:Group)\n\
         WHERE {group_filter}\n\
         AND {condition}\n\
         WITH DISTINCT group",
        actor_filter = id_filter("current_user", "current_user_id", identifiers),
        group_filter = id_filter("group", "group_id", identifiers),
        condition = guard.cypher_condition(),
    )
}

fn batch_clause(window: &BatchWindow) -> String {
    let batch = match window.bounds() {
        SliceBounds::All => "items".to_string(),
        SliceBounds::Range { .. } => "items[$start_index..$end_index]".to_string(),
    };
    format!(
        "WITH\n  \
         COLLECT(PROPERTIES(item)) AS items,\n  \
         COUNT(item) AS {COUNT_COLUMN},\n  \
         $start_index AS {START_INDEX_COLUMN},\n  \
         $batch_size AS {BATCH_SIZE_COLUMN}\n\
         RETURN {COUNT_COLUMN}, {batch} AS {BATCH_COLUMN}, {START_INDEX_COLUMN}, {BATCH_SIZE_COLUMN}"
    )
}

fn window_params(window: &BatchWindow) -> Vec<(&'static str, ParamValue)> {
    let mut params = vec![
        ("start_index", ParamValue::Integer(window.start_index)),
        ("batch_size", ParamValue::Integer(window.batch_size)),
    ];
    if let SliceBounds::Range { end, .. } = window.bounds() {
        params.push(("end_index", ParamValue::Integer(end)));
    }
    params
}

fn mutation_params(guard: &AdminGuard, member: &EntityId) -> Vec<(&'static str, ParamValue)> {
    vec![
        ("current_user_id", ParamValue::Text(guard.actor.0.clone())),
        ("actor_is_admin", ParamValue::Boolean(guard.actor_is_admin)),
        ("group_id", ParamValue::Text(guard.group.0.clone())),
        ("user_id", ParamValue::Text(member.0.clone())),
    ]
}
