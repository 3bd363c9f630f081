use std::sync::Arc;

use anyhow::anyhow;
use neo4rs::{Graph, Query};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::MembershipConfig;
use crate::error::{LibError, Result};
use crate::models::{EntityKind, Record};
use crate::statements::{CypherStatement, ParamValue, Statement};
use crate::store::{GraphStore, StoreSession};

/// Store backed by a Neo4j connection pool.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
    identifiers: Arc<Vec<String>>,
}

/// Handle used for the statements of one request.
///
/// Each statement runs as its own auto-commit transaction on a pooled connection, which is
/// returned to the pool when the row stream is dropped.
pub struct Neo4jSession {
    graph: Graph,
    identifiers: Arc<Vec<String>>,
}

impl Neo4jStore {
    pub fn connect(
        uri: &str,
        user: &str,
        password: &str,
        config: &MembershipConfig,
    ) -> Result<Self> {
        info!("Connecting to Neo4j at {}", uri);
        let graph = Graph::new(uri, user, password)
            .map_err(|err| LibError::database("Failed to connect to Neo4j", anyhow!(err)))?;
        Ok(Self::from_graph(graph, config))
    }

    pub fn from_graph(graph: Graph, config: &MembershipConfig) -> Self {
        Self {
            graph,
            identifiers: Arc::new(config.identifier_properties.clone()),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl GraphStore for Neo4jStore {
    type Session = Neo4jSession;

    async fn open_session(&self) -> Result<Self::Session> {
        Ok(Neo4jSession {
            graph: self.graph.clone(),
            identifiers: Arc::clone(&self.identifiers),
        })
    }
}

impl StoreSession for Neo4jSession {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Record>> {
        let cypher = statement.to_cypher(&self.identifiers);
        debug!(statement = statement.name(), "running cypher statement");

        let mut stream = self.graph.execute(to_query(&cypher)).await?;
        let mut records = Vec::new();
        while let Some(row) = stream.next().await? {
            let mut record = Record::new();
            for column in statement.columns() {
                let value = row.get::<Value>(column).map_err(|err| {
                    LibError::unknown(
                        "Unexpected response from the database",
                        anyhow!("column '{}' could not be read: {}", column, err),
                    )
                })?;
                record.insert(column.to_string(), value);
            }
            records.push(record);
        }

        Ok(records)
    }
}

pub fn to_query(statement: &CypherStatement) -> Query {
    statement
        .params
        .iter()
        .fold(Query::new(statement.text.clone()), |query, (name, value)| {
            match value {
                ParamValue::Text(value) => query.param(name, value.clone()),
                ParamValue::Integer(value) => query.param(name, *value),
                ParamValue::Boolean(value) => query.param(name, *value),
            }
        })
}

/// Index statements for every identifier property on both labels.
pub fn index_statements(config: &MembershipConfig) -> Vec<String> {
    [EntityKind::User, EntityKind::Group]
        .into_iter()
        .flat_map(|kind| {
            config.identifier_properties.iter().map(move |property| {
                format!(
                    "CREATE INDEX {prefix}_{property}_index IF NOT EXISTS \
                     FOR (n:{label}) ON (n.{property})",
                    prefix = kind.label().to_ascii_lowercase(),
                    label = kind.label(),
                )
            })
        })
        .collect()
}

/// Creates the lookup indexes the membership statements rely on. Safe to run repeatedly.
pub async fn create_membership_indexes(graph: &Graph, config: &MembershipConfig) -> Result<()> {
    for statement in index_statements(config) {
        graph
            .run(Query::new(statement.clone()))
            .await
            .map_err(|err| {
                LibError::database(
                    "Failed to create membership indexes",
                    anyhow!("{}: {}", statement, err),
                )
            })?;
    }
    info!("Membership indexes ready");
    Ok(())
}
