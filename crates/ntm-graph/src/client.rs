//! Neo4j connection management.

use neo4rs::{ConfigBuilder, Graph, Query, Row};

use ntm_core::StoreError;

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "ntm-dev".to_string(),
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

/// Pooled Neo4j client implementing the ntm store contract.
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, StoreError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Execute a write-only query (CREATE, MERGE, DELETE, SET).
    pub async fn run(&self, query: Query) -> Result<(), StoreError> {
        self.graph
            .run(query)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<Row>, StoreError> {
        let mut stream = self
            .graph
            .execute(query)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        stream
            .next()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}
