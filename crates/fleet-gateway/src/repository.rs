//! Storage collaborator for synced agent state.
//!
//! Durable persistence is outside this crate; the sync gateway only needs
//! a keyed upsert inside a transaction, expressed by these traits. The
//! in-memory implementation backs the hub binary and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use thiserror::Error;

use crate::agent::AgentStatus;

/// Stored state for one agent, keyed by `(node_id, agent_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub node_id: String,
    pub agent_id: String,
    /// Locally-known agent type; daemon pushes do not carry it.
    pub kind: String,
    /// Locally-known agent version; daemon pushes do not carry it.
    pub version: String,
    pub status: AgentStatus,
    pub pid: i32,
    pub last_heartbeat: Option<SystemTime>,
    pub last_sync: SystemTime,
}

/// Errors produced by a repository implementation.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Capability the sync gateway consumes: open one transaction per batch.
#[async_trait]
pub trait AgentStateRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AgentStateTransaction>, RepositoryError>;
}

/// One storage transaction covering a whole sync batch.
#[async_trait]
pub trait AgentStateTransaction: Send {
    async fn find(
        &mut self,
        node_id: &str,
        agent_id: &str,
    ) -> Result<Option<AgentRecord>, RepositoryError>;

    async fn insert(&mut self, record: AgentRecord) -> Result<(), RepositoryError>;

    async fn update(&mut self, record: AgentRecord) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// In-memory repository. Transactions stage their writes and apply them
/// atomically on commit; an uncommitted transaction leaves no trace.
#[derive(Default)]
pub struct MemoryAgentStateRepository {
    store: Arc<Mutex<HashMap<(String, String), AgentRecord>>>,
}

impl MemoryAgentStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed record for one agent, if any.
    pub fn get(&self, node_id: &str, agent_id: &str) -> Option<AgentRecord> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(node_id.to_string(), agent_id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AgentStateRepository for MemoryAgentStateRepository {
    async fn begin(&self) -> Result<Box<dyn AgentStateTransaction>, RepositoryError> {
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            staged: HashMap::new(),
        }))
    }
}

struct MemoryTransaction {
    store: Arc<Mutex<HashMap<(String, String), AgentRecord>>>,
    staged: HashMap<(String, String), AgentRecord>,
}

impl MemoryTransaction {
    fn key(node_id: &str, agent_id: &str) -> (String, String) {
        (node_id.to_string(), agent_id.to_string())
    }
}

#[async_trait]
impl AgentStateTransaction for MemoryTransaction {
    async fn find(
        &mut self,
        node_id: &str,
        agent_id: &str,
    ) -> Result<Option<AgentRecord>, RepositoryError> {
        let key = Self::key(node_id, agent_id);
        if let Some(staged) = self.staged.get(&key) {
            return Ok(Some(staged.clone()));
        }
        let store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(store.get(&key).cloned())
    }

    async fn insert(&mut self, record: AgentRecord) -> Result<(), RepositoryError> {
        let key = Self::key(&record.node_id, &record.agent_id);
        if self.staged.contains_key(&key)
            || self
                .store
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains_key(&key)
        {
            return Err(RepositoryError::Conflict(format!(
                "agent {} already recorded for node {}",
                record.agent_id, record.node_id
            )));
        }
        self.staged.insert(key, record);
        Ok(())
    }

    async fn update(&mut self, record: AgentRecord) -> Result<(), RepositoryError> {
        let key = Self::key(&record.node_id, &record.agent_id);
        self.staged.insert(key, record);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let mut store = self
            .store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (key, record) in self.staged {
            store.insert(key, record);
        }
        Ok(())
    }
}
