//! Test doubles for the transport and storage seams.
//!
//! These fakes let the reconnect logic, the error translation and the
//! sync gateway be exercised without a network or a database. They are
//! compiled into the library so integration tests and downstream crates
//! can reuse them.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tonic::Status;

use crate::repository::{
    AgentRecord, AgentStateRepository, AgentStateTransaction, RepositoryError,
};
use crate::transport::{BoxError, DaemonConnector, DaemonTransport};
use fleet_proto as pb;

/// Scriptable in-memory daemon transport with a call counter.
#[derive(Default)]
pub struct FakeTransport {
    calls: AtomicUsize,
    reply_delay: Option<Duration>,
    failures: Mutex<VecDeque<Status>>,
    agents: Mutex<Vec<pb::AgentInfo>>,
    data_points: Mutex<Vec<pb::ResourceDataPoint>>,
    operation_rejection: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, e.g. to simulate a daemon slower than the call
    /// timeout. Pairs with `#[tokio::test(start_paused = true)]`.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = Some(delay);
        self
    }

    /// Number of RPCs issued against this transport.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue a failure status; each queued status fails exactly one call,
    /// in order.
    pub fn fail_next_with(&self, status: Status) {
        self.failures.lock().unwrap().push_back(status);
    }

    /// Make every operate call report a business failure with `message`.
    pub fn reject_operations(&self, message: &str) {
        *self.operation_rejection.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_agents(&self, agents: Vec<pb::AgentInfo>) {
        *self.agents.lock().unwrap() = agents;
    }

    pub fn set_data_points(&self, points: Vec<pb::ResourceDataPoint>) {
        *self.data_points.lock().unwrap() = points;
    }

    async fn begin_call(&self) -> Option<Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl DaemonTransport for FakeTransport {
    async fn list_agents(&self) -> Result<Vec<pb::AgentInfo>, Status> {
        if let Some(status) = self.begin_call().await {
            return Err(status);
        }
        Ok(self.agents.lock().unwrap().clone())
    }

    async fn operate_agent(
        &self,
        _request: pb::AgentOperationRequest,
    ) -> Result<pb::AgentOperationResponse, Status> {
        if let Some(status) = self.begin_call().await {
            return Err(status);
        }
        if let Some(message) = self.operation_rejection.lock().unwrap().clone() {
            return Ok(pb::AgentOperationResponse {
                success: false,
                error_message: message,
            });
        }
        Ok(pb::AgentOperationResponse {
            success: true,
            error_message: String::new(),
        })
    }

    async fn get_agent_metrics(
        &self,
        request: pb::AgentMetricsRequest,
    ) -> Result<pb::AgentMetricsResponse, Status> {
        if let Some(status) = self.begin_call().await {
            return Err(status);
        }
        Ok(pb::AgentMetricsResponse {
            agent_id: request.agent_id,
            data_points: self.data_points.lock().unwrap().clone(),
        })
    }
}

/// Connector handing out a shared [`FakeTransport`], with a dial counter
/// and an optional run of initial dial failures.
pub struct FakeConnector {
    transport: Arc<FakeTransport>,
    dials: AtomicUsize,
    dial_failures_remaining: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(FakeTransport::new()))
    }

    pub fn with_transport(transport: Arc<FakeTransport>) -> Self {
        Self {
            transport,
            dials: AtomicUsize::new(0),
            dial_failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` dials before succeeding.
    pub fn fail_dials(self, n: usize) -> Self {
        self.dial_failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of connect attempts made through this connector.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> Arc<FakeTransport> {
        self.transport.clone()
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaemonConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn DaemonTransport>, BoxError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .dial_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(format!("dial {} refused", address).into());
        }

        Ok(self.transport.clone() as Arc<dyn DaemonTransport>)
    }
}

#[derive(Default)]
struct SpyState {
    store: HashMap<(String, String), AgentRecord>,
    poisoned: HashSet<String>,
    begins: usize,
    finds: usize,
    inserts: usize,
    updates: usize,
    commits: usize,
}

/// Repository spy: a working in-memory store that counts every operation
/// and can poison specific agent ids to simulate per-record storage
/// failures.
#[derive(Default)]
pub struct SpyRepository {
    state: Arc<Mutex<SpyState>>,
}

impl SpyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any write touching `agent_id` fail with a storage error.
    pub fn poison(&self, agent_id: &str) {
        self.state
            .lock()
            .unwrap()
            .poisoned
            .insert(agent_id.to_string());
    }

    pub fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }

    pub fn writes(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.inserts + state.updates
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Committed record for one agent, if any.
    pub fn get(&self, node_id: &str, agent_id: &str) -> Option<AgentRecord> {
        self.state
            .lock()
            .unwrap()
            .store
            .get(&(node_id.to_string(), agent_id.to_string()))
            .cloned()
    }

    /// Seed a committed record directly, bypassing the transaction path.
    pub fn seed(&self, record: AgentRecord) {
        let key = (record.node_id.clone(), record.agent_id.clone());
        self.state.lock().unwrap().store.insert(key, record);
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AgentStateRepository for SpyRepository {
    async fn begin(&self) -> Result<Box<dyn AgentStateTransaction>, RepositoryError> {
        self.state.lock().unwrap().begins += 1;
        Ok(Box::new(SpyTransaction {
            state: self.state.clone(),
            staged: HashMap::new(),
        }))
    }
}

struct SpyTransaction {
    state: Arc<Mutex<SpyState>>,
    staged: HashMap<(String, String), AgentRecord>,
}

#[async_trait]
impl AgentStateTransaction for SpyTransaction {
    async fn find(
        &mut self,
        node_id: &str,
        agent_id: &str,
    ) -> Result<Option<AgentRecord>, RepositoryError> {
        let key = (node_id.to_string(), agent_id.to_string());
        let mut state = self.state.lock().unwrap();
        state.finds += 1;
        if let Some(staged) = self.staged.get(&key) {
            return Ok(Some(staged.clone()));
        }
        Ok(state.store.get(&key).cloned())
    }

    async fn insert(&mut self, record: AgentRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.inserts += 1;
        if state.poisoned.contains(&record.agent_id) {
            return Err(RepositoryError::Storage(format!(
                "simulated storage failure for agent {}",
                record.agent_id
            )));
        }
        drop(state);
        let key = (record.node_id.clone(), record.agent_id.clone());
        self.staged.insert(key, record);
        Ok(())
    }

    async fn update(&mut self, record: AgentRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.updates += 1;
        if state.poisoned.contains(&record.agent_id) {
            return Err(RepositoryError::Storage(format!(
                "simulated storage failure for agent {}",
                record.agent_id
            )));
        }
        drop(state);
        let key = (record.node_id.clone(), record.agent_id.clone());
        self.staged.insert(key, record);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.commits += 1;
        for (key, record) in self.staged {
            state.store.insert(key, record);
        }
        Ok(())
    }
}
