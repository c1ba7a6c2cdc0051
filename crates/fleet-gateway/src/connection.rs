//! One managed connection to one node daemon.
//!
//! A [`ManagedConnection`] owns connectivity-state inspection, lazy
//! (re)connection and the three outbound operations. There is no
//! background reconnect loop anywhere: repair is demand-driven, triggered
//! by the next operation attempted on an unhealthy connection.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use crate::agent::{AgentInfo, AgentOperation, ResourceDataPoint};
use crate::error::{translate, GatewayError};
use crate::transport::{DaemonConnector, DaemonTransport};
use fleet_proto as pb;

/// Bounded timeout applied to list and metrics calls, independent of the
/// caller's own deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent operations wait out a graceful stop, which can take 30s on the
/// daemon side, so they get a much longer bound.
pub const OPERATE_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// How long a caller waits on another task's in-flight connect attempt
/// before giving up.
pub const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity of a managed connection.
///
/// Published through a watch channel so waiters can observe transitions.
/// All writes go through one internal transition function, which keeps
/// the reconnect logic auditable in a single place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No transport has been opened yet.
    Idle,
    /// A task is dialing the daemon right now.
    Connecting,
    /// The current transport is believed healthy.
    Ready,
    /// The last dial or call failed; the next operation rebuilds.
    TransientFailure,
    /// Explicitly closed.
    Shutdown,
}

/// A pooled connection to the daemon of a single node.
///
/// The transport handle is replaced, never mutated in place, on rebuild.
/// Each connection has its own locks, independent of the pool's map lock,
/// so reconnecting one node never blocks operations on another.
pub struct ManagedConnection {
    node_id: String,
    address: String,
    connector: Arc<dyn DaemonConnector>,
    transport: RwLock<Option<Arc<dyn DaemonTransport>>>,
    state: watch::Sender<ConnectivityState>,
    rebuild: Mutex<()>,
}

impl ManagedConnection {
    /// Create a connection record for one node. No dialing happens here;
    /// the transport is opened lazily by the first operation.
    pub fn new(
        node_id: impl Into<String>,
        address: impl Into<String>,
        connector: Arc<dyn DaemonConnector>,
    ) -> Result<Self, GatewayError> {
        let node_id = node_id.into();
        let address = address.into();

        if node_id.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "node id is required".to_string(),
            ));
        }
        if address.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "address is required".to_string(),
            ));
        }

        let (state, _) = watch::channel(ConnectivityState::Idle);

        Ok(Self {
            node_id,
            address,
            connector,
            transport: RwLock::new(None),
            state,
            rebuild: Mutex::new(()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current connectivity state.
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    fn transition(&self, to: ConnectivityState) {
        let from = *self.state.borrow();
        if from != to {
            debug!(
                "connection to node {} moved {:?} -> {:?}",
                self.node_id, from, to
            );
            self.state.send_replace(to);
        }
    }

    async fn ready_transport(&self) -> Option<Arc<dyn DaemonTransport>> {
        if *self.state.borrow() != ConnectivityState::Ready {
            return None;
        }
        self.transport.read().await.clone()
    }

    /// Double-checked, demand-driven connect/repair. Every operation goes
    /// through here.
    async fn ensure_connection(&self) -> Result<Arc<dyn DaemonTransport>, GatewayError> {
        if let Some(transport) = self.ready_transport().await {
            return Ok(transport);
        }

        // Another task may already be dialing; wait for its transition
        // instead of queueing on the rebuild lock.
        let mut rx = self.state.subscribe();
        if *rx.borrow_and_update() == ConnectivityState::Connecting {
            match tokio::time::timeout(CONNECT_WAIT_TIMEOUT, rx.changed()).await {
                Ok(_) => {
                    if let Some(transport) = self.ready_transport().await {
                        return Ok(transport);
                    }
                }
                Err(_) => {
                    warn!(
                        "timed out waiting for in-flight connect to node {} at {}",
                        self.node_id, self.address
                    );
                    return Err(GatewayError::ConnectionFailed(format!(
                        "node {}: timed out waiting for in-flight connect",
                        self.node_id
                    )));
                }
            }
        }

        self.rebuild().await
    }

    /// Rebuild the transport under the exclusive lock, re-checking first:
    /// another task may have repaired the connection while this one was
    /// waiting for the lock.
    async fn rebuild(&self) -> Result<Arc<dyn DaemonTransport>, GatewayError> {
        let _guard = self.rebuild.lock().await;

        if let Some(transport) = self.ready_transport().await {
            return Ok(transport);
        }

        self.transition(ConnectivityState::Connecting);

        // Drop the old handle before dialing; it is never reused.
        self.transport.write().await.take();

        match self.connector.connect(&self.address).await {
            Ok(transport) => {
                *self.transport.write().await = Some(transport.clone());
                self.transition(ConnectivityState::Ready);
                info!(
                    "connected to daemon for node {} at {}",
                    self.node_id, self.address
                );
                Ok(transport)
            }
            Err(e) => {
                self.transition(ConnectivityState::TransientFailure);
                warn!(
                    "failed to connect to daemon for node {} at {}: {}",
                    self.node_id, self.address, e
                );
                Err(GatewayError::ConnectionFailed(format!(
                    "node {} at {}: {}",
                    self.node_id, self.address, e
                )))
            }
        }
    }

    /// Transport-level failures observed on a call demote the state so
    /// the next operation rebuilds instead of reusing a dead channel.
    fn note_transport_failure(&self, status: &Status) {
        if status.code() == Code::Unavailable {
            self.transition(ConnectivityState::TransientFailure);
        }
    }

    /// Apply the call-scoped timeout and route transport errors through
    /// the translator. The bound holds regardless of the caller's own
    /// deadline.
    async fn bounded<T>(
        &self,
        limit: Duration,
        call: impl Future<Output = Result<T, Status>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(status)) => {
                self.note_transport_failure(&status);
                Err(translate(status))
            }
            Err(_) => {
                warn!(
                    "call to node {} at {} timed out after {:?}",
                    self.node_id, self.address, limit
                );
                Err(translate(Status::deadline_exceeded("call timed out")))
            }
        }
    }

    /// List the agents the node's daemon currently manages.
    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>, GatewayError> {
        let transport = self.ensure_connection().await?;

        let agents = self
            .bounded(DEFAULT_CALL_TIMEOUT, transport.list_agents())
            .await?;

        let agents = agents
            .into_iter()
            .map(AgentInfo::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("listed {} agents on node {}", agents.len(), self.node_id);
        Ok(agents)
    }

    /// Apply a lifecycle operation (`start`, `stop`, `restart`) to one
    /// agent on the node.
    ///
    /// A structurally successful RPC can still report a business failure;
    /// that surfaces as [`GatewayError::OperationFailed`] carrying the
    /// daemon's own message, not one of the transport kinds.
    pub async fn operate_agent(&self, agent_id: &str, operation: &str) -> Result<(), GatewayError> {
        if agent_id.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "agent id is required".to_string(),
            ));
        }
        if operation.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "operation is required".to_string(),
            ));
        }
        let operation = AgentOperation::from_str(operation)?;

        let transport = self.ensure_connection().await?;

        let request = pb::AgentOperationRequest {
            agent_id: agent_id.to_string(),
            operation: operation.to_string(),
        };

        let reply = self
            .bounded(OPERATE_CALL_TIMEOUT, transport.operate_agent(request))
            .await?;

        if !reply.success {
            let message = if reply.error_message.is_empty() {
                format!("operation {} failed", operation)
            } else {
                reply.error_message
            };
            warn!(
                "agent {} on node {}: {} rejected by daemon: {}",
                agent_id, self.node_id, operation, message
            );
            return Err(GatewayError::OperationFailed(message));
        }

        info!(
            "agent {} on node {}: {} succeeded",
            agent_id, self.node_id, operation
        );
        Ok(())
    }

    /// Fetch resource usage samples for one agent over the trailing
    /// `duration`. Samples come back oldest first, exactly as the daemon
    /// returned them.
    pub async fn agent_metrics(
        &self,
        agent_id: &str,
        duration: Duration,
    ) -> Result<Vec<ResourceDataPoint>, GatewayError> {
        if agent_id.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "agent id is required".to_string(),
            ));
        }
        if duration.is_zero() {
            return Err(GatewayError::InvalidArgument(
                "duration must be greater than zero".to_string(),
            ));
        }

        let transport = self.ensure_connection().await?;

        let request = pb::AgentMetricsRequest {
            agent_id: agent_id.to_string(),
            duration_seconds: duration.as_secs() as i64,
        };

        let reply = self
            .bounded(DEFAULT_CALL_TIMEOUT, transport.get_agent_metrics(request))
            .await?;

        let points: Vec<ResourceDataPoint> = reply
            .data_points
            .into_iter()
            .map(ResourceDataPoint::from)
            .collect();

        debug!(
            "fetched {} samples for agent {} on node {}",
            points.len(),
            agent_id,
            self.node_id
        );
        Ok(points)
    }

    /// Tear down the transport. In-flight calls fail with a transport
    /// error, translated as usual; a later operation on this handle would
    /// dial afresh.
    pub async fn close(&self) {
        let _guard = self.rebuild.lock().await;
        self.transport.write().await.take();
        self.transition(ConnectivityState::Shutdown);
        debug!(
            "closed connection to node {} at {}",
            self.node_id, self.address
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeConnector, FakeTransport};

    fn connection(connector: Arc<FakeConnector>) -> ManagedConnection {
        ManagedConnection::new("node-1", "10.0.0.5:9091", connector).unwrap()
    }

    #[test]
    fn test_new_rejects_empty_node_id() {
        let result = ManagedConnection::new("", "10.0.0.5:9091", Arc::new(FakeConnector::new()));
        assert!(matches!(result, Err(GatewayError::InvalidArgument(_))));
    }

    #[test]
    fn test_new_rejects_empty_address() {
        let result = ManagedConnection::new("node-1", "", Arc::new(FakeConnector::new()));
        assert!(matches!(result, Err(GatewayError::InvalidArgument(_))));
    }

    #[test]
    fn test_starts_idle() {
        let conn = connection(Arc::new(FakeConnector::new()));
        assert_eq!(conn.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_first_operation_dials_lazily() {
        let connector = Arc::new(FakeConnector::new());
        let conn = connection(connector.clone());

        assert_eq!(connector.dials(), 0);
        conn.list_agents().await.unwrap();
        assert_eq!(connector.dials(), 1);
        assert_eq!(conn.state(), ConnectivityState::Ready);
    }

    #[tokio::test]
    async fn test_ready_connection_is_reused() {
        let connector = Arc::new(FakeConnector::new());
        let conn = connection(connector.clone());

        conn.list_agents().await.unwrap();
        conn.list_agents().await.unwrap();
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_maps_to_connection_failed() {
        let connector = Arc::new(FakeConnector::new().fail_dials(1));
        let conn = connection(connector.clone());

        let err = conn.list_agents().await.unwrap_err();
        match err {
            GatewayError::ConnectionFailed(reason) => {
                assert!(reason.contains("node-1"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(conn.state(), ConnectivityState::TransientFailure);
    }

    #[tokio::test]
    async fn test_recovers_on_next_operation_after_dial_failure() {
        let connector = Arc::new(FakeConnector::new().fail_dials(1));
        let conn = connection(connector.clone());

        assert!(conn.list_agents().await.is_err());
        conn.list_agents().await.unwrap();
        assert_eq!(connector.dials(), 2);
        assert_eq!(conn.state(), ConnectivityState::Ready);
    }

    #[tokio::test]
    async fn test_unavailable_demotes_then_rebuilds() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_with(Status::unavailable("connection reset"));
        let connector = Arc::new(FakeConnector::with_transport(transport));
        let conn = connection(connector.clone());

        let err = conn.list_agents().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionFailed(_)));
        assert_eq!(conn.state(), ConnectivityState::TransientFailure);

        // Demand-driven repair: the next call redials.
        conn.list_agents().await.unwrap();
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test]
    async fn test_not_found_does_not_demote() {
        let transport = Arc::new(FakeTransport::new());
        transport.fail_next_with(Status::not_found("no such agent"));
        let connector = Arc::new(FakeConnector::with_transport(transport));
        let conn = connection(connector);

        let err = conn.operate_agent("a-1", "stop").await.unwrap_err();
        assert!(matches!(err, GatewayError::AgentNotFound));
        assert_eq!(conn.state(), ConnectivityState::Ready);
    }

    #[tokio::test]
    async fn test_operate_rejects_invalid_operation_without_network() {
        let transport = Arc::new(FakeTransport::new());
        let connector = Arc::new(FakeConnector::with_transport(transport.clone()));
        let conn = connection(connector.clone());

        let err = conn.operate_agent("a-1", "launch").await.unwrap_err();
        match err {
            GatewayError::InvalidArgument(msg) => assert!(msg.contains("invalid operation")),
            other => panic!("unexpected variant: {:?}", other),
        }
        assert_eq!(connector.dials(), 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_operate_rejects_empty_ids_without_network() {
        let transport = Arc::new(FakeTransport::new());
        let connector = Arc::new(FakeConnector::with_transport(transport.clone()));
        let conn = connection(connector);

        assert!(matches!(
            conn.operate_agent("", "start").await,
            Err(GatewayError::InvalidArgument(_))
        ));
        assert!(matches!(
            conn.operate_agent("a-1", "").await,
            Err(GatewayError::InvalidArgument(_))
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_metrics_rejects_zero_duration_without_network() {
        let transport = Arc::new(FakeTransport::new());
        let connector = Arc::new(FakeConnector::with_transport(transport.clone()));
        let conn = connection(connector.clone());

        let err = conn
            .agent_metrics("a-1", Duration::from_secs(0))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArgument(_)));
        assert_eq!(connector.dials(), 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_daemon_yields_exactly_timeout() {
        let transport = Arc::new(FakeTransport::new().with_reply_delay(Duration::from_secs(15)));
        let connector = Arc::new(FakeConnector::with_transport(transport));
        let conn = connection(connector);

        let err = conn.list_agents().await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout));
    }

    #[tokio::test]
    async fn test_operate_business_failure_is_distinct() {
        let transport = Arc::new(FakeTransport::new());
        transport.reject_operations("agent is already running");
        let connector = Arc::new(FakeConnector::with_transport(transport));
        let conn = connection(connector);

        let err = conn.operate_agent("a-1", "start").await.unwrap_err();
        match err {
            GatewayError::OperationFailed(msg) => assert_eq!(msg, "agent is already running"),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_moves_to_shutdown() {
        let connector = Arc::new(FakeConnector::new());
        let conn = connection(connector.clone());

        conn.list_agents().await.unwrap();
        conn.close().await;
        assert_eq!(conn.state(), ConnectivityState::Shutdown);

        // A closed handle dials afresh on the next operation.
        conn.list_agents().await.unwrap();
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_dial_once() {
        let connector = Arc::new(FakeConnector::new());
        let conn = Arc::new(connection(connector.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let conn = conn.clone();
            handles.push(tokio::spawn(async move { conn.list_agents().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.dials(), 1);
    }
}
