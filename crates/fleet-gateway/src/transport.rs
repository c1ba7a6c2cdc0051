//! Transport seam between the gateway and the tonic-generated client.
//!
//! [`ManagedConnection`](crate::connection::ManagedConnection) talks to
//! daemons through these traits, so tests inject fake transports and the
//! reconnect logic can be exercised without a network.

use async_trait::async_trait;
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::Status;

use crate::intercept;
use crate::keepalive;
use fleet_proto as pb;
use fleet_proto::daemon_service_client::DaemonServiceClient;

/// Boxed error produced by a connector; the connection wraps it into
/// `ConnectionFailed` with the node context attached.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One live transport handle to a daemon.
///
/// A handle is replaced wholesale when the connection is rebuilt, never
/// repaired in place.
#[async_trait]
pub trait DaemonTransport: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<pb::AgentInfo>, Status>;

    async fn operate_agent(
        &self,
        request: pb::AgentOperationRequest,
    ) -> Result<pb::AgentOperationResponse, Status>;

    async fn get_agent_metrics(
        &self,
        request: pb::AgentMetricsRequest,
    ) -> Result<pb::AgentMetricsResponse, Status>;
}

/// Opens transports to daemon addresses.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    /// Open a fresh transport to the daemon at `address`.
    async fn connect(&self, address: &str) -> Result<Arc<dyn DaemonTransport>, BoxError>;
}

/// Production connector: dials a gRPC channel with the fixed keepalive
/// policy and wraps it in a [`GrpcTransport`].
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector;

#[async_trait]
impl DaemonConnector for GrpcConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn DaemonTransport>, BoxError> {
        let channel = keepalive::endpoint(address)?.connect().await?;
        Ok(Arc::new(GrpcTransport::new(channel)))
    }
}

/// Tonic-backed transport over an established channel.
///
/// The inner client is cheap to clone (Arc internally), so each call
/// clones it instead of locking.
pub struct GrpcTransport {
    client: DaemonServiceClient<Channel>,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        let client = DaemonServiceClient::new(channel)
            .max_decoding_message_size(keepalive::MAX_MESSAGE_SIZE)
            .max_encoding_message_size(keepalive::MAX_MESSAGE_SIZE);
        Self { client }
    }
}

#[async_trait]
impl DaemonTransport for GrpcTransport {
    async fn list_agents(&self) -> Result<Vec<pb::AgentInfo>, Status> {
        let mut client = self.client.clone();
        intercept::outbound("ListAgents", async move {
            let response = client.list_agents(pb::ListAgentsRequest {}).await?;
            Ok(response.into_inner().agents)
        })
        .await
    }

    async fn operate_agent(
        &self,
        request: pb::AgentOperationRequest,
    ) -> Result<pb::AgentOperationResponse, Status> {
        let mut client = self.client.clone();
        intercept::outbound("OperateAgent", async move {
            let response = client.operate_agent(request).await?;
            Ok(response.into_inner())
        })
        .await
    }

    async fn get_agent_metrics(
        &self,
        request: pb::AgentMetricsRequest,
    ) -> Result<pb::AgentMetricsResponse, Status> {
        let mut client = self.client.clone();
        intercept::outbound("GetAgentMetrics", async move {
            let response = client.get_agent_metrics(request).await?;
            Ok(response.into_inner())
        })
        .await
    }
}
