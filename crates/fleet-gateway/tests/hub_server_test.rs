//! End-to-end test of the inbound sync endpoint over a real gRPC channel.
//!
//! Boots the hub service on an ephemeral port and drives it with the
//! generated client, exercising the full wire contract.

use std::net::SocketAddr;
use std::sync::Arc;

use fleet_gateway::{AgentStatus, HubServer, MemoryAgentStateRepository, SyncGateway};
use fleet_proto as pb;
use fleet_proto::hub_service_client::HubServiceClient;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

async fn start_hub(repository: Arc<MemoryAgentStateRepository>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = HubServer::new(SyncGateway::new(repository)).into_service();
    tokio::spawn(async move {
        Server::builder()
            .add_service(service)
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    addr
}

#[tokio::test]
async fn test_sync_round_trip_over_grpc() {
    let repo = Arc::new(MemoryAgentStateRepository::new());
    let addr = start_hub(repo.clone()).await;

    let mut client = HubServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let response = client
        .sync_agent_states(pb::SyncAgentStatesRequest {
            node_id: "node-1".to_string(),
            states: vec![pb::AgentState {
                agent_id: "a-1".to_string(),
                status: "running".to_string(),
                pid: 7,
                last_heartbeat: 1_700_000_000,
            }],
        })
        .await
        .unwrap()
        .into_inner();

    assert!(response.success);
    assert_eq!(response.message, "synced 1/1 states");

    let stored = repo.get("node-1", "a-1").unwrap();
    assert_eq!(stored.status, AgentStatus::Running);
    assert_eq!(stored.pid, 7);
}

#[tokio::test]
async fn test_missing_node_id_is_invalid_argument_on_the_wire() {
    let repo = Arc::new(MemoryAgentStateRepository::new());
    let addr = start_hub(repo.clone()).await;

    let mut client = HubServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let status = client
        .sync_agent_states(pb::SyncAgentStatesRequest {
            node_id: String::new(),
            states: vec![pb::AgentState::default()],
        })
        .await
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(repo.is_empty());
}

#[tokio::test]
async fn test_empty_batch_is_success_on_the_wire() {
    let repo = Arc::new(MemoryAgentStateRepository::new());
    let addr = start_hub(repo).await;

    let mut client = HubServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    let response = client
        .sync_agent_states(pb::SyncAgentStatesRequest {
            node_id: "node-1".to_string(),
            states: vec![],
        })
        .await
        .unwrap()
        .into_inner();

    assert!(response.success);
    assert_eq!(response.message, "no states to sync");
}
