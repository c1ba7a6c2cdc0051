//! Fleet Gateway: pooled, self-repairing gRPC connectivity from the hub
//! to per-node daemons.
//!
//! The hub operates lightweight agent processes on remote nodes through a
//! daemon running on each node. This crate owns the connection layer of
//! that relationship:
//!
//! - **ConnectionPool**: at most one [`ManagedConnection`] per node,
//!   created lazily and reused across request handlers
//! - **ManagedConnection**: connectivity-state inspection, demand-driven
//!   reconnection and the three outbound daemon operations, each bounded
//!   by a call timeout
//! - **translate**: normalizes every transport failure into the small
//!   [`GatewayError`] vocabulary so callers never inspect status codes
//! - **SyncGateway / HubServer**: the complementary inbound path that
//!   reconciles agent-state batches pushed by daemons
//!
//! # Example
//!
//! ```rust,no_run
//! use fleet_gateway::ConnectionPool;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), fleet_gateway::GatewayError> {
//! let pool = ConnectionPool::new();
//!
//! // Lazily opens the connection on first use, reuses it afterwards.
//! let client = pool.get_client("node-1", "10.0.0.5:9091").await?;
//!
//! let agents = client.list_agents().await?;
//! client.operate_agent("agent-1", "restart").await?;
//! let samples = client
//!     .agent_metrics("agent-1", Duration::from_secs(3600))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod connection;
pub mod error;
pub mod intercept;
pub mod keepalive;
pub mod pool;
pub mod repository;
pub mod sync;
pub mod testing;
pub mod transport;

pub use agent::{AgentInfo, AgentOperation, AgentStateReport, AgentStatus, ResourceDataPoint};
pub use connection::{ConnectivityState, ManagedConnection};
pub use error::{translate, GatewayError};
pub use pool::ConnectionPool;
pub use repository::{
    AgentRecord, AgentStateRepository, AgentStateTransaction, MemoryAgentStateRepository,
    RepositoryError,
};
pub use sync::{HubServer, SyncGateway, SyncOutcome};
pub use transport::{DaemonConnector, DaemonTransport, GrpcConnector, GrpcTransport};
