//! Keyed registry of managed connections, one per node.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::connection::ManagedConnection;
use crate::error::GatewayError;
use crate::transport::{DaemonConnector, GrpcConnector};

/// Concurrency-safe registry mapping node ids to their managed
/// connections.
///
/// The map is owned by the pool instance, never process-wide, so
/// independent pools (e.g. in tests) cannot interfere with each other.
/// Reads run concurrently under the shared lock; structural writes take
/// the exclusive lock and re-validate to avoid duplicate construction.
pub struct ConnectionPool {
    connector: Arc<dyn DaemonConnector>,
    clients: RwLock<HashMap<String, Arc<ManagedConnection>>>,
}

impl ConnectionPool {
    /// Pool dialing real gRPC channels with the fixed keepalive policy.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(GrpcConnector))
    }

    /// Pool with an injected connector (fake transports in tests).
    pub fn with_connector(connector: Arc<dyn DaemonConnector>) -> Self {
        Self {
            connector,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Get the connection for a node, creating it on first use.
    ///
    /// Repeated calls with the same node id return the same instance
    /// until it is explicitly closed, and construction happens at most
    /// once per node even under concurrent first-time callers.
    pub async fn get_client(
        &self,
        node_id: &str,
        address: &str,
    ) -> Result<Arc<ManagedConnection>, GatewayError> {
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

        // Fast path under the shared lock.
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(node_id) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;

        // Re-check: another caller may have created the entry while the
        // write lock was being acquired.
        if let Some(client) = clients.get(node_id) {
            return Ok(client.clone());
        }

        let client = Arc::new(ManagedConnection::new(
            node_id,
            address,
            self.connector.clone(),
        )?);
        clients.insert(node_id.to_string(), client.clone());

        info!(
            "created daemon connection for node {} at {}",
            node_id, address
        );
        Ok(client)
    }

    /// Close and remove one entry. A no-op, not an error, when absent.
    pub async fn close_client(&self, node_id: &str) {
        let removed = self.clients.write().await.remove(node_id);
        match removed {
            Some(client) => {
                client.close().await;
                info!("closed daemon connection for node {}", node_id);
            }
            None => debug!("no daemon connection to close for node {}", node_id),
        }
    }

    /// Close and remove every entry. Later `get_client` calls rebuild
    /// fresh entries; a caller racing a shutdown may observe one, which
    /// is accepted since each connection is independently valid.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut clients = self.clients.write().await;
            clients.drain().collect()
        };
        for (_, client) in &drained {
            client.close().await;
        }
        info!("closed all {} daemon connections", drained.len());
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;

    fn pool() -> (Arc<FakeConnector>, ConnectionPool) {
        let connector = Arc::new(FakeConnector::new());
        let pool = ConnectionPool::with_connector(connector.clone());
        (connector, pool)
    }

    #[tokio::test]
    async fn test_get_client_rejects_empty_arguments() {
        let (_, pool) = pool();
        assert!(matches!(
            pool.get_client("", "10.0.0.5:9091").await,
            Err(GatewayError::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.get_client("node-1", "").await,
            Err(GatewayError::InvalidArgument(_))
        ));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_node_returns_same_instance() {
        let (_, pool) = pool();
        let first = pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        let second = pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_client_then_fresh_instance() {
        let (_, pool) = pool();
        let first = pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        pool.close_client("node-1").await;
        let second = pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_close_absent_client_is_noop() {
        let (_, pool) = pool();
        pool.close_client("nobody").await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_allows_rebuild() {
        let (_, pool) = pool();
        pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        pool.get_client("node-2", "10.0.0.6:9091").await.unwrap();
        assert_eq!(pool.len().await, 2);

        pool.close_all().await;
        assert!(pool.is_empty().await);

        pool.get_client("node-1", "10.0.0.5:9091").await.unwrap();
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_client_constructs_once() {
        let (connector, pool) = pool();
        let pool = Arc::new(pool);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.get_client("node-1", "10.0.0.5:9091").await.unwrap()
            }));
        }

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }

        for client in &clients[1..] {
            assert!(Arc::ptr_eq(&clients[0], client));
        }
        assert_eq!(pool.len().await, 1);

        // One shared connection dials exactly once when first used.
        clients[0].list_agents().await.unwrap();
        clients[1].list_agents().await.unwrap();
        assert_eq!(connector.dials(), 1);
    }
}
