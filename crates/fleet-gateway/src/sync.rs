//! Inbound sync gateway: reconciles agent-state batches pushed by daemons.
//!
//! Daemons periodically report the state of their agents in one batch per
//! node. The gateway upserts each report into node-owned storage inside a
//! single transaction. Individual bad records are logged and skipped; only
//! a transaction-level failure fails the call.

use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::agent::{AgentStateReport, AgentStatus};
use crate::error::GatewayError;
use crate::intercept;
use crate::keepalive;
use crate::repository::{AgentRecord, AgentStateRepository, AgentStateTransaction};
use fleet_proto as pb;
use fleet_proto::hub_service_server::{HubService, HubServiceServer};

/// Result of one sync call: how much of the batch was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub total: usize,
    pub applied: usize,
}

/// Reconciles pushed agent state against stored records.
#[derive(Clone)]
pub struct SyncGateway {
    repository: Arc<dyn AgentStateRepository>,
}

impl SyncGateway {
    pub fn new(repository: Arc<dyn AgentStateRepository>) -> Self {
        Self { repository }
    }

    /// Reconcile one batch of agent-state reports from a node's daemon.
    ///
    /// An empty batch succeeds immediately without touching storage.
    /// Per-item failures are logged and skipped; the outcome reports how
    /// many of the batch were applied. Only a transaction-level failure
    /// fails the whole call.
    pub async fn sync_agent_states(
        &self,
        node_id: &str,
        reports: Vec<AgentStateReport>,
    ) -> Result<SyncOutcome, GatewayError> {
        if node_id.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "node id is required".to_string(),
            ));
        }
        if reports.is_empty() {
            debug!("no agent states to sync for node {}", node_id);
            return Ok(SyncOutcome {
                total: 0,
                applied: 0,
            });
        }

        let total = reports.len();
        let mut tx = self.repository.begin().await?;

        let mut applied = 0;
        for report in reports {
            match apply_report(tx.as_mut(), node_id, report).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    // One bad record never aborts the rest of the batch.
                    warn!("skipping agent state for node {}: {}", node_id, e);
                }
            }
        }

        tx.commit().await?;

        info!(
            "synced agent states for node {}: {}/{} applied",
            node_id, applied, total
        );
        Ok(SyncOutcome { total, applied })
    }
}

/// Upsert a single report inside the batch transaction.
async fn apply_report(
    tx: &mut dyn AgentStateTransaction,
    node_id: &str,
    report: AgentStateReport,
) -> Result<(), GatewayError> {
    if report.agent_id.is_empty() {
        return Err(GatewayError::InvalidArgument(
            "agent id is required".to_string(),
        ));
    }

    let now = SystemTime::now();

    match tx.find(node_id, &report.agent_id).await? {
        Some(mut record) => {
            // Merge: empty or zero fields preserve the stored values, and
            // the locally-known kind/version are never overwritten since
            // the push does not carry them.
            if report.status.is_empty() {
                warn!(
                    "agent {} on node {} pushed an empty status, keeping {}",
                    report.agent_id, node_id, record.status
                );
            } else {
                record.status = AgentStatus::from_str(&report.status)?;
            }
            if report.pid != 0 {
                record.pid = report.pid;
            }
            if let Some(heartbeat) = report.heartbeat_time() {
                record.last_heartbeat = Some(heartbeat);
            }
            record.last_sync = now;
            tx.update(record).await?;
        }
        None => {
            let status = if report.status.is_empty() {
                // A brand-new record with no reported status starts out
                // stopped rather than guessing at liveness.
                warn!(
                    "agent {} on node {} first seen with empty status, defaulting to stopped",
                    report.agent_id, node_id
                );
                AgentStatus::Stopped
            } else {
                AgentStatus::from_str(&report.status)?
            };

            let record = AgentRecord {
                node_id: node_id.to_string(),
                agent_id: report.agent_id.clone(),
                kind: String::new(),
                version: String::new(),
                status,
                pid: report.pid,
                last_heartbeat: report.heartbeat_time(),
                last_sync: now,
            };
            tx.insert(record).await?;
        }
    }

    Ok(())
}

/// Tonic implementation of the hub's inbound service.
pub struct HubServer {
    gateway: SyncGateway,
}

impl HubServer {
    pub fn new(gateway: SyncGateway) -> Self {
        Self { gateway }
    }

    /// Wrap into the generated service with the message ceiling applied.
    pub fn into_service(self) -> HubServiceServer<Self> {
        HubServiceServer::new(self)
            .max_decoding_message_size(keepalive::MAX_MESSAGE_SIZE)
            .max_encoding_message_size(keepalive::MAX_MESSAGE_SIZE)
    }
}

#[tonic::async_trait]
impl HubService for HubServer {
    async fn sync_agent_states(
        &self,
        request: Request<pb::SyncAgentStatesRequest>,
    ) -> Result<Response<pb::SyncAgentStatesResponse>, Status> {
        let pb::SyncAgentStatesRequest { node_id, states } = request.into_inner();

        intercept::inbound("SyncAgentStates", async {
            if node_id.is_empty() {
                return Err(Status::invalid_argument("node_id is required"));
            }
            if states.is_empty() {
                return Ok(Response::new(pb::SyncAgentStatesResponse {
                    success: true,
                    message: "no states to sync".to_string(),
                }));
            }

            info!("syncing {} agent states from node {}", states.len(), node_id);

            let reports = states.into_iter().map(AgentStateReport::from).collect();
            match self.gateway.sync_agent_states(&node_id, reports).await {
                Ok(outcome) => Ok(Response::new(pb::SyncAgentStatesResponse {
                    success: true,
                    message: format!("synced {}/{} states", outcome.applied, outcome.total),
                })),
                // The transaction failed as a whole; answer with a business
                // failure rather than a transport error, so the daemon can
                // retry on its next cycle.
                Err(e) => Ok(Response::new(pb::SyncAgentStatesResponse {
                    success: false,
                    message: format!("failed to sync agent states: {}", e),
                })),
            }
        })
        .await
    }
}
