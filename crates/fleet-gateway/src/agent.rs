//! Domain types exchanged with node daemons.
//!
//! Wire messages from `fleet-proto` are converted into these types at the
//! gateway boundary so the rest of the hub never handles raw protobuf.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::GatewayError;
use fleet_proto as pb;
use tonic::Status;

/// Lifecycle status of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Stopped,
    Error,
    Starting,
    Stopping,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Running => "running",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
            AgentStatus::Starting => "starting",
            AgentStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AgentStatus::Running),
            "stopped" => Ok(AgentStatus::Stopped),
            "error" => Ok(AgentStatus::Error),
            "starting" => Ok(AgentStatus::Starting),
            "stopping" => Ok(AgentStatus::Stopping),
            other => Err(GatewayError::InvalidArgument(format!(
                "unknown agent status: {}",
                other
            ))),
        }
    }
}

/// Operation that can be applied to an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOperation {
    Start,
    Stop,
    Restart,
}

impl AgentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentOperation::Start => "start",
            AgentOperation::Stop => "stop",
            AgentOperation::Restart => "restart",
        }
    }
}

impl fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentOperation {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(AgentOperation::Start),
            "stop" => Ok(AgentOperation::Stop),
            "restart" => Ok(AgentOperation::Restart),
            other => Err(GatewayError::InvalidArgument(format!(
                "invalid operation {}, must be one of: start, stop, restart",
                other
            ))),
        }
    }
}

/// Description of one agent process as reported by a daemon.
///
/// Read-only to the hub: the daemon owns this data and the gateway only
/// decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub kind: String,
    pub version: String,
    pub status: AgentStatus,
    pub pid: i32,
    pub start_time: SystemTime,
}

impl TryFrom<pb::AgentInfo> for AgentInfo {
    type Error = GatewayError;

    fn try_from(info: pb::AgentInfo) -> Result<Self, Self::Error> {
        let status = AgentStatus::from_str(&info.status).map_err(|_| {
            // Malformed remote payload is a daemon fault, not a caller
            // mistake; surface it as a pass-through internal error.
            GatewayError::Rpc(Status::internal(format!(
                "daemon reported unknown agent status: {}",
                info.status
            )))
        })?;

        Ok(Self {
            id: info.id,
            kind: info.r#type,
            version: info.version,
            status,
            pid: info.pid,
            start_time: UNIX_EPOCH + Duration::from_secs(info.start_time.max(0) as u64),
        })
    }
}

/// One resource usage sample for an agent, as collected by the daemon.
/// Samples arrive oldest first and the gateway preserves that order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceDataPoint {
    pub timestamp: SystemTime,
    pub cpu: f64,
    pub memory_rss: u64,
    pub memory_vms: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub open_files: u32,
}

impl From<pb::ResourceDataPoint> for ResourceDataPoint {
    fn from(dp: pb::ResourceDataPoint) -> Self {
        Self {
            timestamp: UNIX_EPOCH + Duration::from_secs(dp.timestamp.max(0) as u64),
            cpu: dp.cpu,
            memory_rss: dp.memory_rss,
            memory_vms: dp.memory_vms,
            disk_read_bytes: dp.disk_read_bytes,
            disk_write_bytes: dp.disk_write_bytes,
            open_files: dp.open_files,
        }
    }
}

/// State of one agent as pushed by a daemon during a sync call.
///
/// `status` stays a raw wire string here; it is parsed during
/// reconciliation so a bad value fails one item, not the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateReport {
    pub agent_id: String,
    pub status: String,
    pub pid: i32,
    /// Unix seconds; 0 means unknown/never.
    pub last_heartbeat: i64,
}

impl From<pb::AgentState> for AgentStateReport {
    fn from(state: pb::AgentState) -> Self {
        Self {
            agent_id: state.agent_id,
            status: state.status,
            pid: state.pid,
            last_heartbeat: state.last_heartbeat,
        }
    }
}

impl AgentStateReport {
    /// Heartbeat as a point in time, if the daemon reported one.
    pub fn heartbeat_time(&self) -> Option<SystemTime> {
        if self.last_heartbeat > 0 {
            Some(UNIX_EPOCH + Duration::from_secs(self.last_heartbeat as u64))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_round_trip() {
        for op in ["start", "stop", "restart"] {
            assert_eq!(AgentOperation::from_str(op).unwrap().as_str(), op);
        }
    }

    #[test]
    fn test_operation_rejects_unknown_naming_the_value() {
        let err = AgentOperation::from_str("launch").unwrap_err();
        match err {
            GatewayError::InvalidArgument(msg) => {
                assert!(msg.contains("invalid operation"));
                assert!(msg.contains("launch"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in ["running", "stopped", "error", "starting", "stopping"] {
            assert_eq!(AgentStatus::from_str(status).unwrap().as_str(), status);
        }
    }

    #[test]
    fn test_agent_info_conversion() {
        let info = AgentInfo::try_from(pb::AgentInfo {
            id: "agent-1".to_string(),
            r#type: "collector".to_string(),
            version: "1.2.0".to_string(),
            status: "running".to_string(),
            pid: 4242,
            start_time: 1_700_000_000,
        })
        .unwrap();

        assert_eq!(info.id, "agent-1");
        assert_eq!(info.kind, "collector");
        assert_eq!(info.status, AgentStatus::Running);
        assert_eq!(
            info.start_time,
            UNIX_EPOCH + Duration::from_secs(1_700_000_000)
        );
    }

    #[test]
    fn test_agent_info_conversion_rejects_unknown_status() {
        let result = AgentInfo::try_from(pb::AgentInfo {
            id: "agent-1".to_string(),
            r#type: String::new(),
            version: String::new(),
            status: "zombie".to_string(),
            pid: 0,
            start_time: 0,
        });
        assert!(matches!(result, Err(GatewayError::Rpc(_))));
    }

    #[test]
    fn test_heartbeat_zero_means_unknown() {
        let report = AgentStateReport {
            agent_id: "a".to_string(),
            status: "running".to_string(),
            pid: 1,
            last_heartbeat: 0,
        };
        assert!(report.heartbeat_time().is_none());
    }
}
