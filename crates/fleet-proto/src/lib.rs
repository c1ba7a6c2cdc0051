/// Generated gRPC protocol definitions for the fleet control plane.
///
/// This crate provides the protocol buffer definitions and generated code
/// for communication between the hub (controller) and the per-node daemons.
pub mod fleet {
    pub mod v1 {
        tonic::include_proto!("fleet.v1");
    }
}

// Re-export commonly used types for convenience
pub use fleet::v1::*;
