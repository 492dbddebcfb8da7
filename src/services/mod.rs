pub mod firmware_sync;
pub mod heartbeat;
pub mod liveness;
pub mod provisioning;
pub mod reconcile;

pub use firmware_sync::{FirmwareSync, FirmwareSyncScheduler, ServerEndpoint};
pub use heartbeat::{EngineSettings, HeartbeatEngine, HeartbeatError};
pub use provisioning::{HttpProvisioningClient, ProvisioningAuthority, RetryPolicy};
