pub mod heartbeat;
pub mod provisioning;
