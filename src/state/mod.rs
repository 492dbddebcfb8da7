use crate::services::HeartbeatEngine;
use std::sync::Arc;

/// Shared by both listeners; only the listener name differs.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HeartbeatEngine>,
    pub listener: &'static str,
}

impl AppState {
    pub fn new(engine: Arc<HeartbeatEngine>, listener: &'static str) -> Self {
        Self { engine, listener }
    }
}
