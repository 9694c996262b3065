use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use std::time::Instant;

use super::ServerConfig;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub scheduler_handle: SchedulerHandle,
    pub hash: String,
}

impl ServerState {
    pub fn new(config: ServerConfig, scheduler_handle: SchedulerHandle, hash: String) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            scheduler_handle,
            hash,
        }
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
