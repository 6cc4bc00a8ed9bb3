use super::startup::PhaseTracker;
use crate::application::{RealtimeHub, ServiceBoard};
use crate::infrastructure::{AppConfig, Database};
use std::sync::Arc;

/// Shared by every HTTP handler. Built once the database is connected.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Database,
    pub hub: RealtimeHub,
    pub services: ServiceBoard,
    pub phase: PhaseTracker,
}
