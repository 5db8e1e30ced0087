use std::sync::Arc;

use shipyard_core::{AutopilotController, Config, Monitor, Orchestrator, Poller, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    monitor: Arc<Monitor>,
    orchestrator: Option<Arc<Orchestrator>>,
    poller: Option<Arc<Poller>>,
    autopilot: Option<Arc<AutopilotController>>,
}

impl AppState {
    pub fn new(config: Config, monitor: Arc<Monitor>) -> Self {
        Self {
            config,
            monitor,
            orchestrator: None,
            poller: None,
            autopilot: None,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_poller(mut self, poller: Arc<Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn with_autopilot(mut self, autopilot: Arc<AutopilotController>) -> Self {
        self.autopilot = Some(autopilot);
        self
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn monitor(&self) -> &Monitor {
        self.monitor.as_ref()
    }

    pub fn orchestrator(&self) -> Option<&Orchestrator> {
        self.orchestrator.as_deref()
    }

    pub fn poller(&self) -> Option<&Poller> {
        self.poller.as_deref()
    }

    pub fn autopilot(&self) -> Option<&AutopilotController> {
        self.autopilot.as_deref()
    }
}
