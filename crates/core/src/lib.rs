pub mod autopilot;
pub mod config;
pub mod executor;
pub mod github;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod orchestrator;
pub mod poller;
pub mod source;
pub mod testing;

pub use autopilot::{
    AutopilotController, AutopilotError, AutopilotRecord, CiStatus, HostError,
    InMemoryRecordStore, PrSnapshot, PrStage, PullRequestHost, RecordStore, SqliteRecordStore,
    StoreError,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use executor::{
    CommandExecutor, CommandQualityChecker, ExecutionResult, ExecutorError, ProgressSink, Task,
    TaskExecutor, TokenBudget,
};
pub use github::{GithubClient, GithubError};
pub use monitor::{Monitor, TaskPhase, TaskState};
pub use notify::{LogNotifier, Notifier, NotifyError};
pub use orchestrator::{
    DefaultPlanner, DispatchHandler, Orchestrator, OrchestratorError, OrchestratorStatus,
    PrCreated, PrCreatedListener, TaskPlanner,
};
pub use poller::{ItemHandler, Poller, PollerStatus, StatusLabeler, StatusLabels};
pub use source::{ItemLabeler, SourceError, WorkItem, WorkSource};
