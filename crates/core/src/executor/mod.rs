//! Task executor boundary.
//!
//! The orchestrator depends on execution only through [`TaskExecutor`].
//! [`CommandExecutor`] is the bundled backend: it runs an external program
//! per task and consults the optional budget and quality hooks.

mod command;
mod hooks;
mod types;

pub use command::{parse_line, CommandExecutor, ExecutorLine};
pub use hooks::{
    BudgetGate, CommandQualityChecker, QualityChecker, QualityCheckerFactory, QualityError,
    QualityReport, TokenBudget,
};
pub use types::{
    ExecutionResult, ExecutorError, NoopProgress, ProgressSink, Task, TaskExecutor,
};
