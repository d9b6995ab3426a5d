//! # Core Module / 核心模块
//!
//! The test engine: the suite tree and its runnables, the completion
//! contract of a single attempt, the runner that walks the tree, and the
//! events it reports.
//!
//! 测试引擎：套件树及其 runnable、单次尝试的完成约定、遍历套件树的运行器，
//! 以及运行器报告的事件。

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod hook;
pub mod runnable;
pub mod runner;
pub mod stats;
pub mod suite;

// Re-exports
pub use config::{RunnerOptions, SuiteFile};
pub use context::{Context, Done, DoneArg, Scope};
pub use errors::{EngineError, Pending, TestError};
pub use events::{Event, EventListener, RunnableInfo, SuiteInfo};
pub use hook::{Hook, HookType};
pub use runnable::{Body, CallbackReturn, RunState, Speed};
pub use runner::{RunReport, Runner, RunnerState};
pub use stats::Stats;
pub use suite::{RunnableId, SuiteId, SuiteTree};
pub use test::Test;
