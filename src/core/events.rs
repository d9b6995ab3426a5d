//! # Events / 事件
//!
//! The runner reports everything it does through [`Event`]s. Payloads are
//! owned snapshots taken at emit time, so consumers never borrow the tree and
//! a hook's display title is computed here rather than stored on the hook.
//!
//! 运行器通过 [`Event`] 报告其所做的一切。负载是发出时获取的自有快照，
//! 消费者不会借用套件树，钩子的显示标题也在此计算而非存储在钩子上。

use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::core::errors::TestError;
use crate::core::hook::{HookType, display_title};
use crate::core::runnable::{RunState, RunnableKind, Speed};
use crate::core::suite::{RunnableId, SuiteId, SuiteTree};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteInfo {
    pub id: SuiteId,
    pub title: String,
    pub full_title: String,
    pub root: bool,
    pub file: Option<String>,
}

impl SuiteInfo {
    pub fn snapshot(tree: &SuiteTree, id: SuiteId) -> Self {
        let suite = tree.suite(id);
        Self {
            id,
            title: suite.title().to_string(),
            full_title: tree.suite_full_title(id),
            root: suite.is_root(),
            file: suite.file().map(str::to_string),
        }
    }
}

/// Snapshot of a test or hook.
/// 测试或钩子的快照。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnableInfo {
    pub id: RunnableId,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<HookType>,
    pub title: String,
    pub full_title: String,
    pub title_path: Vec<String>,
    pub parent: SuiteId,
    pub file: Option<String>,
    pub state: Option<RunState>,
    pub pending: bool,
    pub timed_out: bool,
    pub duration_ms: Option<u64>,
    pub speed: Option<Speed>,
    pub timeout_ms: u64,
    pub slow_ms: u64,
    pub current_retry: u32,
    pub retries: i32,
    pub retried_from: Option<RunnableId>,
}

impl RunnableInfo {
    /// Snapshots a runnable. For hooks, `current_test` is the title of the
    /// test the hook runs for and feeds the display title.
    pub fn snapshot(tree: &SuiteTree, id: RunnableId, current_test: Option<&str>) -> Self {
        let r = tree.runnable(id);
        let (title, hook_type) = match r.kind() {
            RunnableKind::Test => (r.title().to_string(), None),
            RunnableKind::Hook(hook_type) => {
                let suite = tree.suite(r.parent());
                (
                    display_title(r.title(), current_test, suite.title(), suite.is_root()),
                    Some(hook_type),
                )
            }
        };
        let mut title_path = tree.suite_title_path(r.parent());
        title_path.push(title.clone());
        Self {
            id,
            kind: r.kind().label(),
            hook_type,
            full_title: title_path.join(" "),
            title_path,
            title,
            parent: r.parent(),
            file: r.file().map(str::to_string),
            state: r.state(),
            pending: tree.is_runnable_pending(id),
            timed_out: r.timed_out(),
            duration_ms: r.duration().map(|d| d.as_millis() as u64),
            speed: r.speed(),
            timeout_ms: r.timeout(),
            slow_ms: r.slow(),
            current_retry: r.current_retry(),
            retries: r.retries(),
            retried_from: r.retried_from(),
        }
    }
}

/// Everything observable about a run.
/// 一次运行中所有可观察的事件。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RunBegin { total: usize },
    RunEnd { failures: usize },
    SuiteBegin { suite: SuiteInfo },
    SuiteEnd { suite: SuiteInfo },
    TestBegin { test: RunnableInfo },
    TestEnd { test: RunnableInfo },
    Pass { test: RunnableInfo },
    Fail { test: RunnableInfo, error: TestError },
    Pending { test: RunnableInfo },
    Retry { test: RunnableInfo, error: TestError },
    HookBegin { hook: RunnableInfo },
    HookEnd { hook: RunnableInfo },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RunBegin { .. } => "run_begin",
            Event::RunEnd { .. } => "run_end",
            Event::SuiteBegin { .. } => "suite_begin",
            Event::SuiteEnd { .. } => "suite_end",
            Event::TestBegin { .. } => "test_begin",
            Event::TestEnd { .. } => "test_end",
            Event::Pass { .. } => "pass",
            Event::Fail { .. } => "fail",
            Event::Pending { .. } => "pending",
            Event::Retry { .. } => "retry",
            Event::HookBegin { .. } => "hook_begin",
            Event::HookEnd { .. } => "hook_end",
        }
    }
}

/// A synchronous consumer of runner events.
pub trait EventListener: Send {
    fn on_event(&mut self, event: &Event);
}

impl<F> EventListener for F
where
    F: FnMut(&Event) + Send,
{
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

/// Fans events out to listeners, then to channel subscribers.
#[derive(Default)]
pub struct Emitter {
    listeners: Vec<Box<dyn EventListener>>,
    subscribers: Vec<UnboundedSender<Event>>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listeners.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl Emitter {
    pub fn add_listener(&mut self, listener: impl EventListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<Event> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: Event) {
        tracing::trace!(event = event.name(), "emit");
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
