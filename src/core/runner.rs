//! # Runner / 运行器
//!
//! The runner walks one [`SuiteTree`] depth-first: "before all" hooks, then
//! the suite's tests wrapped in "before each"/"after each" chains, then child
//! suites, then "after all" hooks. Every step is reported as an [`Event`].
//!
//! Its state machine is `Idle -> Running -> Stopped`. A stopped runner must be
//! [`reset`](Runner::reset) before it runs again.
//!
//! Out-of-band incidents (uncaught panics, second completions) arrive on a
//! channel and are handled while a runnable is awaited and at every scheduler
//! yield point. They are attributed to `current_runnable`, the unit the runner
//! believes is executing right now.
//!
//! 运行器以深度优先方式遍历一棵 [`SuiteTree`]：先执行 "before all" 钩子，
//! 然后是被 "before each"/"after each" 链包裹的测试，接着是子套件，
//! 最后是 "after all" 钩子。每一步都以 [`Event`] 报告。
//! 状态机为 `Idle -> Running -> Stopped`；停止后必须先 [`reset`](Runner::reset) 才能再次运行。
//! 带外事件（未捕获的 panic、重复完成）通过通道到达，并归属到 `current_runnable`。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::core::config::RunnerOptions;
use crate::core::context::{AttemptIdentity, CurrentTest, Done, Incident};
use crate::core::errors::{EngineError, TestError};
use crate::core::events::{Emitter, Event, EventListener, RunnableInfo, SuiteInfo};
use crate::core::hook::HookType;
use crate::core::runnable::{AttemptEnv, Outcome, RunState, RunnableKind, Speed, Verdict};
use crate::core::stats::{Stats, StatsCollector};
use crate::core::suite::{RunnableId, SuiteId, SuiteTree};
use crate::infra::globals::LeakDetector;
use crate::infra::uncaught;

/// Title of the runnable that carries a panic no registered unit can own.
pub const UNCAUGHT_OUTSIDE_TITLE: &str = "Uncaught error outside test suite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Idle,
    Running,
    Stopped,
}

/// What [`Runner::run`] resolves to, once, after `RunEnd`.
/// [`Runner::run`] 在 `RunEnd` 之后只返回一次的结果。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub failures: usize,
    pub total: usize,
    pub stats: Stats,
}

/// Why a hook chain stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookAbort {
    /// A hook failed (including a forbidden skip).
    Failed,
    /// A "before each" hook skipped the current test.
    Skipped,
}

enum Step {
    Settled(Outcome),
    Incident(Incident),
}

pub struct Runner {
    tree: SuiteTree,
    options: RunnerOptions,
    grep: Option<Regex>,
    total: usize,
    failures: usize,
    state: RunnerState,
    emitter: Emitter,
    stats: StatsCollector,
    current_runnable: Option<RunnableId>,
    current_suite: SuiteId,
    current_test: Option<RunnableId>,
    /// The test the running hook was started for; feeds hook display titles.
    hook_test: Option<RunnableId>,
    abort: CancellationToken,
    leaks: Option<LeakDetector>,
    incident_tx: UnboundedSender<Incident>,
    incident_rx: UnboundedReceiver<Incident>,
    stopped: Arc<AtomicBool>,
    live: Option<(RunnableId, Done)>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("state", &self.state)
            .field("total", &self.total)
            .field("failures", &self.failures)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(tree: SuiteTree, options: RunnerOptions) -> Self {
        let (incident_tx, incident_rx) = unbounded_channel();
        let stats = StatsCollector::new();
        let mut emitter = Emitter::default();
        emitter.add_listener(stats.clone());
        let root = tree.root();
        Self {
            tree,
            options,
            grep: None,
            total: 0,
            failures: 0,
            state: RunnerState::Idle,
            emitter,
            stats,
            current_runnable: None,
            current_suite: root,
            current_test: None,
            hook_test: None,
            abort: CancellationToken::new(),
            leaks: None,
            incident_tx,
            incident_rx,
            stopped: Arc::new(AtomicBool::new(false)),
            live: None,
        }
    }

    pub fn tree(&self) -> &SuiteTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SuiteTree {
        &mut self.tree
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Grep-filtered test count of the current run.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn add_listener(&mut self, listener: impl EventListener + 'static) {
        self.emitter.add_listener(listener);
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<Event> {
        self.emitter.subscribe()
    }

    pub fn event_stream(&mut self) -> UnboundedReceiverStream<Event> {
        UnboundedReceiverStream::new(self.subscribe())
    }

    /// Stops scheduling new work at the next check point. Work in flight is
    /// not interrupted.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// A handle that aborts this run when cancelled.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Returns a stopped runner to `Idle`, clearing all run state in the tree.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.state == RunnerState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        self.tree.reset();
        self.state = RunnerState::Idle;
        self.total = 0;
        self.failures = 0;
        self.current_runnable = None;
        self.current_suite = self.tree.root();
        self.current_test = None;
        self.hook_test = None;
        self.abort = CancellationToken::new();
        self.stopped = Arc::new(AtomicBool::new(false));
        self.leaks = None;
        self.stats.clear();
        while self.incident_rx.try_recv().is_ok() {}
        Ok(())
    }

    /// Runs the whole tree once.
    pub async fn run(&mut self) -> Result<RunReport, EngineError> {
        match self.state {
            RunnerState::Running => return Err(EngineError::AlreadyRunning),
            RunnerState::Stopped => return Err(EngineError::AlreadyStopped),
            RunnerState::Idle => {}
        }
        let root = self.tree.root();
        if self.options.forbid_only && self.tree.has_only(root) {
            return Err(EngineError::ForbiddenOnly);
        }
        self.grep = self.options.grep.as_deref().map(Regex::new).transpose()?;
        if self.options.bail {
            let mut suites = vec![root];
            while let Some(id) = suites.pop() {
                self.tree.suite_mut(id).set_bail(true);
                suites.extend_from_slice(self.tree.suite(id).suites());
            }
        }

        let guard = uncaught::listen(self.incident_tx.clone());

        if self.tree.has_only(root) {
            self.tree.filter_only(root);
        }
        self.total = self.tree.grep_total(root, self.grep.as_ref(), self.options.invert);
        self.leaks = self
            .options
            .check_leaks
            .then(|| LeakDetector::new(&self.options.globals));
        self.state = RunnerState::Running;
        tracing::debug!(total = self.total, "run begins");

        self.emit(Event::RunBegin { total: self.total });
        self.immediately().await;
        self.run_suite(root).await;
        self.drain_incidents();

        if self.total == 0 && self.options.fail_zero {
            self.failures = 1;
        }
        self.current_runnable = None;
        self.state = RunnerState::Stopped;
        self.stopped.store(true, Ordering::SeqCst);
        tracing::debug!(failures = self.failures, "run ends");
        self.emit(Event::RunEnd {
            failures: self.failures,
        });
        drop(guard);

        Ok(RunReport {
            failures: self.failures,
            total: self.total,
            stats: self.stats.snapshot(),
        })
    }

    fn emit(&mut self, event: Event) {
        self.emitter.emit(event);
    }

    fn info(&self, id: RunnableId) -> RunnableInfo {
        let hook_test = match self.tree.runnable(id).kind() {
            RunnableKind::Hook(_) => self.hook_test.map(|t| self.tree.runnable(t).title().to_string()),
            RunnableKind::Test => None,
        };
        RunnableInfo::snapshot(&self.tree, id, hook_test.as_deref())
    }

    /// The scheduler's yield point: lets spawned work run, then handles
    /// whatever incidents it produced.
    async fn immediately(&mut self) {
        tokio::task::yield_now().await;
        self.drain_incidents();
    }

    fn drain_incidents(&mut self) {
        while let Ok(incident) = self.incident_rx.try_recv() {
            self.handle_incident(incident);
        }
    }

    fn handle_incident(&mut self, incident: Incident) {
        match incident {
            Incident::Uncaught(error) => self.uncaught(error),
            Incident::MultipleDone { runnable, error } => self.fail(runnable, error, false),
        }
    }

    /// Attributes a panic that escaped every body to the current runnable.
    fn uncaught(&mut self, error: TestError) {
        tracing::warn!(%error, "uncaught panic");
        let Some(id) = self.current_runnable else {
            let phony = self.tree.add_detached(self.current_suite, UNCAUGHT_OUTSIDE_TITLE);
            self.fail(phony, error, false);
            return;
        };
        let runnable = self.tree.runnable(id);
        let (failed, passed) = (runnable.is_failed(), runnable.is_passed());
        if failed {
            tracing::debug!(runnable = %self.tree.full_title(id), "already failed; uncaught panic ignored");
            return;
        }
        if self.tree.is_runnable_pending(id) {
            self.fail(id, error, true);
            return;
        }
        if passed {
            tracing::warn!(runnable = %self.tree.full_title(id), "failure after pass; aborting the run");
            self.fail(id, error, false);
            self.abort();
            return;
        }
        let live = self
            .live
            .as_ref()
            .filter(|(live_id, _)| *live_id == id)
            .map(|(_, done)| done.clone());
        match live {
            Some(done) => done.fail(error),
            None => self.fail(id, error, false),
        }
    }

    fn fail(&mut self, id: RunnableId, error: TestError, force: bool) {
        if self.tree.is_runnable_pending(id) && !force {
            tracing::debug!(runnable = %self.tree.full_title(id), %error, "failure of a pending runnable ignored");
            return;
        }
        self.failures += 1;
        tracing::debug!(failures = self.failures, "failure recorded");
        let runnable = self.tree.runnable_mut(id);
        runnable.state = Some(RunState::Failed);
        runnable.error = Some(error.clone());
        let test = self.info(id);
        self.emit(Event::Fail { test, error });
    }

    fn check_globals(&mut self, id: RunnableId) {
        let Some(detector) = self.leaks.as_mut() else {
            return;
        };
        let extra = self.tree.runnable(id).globals.clone();
        let names = detector.check(&extra);
        if !names.is_empty() {
            self.fail(id, TestError::GlobalLeak { names }, false);
        }
    }

    fn emit_test_end(&mut self, id: RunnableId) {
        let test = self.info(id);
        self.emit(Event::TestEnd { test });
        self.check_globals(id);
    }

    fn report_pending(&mut self, id: RunnableId) {
        if self.options.forbid_pending {
            self.fail(id, TestError::PendingForbidden, true);
        } else {
            self.tree.runnable_mut(id).state = Some(RunState::Pending);
            let test = self.info(id);
            self.emit(Event::Pending { test });
        }
    }

    fn attempt_env(&self, id: RunnableId, ctx_test: Option<RunnableId>) -> AttemptEnv {
        let runnable = self.tree.runnable(id);
        let parent = self.tree.suite(runnable.parent());
        let full_title = self.tree.full_title(id);
        AttemptEnv {
            identity: AttemptIdentity {
                id,
                kind: runnable.kind().label(),
                full_title: full_title.clone(),
                parent_is_root: parent.is_root(),
                file: runnable.file().map(str::to_string),
            },
            full_title,
            current_test: ctx_test.map(|t| CurrentTest {
                title: self.tree.runnable(t).title().to_string(),
                full_title: self.tree.full_title(t),
            }),
            scope: parent.scope().clone(),
            incidents: self.incident_tx.clone(),
            stopped: self.stopped.clone(),
            async_only: self.options.async_only && matches!(runnable.kind(), RunnableKind::Test),
        }
    }

    /// Runs one attempt of a runnable, handling incidents while it is awaited.
    async fn execute(&mut self, id: RunnableId, ctx_test: Option<RunnableId>) -> Outcome {
        self.tree.runnable_mut(id).begin_attempt();
        let env = self.attempt_env(id, ctx_test);
        let mut attempt = self.tree.runnable(id).start(env);
        self.live = Some((id, attempt.done().clone()));

        let outcome = loop {
            let step = {
                let incidents = &mut self.incident_rx;
                tokio::select! {
                    biased;
                    outcome = attempt.settle() => Step::Settled(outcome),
                    Some(incident) = incidents.recv() => Step::Incident(incident),
                }
            };
            match step {
                Step::Settled(outcome) => break outcome,
                Step::Incident(incident) => self.handle_incident(incident),
            }
        };
        self.live = None;

        let runnable = self.tree.runnable_mut(id);
        runnable.duration = Some(outcome.duration);
        runnable.timed_out = match &outcome.verdict {
            Verdict::TimedOut(_) => true,
            Verdict::Failed(err) => err.is_timeout(),
            Verdict::Passed | Verdict::Skipped => false,
        };
        outcome
    }

    /// Runs the current suite's hooks of one type, in registration order.
    async fn hook(&mut self, hook_type: HookType) -> Result<(), HookAbort> {
        self.immediately().await;
        let suite_id = self.current_suite;
        if self.tree.is_pending(suite_id) {
            return Ok(());
        }
        let hooks = self.tree.suite(suite_id).hooks(hook_type).to_vec();

        for hook_id in hooks {
            self.current_runnable = Some(hook_id);
            let suite = self.tree.suite(suite_id);
            let ctx_test = match hook_type {
                HookType::BeforeAll => suite.tests().first().copied(),
                HookType::AfterAll => suite.tests().last().copied(),
                HookType::BeforeEach | HookType::AfterEach => self.current_test,
            };
            self.hook_test = ctx_test;
            let hook = self.info(hook_id);
            self.emit(Event::HookBegin { hook });

            let outcome = self.execute(hook_id, ctx_test).await;
            if let Some(captured) = outcome.captured {
                // Only "each" hooks run on behalf of a test.
                let target = match self.current_test {
                    Some(test) if hook_type.is_each() => test,
                    _ => hook_id,
                };
                self.fail(target, captured, false);
            }

            match outcome.verdict {
                Verdict::Passed => {
                    let runnable = self.tree.runnable_mut(hook_id);
                    if !runnable.is_failed() {
                        runnable.state = Some(RunState::Passed);
                    }
                }
                Verdict::Skipped if !hook_type.allows_skip() => {
                    let error = TestError::SkipForbidden {
                        hook: hook_type.label().to_string(),
                    };
                    self.fail(hook_id, error, false);
                    return Err(HookAbort::Failed);
                }
                Verdict::Skipped if hook_type.is_each() => {
                    if let Some(test) = self.current_test {
                        self.tree.runnable_mut(test).skipped = true;
                    }
                    self.emit_hook_end(hook_id);
                    return Err(HookAbort::Skipped);
                }
                Verdict::Skipped => {
                    tracing::debug!(suite = %self.tree.suite_full_title(suite_id), "suite skipped from its before all hook");
                    let suite = self.tree.suite(suite_id);
                    let tests = suite.tests().to_vec();
                    let children = suite.suites().to_vec();
                    for test in tests {
                        self.tree.runnable_mut(test).skipped = true;
                    }
                    for child in children {
                        self.tree.suite_mut(child).skipped = true;
                    }
                    self.emit_hook_end(hook_id);
                    break;
                }
                Verdict::Failed(error) | Verdict::TimedOut(error) => {
                    self.fail(hook_id, error, false);
                    return Err(HookAbort::Failed);
                }
            }
            self.emit_hook_end(hook_id);
        }
        self.hook_test = None;
        Ok(())
    }

    fn emit_hook_end(&mut self, id: RunnableId) {
        let hook = self.info(id);
        self.emit(Event::HookEnd { hook });
        self.check_globals(id);
    }

    /// Runs a hook type across `suites`, taking them from the back. On
    /// failure, returns the suite whose hook failed.
    async fn hooks(&mut self, hook_type: HookType, mut suites: Vec<SuiteId>) -> Result<(), (HookAbort, SuiteId)> {
        let orig = self.current_suite;
        while let Some(suite) = suites.pop() {
            self.current_suite = suite;
            if let Err(abort) = self.hook(hook_type).await {
                let err_suite = self.current_suite;
                self.current_suite = orig;
                return Err((abort, err_suite));
            }
        }
        self.current_suite = orig;
        Ok(())
    }

    /// The current suite followed by its ancestors up to the root.
    fn lineage(&self) -> Vec<SuiteId> {
        let mut lineage = vec![self.current_suite];
        let mut cursor = self.tree.suite(self.current_suite).parent();
        while let Some(id) = cursor {
            lineage.push(id);
            cursor = self.tree.suite(id).parent();
        }
        lineage
    }

    /// Current suite first, then outward to the root.
    async fn hook_up(&mut self, hook_type: HookType) -> Result<(), (HookAbort, SuiteId)> {
        let mut suites = self.lineage();
        suites.reverse();
        self.hooks(hook_type, suites).await
    }

    /// Root first, then inward to the current suite.
    async fn hook_down(&mut self, hook_type: HookType) -> Result<(), (HookAbort, SuiteId)> {
        let suites = self.lineage();
        self.hooks(hook_type, suites).await
    }

    /// An "each" hook of `err_suite` failed: run the "after each" hooks above
    /// the failure point once, then report the suite the loop resumes at.
    /// A failed "after each" resumes from the parent, a failed "before each"
    /// from the failing suite itself.
    async fn hook_err(&mut self, mut err_suite: SuiteId, mut after: bool) -> SuiteId {
        loop {
            let start = if after {
                self.tree.suite(err_suite).parent()
            } else {
                Some(err_suite)
            };
            let Some(start) = start else {
                return err_suite;
            };
            let orig = self.current_suite;
            self.current_suite = start;
            let up = self.hook_up(HookType::AfterEach).await;
            self.current_suite = orig;
            match up {
                Ok(()) => return err_suite,
                Err((_, failed_at)) => {
                    err_suite = failed_at;
                    after = true;
                }
            }
        }
    }

    /// Runs the tests of `suite`. Returns the suite whose "each" hook failed,
    /// if any.
    async fn run_tests(&mut self, suite: SuiteId) -> Option<SuiteId> {
        let mut queue: VecDeque<RunnableId> = self.tree.suite(suite).tests().iter().copied().collect();
        let mut after_each_failed: Option<SuiteId> = None;

        loop {
            if self.failures > 0 && self.tree.suite(suite).bail() {
                queue.clear();
            }
            if self.abort.is_cancelled() {
                return None;
            }
            if let Some(err_suite) = after_each_failed.take() {
                return Some(self.hook_err(err_suite, true).await);
            }
            let Some(test) = queue.pop_front() else {
                return None;
            };

            if !self
                .tree
                .matches_grep(test, self.grep.as_ref(), self.options.invert)
            {
                if self.grep.is_some() {
                    self.immediately().await;
                }
                continue;
            }

            if self.tree.is_runnable_pending(test) {
                self.report_pending(test);
                self.emit_test_end(test);
                continue;
            }

            self.current_test = Some(test);
            let info = self.info(test);
            self.emit(Event::TestBegin { test: info });

            let down = self.hook_down(HookType::BeforeEach).await;
            if self.tree.is_runnable_pending(test) {
                self.report_pending(test);
                self.emit_test_end(test);
                // Cleanup starts where the skip happened; inner hooks never set up.
                let orig = self.current_suite;
                if let Err((_, err_suite)) = down {
                    self.current_suite = err_suite;
                }
                let up = self.hook_up(HookType::AfterEach).await;
                self.current_suite = orig;
                if let Err((_, err_suite)) = up {
                    after_each_failed = Some(err_suite);
                }
                continue;
            }
            if let Err((_, err_suite)) = down {
                return Some(self.hook_err(err_suite, false).await);
            }

            self.current_runnable = Some(test);
            let Outcome {
                verdict, captured, ..
            } = self.execute(test, None).await;
            let verdict = match (verdict, captured) {
                (Verdict::Passed, Some(captured)) => Verdict::Failed(captured),
                (verdict, _) => verdict,
            };

            match verdict {
                Verdict::Skipped => {
                    self.tree.runnable_mut(test).skipped = true;
                    self.report_pending(test);
                    self.emit_test_end(test);
                }
                Verdict::Failed(error) | Verdict::TimedOut(error) => {
                    let runnable = self.tree.runnable(test);
                    if (runnable.current_retry() as i64) < runnable.retries() as i64 {
                        let clone = self.tree.substitute_retry(test);
                        tracing::debug!(test = %self.tree.full_title(test), retry = self.tree.runnable(clone).current_retry(), "retrying");
                        queue.push_front(clone);
                        let info = self.info(test);
                        self.emit(Event::Retry { test: info, error });
                    } else {
                        self.fail(test, error, false);
                        self.emit_test_end(test);
                    }
                }
                Verdict::Passed => {
                    if self.tree.runnable(test).is_failed() {
                        // An incident already failed this attempt.
                        self.emit_test_end(test);
                    } else {
                        let runnable = self.tree.runnable_mut(test);
                        runnable.state = Some(RunState::Passed);
                        let slow = runnable.slow_ms;
                        runnable.speed = runnable.duration.map(|d| Speed::classify(d, slow));
                        let info = self.info(test);
                        self.emit(Event::Pass { test: info });
                        self.emit_test_end(test);
                    }
                }
            }

            if let Err((_, err_suite)) = self.hook_up(HookType::AfterEach).await {
                after_each_failed = Some(err_suite);
            }
        }
    }

    /// Runs `suite` and its descendants. Returns an ancestor whose "each" hook
    /// failed, so that the ancestor's own loop resumes there.
    fn run_suite(&mut self, suite: SuiteId) -> BoxFuture<'_, Option<SuiteId>> {
        async move {
            let total = self.tree.grep_total(suite, self.grep.as_ref(), self.options.invert);
            if total == 0 || (self.failures > 0 && self.tree.suite(suite).bail()) {
                tracing::debug!(suite = %self.tree.suite_full_title(suite), total, "suite not entered");
                return None;
            }

            self.current_suite = suite;
            self.current_test = None;
            let info = SuiteInfo::snapshot(&self.tree, suite);
            self.emit(Event::SuiteBegin { suite: info });

            let mut propagate = None;
            if self.hook(HookType::BeforeAll).await.is_ok() {
                let mut err_suite = self.run_tests(suite).await;
                let children = self.tree.suite(suite).suites().to_vec();
                let mut next = children.into_iter();
                loop {
                    if let Some(failed_at) = err_suite {
                        if failed_at != suite {
                            propagate = Some(failed_at);
                        }
                        break;
                    }
                    if self.abort.is_cancelled() {
                        break;
                    }
                    let Some(child) = next.next() else {
                        break;
                    };
                    if self.grep.is_some() {
                        self.immediately().await;
                    }
                    err_suite = self.run_suite(child).await;
                }
            }

            self.current_suite = suite;
            self.current_test = None;
            let _ = self.hook(HookType::AfterAll).await;
            let info = SuiteInfo::snapshot(&self.tree, suite);
            self.emit(Event::SuiteEnd { suite: info });
            if self.options.clean_references_after_run {
                self.tree.clean_references(suite);
            }
            propagate
        }
        .boxed()
    }
}
