//! # Execution Context / 执行上下文
//!
//! [`Context`] is what a body sees while it runs: its own titles, the test a
//! hook is running for, the suite-scoped value store, and the controls a body
//! may use on itself (skip, timeout, deferred error).
//!
//! [`Done`] is the completion handle of one execution attempt. The first call
//! settles the attempt; any later call is a `MultipleDone` incident routed to
//! the runner instead of a second completion.
//!
//! [`Context`] 是主体运行时看到的内容：自身标题、hook 当前服务的测试、
//! 套件作用域的值存储，以及主体可以作用于自身的控制（跳过、超时、延迟错误）。
//! [`Done`] 是单次执行尝试的完成句柄。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::core::errors::{EngineError, Pending, TestError};
use crate::core::suite::RunnableId;

/// Messages flowing from a running body to its attempt.
#[derive(Debug)]
pub(crate) enum Signal {
    Settled(Settlement),
    /// The body changed its own timeout; the timer is re-armed from now.
    Timeout(u64),
}

/// How an attempt was settled by its completion handle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settlement {
    Ok,
    Err(TestError),
    Skip,
}

/// Out-of-band reports delivered to the runner while a run is in progress.
/// 运行进行期间投递给运行器的带外报告。
#[derive(Debug)]
pub(crate) enum Incident {
    /// A panic with no synchronous origin.
    Uncaught(TestError),
    /// A second completion of an already settled attempt.
    MultipleDone { runnable: RunnableId, error: TestError },
}

/// Normalized argument of a completion call.
///
/// `()`, `false` and an empty string complete successfully, an error passes
/// through, and any other value becomes `done() invoked with non-Error`.
///
/// 完成调用参数的规范化形式。
#[derive(Debug)]
pub enum DoneArg {
    Ok,
    Error(anyhow::Error),
    Value(String),
}

impl From<()> for DoneArg {
    fn from(_: ()) -> Self {
        DoneArg::Ok
    }
}

impl From<anyhow::Error> for DoneArg {
    fn from(err: anyhow::Error) -> Self {
        DoneArg::Error(err)
    }
}

impl From<TestError> for DoneArg {
    fn from(err: TestError) -> Self {
        DoneArg::Error(anyhow::Error::new(err))
    }
}

impl From<bool> for DoneArg {
    fn from(value: bool) -> Self {
        if value {
            DoneArg::Value("true".to_string())
        } else {
            DoneArg::Ok
        }
    }
}

impl From<&str> for DoneArg {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            DoneArg::Ok
        } else {
            DoneArg::Value(value.to_string())
        }
    }
}

impl From<String> for DoneArg {
    fn from(value: String) -> Self {
        DoneArg::from(value.as_str())
    }
}

impl From<i64> for DoneArg {
    fn from(value: i64) -> Self {
        if value == 0 {
            DoneArg::Ok
        } else {
            DoneArg::Value(value.to_string())
        }
    }
}

impl<T: Into<DoneArg>> From<Option<T>> for DoneArg {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(DoneArg::Ok)
    }
}

impl DoneArg {
    pub(crate) fn into_settlement(self) -> Settlement {
        match self {
            DoneArg::Ok => Settlement::Ok,
            DoneArg::Error(err) if err.is::<Pending>() => Settlement::Skip,
            DoneArg::Error(err) => Settlement::Err(TestError::from_anyhow(err)),
            DoneArg::Value(repr) => Settlement::Err(TestError::NonError { repr }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Open,
    Settled,
    TimedOut,
}

/// Identity of the runnable behind an attempt, used to build MultipleDone.
#[derive(Debug, Clone)]
pub(crate) struct AttemptIdentity {
    pub id: RunnableId,
    pub kind: &'static str,
    pub full_title: String,
    pub parent_is_root: bool,
    pub file: Option<String>,
}

struct DoneInner {
    latch: Mutex<Latch>,
    reported_multiple: AtomicBool,
    overspecified: AtomicBool,
    signals: UnboundedSender<Signal>,
    incidents: UnboundedSender<Incident>,
    stopped: Arc<AtomicBool>,
    identity: AttemptIdentity,
}

/// Completion handle of one execution attempt. Cheap to clone; every clone
/// shares the same once-only latch.
///
/// 单次执行尝试的完成句柄。克隆开销很小，所有克隆共享同一个只触发一次的闩锁。
#[derive(Clone)]
pub struct Done {
    inner: Arc<DoneInner>,
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("runnable", &self.inner.identity.full_title)
            .field("latch", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl Done {
    pub(crate) fn new(
        signals: UnboundedSender<Signal>,
        incidents: UnboundedSender<Incident>,
        stopped: Arc<AtomicBool>,
        identity: AttemptIdentity,
    ) -> Self {
        Self {
            inner: Arc::new(DoneInner {
                latch: Mutex::new(Latch::Open),
                reported_multiple: AtomicBool::new(false),
                overspecified: AtomicBool::new(false),
                signals,
                incidents,
                stopped,
                identity,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Latch> {
        self.inner
            .latch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Completes the attempt with a normalized argument.
    pub fn call(&self, arg: impl Into<DoneArg>) {
        let mut settlement = arg.into().into_settlement();
        if settlement == Settlement::Ok && self.inner.overspecified.load(Ordering::SeqCst) {
            settlement = Settlement::Err(TestError::Overspecified);
        }
        self.settle(settlement);
    }

    /// Completes the attempt successfully.
    pub fn ok(&self) {
        self.call(());
    }

    /// Completes the attempt with an error.
    pub fn fail(&self, err: impl Into<anyhow::Error>) {
        self.call(DoneArg::Error(err.into()));
    }

    /// Marks the runnable pending and completes the attempt.
    pub fn skip(&self) {
        self.settle(Settlement::Skip);
    }

    pub(crate) fn mark_overspecified(&self) {
        self.inner.overspecified.store(true, Ordering::SeqCst);
    }

    pub(crate) fn settle(&self, settlement: Settlement) {
        let previous = {
            let mut latch = self.lock();
            let previous = *latch;
            if previous == Latch::Open {
                *latch = Latch::Settled;
            }
            previous
        };
        match previous {
            Latch::Open => {
                // The receiver lives as long as the attempt; a send error only
                // means the attempt was abandoned after settling elsewhere.
                let _ = self.inner.signals.send(Signal::Settled(settlement));
            }
            Latch::TimedOut => {
                tracing::debug!(
                    runnable = %self.inner.identity.full_title,
                    "completion after timeout ignored"
                );
            }
            Latch::Settled => self.multiple(settlement),
        }
    }

    /// Called by the attempt when its timer fires. Returns `false` when a
    /// completion already won the race.
    pub(crate) fn time_out(&self) -> bool {
        let mut latch = self.lock();
        if *latch == Latch::Open {
            *latch = Latch::TimedOut;
            true
        } else {
            false
        }
    }

    pub(crate) fn request_timeout(&self, ms: u64) {
        let _ = self.inner.signals.send(Signal::Timeout(ms));
    }

    fn multiple(&self, settlement: Settlement) {
        if self.inner.reported_multiple.swap(true, Ordering::SeqCst) {
            return;
        }
        let identity = &self.inner.identity;
        let original = match settlement {
            Settlement::Err(err) => Some(Box::new(err)),
            Settlement::Ok | Settlement::Skip => None,
        };
        let error = TestError::MultipleDone {
            kind: identity.kind.to_string(),
            title: identity.full_title.clone(),
            root: identity.parent_is_root,
            file: identity.file.clone(),
            original,
        };
        if self.inner.stopped.load(Ordering::SeqCst) {
            tracing::error!(runnable = %identity.full_title, "completion after the run stopped");
            panic!("{}", EngineError::CompletedAfterStop(error));
        }
        let incident = Incident::MultipleDone {
            runnable: identity.id,
            error,
        };
        if let Err(unsent) = self.inner.incidents.send(incident) {
            if let Incident::MultipleDone { error, .. } = unsent.0 {
                panic!("{}", EngineError::CompletedAfterStop(error));
            }
        }
    }
}

/// A value store shared by a suite, its hooks and tests; lookups fall back to
/// the enclosing suites.
///
/// 由套件及其 hook 和测试共享的值存储；查找会回退到外层套件。
#[derive(Clone, Default)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    parent: Option<Scope>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Scope").field("keys", &keys).finish()
    }
}

impl Scope {
    pub(crate) fn child(&self) -> Scope {
        Scope {
            inner: Arc::new(ScopeInner {
                values: Mutex::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        let found = self
            .inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        match found {
            Some(value) => value.downcast_ref::<T>().cloned(),
            None => self.inner.parent.as_ref().and_then(|p| p.get(key)),
        }
    }

    pub(crate) fn clear(&self) {
        self.inner
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The test a hook is running for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTest {
    pub title: String,
    pub full_title: String,
}

/// What a body receives while it runs.
/// 主体运行时接收到的上下文。
#[derive(Clone)]
pub struct Context {
    pub(crate) title: String,
    pub(crate) full_title: String,
    pub(crate) current_test: Option<CurrentTest>,
    pub(crate) timeout_ms: u64,
    pub(crate) current_retry: u32,
    pub(crate) scope: Scope,
    pub(crate) captured: Arc<Mutex<Option<TestError>>>,
    pub(crate) done: Done,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("full_title", &self.full_title)
            .field("current_test", &self.current_test)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn full_title(&self) -> &str {
        &self.full_title
    }

    /// For hooks: the test the hook is running for, if any.
    pub fn current_test(&self) -> Option<&CurrentTest> {
        self.current_test.as_ref()
    }

    pub fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the skip signal; `return Err(ctx.skip())` marks the runnable
    /// pending instead of failing it.
    pub fn skip(&self) -> anyhow::Error {
        anyhow::Error::new(Pending)
    }

    /// Changes this runnable's timeout while it runs and re-arms the timer.
    pub fn set_timeout(&mut self, ms: u64) {
        let ms = crate::core::runnable::clamp_timeout(ms);
        self.timeout_ms = ms;
        self.done.request_timeout(ms);
    }

    /// Records an error the runner reads after the body completes cleanly.
    /// Used from hooks to report a deferred assertion failure.
    pub fn record_error(&self, err: impl Into<anyhow::Error>) {
        let err = TestError::from_anyhow(err.into());
        *self.captured.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub(crate) fn take_captured(&self) -> Option<TestError> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
