//! # Runnable / 可运行单元
//!
//! A runnable is a test or a hook: a body plus timeout, slow threshold and
//! retry metadata. This module owns the execution contract of one attempt:
//! invoke the body once in its declared calling convention, race it against
//! the timer, and observe exactly one of success, failure, timeout or skip.
//!
//! runnable 是测试或 hook：一个主体加上超时、慢阈值和重试元数据。
//! 本模块负责单次尝试的执行约定：按声明的调用方式调用主体一次，
//! 与计时器竞争，并且只观察到成功、失败、超时或跳过中的一种结果。

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;

use crate::core::context::{
    AttemptIdentity, Context, CurrentTest, Done, Incident, Scope, Settlement, Signal,
};
use crate::core::errors::{Pending, TestError};
use crate::core::hook::HookType;
use crate::core::suite::{RunnableId, SuiteId};
use crate::infra::uncaught::{shielded, shielded_call};

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_SLOW_MS: u64 = 75;
const MAX_TIMEOUT_MS: u64 = (1 << 31) - 1;

/// Clamps a timeout into `[0, 2^31 - 1]`; both bounds mean "disabled".
pub fn clamp_timeout(ms: u64) -> u64 {
    if ms >= MAX_TIMEOUT_MS { 0 } else { ms }
}

type SyncFn = dyn Fn(&Context) -> anyhow::Result<()> + Send + Sync;
type CallbackFn = dyn Fn(Context, Done) -> CallbackReturn + Send + Sync;
type FutureFn = dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// The calling convention of a body, decided once at registration time.
/// 主体的调用方式，在注册时一次性确定。
#[derive(Clone)]
pub enum Body {
    /// Completes when the closure returns.
    Sync(Arc<SyncFn>),
    /// Completes when the [`Done`] handle is called.
    Callback(Arc<CallbackFn>),
    /// Completes when the returned future settles.
    Future(Arc<FutureFn>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Body::Sync(_) => "Sync",
            Body::Callback(_) => "Callback",
            Body::Future(_) => "Future",
        };
        write!(f, "Body::{kind}")
    }
}

impl Body {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Body::Sync(Arc::new(f))
    }

    pub fn callback<F, R>(f: F) -> Self
    where
        F: Fn(Context, Done) -> R + Send + Sync + 'static,
        R: Into<CallbackReturn>,
    {
        Body::Callback(Arc::new(move |ctx, done| f(ctx, done).into()))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Body::Future(Arc::new(move |ctx| f(ctx).boxed()))
    }

    /// Whether the body declares a completion parameter.
    pub fn is_async(&self) -> bool {
        matches!(self, Body::Callback(_))
    }
}

/// What a callback-style body handed back besides its completion handle.
pub enum CallbackReturn {
    Unit,
    /// The body failed before ever calling `done`.
    Threw(anyhow::Error),
    /// The body also returned a future: the resolution method is overspecified.
    Future(BoxFuture<'static, anyhow::Result<()>>),
}

impl From<()> for CallbackReturn {
    fn from(_: ()) -> Self {
        CallbackReturn::Unit
    }
}

impl From<anyhow::Result<()>> for CallbackReturn {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => CallbackReturn::Unit,
            Err(err) => CallbackReturn::Threw(err),
        }
    }
}

impl From<BoxFuture<'static, anyhow::Result<()>>> for CallbackReturn {
    fn from(future: BoxFuture<'static, anyhow::Result<()>>) -> Self {
        CallbackReturn::Future(future)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Passed,
    Failed,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Fast,
    Medium,
    Slow,
}

impl Speed {
    pub fn classify(duration: Duration, slow_ms: u64) -> Self {
        let ms = duration.as_millis() as u64;
        if ms > slow_ms {
            Speed::Slow
        } else if ms > slow_ms / 2 {
            Speed::Medium
        } else {
            Speed::Fast
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnableKind {
    Test,
    Hook(HookType),
}

impl RunnableKind {
    pub fn label(&self) -> &'static str {
        match self {
            RunnableKind::Test => "test",
            RunnableKind::Hook(_) => "hook",
        }
    }
}

/// A test or hook owned by the [`SuiteTree`](crate::core::suite::SuiteTree).
#[derive(Debug, Clone)]
pub struct Runnable {
    pub(crate) title: String,
    pub(crate) body: Option<Body>,
    pub(crate) kind: RunnableKind,
    pub(crate) parent: SuiteId,
    pub(crate) file: Option<String>,
    pub(crate) timeout_ms: u64,
    pub(crate) slow_ms: u64,
    pub(crate) retries: i32,
    pub(crate) current_retry: u32,
    /// Declared pending: no body, or registered as skipped.
    pub(crate) pending: bool,
    /// Marked pending at run time by a skip.
    pub(crate) skipped: bool,
    pub(crate) state: Option<RunState>,
    pub(crate) timed_out: bool,
    pub(crate) duration: Option<Duration>,
    pub(crate) error: Option<TestError>,
    pub(crate) speed: Option<Speed>,
    pub(crate) globals: Vec<String>,
    pub(crate) retried_from: Option<RunnableId>,
}

impl Runnable {
    pub(crate) fn new(title: impl Into<String>, body: Option<Body>, kind: RunnableKind, parent: SuiteId) -> Self {
        let pending = body.is_none();
        Self {
            title: title.into(),
            body,
            kind,
            parent,
            file: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            slow_ms: DEFAULT_SLOW_MS,
            retries: -1,
            current_retry: 0,
            pending,
            skipped: false,
            state: None,
            timed_out: false,
            duration: None,
            error: None,
            speed: None,
            globals: Vec::new(),
            retried_from: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn kind(&self) -> RunnableKind {
        self.kind
    }

    pub fn parent(&self) -> SuiteId {
        self.parent
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    pub fn set_timeout(&mut self, ms: u64) {
        self.timeout_ms = clamp_timeout(ms);
    }

    pub fn slow(&self) -> u64 {
        self.slow_ms
    }

    pub fn set_slow(&mut self, ms: u64) {
        self.slow_ms = ms;
    }

    /// Retry budget; `-1` means unset and behaves as zero.
    pub fn retries(&self) -> i32 {
        self.retries
    }

    pub fn set_retries(&mut self, n: i32) {
        self.retries = n;
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry
    }

    pub fn state(&self) -> Option<RunState> {
        self.state
    }

    pub fn is_passed(&self) -> bool {
        self.state == Some(RunState::Passed)
    }

    pub fn is_failed(&self) -> bool {
        self.state == Some(RunState::Failed)
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn error(&self) -> Option<&TestError> {
        self.error.as_ref()
    }

    pub fn speed(&self) -> Option<Speed> {
        self.speed
    }

    pub fn retried_from(&self) -> Option<RunnableId> {
        self.retried_from
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Clears run state before an attempt or a fresh run.
    pub(crate) fn reset(&mut self) {
        self.skipped = false;
        self.state = None;
        self.timed_out = false;
        self.duration = None;
        self.error = None;
        self.speed = None;
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.timed_out = false;
        self.duration = None;
        self.error = None;
        if matches!(self.kind, RunnableKind::Hook(_)) {
            self.state = None;
        }
    }

    /// Invokes the body once and returns the attempt that observes it.
    ///
    /// Sync bodies (and the synchronous part of callback bodies) run inline;
    /// future bodies are spawned so that a timed-out body keeps running and
    /// can still trip the MultipleDone check.
    pub(crate) fn start(&self, env: AttemptEnv) -> Attempt {
        let (signals, rx) = unbounded_channel();
        let done = Done::new(signals, env.incidents, env.stopped, env.identity);
        let ctx = Context {
            title: self.title.clone(),
            full_title: env.full_title,
            current_test: env.current_test,
            timeout_ms: self.timeout_ms,
            current_retry: self.current_retry,
            scope: env.scope,
            captured: Arc::new(Mutex::new(None)),
            done: done.clone(),
        };
        let attempt = Attempt {
            done: done.clone(),
            ctx: ctx.clone(),
            rx,
            started: Instant::now(),
            timeout_ms: self.timeout_ms,
            deadline: deadline_from(Instant::now(), self.timeout_ms),
            file: self.file.clone(),
        };

        match &self.body {
            None => done.settle(Settlement::Skip),
            Some(Body::Sync(f)) => {
                // A sync body still runs under async-only; only a clean return is rejected.
                let settlement = match shielded_call(|| f(&ctx)) {
                    Ok(Ok(())) if env.async_only => Settlement::Err(TestError::AsyncOnly),
                    Ok(Ok(())) => Settlement::Ok,
                    Ok(Err(err)) if err.is::<Pending>() => Settlement::Skip,
                    Ok(Err(err)) => Settlement::Err(TestError::from_anyhow(err)),
                    Err(payload) => Settlement::Err(TestError::from_panic(payload.as_ref())),
                };
                done.settle(settlement);
            }
            Some(Body::Callback(f)) => match shielded_call(|| f(ctx.clone(), done.clone())) {
                Ok(CallbackReturn::Unit) => {}
                Ok(CallbackReturn::Threw(err)) if err.is::<Pending>() => done.settle(Settlement::Skip),
                Ok(CallbackReturn::Threw(err)) => done.fail(err),
                Ok(CallbackReturn::Future(future)) => {
                    done.mark_overspecified();
                    tokio::spawn(async move {
                        let _ = shielded(future).await;
                    });
                }
                Err(payload) => done.settle(Settlement::Err(TestError::from_panic(payload.as_ref()))),
            },
            Some(Body::Future(f)) => {
                let spawn_done = done.clone();
                match shielded_call(|| f(ctx.clone())) {
                    Ok(future) => {
                        tokio::spawn(async move {
                            let settlement = match shielded(future).await {
                                Ok(Ok(())) => Settlement::Ok,
                                Ok(Err(err)) if err.is::<Pending>() => Settlement::Skip,
                                Ok(Err(err)) => {
                                    let err = TestError::from_anyhow(err);
                                    if err.to_string().is_empty() {
                                        Settlement::Err(TestError::FalsyRejection)
                                    } else {
                                        Settlement::Err(err)
                                    }
                                }
                                Err(payload) => Settlement::Err(TestError::from_panic(payload.as_ref())),
                            };
                            spawn_done.settle(settlement);
                        });
                    }
                    Err(payload) => done.settle(Settlement::Err(TestError::from_panic(payload.as_ref()))),
                }
            }
        }
        attempt
    }
}

fn deadline_from(now: Instant, timeout_ms: u64) -> Option<Instant> {
    (timeout_ms > 0).then(|| now + Duration::from_millis(timeout_ms))
}

/// Everything an attempt needs from its runner.
pub(crate) struct AttemptEnv {
    pub identity: AttemptIdentity,
    pub full_title: String,
    pub current_test: Option<CurrentTest>,
    pub scope: Scope,
    pub incidents: UnboundedSender<Incident>,
    pub stopped: Arc<AtomicBool>,
    pub async_only: bool,
}

/// The observed result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    Passed,
    Failed(TestError),
    TimedOut(TestError),
    Skipped,
}

#[derive(Debug, Clone)]
pub(crate) struct Outcome {
    pub verdict: Verdict,
    pub duration: Duration,
    pub captured: Option<TestError>,
}

/// One in-flight execution of a runnable's body.
/// 主体的一次进行中的执行。
pub(crate) struct Attempt {
    done: Done,
    ctx: Context,
    rx: UnboundedReceiver<Signal>,
    started: Instant,
    timeout_ms: u64,
    deadline: Option<Instant>,
    file: Option<String>,
}

impl Attempt {
    pub(crate) fn done(&self) -> &Done {
        &self.done
    }

    /// Waits for the first completion or the timer. Cancel-safe: dropping the
    /// future between polls loses nothing, the deadline lives on `self`.
    pub(crate) async fn settle(&mut self) -> Outcome {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                signal = self.rx.recv() => match signal {
                    Some(Signal::Settled(settlement)) => return self.finish(settlement),
                    Some(Signal::Timeout(ms)) => {
                        self.timeout_ms = ms;
                        self.deadline = deadline_from(Instant::now(), ms);
                    }
                    // The attempt holds a sender through `done`, so the channel
                    // cannot close while we wait.
                    None => return self.finish(Settlement::Err(TestError::assertion("completion channel closed"))),
                },
                _ = sleep_until(deadline) => {
                    if self.done.time_out() {
                        return Outcome {
                            verdict: Verdict::TimedOut(self.timeout_error()),
                            duration: self.started.elapsed(),
                            captured: self.ctx.take_captured(),
                        };
                    }
                    // A completion won the race and is already queued.
                    self.deadline = None;
                }
            }
        }
    }

    fn finish(&mut self, settlement: Settlement) -> Outcome {
        let duration = self.started.elapsed();
        let verdict = match settlement {
            Settlement::Ok if self.timeout_ms > 0 && duration > Duration::from_millis(self.timeout_ms) => {
                Verdict::Failed(self.timeout_error())
            }
            Settlement::Ok => Verdict::Passed,
            Settlement::Err(err) => Verdict::Failed(err),
            Settlement::Skip => Verdict::Skipped,
        };
        Outcome {
            verdict,
            duration,
            captured: self.ctx.take_captured(),
        }
    }

    fn timeout_error(&self) -> TestError {
        TestError::Timeout {
            ms: self.timeout_ms,
            file: self.file.clone(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
