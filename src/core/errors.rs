//! # Error Taxonomy / 错误分类
//!
//! Every failure the engine reports is a [`TestError`] attached to a specific
//! runnable. Lifecycle and configuration problems of the runner itself are
//! [`EngineError`]s and never travel through the event stream.
//!
//! 引擎报告的每一个失败都是附加在某个具体 runnable 上的 [`TestError`]。
//! 运行器自身的生命周期与配置问题属于 [`EngineError`]，不会经过事件流。

use serde::Serialize;
use std::any::Any;
use thiserror::Error;

/// Failure kinds surfaced against a runnable.
/// 针对 runnable 报告的失败类型。
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TestError {
    /// The body returned an error, panicked, or rejected.
    /// 主体返回错误、发生 panic 或被拒绝。
    #[error("{message}")]
    Assertion { message: String },

    /// The runnable did not complete within its timeout.
    /// runnable 未能在超时时间内完成。
    #[error(
        "Timeout of {ms}ms exceeded. For async tests and hooks, ensure \"done()\" is called; if returning a future, ensure it resolves.{}",
        file_suffix(.file)
    )]
    Timeout { ms: u64, file: Option<String> },

    /// The completion handle was invoked more than once in one attempt.
    /// 在同一次尝试中完成句柄被调用了多次。
    #[error(
        "done() called multiple times in {kind} <{title}>{}",
        multiple_done_suffix(.root, .file, .original)
    )]
    MultipleDone {
        kind: String,
        title: String,
        root: bool,
        file: Option<String>,
        original: Option<Box<TestError>>,
    },

    #[error("Pending test forbidden")]
    PendingForbidden,

    /// `skip()` was used from a hook position that does not allow it.
    /// 在不允许的 hook 位置调用了 `skip()`。
    #[error("`skip()` forbidden in {hook} hook")]
    SkipForbidden { hook: String },

    /// A panic raised outside any body the engine was polling.
    /// 在引擎未轮询的任何主体之外引发的 panic。
    #[error("{message}")]
    Uncaught { message: String },

    #[error("done() invoked with non-Error: {repr}")]
    NonError { repr: String },

    #[error("Resolution method is overspecified. Specify a callback *or* return a future; not both.")]
    Overspecified,

    #[error("Promise rejected with no or falsy reason")]
    FalsyRejection,

    #[error("--async-only option in use without declaring done() or returning a future")]
    AsyncOnly,

    #[error("global leak(s) detected: {}", quote_all(.names))]
    GlobalLeak { names: Vec<String> },
}

fn file_suffix(file: &Option<String>) -> String {
    file.as_ref()
        .map(|f| format!(" ({f})"))
        .unwrap_or_default()
}

fn multiple_done_suffix(
    root: &bool,
    file: &Option<String>,
    original: &Option<Box<TestError>>,
) -> String {
    let mut suffix = String::new();
    if *root {
        suffix.push_str(" (of root suite)");
    }
    if let Some(file) = file {
        suffix.push_str(&format!(" of file {file}"));
    }
    if let Some(original) = original {
        suffix.push_str(&format!("; in addition, done() received error: {original}"));
    }
    suffix
}

fn quote_all(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl TestError {
    /// Builds an assertion failure from any displayable message.
    pub fn assertion(message: impl Into<String>) -> Self {
        TestError::Assertion {
            message: message.into(),
        }
    }

    /// Converts an error returned by a body. Errors that already are a
    /// `TestError` keep their kind; everything else is an assertion failure
    /// carrying the full context chain.
    ///
    /// 转换主体返回的错误。已经是 `TestError` 的错误保持其类型，
    /// 其余错误都成为携带完整上下文链的断言失败。
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast::<TestError>() {
            Ok(test_error) => test_error,
            Err(other) => TestError::Assertion {
                message: format!("{other:#}"),
            },
        }
    }

    /// Converts a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        TestError::Assertion {
            message: panic_message(payload),
        }
    }

    /// Stable machine-readable code, matching the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            TestError::Assertion { .. } => "assertion",
            TestError::Timeout { .. } => "timeout",
            TestError::MultipleDone { .. } => "multiple_done",
            TestError::PendingForbidden => "pending_forbidden",
            TestError::SkipForbidden { .. } => "skip_forbidden",
            TestError::Uncaught { .. } => "uncaught",
            TestError::NonError { .. } => "non_error",
            TestError::Overspecified => "overspecified",
            TestError::FalsyRejection => "falsy_rejection",
            TestError::AsyncOnly => "async_only",
            TestError::GlobalLeak { .. } => "global_leak",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TestError::Timeout { .. })
    }
}

/// Extracts the human readable message from a panic payload.
/// 从 panic 负载中提取可读消息。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<TestError>() {
        e.to_string()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// The skip signal. Bodies return it (usually through [`Context::skip`])
/// to abort the current attempt and mark the runnable pending.
///
/// [`Context::skip`]: crate::core::context::Context::skip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync skip; aborting execution")]
pub struct Pending;

/// Errors raised by the runner's lifecycle rather than by a runnable.
/// 由运行器生命周期（而非 runnable）引发的错误。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("`.only` forbidden by the forbid_only option")]
    ForbiddenOnly,

    #[error("the runner is already running")]
    AlreadyRunning,

    #[error("the runner has already stopped; call reset() before running again")]
    AlreadyStopped,

    /// A runnable reported a failure after the run ended.
    #[error("Test failed after root suite execution completed: {0}")]
    CompletedAfterStop(TestError),

    #[error("invalid grep pattern: {0}")]
    InvalidGrep(#[from] regex::Error),
}
