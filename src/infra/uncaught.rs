//! # Uncaught Panics / 未捕获的 panic
//!
//! Bodies run inside a *shield*: a thread-local depth counter that is raised
//! for as long as the engine is synchronously calling or polling a body, with
//! `catch_unwind` around it. A panic raised inside the shield is an ordinary
//! body failure and is converted where it is caught.
//!
//! A panic raised anywhere else (a task the body spawned and forgot about, a
//! detached thread) is *uncaught*. A process-wide panic hook forwards those to
//! the runner that is currently listening, which attributes them to whatever
//! runnable is in flight.
//!
//! 主体在“护盾”中运行：当引擎同步调用或轮询主体时，线程局部深度计数器被提升，
//! 并由 `catch_unwind` 包裹。护盾内的 panic 是普通的主体失败。
//! 护盾外的 panic（主体派生后遗忘的任务、分离的线程）属于未捕获的 panic，
//! 由进程级 panic hook 转发给当前监听的运行器。

use std::cell::Cell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Once, PoisonError};
use std::thread::{self, ThreadId};

use futures::FutureExt;
use futures::future::poll_fn;
use once_cell::sync::Lazy;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::context::Incident;
use crate::core::errors::{TestError, panic_message};

thread_local! {
    static SHIELD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct ShieldGuard;

impl ShieldGuard {
    fn enter() -> Self {
        SHIELD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        ShieldGuard
    }
}

impl Drop for ShieldGuard {
    fn drop(&mut self) {
        SHIELD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Whether the current thread is inside a body the engine is driving.
pub fn is_shielded() -> bool {
    SHIELD_DEPTH.with(Cell::get) > 0
}

/// Calls `f` inside the shield and catches its panic.
pub fn shielded_call<R>(f: impl FnOnce() -> R) -> thread::Result<R> {
    install_hook();
    let _guard = ShieldGuard::enter();
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Drives `fut` to completion, raising the shield for every poll.
pub async fn shielded<F: Future>(fut: F) -> thread::Result<F::Output> {
    install_hook();
    let mut fut = std::pin::pin!(fut);
    AssertUnwindSafe(poll_fn(move |cx| {
        let _guard = ShieldGuard::enter();
        fut.as_mut().poll(cx)
    }))
    .catch_unwind()
    .await
}

struct Listener {
    id: u64,
    thread: ThreadId,
    tx: UnboundedSender<Incident>,
}

static LISTENERS: Lazy<Mutex<Vec<Listener>>> = Lazy::new(|| Mutex::new(Vec::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(0);
static INSTALL: Once = Once::new();

/// Keeps a runner registered for uncaught panics; unregisters on drop.
/// 保持运行器对未捕获 panic 的注册；drop 时注销。
#[derive(Debug)]
pub(crate) struct UncaughtGuard {
    id: u64,
}

impl Drop for UncaughtGuard {
    fn drop(&mut self) {
        LISTENERS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| l.id != self.id);
    }
}

/// Routes unshielded panics to `tx` until the guard is dropped.
///
/// A panic on the listening thread goes to that listener; a panic on any
/// other thread goes to the most recently registered one.
pub(crate) fn listen(tx: UnboundedSender<Incident>) -> UncaughtGuard {
    install_hook();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    LISTENERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(Listener {
            id,
            thread: thread::current().id(),
            tx,
        });
    UncaughtGuard { id }
}

fn route(error: TestError) -> bool {
    let listeners = LISTENERS.lock().unwrap_or_else(PoisonError::into_inner);
    let current = thread::current().id();
    let target = listeners
        .iter()
        .rev()
        .find(|l| l.thread == current)
        .or_else(|| listeners.last());
    match target {
        Some(listener) => listener.tx.send(Incident::Uncaught(error)).is_ok(),
        None => false,
    }
}

fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if is_shielded() {
                return;
            }
            let message = panic_message(info.payload());
            if !route(TestError::Uncaught { message }) {
                previous(info);
            }
        }));
    });
}
