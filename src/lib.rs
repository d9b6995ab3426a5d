//! # Suite Runner Library / Suite Runner 库
//!
//! A hierarchical test engine: suites nest, tests and hooks run under
//! per-attempt timeouts with retries, and everything that happens is
//! reported as a stream of events.
//!
//! 一个层级化的测试引擎：套件可以嵌套，测试与钩子在每次尝试的超时约束下运行并支持重试，
//! 发生的一切都以事件流的形式报告。
//!
//! ## Modules / 模块
//!
//! - `core` - Suite tree, runnables, runner and events
//! - `infra` - Uncaught panic listener, leak detection, command bodies
//! - `reporting` - Spec and JSON reporters
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 套件树、runnable、运行器与事件
//! - `infra` - 未捕获 panic 监听器、泄漏检测、命令主体
//! - `reporting` - spec 与 JSON 报告器
//! - `cli` - 命令行接口和命令
//!
//! ```no_run
//! use suite_runner::{Runner, RunnerOptions, SuiteTree, Test};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let mut tree = SuiteTree::default();
//! let math = tree.add_suite(tree.root(), "Math");
//! tree.add_test(math, Test::sync("adds", |_| {
//!     assert_eq!(1 + 1, 2);
//!     Ok(())
//! }));
//!
//! let report = Runner::new(tree, RunnerOptions::default()).run().await?;
//! assert_eq!(report.failures, 0);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::{
    Body, Context, Done, EngineError, Event, EventListener, Hook, HookType, RunReport, Runner, RunnerOptions,
    SuiteFile, SuiteTree, Test, TestError,
};
pub use infra::t;

/// Initializes the application's internationalization (i18n) based on the system locale.
///
/// This function detects the user's system locale and sets the appropriate
/// language for the application's user interface.
pub fn init() {
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    set_language(&locale);
}

/// Selects the output language. It attempts to match the full locale
/// (e.g., "zh-CN"), then just the language code (e.g., "en" from "en-US"),
/// and finally falls back to the default language ("en").
pub fn set_language(locale: &str) {
    let available_locales = rust_i18n::available_locales!();
    let lang = if available_locales.contains(&locale) {
        locale
    } else {
        locale
            .split(['-', '_'])
            .next()
            .and_then(|code| {
                available_locales
                    .iter()
                    .copied()
                    .find(|available| *available == code || available.starts_with(&format!("{code}-")))
            })
            .unwrap_or("en")
    };

    rust_i18n::set_locale(lang);
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
