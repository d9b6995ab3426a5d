//! # Infrastructure Module / 基础设施模块
//!
//! Process-level services the engine depends on: the uncaught panic
//! listener, environment leak detection, and command-line bodies.
//!
//! 引擎所依赖的进程级服务：未捕获 panic 监听器、环境变量泄漏检测，以及命令行主体。

pub mod command;
pub mod globals;
pub mod uncaught;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
