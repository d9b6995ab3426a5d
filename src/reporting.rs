//! # Reporting Module / 报告模块
//!
//! Reporters are ordinary [`EventListener`](crate::core::events::EventListener)s
//! attached to a runner: a coloured "spec" outline for terminals and a JSON
//! document for tooling.
//!
//! 报告器是挂接到运行器上的普通事件监听器：面向终端的彩色 "spec" 大纲，
//! 以及面向工具的 JSON 文档。

pub mod console;
pub mod json;

pub use console::SpecReporter;
pub use json::JsonReporter;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Reporter selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Spec,
    Json,
}
