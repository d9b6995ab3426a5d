//! # Hooks / 钩子
//!
//! Hooks are runnables attached to a suite under one of four positions.
//! Their display title is derived at emit time from the position, an optional
//! name and the test they run for; nothing about it is stored on the hook.
//!
//! 钩子是挂在套件四个位置之一上的 runnable。
//! 显示标题在发出事件时由位置、可选名称和所服务的测试推导，不存储在钩子上。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::runnable::Body;

/// The four hook positions of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl HookType {
    pub const ALL: [HookType; 4] = [
        HookType::BeforeAll,
        HookType::AfterAll,
        HookType::BeforeEach,
        HookType::AfterEach,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            HookType::BeforeAll => "before all",
            HookType::AfterAll => "after all",
            HookType::BeforeEach => "before each",
            HookType::AfterEach => "after each",
        }
    }

    pub fn is_each(&self) -> bool {
        matches!(self, HookType::BeforeEach | HookType::AfterEach)
    }

    /// `skip()` is only meaningful before the work it would skip.
    pub fn allows_skip(&self) -> bool {
        matches!(self, HookType::BeforeAll | HookType::BeforeEach)
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `"before each" hook` or `"before each" hook: <name>`.
pub fn default_title(hook_type: HookType, name: Option<&str>) -> String {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => format!("\"{}\" hook: {name}", hook_type.label()),
        None => format!("\"{}\" hook", hook_type.label()),
    }
}

/// Title shown to reporters: names the test when one is known, otherwise the
/// owning suite (`{root}` for the root suite).
pub fn display_title(title: &str, current_test: Option<&str>, suite_title: &str, suite_is_root: bool) -> String {
    match current_test {
        Some(test) => format!("{title} for \"{test}\""),
        None if suite_is_root || suite_title.is_empty() => format!("{title} in \"{{root}}\""),
        None => format!("{title} in \"{suite_title}\""),
    }
}

/// A hook waiting to be registered on a suite.
/// 等待注册到套件上的钩子。
#[derive(Debug, Clone)]
pub struct Hook {
    pub(crate) hook_type: HookType,
    pub(crate) name: Option<String>,
    pub(crate) body: Body,
    pub(crate) timeout_ms: Option<u64>,
}

impl Hook {
    pub fn new(hook_type: HookType, body: Body) -> Self {
        Self {
            hook_type,
            name: None,
            body,
            timeout_ms: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub(crate) fn title(&self) -> String {
        default_title(self.hook_type, self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles() {
        assert_eq!(default_title(HookType::BeforeEach, None), "\"before each\" hook");
        assert_eq!(
            default_title(HookType::AfterAll, Some("close db")),
            "\"after all\" hook: close db"
        );
        assert_eq!(default_title(HookType::AfterAll, Some("")), "\"after all\" hook");
    }

    #[test]
    fn display_names_test_or_suite() {
        let t = "\"before each\" hook";
        assert_eq!(
            display_title(t, Some("adds"), "Math", false),
            "\"before each\" hook for \"adds\""
        );
        assert_eq!(display_title(t, None, "Math", false), "\"before each\" hook in \"Math\"");
        assert_eq!(display_title(t, None, "", true), "\"before each\" hook in \"{root}\"");
    }

    #[test]
    fn skip_positions() {
        assert!(HookType::BeforeAll.allows_skip());
        assert!(HookType::BeforeEach.allows_skip());
        assert!(!HookType::AfterEach.allows_skip());
        assert!(!HookType::AfterAll.allows_skip());
        assert!(HookType::BeforeEach.is_each());
        assert!(!HookType::BeforeAll.is_each());
    }
}
