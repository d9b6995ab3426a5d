//! # Suite Tree / 套件树
//!
//! An arena owning every suite, test and hook of one run. Ids are stable
//! `Copy` handles; parent links are ids, so there is no shared ownership and
//! no reference cycle between a suite and its children.
//!
//! Settings (timeout, slow, retries, bail) are copied from parent to child at
//! attachment time only. Later changes to a parent never reach children that
//! are already attached.
//!
//! 拥有一次运行中所有套件、测试和钩子的 arena。id 是稳定的 `Copy` 句柄；
//! 父链接是 id，因此套件与子项之间没有共享所有权，也没有引用环。
//! 设置（超时、慢阈值、重试、bail）仅在挂载时从父级复制到子级。

use regex::Regex;
use serde::Serialize;

use crate::core::context::Scope;
use crate::core::hook::{Hook, HookType};
use crate::core::runnable::{
    Body, DEFAULT_SLOW_MS, DEFAULT_TIMEOUT_MS, Runnable, RunnableKind, clamp_timeout,
};
use crate::core::test::Test;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SuiteId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunnableId(pub(crate) usize);

#[derive(Debug, Clone)]
pub struct Suite {
    pub(crate) title: String,
    pub(crate) parent: Option<SuiteId>,
    pub(crate) tests: Vec<RunnableId>,
    pub(crate) suites: Vec<SuiteId>,
    pub(crate) before_all: Vec<RunnableId>,
    pub(crate) after_all: Vec<RunnableId>,
    pub(crate) before_each: Vec<RunnableId>,
    pub(crate) after_each: Vec<RunnableId>,
    pub(crate) only_tests: Vec<RunnableId>,
    pub(crate) only_suites: Vec<SuiteId>,
    pub(crate) pending: bool,
    /// Marked pending at run time by a skip in an ancestor's "before all" hook.
    pub(crate) skipped: bool,
    pub(crate) root: bool,
    pub(crate) timeout_ms: u64,
    pub(crate) slow_ms: u64,
    pub(crate) retries: i32,
    pub(crate) bail: bool,
    pub(crate) file: Option<String>,
    pub(crate) scope: Scope,
}

impl Suite {
    fn new(title: String, parent: Option<SuiteId>, scope: Scope) -> Self {
        Self {
            title,
            root: parent.is_none(),
            parent,
            tests: Vec::new(),
            suites: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            before_each: Vec::new(),
            after_each: Vec::new(),
            only_tests: Vec::new(),
            only_suites: Vec::new(),
            pending: false,
            skipped: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            slow_ms: DEFAULT_SLOW_MS,
            retries: -1,
            bail: false,
            file: None,
            scope,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn parent(&self) -> Option<SuiteId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn tests(&self) -> &[RunnableId] {
        &self.tests
    }

    pub fn suites(&self) -> &[SuiteId] {
        &self.suites
    }

    pub fn hooks(&self, hook_type: HookType) -> &[RunnableId] {
        match hook_type {
            HookType::BeforeAll => &self.before_all,
            HookType::AfterAll => &self.after_all,
            HookType::BeforeEach => &self.before_each,
            HookType::AfterEach => &self.after_each,
        }
    }

    fn hooks_mut(&mut self, hook_type: HookType) -> &mut Vec<RunnableId> {
        match hook_type {
            HookType::BeforeAll => &mut self.before_all,
            HookType::AfterAll => &mut self.after_all,
            HookType::BeforeEach => &mut self.before_each,
            HookType::AfterEach => &mut self.after_each,
        }
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

    pub fn retries(&self) -> i32 {
        self.retries
    }

    pub fn set_retries(&mut self, n: i32) {
        self.retries = n;
    }

    pub fn bail(&self) -> bool {
        self.bail
    }

    pub fn set_bail(&mut self, bail: bool) {
        self.bail = bail;
    }

    pub fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn set_file(&mut self, file: impl Into<String>) {
        self.file = Some(file.into());
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// Owner of a suite hierarchy and all of its runnables.
/// 套件层级及其所有 runnable 的所有者。
#[derive(Debug, Clone)]
pub struct SuiteTree {
    suites: Vec<Suite>,
    runnables: Vec<Runnable>,
}

impl Default for SuiteTree {
    fn default() -> Self {
        Self::new("")
    }
}

impl SuiteTree {
    /// Creates a tree holding only the root suite.
    pub fn new(root_title: impl Into<String>) -> Self {
        Self {
            suites: vec![Suite::new(root_title.into(), None, Scope::default())],
            runnables: Vec::new(),
        }
    }

    pub fn root(&self) -> SuiteId {
        SuiteId(0)
    }

    pub fn suite(&self, id: SuiteId) -> &Suite {
        &self.suites[id.0]
    }

    pub fn suite_mut(&mut self, id: SuiteId) -> &mut Suite {
        &mut self.suites[id.0]
    }

    pub fn runnable(&self, id: RunnableId) -> &Runnable {
        &self.runnables[id.0]
    }

    pub fn runnable_mut(&mut self, id: RunnableId) -> &mut Runnable {
        &mut self.runnables[id.0]
    }

    /// Attaches a child suite, copying the parent's current settings.
    pub fn add_suite(&mut self, parent: SuiteId, title: impl Into<String>) -> SuiteId {
        let id = SuiteId(self.suites.len());
        let p = &self.suites[parent.0];
        let mut suite = Suite::new(title.into(), Some(parent), p.scope.child());
        suite.timeout_ms = p.timeout_ms;
        suite.slow_ms = p.slow_ms;
        suite.retries = p.retries;
        suite.bail = p.bail;
        suite.file = p.file.clone();
        self.suites.push(suite);
        self.suites[parent.0].suites.push(id);
        id
    }

    /// Marks `id` exclusive on its parent.
    pub fn only_suite(&mut self, id: SuiteId) {
        if let Some(parent) = self.suites[id.0].parent {
            let only = &mut self.suites[parent.0].only_suites;
            if !only.contains(&id) {
                only.push(id);
            }
        }
    }

    pub fn add_test(&mut self, parent: SuiteId, test: Test) -> RunnableId {
        let suite = &self.suites[parent.0];
        let mut runnable = Runnable::new(test.title, test.body, RunnableKind::Test, parent);
        runnable.timeout_ms = clamp_timeout(test.timeout_ms.unwrap_or(suite.timeout_ms));
        runnable.slow_ms = test.slow_ms.unwrap_or(suite.slow_ms);
        runnable.retries = test.retries.unwrap_or(suite.retries);
        runnable.file = test.file.or_else(|| suite.file.clone());
        runnable.globals = test.globals;
        runnable.pending |= test.skip;

        let id = self.push_runnable(runnable);
        let suite = &mut self.suites[parent.0];
        suite.tests.push(id);
        if test.only {
            suite.only_tests.push(id);
        }
        id
    }

    /// Registers a hook. Hooks on a pending suite are recorded but never run.
    pub fn add_hook(&mut self, suite_id: SuiteId, hook: Hook) -> RunnableId {
        let suite = &self.suites[suite_id.0];
        let title = hook.title();
        let mut runnable = Runnable::new(title, Some(hook.body), RunnableKind::Hook(hook.hook_type), suite_id);
        runnable.timeout_ms = clamp_timeout(hook.timeout_ms.unwrap_or(suite.timeout_ms));
        runnable.slow_ms = suite.slow_ms;
        runnable.retries = suite.retries;
        runnable.file = suite.file.clone();

        let id = self.push_runnable(runnable);
        self.suites[suite_id.0].hooks_mut(hook.hook_type).push(id);
        id
    }

    pub fn before_all(&mut self, suite: SuiteId, body: Body) -> RunnableId {
        self.add_hook(suite, Hook::new(HookType::BeforeAll, body))
    }

    pub fn after_all(&mut self, suite: SuiteId, body: Body) -> RunnableId {
        self.add_hook(suite, Hook::new(HookType::AfterAll, body))
    }

    pub fn before_each(&mut self, suite: SuiteId, body: Body) -> RunnableId {
        self.add_hook(suite, Hook::new(HookType::BeforeEach, body))
    }

    pub fn after_each(&mut self, suite: SuiteId, body: Body) -> RunnableId {
        self.add_hook(suite, Hook::new(HookType::AfterEach, body))
    }

    /// A runnable owned by the arena but listed nowhere in the tree; carries
    /// failures that belong to no registered test.
    pub(crate) fn add_detached(&mut self, parent: SuiteId, title: &str) -> RunnableId {
        let mut runnable = Runnable::new(title, None, RunnableKind::Test, parent);
        runnable.pending = false;
        self.push_runnable(runnable)
    }

    fn push_runnable(&mut self, runnable: Runnable) -> RunnableId {
        let id = RunnableId(self.runnables.len());
        self.runnables.push(runnable);
        id
    }

    /// Creates the next attempt of a failed test and puts it in the
    /// original's place in the parent's test list.
    pub(crate) fn substitute_retry(&mut self, id: RunnableId) -> RunnableId {
        let clone = self.runnables[id.0].retry_clone(id);
        let parent = clone.parent;
        let clone_id = self.push_runnable(clone);
        let tests = &mut self.suites[parent.0].tests;
        if let Some(slot) = tests.iter_mut().find(|t| **t == id) {
            *slot = clone_id;
        }
        clone_id
    }

    /// Pending on its own or through any ancestor.
    pub fn is_pending(&self, id: SuiteId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let suite = &self.suites[current.0];
            if suite.pending || suite.skipped {
                return true;
            }
            cursor = suite.parent;
        }
        false
    }

    /// A runnable is pending when declared so or when its suite is.
    pub fn is_runnable_pending(&self, id: RunnableId) -> bool {
        let r = &self.runnables[id.0];
        r.pending || r.skipped || self.is_pending(r.parent)
    }

    pub fn has_only(&self, id: SuiteId) -> bool {
        let suite = &self.suites[id.0];
        !suite.only_tests.is_empty()
            || !suite.only_suites.is_empty()
            || suite.suites.iter().any(|child| self.has_only(*child))
    }

    /// Prunes the subtree to its exclusive branches. Returns whether anything
    /// survived.
    pub fn filter_only(&mut self, id: SuiteId) -> bool {
        if !self.suites[id.0].only_tests.is_empty() {
            let suite = &mut self.suites[id.0];
            suite.tests = suite.only_tests.clone();
            suite.suites.clear();
        } else {
            self.suites[id.0].tests.clear();
            let only_suites = self.suites[id.0].only_suites.clone();
            for only in &only_suites {
                if self.has_only(*only) {
                    self.filter_only(*only);
                }
            }
            let children = self.suites[id.0].suites.clone();
            let kept: Vec<SuiteId> = children
                .into_iter()
                .filter(|child| only_suites.contains(child) || self.filter_only(*child))
                .collect();
            self.suites[id.0].suites = kept;
        }
        let suite = &self.suites[id.0];
        !suite.tests.is_empty() || !suite.suites.is_empty()
    }

    /// Number of tests in the subtree.
    pub fn total(&self, id: SuiteId) -> usize {
        let suite = &self.suites[id.0];
        suite.tests.len() + suite.suites.iter().map(|child| self.total(*child)).sum::<usize>()
    }

    /// Visits every test of the subtree, own tests before child suites.
    pub fn each_test(&self, id: SuiteId, f: &mut impl FnMut(RunnableId, &Runnable)) {
        let suite = &self.suites[id.0];
        for test in &suite.tests {
            f(*test, &self.runnables[test.0]);
        }
        for child in &suite.suites {
            self.each_test(*child, f);
        }
    }

    /// Tests of the subtree whose full title matches `grep` xor `invert`.
    /// Without a pattern every test matches.
    pub fn grep_total(&self, id: SuiteId, grep: Option<&Regex>, invert: bool) -> usize {
        let mut total = 0;
        self.each_test(id, &mut |test, _| {
            if self.matches_grep(test, grep, invert) {
                total += 1;
            }
        });
        total
    }

    pub fn matches_grep(&self, id: RunnableId, grep: Option<&Regex>, invert: bool) -> bool {
        match grep {
            Some(re) => re.is_match(&self.full_title(id)) != invert,
            None => !invert,
        }
    }

    /// Ancestor titles (root excluded) followed by the suite's own.
    pub fn suite_title_path(&self, id: SuiteId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let suite = &self.suites[current.0];
            if !suite.root && !suite.title.is_empty() {
                path.push(suite.title.clone());
            }
            cursor = suite.parent;
        }
        path.reverse();
        path
    }

    pub fn suite_full_title(&self, id: SuiteId) -> String {
        self.suite_title_path(id).join(" ")
    }

    pub fn title_path(&self, id: RunnableId) -> Vec<String> {
        let r = &self.runnables[id.0];
        let mut path = self.suite_title_path(r.parent);
        path.push(r.title.clone());
        path
    }

    pub fn full_title(&self, id: RunnableId) -> String {
        self.title_path(id).join(" ")
    }

    /// Drops the bodies of a suite's tests and hooks once they can no longer run.
    pub fn clean_references(&mut self, id: SuiteId) {
        let suite = &self.suites[id.0];
        let owned: Vec<RunnableId> = suite
            .tests
            .iter()
            .chain(HookType::ALL.iter().flat_map(|t| suite.hooks(*t).iter()))
            .copied()
            .collect();
        for runnable in owned {
            self.runnables[runnable.0].body = None;
        }
        self.suites[id.0].scope.clear();
    }

    /// Clears run state everywhere and restores first attempts in place of
    /// their retry clones.
    pub fn reset(&mut self) {
        for runnable in &mut self.runnables {
            runnable.reset();
        }
        for suite_index in 0..self.suites.len() {
            self.suites[suite_index].skipped = false;
            let restored: Vec<RunnableId> = self.suites[suite_index]
                .tests
                .iter()
                .map(|t| self.runnables[t.0].retried_from.unwrap_or(*t))
                .collect();
            self.suites[suite_index].tests = restored;
        }
    }
}
