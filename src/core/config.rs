//! # Configuration / 配置
//!
//! [`RunnerOptions`] configures one run. A [`SuiteFile`] is the declarative
//! TOML form of a suite tree whose tests and hooks are command lines; it
//! carries its own `[options]` table that CLI flags may override.
//!
//! [`RunnerOptions`] 配置一次运行。[`SuiteFile`] 是套件树的声明式 TOML 形式，
//! 其中测试和钩子都是命令行；它带有自己的 `[options]` 表，可被命令行参数覆盖。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use rust_i18n::t;
use serde::{Deserialize, Serialize};

use crate::core::hook::{Hook, HookType};
use crate::core::suite::{Suite, SuiteId, SuiteTree};
use crate::core::test::Test;
use crate::infra::command::command_body;

/// Settings of a single run. Every field has a default.
/// 单次运行的设置。每个字段都有默认值。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Regular expression matched against full test titles.
    /// 与测试完整标题匹配的正则表达式。
    pub grep: Option<String>,
    /// Run the tests that do *not* match `grep`.
    /// 运行与 `grep` *不* 匹配的测试。
    pub invert: bool,
    /// Stop a suite after its first failure.
    /// 套件在第一次失败后停止。
    pub bail: bool,
    /// Root suite timeout in milliseconds; `0` disables timeouts.
    /// 根套件超时（毫秒）；`0` 表示禁用超时。
    pub timeout_ms: Option<u64>,
    /// Root suite slow threshold in milliseconds.
    /// 根套件慢阈值（毫秒）。
    pub slow_ms: Option<u64>,
    /// Root suite retry budget.
    /// 根套件重试次数。
    pub retries: Option<i32>,
    /// Refuse to run a tree that uses `only`.
    /// 拒绝运行使用了 `only` 的套件树。
    pub forbid_only: bool,
    /// Report pending tests as failures.
    /// 将待定测试报告为失败。
    pub forbid_pending: bool,
    /// Reject synchronous bodies.
    /// 拒绝同步主体。
    pub async_only: bool,
    /// Report environment variables introduced by tests and hooks.
    /// 报告测试和钩子引入的环境变量。
    pub check_leaks: bool,
    /// Allow-listed variable names; a trailing `*` matches by prefix.
    /// 允许的变量名；末尾的 `*` 表示前缀匹配。
    pub globals: Vec<String>,
    /// Count a run that selected no tests as failed.
    /// 将未选中任何测试的运行计为失败。
    pub fail_zero: bool,
    /// Drop bodies of a suite once it has finished.
    /// 套件完成后丢弃其主体。
    pub clean_references_after_run: bool,
}

impl RunnerOptions {
    /// Applies the root defaults. Children copy settings when attached, so
    /// call this before registering anything under the root.
    pub fn configure_root(&self, suite: &mut Suite) {
        if let Some(ms) = self.timeout_ms {
            suite.set_timeout(ms);
        }
        if let Some(ms) = self.slow_ms {
            suite.set_slow(ms);
        }
        if let Some(n) = self.retries {
            suite.set_retries(n);
        }
        if self.bail {
            suite.set_bail(true);
        }
    }
}

/// A test in a suite file. Without `command` it is pending.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TestSpec {
    pub title: String,
    pub command: Option<String>,
    pub only: bool,
    pub skip: bool,
    pub timeout_ms: Option<u64>,
    pub slow_ms: Option<u64>,
    pub retries: Option<i32>,
    pub globals: Vec<String>,
}

/// A suite in a suite file; nests through `suites`.
/// 套件文件中的套件；通过 `suites` 嵌套。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SuiteSpec {
    pub title: String,
    pub only: bool,
    pub pending: bool,
    pub timeout_ms: Option<u64>,
    pub slow_ms: Option<u64>,
    pub retries: Option<i32>,
    pub bail: Option<bool>,
    pub before_all: Vec<String>,
    pub after_all: Vec<String>,
    pub before_each: Vec<String>,
    pub after_each: Vec<String>,
    pub tests: Vec<TestSpec>,
    pub suites: Vec<SuiteSpec>,
}

impl SuiteSpec {
    fn hook_commands(&self, hook_type: HookType) -> &[String] {
        match hook_type {
            HookType::BeforeAll => &self.before_all,
            HookType::AfterAll => &self.after_all,
            HookType::BeforeEach => &self.before_each,
            HookType::AfterEach => &self.after_each,
        }
    }
}

/// The whole declarative suite file.
/// 整个声明式套件文件。
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SuiteFile {
    /// Output language (e.g. "en", "zh-CN") used when `--lang` is absent.
    /// 未提供 `--lang` 时使用的输出语言（例如 "en"、"zh-CN"）。
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub options: RunnerOptions,
    /// The root suite: its fields sit at the top level of the file.
    /// 根套件：其字段位于文件顶层。
    #[serde(flatten)]
    pub root: SuiteSpec,
}

impl SuiteFile {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| t!("config.parse_failed").to_string())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| t!("config.read_failed", path = path.display()).to_string())?;
        Self::from_toml_str(&content)
            .with_context(|| t!("config.invalid_file", path = path.display()).to_string())
    }

    /// Builds the suite tree. Commands run in `cwd`; `file` labels every
    /// runnable for timeout messages.
    pub fn build_tree(&self, cwd: &Path, file: Option<&str>) -> SuiteTree {
        let mut tree = SuiteTree::new(self.root.title.clone());
        let root = tree.root();
        self.options.configure_root(tree.suite_mut(root));
        if let Some(file) = file {
            tree.suite_mut(root).set_file(file);
        }
        populate(&mut tree, root, &self.root, cwd);
        tree
    }
}

fn apply_settings(tree: &mut SuiteTree, id: SuiteId, spec: &SuiteSpec) {
    let suite = tree.suite_mut(id);
    if let Some(ms) = spec.timeout_ms {
        suite.set_timeout(ms);
    }
    if let Some(ms) = spec.slow_ms {
        suite.set_slow(ms);
    }
    if let Some(n) = spec.retries {
        suite.set_retries(n);
    }
    if let Some(bail) = spec.bail {
        suite.set_bail(bail);
    }
    if spec.pending {
        suite.set_pending(true);
    }
}

fn populate(tree: &mut SuiteTree, id: SuiteId, spec: &SuiteSpec, cwd: &Path) {
    apply_settings(tree, id, spec);
    let cwd_buf: PathBuf = cwd.to_path_buf();

    for hook_type in HookType::ALL {
        for command in spec.hook_commands(hook_type) {
            let hook = Hook::new(hook_type, command_body(command.clone(), cwd_buf.clone())).named(command.clone());
            tree.add_hook(id, hook);
        }
    }

    for test in &spec.tests {
        let mut builder = match &test.command {
            Some(command) => Test::new(test.title.clone(), command_body(command.clone(), cwd_buf.clone())),
            None => Test::pending(test.title.clone()),
        };
        if test.only {
            builder = builder.only();
        }
        if test.skip {
            builder = builder.skip();
        }
        if let Some(ms) = test.timeout_ms {
            builder = builder.timeout(ms);
        }
        if let Some(ms) = test.slow_ms {
            builder = builder.slow(ms);
        }
        if let Some(n) = test.retries {
            builder = builder.retries(n);
        }
        builder = builder.globals(test.globals.iter().cloned());
        tree.add_test(id, builder);
    }

    for child in &spec.suites {
        let child_id = tree.add_suite(id, child.title.clone());
        if child.only {
            tree.only_suite(child_id);
        }
        populate(tree, child_id, child, cwd);
    }
}

/// The suite file written by `suite-runner init`.
pub const SAMPLE_SUITE_FILE: &str = r#"# suite-runner suite file
title = "sample"
language = "en"

[options]
timeout_ms = 5000
slow_ms = 500
check_leaks = false
globals = []

[[suites]]
title = "shell"
before_each = ["true"]

[[suites.tests]]
title = "echo works"
command = "echo hello"

[[suites.tests]]
title = "flaky command is retried"
command = "sh -c 'test -n \"$HOME\"'"
retries = 2

[[suites.tests]]
title = "not written yet"
"#;
