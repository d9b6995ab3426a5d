//! # Console Reporting Module / 控制台报告模块
//!
//! The "spec" reporter: suites are printed as an indented outline while the
//! run progresses, each test marked as passed, failed (with its failure
//! number) or pending. When the run ends it prints an epilogue with the
//! passing/pending/failing counts and the details of every failure.
//!
//! "spec" 报告器：运行过程中以缩进大纲形式打印套件，每个测试标记为通过、
//! 失败（带失败编号）或待定。运行结束时打印包含通过/待定/失败计数的总结，
//! 以及每个失败的详细信息。
//!
//! # Output Format / 输出格式
//! ```text
//!   Math
//!     ✓ adds
//!     1) divides
//!     - rounds
//!
//!   1 passing (12ms)
//!   1 pending
//!   1 failing
//!
//!   1) Math
//!        divides:
//!      attempt to divide by zero
//! ```

use std::io::{self, Write};
use std::time::Instant;

use colored::*;

use crate::core::errors::TestError;
use crate::core::events::{Event, EventListener, RunnableInfo};
use crate::core::runnable::Speed;
use crate::infra::t;

struct Failure {
    title_path: Vec<String>,
    error: TestError,
}

/// Prints a live outline of the run and a summary at the end.
pub struct SpecReporter {
    out: Box<dyn Write + Send>,
    indent: usize,
    passes: usize,
    pending: usize,
    failures: Vec<Failure>,
    started: Option<Instant>,
}

impl std::fmt::Debug for SpecReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecReporter")
            .field("indent", &self.indent)
            .field("passes", &self.passes)
            .field("pending", &self.pending)
            .field("failures", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl SpecReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            indent: 0,
            passes: 0,
            pending: 0,
            failures: Vec::new(),
            started: None,
        }
    }

    /// A reporter printing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn pad(&self) -> String {
        "  ".repeat(self.indent.saturating_sub(1))
    }

    fn line(&mut self, text: impl std::fmt::Display) {
        if let Err(e) = writeln!(self.out, "{text}") {
            tracing::warn!(error = %e, "failed to write report output");
        }
    }

    fn on_pass(&mut self, test: &RunnableInfo) {
        self.passes += 1;
        let duration = match (test.speed, test.duration_ms) {
            (Some(Speed::Slow), Some(ms)) => format!(" ({ms}ms)").red().to_string(),
            (Some(Speed::Medium), Some(ms)) => format!(" ({ms}ms)").yellow().to_string(),
            _ => String::new(),
        };
        let line = format!("{}  {} {}{}", self.pad(), "✓".green(), test.title.dimmed(), duration);
        self.line(line);
    }

    fn on_fail(&mut self, test: &RunnableInfo, error: &TestError) {
        self.failures.push(Failure {
            title_path: test.title_path.clone(),
            error: error.clone(),
        });
        let line = format!("{}  {}", self.pad(), format!("{}) {}", self.failures.len(), test.title).red());
        self.line(line);
    }

    fn on_pending(&mut self, test: &RunnableInfo) {
        self.pending += 1;
        let line = format!("{}  {}", self.pad(), format!("- {}", test.title).cyan());
        self.line(line);
    }

    fn epilogue(&mut self, duration_ms: Option<u64>) {
        self.line("");
        let elapsed = duration_ms
            .map(|ms| format!(" ({ms}ms)"))
            .unwrap_or_default();
        let passing = t!("report.passing", count = self.passes).to_string();
        self.line(format!("  {}{}", passing.green(), elapsed.dimmed()));
        if self.pending > 0 {
            let pending = t!("report.pending", count = self.pending).to_string();
            self.line(format!("  {}", pending.cyan()));
        }
        if !self.failures.is_empty() {
            let failing = t!("report.failing", count = self.failures.len()).to_string();
            self.line(format!("  {}", failing.red()));
            self.line("");
            let failures = std::mem::take(&mut self.failures);
            for (i, failure) in failures.iter().enumerate() {
                self.failure_details(i + 1, failure);
            }
            self.failures = failures;
        }
        self.line("");
    }

    fn failure_details(&mut self, n: usize, failure: &Failure) {
        let mut header = format!("  {n}) ");
        for (depth, title) in failure.title_path.iter().enumerate() {
            if depth > 0 {
                header.push('\n');
                header.push_str(&" ".repeat(5 + 2 * depth));
            }
            header.push_str(title);
        }
        header.push(':');
        self.line(header);
        for line in failure.error.to_string().lines() {
            self.line(format!("     {}", line.red()));
        }
        self.line("");
    }
}

impl EventListener for SpecReporter {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::RunBegin { .. } => {
                self.started = Some(Instant::now());
                self.line("");
            }
            Event::SuiteBegin { suite } => {
                self.indent += 1;
                if !suite.root {
                    let line = format!("{}{}", self.pad(), suite.title);
                    self.line(line);
                }
            }
            Event::SuiteEnd { .. } => {
                self.indent = self.indent.saturating_sub(1);
                if self.indent == 1 {
                    self.line("");
                }
            }
            Event::Pass { test } => self.on_pass(test),
            Event::Fail { test, error } => self.on_fail(test, error),
            Event::Pending { test } => self.on_pending(test),
            Event::RunEnd { .. } => {
                let started = self.started.take();
                self.epilogue(started.map(|s| s.elapsed().as_millis() as u64));
            }
            _ => {}
        }
    }
}
