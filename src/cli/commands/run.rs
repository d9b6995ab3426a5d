//! # Run Command Module / 运行命令模块
//!
//! Loads a suite file, applies command-line overrides to its `[options]`,
//! builds the suite tree and runs it with the selected reporter. Ctrl-C
//! aborts the run at the next check point.
//!
//! 加载套件文件，将命令行覆盖项应用到其 `[options]`，构建套件树，
//! 并使用所选报告器运行。Ctrl-C 会在下一个检查点中止运行。

use anyhow::{Context, Result};
use colored::*;
use std::{fs, path::PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        config::{RunnerOptions, SuiteFile},
        runner::Runner,
    },
    infra::t,
    reporting::{JsonReporter, ReporterKind, SpecReporter},
};

/// Arguments of `suite-runner run`. `None`/`false` keep the file's setting.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub file: PathBuf,
    pub grep: Option<String>,
    pub invert: bool,
    pub bail: bool,
    pub timeout_ms: Option<u64>,
    pub retries: Option<i32>,
    pub forbid_only: bool,
    pub forbid_pending: bool,
    pub check_leaks: bool,
    pub reporter: ReporterKind,
}

impl RunArgs {
    /// Layers the command-line flags over the file's options.
    pub fn apply(&self, options: &mut RunnerOptions) {
        if let Some(grep) = &self.grep {
            options.grep = Some(grep.clone());
        }
        options.invert |= self.invert;
        options.bail |= self.bail;
        if let Some(ms) = self.timeout_ms {
            options.timeout_ms = Some(ms);
        }
        if let Some(n) = self.retries {
            options.retries = Some(n);
        }
        options.forbid_only |= self.forbid_only;
        options.forbid_pending |= self.forbid_pending;
        options.check_leaks |= self.check_leaks;
    }
}

/// Executes the run command and returns the number of failures.
///
/// `explicit_lang` tells whether `--lang` was given; otherwise the file's
/// `language` key, when present, selects the output language.
pub async fn execute(args: RunArgs, explicit_lang: bool) -> Result<usize> {
    let path = fs::canonicalize(&args.file)
        .with_context(|| t!("run.file_not_found", path = args.file.display()).to_string())?;
    let mut suite_file = SuiteFile::load(&path)?;

    if !explicit_lang {
        if let Some(lang) = &suite_file.language {
            crate::set_language(lang);
        }
    }

    args.apply(&mut suite_file.options);
    let cwd = path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let label = args.file.display().to_string();

    eprintln!("{}", t!("run.loading", path = path.display()).cyan());
    let tree = suite_file.build_tree(&cwd, Some(&label));
    let mut runner = Runner::new(tree, suite_file.options.clone());
    match args.reporter {
        ReporterKind::Spec => runner.add_listener(SpecReporter::stdout()),
        ReporterKind::Json => runner.add_listener(JsonReporter::stdout()),
    }

    setup_signal_handler(runner.abort_token());

    let report = runner.run().await.context(t!("run.failed").to_string())?;
    tracing::info!(failures = report.failures, total = report.total, "run finished");

    if report.failures > 0 {
        eprintln!("{}", t!("run.failed_summary", count = report.failures).red().bold());
    }
    Ok(report.failures)
}

/// Cancels `token` on Ctrl-C.
fn setup_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        eprintln!("\n{}", t!("run.shutdown_signal").yellow());
        token.cancel();
    });
}
