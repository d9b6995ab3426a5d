//! # Command Line Interface / 命令行接口
//!
//! `suite-runner run <FILE>` executes a declarative suite file and
//! `suite-runner init` writes a sample one. Help texts are translated, so the
//! language is resolved before the command tree is built.
//!
//! `suite-runner run <FILE>` 执行声明式套件文件，`suite-runner init` 写出示例文件。
//! 帮助文本经过翻译，因此在构建命令树之前先确定语言。

pub mod commands;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::{env, path::PathBuf, process::ExitCode};

use crate::infra::t;
use crate::reporting::ReporterKind;
use commands::run::RunArgs;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` or `--lang=<VALUE>` argument.
fn pre_parse_language(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--lang" {
            return iter.next().cloned();
        }
        if let Some(lang) = arg.strip_prefix("--lang=") {
            return Some(lang.to_string());
        }
    }
    None
}

fn build_cli() -> Command {
    Command::new("suite-runner")
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli.about").to_string())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli.lang").to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cli.run_about").to_string())
                .arg(
                    Arg::new("file")
                        .help(t!("cli.arg_file").to_string())
                        .value_name("FILE")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("grep")
                        .short('g')
                        .long("grep")
                        .help(t!("cli.arg_grep").to_string())
                        .value_name("PATTERN")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("invert")
                        .short('i')
                        .long("invert")
                        .help(t!("cli.arg_invert").to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("bail")
                        .short('b')
                        .long("bail")
                        .help(t!("cli.arg_bail").to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .help(t!("cli.arg_timeout").to_string())
                        .value_name("MS")
                        .value_parser(clap::value_parser!(u64))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("retries")
                        .long("retries")
                        .help(t!("cli.arg_retries").to_string())
                        .value_name("N")
                        .value_parser(clap::value_parser!(i32))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("forbid-only")
                        .long("forbid-only")
                        .help(t!("cli.arg_forbid_only").to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("forbid-pending")
                        .long("forbid-pending")
                        .help(t!("cli.arg_forbid_pending").to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("check-leaks")
                        .long("check-leaks")
                        .help(t!("cli.arg_check_leaks").to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("reporter")
                        .short('R')
                        .long("reporter")
                        .help(t!("cli.arg_reporter").to_string())
                        .value_name("NAME")
                        .default_value("spec")
                        .value_parser(clap::value_parser!(ReporterKind)),
                ),
        )
        .subcommand(
            Command::new("init")
                .about(t!("cli.init_about").to_string())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help(t!("cli.arg_output").to_string())
                        .value_name("PATH")
                        .default_value("suite.toml")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .help(t!("cli.arg_force").to_string())
                        .action(ArgAction::SetTrue),
                ),
        )
}

fn run_args(matches: &ArgMatches) -> RunArgs {
    RunArgs {
        file: matches.get_one::<PathBuf>("file").cloned().unwrap_or_default(),
        grep: matches.get_one::<String>("grep").cloned(),
        invert: matches.get_flag("invert"),
        bail: matches.get_flag("bail"),
        timeout_ms: matches.get_one::<u64>("timeout").copied(),
        retries: matches.get_one::<i32>("retries").copied(),
        forbid_only: matches.get_flag("forbid-only"),
        forbid_pending: matches.get_flag("forbid-pending"),
        check_leaks: matches.get_flag("check-leaks"),
        reporter: matches
            .get_one::<ReporterKind>("reporter")
            .copied()
            .unwrap_or_default(),
    }
}

/// Parses the process arguments and executes the selected command.
/// The exit code is a success exactly when the run had no failures.
pub async fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();
    let explicit_lang = pre_parse_language(&args);
    match &explicit_lang {
        Some(lang) => crate::set_language(lang),
        None => crate::init(),
    }

    let matches = build_cli().get_matches_from(args);

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let failures = commands::run::execute(run_args(run_matches), explicit_lang.is_some()).await?;
            Ok(if failures == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Some(("init", init_matches)) => {
            let output = init_matches
                .get_one::<PathBuf>("output")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("suite.toml"));
            commands::init::execute(output, init_matches.get_flag("force"))?;
            Ok(ExitCode::SUCCESS)
        }
        // `subcommand_required` makes clap print help and exit first.
        _ => Ok(ExitCode::SUCCESS),
    }
}
