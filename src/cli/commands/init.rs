//! # Init Command Module / 初始化命令模块
//!
//! Writes a sample suite file. An existing file is only replaced with
//! `--force` or after an interactive confirmation.
//!
//! 写出一个示例套件文件。已存在的文件只有在使用 `--force` 或交互确认后才会被替换。

use anyhow::{Context, Result};
use colored::*;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::{
    fs,
    io::{self, IsTerminal},
    path::Path,
};

use crate::{core::config::SAMPLE_SUITE_FILE, infra::t};

/// Executes the init command.
///
/// # Arguments
/// * `output` - Path for the new suite file
/// * `force` - Whether to overwrite an existing file without asking
pub fn execute(output: impl AsRef<Path>, force: bool) -> Result<()> {
    let output = output.as_ref();

    if output.exists() && !force && !confirm_overwrite(output)? {
        println!("{}", t!("init.file_exists", path = output.display()).red());
        println!("{}", t!("init.use_force").yellow());
        return Ok(());
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| t!("init.create_parent_dir_failed", path = parent.display()).to_string())?;
        }
    }

    fs::write(output, SAMPLE_SUITE_FILE)
        .with_context(|| t!("init.write_failed", path = output.display()).to_string())?;

    println!("{}", t!("init.success", path = output.display()).green());
    println!("{}", t!("init.next_steps", path = output.display()));
    Ok(())
}

/// Asks before replacing `path`. Without a terminal the answer is no.
fn confirm_overwrite(path: &Path) -> Result<bool> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("init.overwrite_prompt", path = path.display()).to_string())
        .default(false)
        .interact()
        .context(t!("init.confirmation_failed").to_string())
}
