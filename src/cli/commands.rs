//! # Commands / 子命令
//!
//! One module per subcommand of the `suite-runner` binary.
//!
//! `suite-runner` 二进制的每个子命令对应一个模块。

pub mod init;
pub mod run;
