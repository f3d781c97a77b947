//! Command dispatch.

use anyhow::Result;
use std::process::ExitCode;

use crate::cli::args::{Arguments, Command};
use crate::cli::commands;
use crate::cli::exit_status::ExitStatus;

pub fn run_cli(args: Arguments) -> Result<ExitCode> {
    let Some(args) = args.with_command_or_help() else {
        return Ok(ExitStatus::Success.into());
    };

    let status = match args.command {
        Some(Command::Build(cmd)) => commands::build::run(cmd)?,
        Some(Command::Clean(cmd)) => commands::clean::run(cmd)?,
        Some(Command::Init) => commands::init::run()?,
        None => ExitStatus::Success,
    };

    Ok(status.into())
}
