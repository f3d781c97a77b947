//! The `build` subcommand.

use std::env;

use anyhow::Result;

use crate::build::{BuildOptions, build};
use crate::cli::args::BuildCommand;
use crate::cli::exit_status::ExitStatus;
use crate::report;

pub fn run(cmd: BuildCommand) -> Result<ExitStatus> {
    let root = match &cmd.common.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };

    let options = BuildOptions {
        incremental: cmd.incremental,
        force: cmd.force,
        touch: cmd.touch.clone(),
        mode: cmd.mode.into(),
        workers: cmd.parallel,
        strict: cmd.strict.then_some(true),
        verbose: cmd.common.verbose,
    };

    let summary = build(&root, &options)?;
    report::print_summary(&summary, cmd.common.verbose);

    if summary.strict && summary.has_errors() {
        Ok(ExitStatus::Failure)
    } else {
        Ok(ExitStatus::Success)
    }
}
