//! The `clean` subcommand.

use std::{env, fs};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::args::CleanCommand;
use crate::cli::exit_status::ExitStatus;
use crate::config::load_config;
use crate::core::site::STATE_DIR_NAME;
use crate::report::SUCCESS_MARK;

pub fn run(cmd: CleanCommand) -> Result<ExitStatus> {
    let root = match &cmd.common.root {
        Some(root) => root.clone(),
        None => env::current_dir()?,
    };
    let effective = load_config(&root)?;
    let output_dir = root.join(&effective.config.output_dir);

    if output_dir.exists() {
        fs::remove_dir_all(&output_dir)
            .with_context(|| format!("failed to remove output directory {:?}", output_dir))?;
        println!("{} removed {}", SUCCESS_MARK.green(), output_dir.display());
    }

    if cmd.cache {
        let state_dir = root.join(STATE_DIR_NAME);
        if state_dir.exists() {
            fs::remove_dir_all(&state_dir)
                .with_context(|| format!("failed to remove cache directory {:?}", state_dir))?;
            println!("{} removed {}", SUCCESS_MARK.green(), state_dir.display());
        }
    }

    Ok(ExitStatus::Success)
}
