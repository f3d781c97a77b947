//! The `init` subcommand: scaffold a new site.

use std::{env, fs};

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::exit_status::ExitStatus;
use crate::config::CONFIG_FILE_NAME;
use crate::report::SUCCESS_MARK;

const DEFAULT_CONFIG: &str = r#"title = "My Bengal Site"
theme = "default"
output_dir = "public"
"#;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><title>{{ title }} - {{ site_title }}</title></head>
<body>
<main>{{ content }}</main>
</body>
</html>
"#;

const SAMPLE_PAGE: &str = r#"+++
title = "Welcome"
+++
Your site is ready. Edit content/_index.md to get started.
"#;

pub fn run() -> Result<ExitStatus> {
    let root = env::current_dir()?;
    let config_path = root.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        anyhow::bail!("{} already exists", CONFIG_FILE_NAME);
    }

    fs::write(&config_path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {:?}", config_path))?;

    for dir in ["content", "data", "assets"] {
        fs::create_dir_all(root.join(dir))?;
    }
    let templates = root.join("themes/default/templates");
    fs::create_dir_all(&templates)?;
    fs::write(templates.join("page.html"), DEFAULT_TEMPLATE)?;
    fs::write(root.join("content/_index.md"), SAMPLE_PAGE)?;

    println!(
        "{} initialized bengal site in {}",
        SUCCESS_MARK.green(),
        root.display()
    );
    Ok(ExitStatus::Success)
}
