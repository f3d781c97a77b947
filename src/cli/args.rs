//! CLI argument definitions using clap.
//!
//! ## Commands
//!
//! - `build`: build the site (incremental by default)
//! - `clean`: remove the output directory and optionally the cache
//! - `init`: scaffold a new site with a `bengal.toml`

use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

use crate::orchestration::render::RenderMode;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Arguments {
    /// Check if a command was provided, otherwise print help and return None.
    pub fn with_command_or_help(self) -> Option<Self> {
        if self.command.is_none() {
            Self::command().print_help().ok();
            None
        } else {
            Some(self)
        }
    }

    pub fn verbose(&self) -> bool {
        match &self.command {
            Some(Command::Build(cmd)) => cmd.common.verbose,
            Some(Command::Clean(cmd)) => cmd.common.verbose,
            Some(Command::Init) | None => false,
        }
    }
}

/// Common arguments shared by all commands.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Site root directory (defaults to the current directory)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum RenderModeArg {
    Sequential,
    Parallel,
    Streaming,
}

impl From<RenderModeArg> for RenderMode {
    fn from(mode: RenderModeArg) -> Self {
        match mode {
            RenderModeArg::Sequential => RenderMode::Sequential,
            RenderModeArg::Parallel => RenderMode::Parallel,
            RenderModeArg::Streaming => RenderMode::Streaming,
        }
    }
}

#[derive(Debug, Args)]
pub struct BuildCommand {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Only rebuild what changed since the last build
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub incremental: bool,

    /// Rebuild everything regardless of cache state
    #[arg(long)]
    pub force: bool,

    /// Treat a path as changed regardless of its fingerprint.
    /// Can be specified multiple times: --touch content/a.md --touch data/x.yaml
    #[arg(long)]
    pub touch: Vec<PathBuf>,

    /// Render worker count (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub parallel: usize,

    /// Rendering mode
    #[arg(long, value_enum, default_value_t = RenderModeArg::Parallel)]
    pub mode: RenderModeArg,

    /// Exit non-zero when pages were skipped due to errors
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct CleanCommand {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Also remove the .bengal cache directory
    #[arg(long)]
    pub cache: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the site into the output directory
    Build(BuildCommand),
    /// Remove build outputs (and the cache with --cache)
    Clean(CleanCommand),
    /// Create a bengal.toml and the standard site directories
    Init,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_build_defaults() {
        let args = Arguments::parse_from(["bengal", "build"]);
        let Some(Command::Build(cmd)) = args.command else {
            panic!("expected build command");
        };
        assert!(cmd.incremental);
        assert!(!cmd.force);
        assert_eq!(cmd.parallel, 0);
        assert_eq!(cmd.mode, RenderModeArg::Parallel);
    }

    #[test]
    fn test_build_flags() {
        let args = Arguments::parse_from([
            "bengal",
            "build",
            "--incremental",
            "false",
            "--force",
            "--touch",
            "content/a.md",
            "--touch",
            "data/x.yaml",
            "--mode",
            "streaming",
            "--strict",
            "-v",
        ]);
        let Some(Command::Build(cmd)) = args.command else {
            panic!("expected build command");
        };
        assert!(!cmd.incremental);
        assert!(cmd.force);
        assert_eq!(cmd.touch.len(), 2);
        assert_eq!(cmd.mode, RenderModeArg::Streaming);
        assert!(cmd.strict);
        assert!(cmd.common.verbose);
    }

    #[test]
    fn test_clean_flags() {
        let args = Arguments::parse_from(["bengal", "clean", "--cache"]);
        let Some(Command::Clean(cmd)) = args.command else {
            panic!("expected clean command");
        };
        assert!(cmd.cache);
    }
}
