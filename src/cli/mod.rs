//! Command-line interface layer.
//!
//! ## Module Structure
//!
//! - `args`: clap argument definitions
//! - `commands`: one module per subcommand
//! - `exit_status`: exit-code conventions
//! - `run`: command dispatch

pub mod args;
pub mod commands;
pub mod exit_status;
pub mod run;

pub use args::{Arguments, Command};
pub use exit_status::ExitStatus;
pub use run::run_cli;
