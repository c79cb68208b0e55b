//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - serve: bootstrap the mirror and serve the webhook routes
//! - sort-all: resort every category once and exit
//! - check-config: print the resolved configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Autorank - keeps task ranks in order as the task store changes
#[derive(Parser, Debug)]
#[command(name = "autorank")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Serve the webhook routes (the default)
    Serve {
        /// Address to listen on, overrides the config
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Resort every category once, print the outcome and exit
    SortAll,

    /// Print the resolved configuration with secrets masked
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::try_parse_from(["autorank", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Serve {
                bind: Some("127.0.0.1:9000".to_string())
            })
        );
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["autorank", "sort-all", "-v", "--log-file", "/tmp/a.log", "-c", "a.yml"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.command, Some(Commands::SortAll));
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/a.log")));
        assert_eq!(cli.config, Some(PathBuf::from("a.yml")));
    }

    #[test]
    fn test_cli_no_subcommand() {
        let cli = Cli::try_parse_from(["autorank"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["autorank", "plan"]).is_err());
    }
}
