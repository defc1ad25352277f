use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// X display to connect to, instead of $DISPLAY.
    #[arg(short, long, global = true)]
    pub display: Option<String>,
    /// Replace the running window manager and compositing manager.
    #[arg(long)]
    pub replace: bool,
    /// Do not become the compositing manager.
    #[arg(long)]
    pub no_composite: bool,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// List the mapped top-level windows.
    Windows {
        /// Format output as JSON.
        #[arg(short, long)]
        json: bool,
    },
    /// Generate shell completions.
    Completions { shell: Shell },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags_and_subcommands() {
        let cli = Cli::parse_from(["cairn", "--replace", "--no-composite", "-d", ":1"]);
        assert!(cli.replace);
        assert!(cli.no_composite);
        assert_eq!(cli.display.as_deref(), Some(":1"));
        assert!(cli.subcommand.is_none());

        let cli = Cli::parse_from(["cairn", "windows", "--json"]);
        assert!(matches!(cli.subcommand, Some(Sub::Windows { json: true })));
    }
}
