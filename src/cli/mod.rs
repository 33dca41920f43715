//! CLI module for exthost
//!
//! Provides command-line interface using clap derive macros.

pub mod commands;
pub mod output;

pub use output::OutputContext;

use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs, decorations::DecorationsArgs, exec::ExecArgs,
    extension::ExtensionArgs, hover::HoverArgs,
};

const LONG_ABOUT: &str = r#"
exthost - extension host for document providers

Spawns extension processes, collects the hover, decoration and command
providers they register, and queries them with merged results.

QUICK START:
  exthost hover --uri file:///src/main.rs --language rust --line 3 --character 7
  exthost decorations --uri file:///README.md
  exthost exec sample.echo 1 '"two"'

EXTENSIONS:
  Built-in samples run as child processes over stdio, or in-process
  with EXTHOST_IN_PROCESS=true ([transport] in_process):
    line-colors    static decorations on the first four lines
    hover          hover provider for every document, `sample.echo` command

Logs go to stderr (RUST_LOG=exthost=debug for detail); stdout carries JSON.
"#;

/// exthost - extension host for document providers
#[derive(Parser, Debug)]
#[command(name = "exthost")]
#[command(author, version, about, long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
#[command(after_help = "Use 'exthost <COMMAND> --help' for more information about a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hover information for a position, merged across extensions
    Hover(HoverArgs),

    /// Decorations for a document, concatenated across extensions
    Decorations(DecorationsArgs),

    /// Execute a command registered by an extension
    Exec(ExecArgs),

    /// Run a built-in extension on stdin/stdout
    Extension(ExtensionArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hover() {
        let cli = Cli::try_parse_from([
            "exthost",
            "hover",
            "--uri",
            "file:///f",
            "--line",
            "1",
            "--character",
            "2",
            "--extension",
            "hover",
            "--extension",
            "line-colors",
        ])
        .unwrap();
        match cli.command {
            Commands::Hover(args) => {
                assert_eq!(args.document.uri, "file:///f");
                assert_eq!((args.line, args.character), (1, 2));
                assert_eq!(args.document.extensions, ["hover", "line-colors"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decorations_default_extension() {
        let cli = Cli::try_parse_from(["exthost", "decorations", "--uri", "file:///f"]).unwrap();
        match cli.command {
            Commands::Decorations(args) => {
                assert_eq!(args.document.extensions_or(&["line-colors"]), ["line-colors"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extension_requires_name() {
        assert!(Cli::try_parse_from(["exthost", "extension"]).is_err());
    }
}
