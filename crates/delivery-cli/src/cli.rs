//! # CLI Structure and Argument Parsing
//!
//! The `delivery` command fetches content items from the delivery API and
//! renders their rich-text elements as typed blocks.
//!
//! ```bash
//! # Element summary of an item
//! delivery item coffee_beverages_explained
//!
//! # Parsed rich text, resolving embedded tweets to their `url` element
//! delivery item coffee_beverages_explained --element body --resolve tweet=url
//!
//! # Machine-readable output
//! delivery item coffee_beverages_explained --element body -f json
//!
//! # Listing with raw query parameters
//! delivery items --param system.type=article --param limit=5
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Main CLI structure for the `delivery` command
#[derive(Parser, Clone, Debug)]
#[command(name = "delivery")]
#[command(version)]
#[command(about = "delivery - Fetch content items and inspect their rich text", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Log every retry decision and parse step
    #[arg(long, global = true)]
    pub debug: bool,

    /// Disable all ANSI colors in output (also respects `NO_COLOR` env)
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Path to configuration file (overrides the default location). Also via `DELIVERY_CONFIG`.
    #[arg(long, global = true, value_name = "FILE", env = "DELIVERY_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Fetch one item and print its elements, or one parsed rich-text element
    Item {
        /// Codename of the item
        codename: String,

        /// Rich-text element to parse and print
        #[arg(short, long, value_name = "ELEMENT")]
        element: Option<String>,

        /// Resolve embedded items of TYPE to the text of their ELEMENT (repeatable)
        #[arg(long = "resolve", value_name = "TYPE=ELEMENT", value_parser = parse_pair)]
        resolve: Vec<(String, String)>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List items, passing query parameters through unchanged
    Items {
        /// Query parameter (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_pair)]
        params: Vec<(String, String)>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

impl Commands {
    /// Output format selected for the command.
    pub const fn format(&self) -> OutputFormat {
        match self {
            Self::Item { format, .. } | Self::Items { format, .. } => *format,
        }
    }
}

/// Output format for command results
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored when the terminal allows
    Text,
    /// Pretty-printed JSON
    Json,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("tweet=url").unwrap(),
            ("tweet".to_string(), "url".to_string())
        );
        assert_eq!(
            parse_pair("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=x").is_err());
    }

    #[test]
    fn test_item_command_parses() {
        let cli = Cli::try_parse_from([
            "delivery", "item", "home", "-e", "body", "--resolve", "tweet=url", "-f", "json", "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Item {
                codename,
                element,
                resolve,
                format,
            } => {
                assert_eq!(codename, "home");
                assert_eq!(element.as_deref(), Some("body"));
                assert_eq!(resolve, [("tweet".to_string(), "url".to_string())]);
                assert_eq!(format, OutputFormat::Json);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
