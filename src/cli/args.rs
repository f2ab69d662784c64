use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lotto-cache")]
#[command(version)]
#[command(about = "Operator tool for the prediction cache", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Remote store URL (overrides configuration)
    #[arg(long, env = "LOTTO_CACHE_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration file
    Init,
    /// Print the effective configuration
    Config,
    /// Check remote reachability and local capacity
    Health,
    /// Show cache statistics and remote memory usage
    Stats {
        /// Zero the hit/miss counters before reporting
        #[arg(long)]
        reset: bool,
    },
    /// Preload entries from a JSON seed file
    Warm {
        /// Seed file: [{"key", "value", "ttl_secs"?, "tags"?}]
        file: PathBuf,
    },
    /// Remove keys matching a glob pattern
    Clear {
        /// Glob pattern, "*" for everything
        #[arg(default_value = "*")]
        pattern: String,
    },
    /// Remove every key carrying one of the tags
    Invalidate {
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    Text,
    /// JSON structured output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invalidate() {
        let cli = Cli::parse_from(["lotto-cache", "invalidate", "predictions", "user:7"]);
        match cli.command {
            Commands::Invalidate { tags } => assert_eq!(tags, vec!["predictions", "user:7"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_clear_defaults_to_everything() {
        let cli = Cli::parse_from(["lotto-cache", "--output-format", "json", "clear"]);
        assert_eq!(cli.output_format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Clear { ref pattern } if pattern == "*"));
    }

    #[test]
    fn test_parse_stats_and_warm() {
        let cli = Cli::parse_from(["lotto-cache", "stats", "--reset"]);
        assert!(matches!(cli.command, Commands::Stats { reset: true }));

        let cli = Cli::parse_from(["lotto-cache", "warm", "seed.json"]);
        match cli.command {
            Commands::Warm { file } => assert_eq!(file, PathBuf::from("seed.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
