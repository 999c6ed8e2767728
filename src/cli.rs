use clap::{Parser, Subcommand};
use codex_quota_core::Settings;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Report remaining Codex CLI quota")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Ignore the cached snapshot and fetch live
    #[arg(short, long, global = true)]
    pub refresh: bool,

    /// Cache freshness window in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub ttl: Option<u64>,

    /// Subcommand (defaults to `usage`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show current usage (default)
    Usage,
    /// Show the logged-in account via `codex app-server`
    Account,
    /// Parse a captured `/status` transcript ("-" reads stdin)
    Parse {
        /// Transcript file
        file: PathBuf,
    },
    /// Inspect or clear the snapshot cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Cache subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Print the cache file location
    Path,
    /// Delete the cached snapshot
    Clear,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Usage)
    }

    /// Merge CLI overrides into settings (CLI takes precedence)
    pub fn merge_into(&self, settings: &mut Settings) {
        if let Some(ttl) = self.ttl {
            settings.cache_ttl_secs = ttl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_usage() {
        let cli = Cli::try_parse_from(["codex-quota"]).unwrap();
        assert_eq!(cli.command(), Command::Usage);
        assert!(!cli.json);
        assert!(!cli.refresh);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["codex-quota", "usage", "--json", "--refresh", "--ttl", "30"])
            .unwrap();
        assert!(cli.json);
        assert!(cli.refresh);
        assert_eq!(cli.ttl, Some(30));
    }

    #[test]
    fn test_parse_subcommand() {
        let cli = Cli::try_parse_from(["codex-quota", "parse", "status.txt"]).unwrap();
        assert_eq!(
            cli.command(),
            Command::Parse {
                file: PathBuf::from("status.txt")
            }
        );
    }

    #[test]
    fn test_cache_subcommands() {
        let cli = Cli::try_parse_from(["codex-quota", "cache", "clear"]).unwrap();
        assert_eq!(
            cli.command(),
            Command::Cache {
                action: CacheAction::Clear
            }
        );
        assert!(Cli::try_parse_from(["codex-quota", "cache"]).is_err());
    }

    #[test]
    fn test_merge_ttl() {
        let cli = Cli::try_parse_from(["codex-quota", "--ttl", "0"]).unwrap();
        let mut settings = Settings::default();
        cli.merge_into(&mut settings);
        assert_eq!(settings.cache_ttl_secs, 0);

        let cli = Cli::try_parse_from(["codex-quota"]).unwrap();
        let mut settings = Settings::default();
        cli.merge_into(&mut settings);
        assert_eq!(settings.cache_ttl_secs, 300);
    }
}
