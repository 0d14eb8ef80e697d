//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OAuth Session - desktop sign-in and authenticated API access
#[derive(Parser, Debug)]
#[command(name = "oauth-session")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OAUTH_SESSION_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "OAUTH_SESSION_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OAUTH_SESSION_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in through the system browser and store the session
    Login,

    /// Refresh the stored session now
    Refresh,

    /// Show session state and token expiry
    Status,

    /// Remove the stored session
    Logout,

    /// Authenticated GET; prints the normalized entity list as JSON
    Get {
        /// Path relative to `api.base_url`, or an absolute URL
        #[arg(required = true)]
        path: String,

        /// Field wrapping the collection in the response
        #[arg(long)]
        collection: Option<String>,

        /// Retry while the list is empty (eventually-consistent reads)
        #[arg(long)]
        await_consistency: bool,
    },

    /// Print the effective configuration as YAML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_with_flags() {
        let cli = Cli::parse_from([
            "oauth-session",
            "--log-level",
            "debug",
            "get",
            "/clusters",
            "--collection",
            "clusters",
            "--await-consistency",
        ]);
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Get {
                path,
                collection,
                await_consistency,
            } => {
                assert_eq!(path, "/clusters");
                assert_eq!(collection.as_deref(), Some("clusters"));
                assert!(await_consistency);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_config_after_subcommand() {
        let cli = Cli::parse_from(["oauth-session", "status", "--config", "/tmp/s.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.yaml")));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn command_is_required() {
        assert!(Cli::try_parse_from(["oauth-session"]).is_err());
    }
}
