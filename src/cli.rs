//! Command-line interface definitions.
//!
//! Every option can also come from the environment where an `env` name is
//! given, which keeps credentials out of shell history and cron lines.

use clap::Parser;
use std::path::PathBuf;

/// Archive discussion-board catalogs, thread pages and subreddit
/// submissions as timestamped files.
///
/// ```sh
/// # Built-in sources, output under ./archive
/// board_harvest -o ./archive
///
/// # Only two sources from a config file, with a log file
/// board_harvest -c harvest.yaml -s 8kun-pnd,reddit-worldnews --log-file run.log
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a YAML source configuration; built-in sources are used otherwise
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory for all output; overrides `output_root` from the config
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Comma-separated source names to run (default: all configured sources)
    #[arg(short, long, value_delimiter = ',')]
    pub sources: Option<Vec<String>>,

    /// Also write logs (without colors) to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the configured sources and exit
    #[arg(long)]
    pub list_sources: bool,

    /// Reddit application client id; enables OAuth when given with the secret
    #[arg(long, env = "REDDIT_CLIENT_ID")]
    pub reddit_client_id: Option<String>,

    #[arg(long, env = "REDDIT_CLIENT_SECRET", hide_env_values = true)]
    pub reddit_client_secret: Option<String>,

    /// User agent for all requests; overrides `user_agent` from the config
    #[arg(long, env = "REDDIT_USER_AGENT")]
    pub reddit_user_agent: Option<String>,
}
