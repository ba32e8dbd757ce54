use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cachetap — diagnostic logging reverse proxy for LLM Responses APIs
#[derive(Parser)]
#[command(name = "cachetap", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the proxy (the default when no subcommand is given)
    Serve {
        /// Address to bind; overrides CACHETAP_HOST (default 127.0.0.1)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind; overrides CACHETAP_PORT (default 8080)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Summarize captured requests from the store
    Analyze {
        /// Capture store root
        #[arg(long, env = "CACHETAP_LOG_DIR", default_value = "./logs")]
        dir: PathBuf,
        /// Only captures at or after this time (RFC 3339 or YYYY-MM-DD HH:MM)
        #[arg(long)]
        since: Option<String>,
        /// Only captures at or before this time
        #[arg(long)]
        until: Option<String>,
        /// Print the normalized-body paths of two captures for diffing
        #[arg(long, num_args = 2, value_names = ["REQUEST_ID", "REQUEST_ID"])]
        diff: Option<Vec<String>>,
    },
}
