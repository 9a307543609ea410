use clap::{Parser, Subcommand};

/// tokengate: access token service
#[derive(Parser)]
#[command(name = "tokengate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to TOKENGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Work with access tokens directly against the store
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Get the live token for a user, issuing a new one if needed
    Get {
        #[arg(long)]
        uid: i64,
    },
    /// Show a stored token as the API would render it
    Show {
        #[arg(long)]
        id: i64,
        /// Comma-separated list of fields to include
        #[arg(long)]
        fields: Option<String>,
    },
}
