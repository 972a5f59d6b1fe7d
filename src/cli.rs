use clap::{Parser, Subcommand};

/// Alupass: approval service for the aluminium passport platform
#[derive(Parser)]
#[command(name = "alupass", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Port to bind (defaults to ALUPASS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Inspect and decide approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Issue session tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Manage local users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests visible to a user
    List {
        /// Act as this user id
        #[arg(long = "as-user")]
        as_user: i64,
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        request_type: Option<String>,
        /// Only requests this user may decide
        #[arg(long)]
        for_approval: bool,
        #[arg(long, default_value = "1")]
        page: i64,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Approve a pending request
    Approve {
        request_id: i64,
        #[arg(long = "as-user")]
        as_user: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reject a pending request
    Reject {
        request_id: i64,
        #[arg(long = "as-user")]
        as_user: i64,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Sign a session token for an existing user
    Issue {
        #[arg(long)]
        user_id: i64,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create an active user directly (bootstrap admins and staff).
    /// Supplier roles must go through onboarding.
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        role: String,
        /// Generated and printed when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        wallet: Option<String>,
        #[arg(long)]
        company: Option<String>,
    },
}
