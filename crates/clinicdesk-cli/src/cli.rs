use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "clinicdesk")]
#[command(about = "ClinicDesk CLI: sign in through your OpenID Connect provider")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./clinicdesk.toml)
    #[arg(short, long, global = true, env = "CLINICDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Session profile name
    #[arg(short, long, global = true, env = "CLINICDESK_PROFILE", default_value = "default")]
    pub profile: String,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a login and print the provider URL to open
    Login,
    /// Complete a login from the URL the provider redirected to
    Callback(CallbackArgs),
    /// Show the signed-in user and roles
    Whoami,
    /// Print a valid access token, refreshing it when needed
    Token(TokenArgs),
    /// Check the signed-in user's roles
    Check(CheckArgs),
    /// Clear the session and print the provider logout URL
    Logout,
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct CallbackArgs {
    /// Full redirect URL, including `code` and `state`
    pub url: String,
}

#[derive(clap::Args)]
pub struct TokenArgs {
    /// Refresh unless the token stays valid for this many seconds
    #[arg(long, default_value_t = 30)]
    pub min_validity: u64,
}

#[derive(clap::Args)]
pub struct CheckArgs {
    /// Roles to check
    #[arg(required = true)]
    pub roles: Vec<String>,
    /// Require every role instead of any one
    #[arg(long)]
    pub all: bool,
    /// Decide as a route guard for this path
    #[arg(long)]
    pub route: Option<String>,
    /// Redirect target for a denied route
    #[arg(long, requires = "route")]
    pub redirect_to: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}
