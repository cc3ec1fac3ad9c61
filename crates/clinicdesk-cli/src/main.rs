mod cli;
mod commands;
mod observability;
mod output;
mod session;
mod settings;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands, ConfigCommands};
use output::print_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_level);

    if let Err(e) = run(cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = settings::load(cli.config.as_deref())?;
    let profile = cli.profile.as_str();
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Login => commands::auth::login(&settings, profile).await?,
        Commands::Callback(args) => commands::auth::callback(&settings, profile, &args.url).await?,
        Commands::Whoami => commands::auth::whoami(&settings, profile, format).await?,
        Commands::Token(args) => {
            commands::auth::token(&settings, profile, args.min_validity).await?;
        }
        Commands::Check(args) => commands::access::check(&settings, profile, args).await?,
        Commands::Logout => commands::auth::logout(&settings, profile).await?,
        Commands::Config(args) => match &args.command {
            ConfigCommands::Show => commands::config::show(&settings, profile, format)?,
        },
    }

    Ok(())
}
