pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "officeflow",
    about = "Officeflow operator CLI",
    long_about = "Operate the officeflow approval engine: migrations, demo data, config inspection, readiness checks and bearer tokens.",
    after_help = "Examples:\n  officeflow doctor --json\n  officeflow seed --reset\n  officeflow token --user 42 --role admin"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo organisation, catalog and business rows")]
    Seed {
        #[arg(long, help = "Clear instances and restore seeded business rows first")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, token signing and store connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Issue a bearer token for a user")]
    Token {
        #[arg(long = "user", help = "Subject user id")]
        user: i64,
        #[arg(long = "role", help = "Role claim; repeat for several roles")]
        roles: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { reset } => commands::seed::run(reset),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Token { user, roles } => commands::token::run(user, &roles),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
