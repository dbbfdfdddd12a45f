//! Quarry CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP gateway
//! - `ask`     — Run one research query from the terminal
//! - `config`  — Print, locate or validate configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Quarry — agentic research over a knowledge base",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short = 'v', long = "debug", global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Research a question against the knowledge base
    Ask(commands::ask::AskArgs),

    /// Configuration helpers (prints the default config when no action is given)
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask(args) => commands::ask::run(args).await?,
        Commands::Config { action } => commands::config_cmd::run(action)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_flags_parse() {
        let cli = Cli::parse_from([
            "quarry", "-v", "ask", "What is ATP?", "--stream", "--verbose", "--max-steps", "3",
            "--notebook", "nb_1", "--web",
        ]);
        assert!(cli.debug);
        match cli.command {
            Commands::Ask(args) => {
                assert_eq!(args.query, "What is ATP?");
                assert!(args.stream && args.verbose && args.web);
                assert_eq!(args.max_steps, Some(3));
                assert_eq!(args.notebook.as_deref(), Some("nb_1"));
                assert!(args.channel.is_none());
            }
            _ => panic!("expected ask"),
        }
    }
}
