//! Mnemo CLI entry point.
//!
//! Binary name: `mnemo`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handlers. Errors are printed once here and mapped to a stable exit code.

mod cli;
mod exit;
mod state;

use clap::Parser;
use clap_complete::generate;
use console::style;

use cli::{Cli, Commands, SessionCommand};
use state::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = mnemo_observe::filter_for_verbosity(cli.verbose, cli.quiet);
    let enable_otel = std::env::var("MNEMO_OTEL").is_ok_and(|v| v == "1");
    if let Err(e) = mnemo_observe::init_tracing(filter, enable_otel) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    let json = cli.json;
    let code = match run(cli).await {
        Ok(()) => exit::SUCCESS,
        Err(err) => {
            let code = exit::exit_code(&err);
            if json {
                let body = serde_json::json!({ "error": format!("{err:#}"), "code": code });
                eprintln!("{body}");
            } else {
                eprintln!("{} {err:#}", style("error:").red().bold());
            }
            code
        }
    };

    mnemo_observe::shutdown_tracing();
    // Exit without waiting on a confirmation prompt still parked on the
    // blocking pool.
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "mnemo", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;
    let (json, quiet) = (cli.json, cli.quiet);

    match cli.command {
        Commands::Store { command } => cli::store::run(&state, command, json, quiet).await?,

        Commands::Migrate { from, to } => {
            cli::migrate::migrate(&state, from, to, json, quiet).await?;
        }

        Commands::Observe {
            session,
            usage,
            capacity,
        } => {
            cli::capture::observe(&state, &session, usage, capacity).await?;
        }

        Commands::Capture {
            session,
            transcript,
            category,
            tags,
            yes,
        } => {
            cli::capture::capture(&state, &session, &transcript, category, tags, yes, json, quiet)
                .await?;
        }

        Commands::Remember {
            summary,
            category,
            tags,
        } => {
            cli::capture::remember(&state, &summary, category, &tags, json, quiet).await?;
        }

        Commands::Session { command } => match command {
            SessionCommand::Reset { session } => {
                cli::capture::reset_session(&state, &session, json, quiet).await?;
            }
        },

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
