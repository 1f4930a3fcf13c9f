//! micromamba CLI

use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use mamba_cli::cmd;
use mamba_cli::{Cli, Commands, GlobalArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.global);
    let json = cli.global.json;

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<mamba_core::Error>()
                .map_or(1, mamba_core::Error::exit_code);
            if json {
                let body = serde_json::json!({
                    "success": false,
                    "error": format!("{err:#}"),
                    "exit_code": code,
                });
                println!("{body:#}");
            } else {
                eprintln!("{} {err:#}", "error:".red().bold());
            }
            ExitCode::from(code)
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Create { target, specs } => cmd::create::create(&global, &target, &specs).await,
        Commands::Install { target, specs } => {
            cmd::install::install(&global, &target, &specs).await
        }
        Commands::List { target } => cmd::list::list(&global, &target),
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing(global: &GlobalArgs) {
    let level = if global.quiet {
        "error"
    } else {
        match global.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
