//! `blockworld` – replay recorded perception sessions through the world
//! model.
//!
//! ```text
//! blockworld replay session.jsonl          # feed every tick, print the world
//! blockworld replay session.jsonl --json   # same, snapshot as JSON
//! blockworld init-config                   # write ~/.blockworld/config.toml
//! ```

mod config;
mod replay;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use blockworld_world::BlockWorld;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "blockworld", version, about = "Object world model replay tool")]
struct Cli {
    /// Path to a TOML world configuration (defaults to ~/.blockworld/config.toml).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines session file.
    Replay {
        #[arg(value_name = "SESSION")]
        session: PathBuf,

        /// Print the final located objects as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Replay { session, json } => run_replay(cli.config, session, json),
        Command::InitConfig { force } => init_config(cli.config, force),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!(error = %message, "blockworld failed");
            eprintln!("{}: {}", "error".red().bold(), message);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` selects levels (default `info`); `BLOCKWORLD_LOG_FORMAT=json`
/// switches to newline-delimited JSON.  Logs go to stderr so stdout stays
/// clean for `--json`.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("BLOCKWORLD_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn run_replay(config_path: Option<PathBuf>, session: PathBuf, json: bool) -> Result<(), String> {
    let cfg = config::load(config_path.as_deref()).map_err(|e| e.to_string())?;
    let file = File::open(&session)
        .map_err(|e| format!("failed to open {}: {e}", session.display()))?;
    let ticks = replay::parse_session(BufReader::new(file)).map_err(|e| e.to_string())?;

    let mut world = BlockWorld::new(&cfg).map_err(|e| e.to_string())?;
    let report = replay::run(&mut world, ticks).map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::json!({
            "report": report,
            "current_origin": world.current_origin(),
            "located": world.world().snapshot(),
        });
        let text = serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?;
        println!("{text}");
    } else {
        replay::print_summary(&world, &report);
    }
    Ok(())
}

fn init_config(config_path: Option<PathBuf>, force: bool) -> Result<(), String> {
    let path = config_path.unwrap_or_else(config::config_path);
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&blockworld_world::WorldConfig::default(), &path).map_err(|e| e.to_string())?;
    println!(
        "  {} Config saved to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}
