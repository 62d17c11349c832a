//! # envoy
//!
//! Negotiation bot binary. `envoy run` wires settings, telemetry, storage,
//! the completion client and the console transport into the dispatcher.
//! `envoy reformat` cleans up a pasted adjudication dump.

#![deny(unsafe_code)]

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use envoy_core::ids::ChannelId;
use envoy_engine::adjudication::format_adjudication;
use envoy_engine::{Coordinator, EngineConfig};
use envoy_llm::{OpenAiCompletion, OpenAiConfig, ReliableCompletion, ReliableConfig};
use envoy_server::console::read_console;
use envoy_server::{ConsoleGateway, Dispatcher};
use envoy_settings::EnvoySettings;
use envoy_store::Database;
use envoy_telemetry::{init_telemetry, TelemetryConfig};

const EVENT_QUEUE: usize = 256;
const CONSOLE_CHANNEL: &str = "console";
/// Stdin reads sit on a blocking thread; do not wait on them at exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Diplomacy negotiation bot.
#[derive(Parser, Debug)]
#[command(name = "envoy", about = "Diplomacy negotiation bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot on the console transport (default).
    Run,
    /// Reformat an adjudication dump into per-power blocks.
    Reformat {
        /// Input file; stdin when omitted.
        #[arg(short = 'i', long = "input")]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start tokio runtime")?;
            let result = runtime.block_on(run());
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
            result.map(|()| ExitCode::SUCCESS)
        }
        Command::Reformat { input } => reformat(input),
    }
}

fn reformat(input: Option<PathBuf>) -> Result<ExitCode> {
    let text = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    if text.trim().is_empty() {
        eprintln!("No input received.");
        return Ok(ExitCode::from(2));
    }
    println!("{}", format_adjudication(&text));
    Ok(ExitCode::SUCCESS)
}

fn telemetry_config(settings: &EnvoySettings) -> TelemetryConfig {
    TelemetryConfig {
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.logging.log_db_path.clone(),
        ..TelemetryConfig::default()
    }
    .with_level_name(&settings.logging.level)
}

async fn run() -> Result<()> {
    let settings = envoy_settings::load_settings().context("Failed to load settings")?;
    let _telemetry = init_telemetry(telemetry_config(&settings));

    let db = Database::open(&settings.db_path)
        .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?;

    // Completion client
    let api_key = std::env::var("OPENAI_API_KEY")
        .map(SecretString::from)
        .context("OPENAI_API_KEY is not set")?;
    let cs = &settings.completion;
    let client = OpenAiCompletion::new(
        api_key,
        OpenAiConfig {
            base_url: cs.base_url.clone(),
            model: cs.model.clone(),
            service_tier: cs.service_tier.clone(),
        },
    )
    .context("Failed to build completion client")?;
    let completion = Arc::new(ReliableCompletion::new(
        client,
        ReliableConfig {
            timeout: cs.timeout(),
            max_retries: cs.max_retries,
            ..ReliableConfig::default()
        },
    ));

    // Transport and pipelines
    let control_channel = if settings.control_channel_id.trim().is_empty() {
        ChannelId::from_raw(CONSOLE_CHANNEL)
    } else {
        ChannelId::from_raw(settings.control_channel_id.trim())
    };
    let gateway = Arc::new(ConsoleGateway::new(std::io::stdout()));
    let coordinator = Arc::new(Coordinator::new(
        db,
        completion,
        gateway.clone(),
        EngineConfig::from_settings(&settings),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("ctrl-c received, shutting down"),
                Err(e) => warn!(error = %e, "ctrl-c handler failed"),
            }
            cancel.cancel();
        });
    }

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(read_console(
        BufReader::new(tokio::io::stdin()),
        tx,
        control_channel.clone(),
        cancel.clone(),
    ));

    info!(
        ai_country = %settings.ai_country,
        control_channel = %control_channel,
        model = settings.completion.model.as_str(),
        "envoy started"
    );
    Dispatcher::new(coordinator, gateway, control_channel, cancel.clone())
        .run(rx)
        .await;
    cancel.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_runs() {
        let cli = Cli::try_parse_from(["envoy"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn reformat_takes_an_input_file() {
        let cli = Cli::try_parse_from(["envoy", "reformat", "-i", "dump.txt"]).unwrap();
        match cli.command {
            Some(Command::Reformat { input }) => {
                assert_eq!(input, Some(PathBuf::from("dump.txt")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn telemetry_follows_logging_settings() {
        let mut settings = EnvoySettings::default();
        settings.logging.level = "debug".into();
        settings.logging.log_to_sqlite = false;
        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert!(!config.log_to_sqlite);
    }
}
