use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use samvad::{Config, Endpoints, UiEvent, VoiceClient};

/// Samvad - voice conversation client
#[derive(Parser)]
#[command(name = "samvad", version, about)]
struct Cli {
    /// Backend base URL; all endpoints are derived from it
    #[arg(long, env = "SAMVAD_BASE_URL", default_value = "http://127.0.0.1:8000")]
    base_url: String,

    /// Path to a TOML configuration file (overrides --base-url)
    #[arg(short, long, env = "SAMVAD_CONFIG")]
    config: Option<PathBuf>,

    /// Initial response language code
    #[arg(short, long, default_value = "en")]
    language: String,

    /// Start with the microphone muted
    #[arg(long)]
    muted: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,samvad=info",
        1 => "info,samvad=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config {
            endpoints: Endpoints::from_base(&cli.base_url),
            language: cli.language.clone(),
            muted: cli.muted,
        },
    };
    tracing::debug!(?config, "loaded configuration");

    let client = Arc::new(VoiceClient::new(&config)?);
    let mut ui = client.ui_events()?;

    tracing::info!(
        signal = %config.endpoints.signal_url,
        language = %config.language,
        "samvad ready - speak, or type a turn and press enter"
    );
    println!("Commands: /lang <code>, /mute, /unmute, /reset, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // a delta stream is open once the agent starts responding
    let mut mid_response = false;

    loop {
        tokio::select! {
            event = ui.recv() => {
                match event {
                    Some(UiEvent::UserTurn(text)) => {
                        if mid_response {
                            println!();
                            mid_response = false;
                        }
                        println!("[You] {text}");
                    }
                    Some(UiEvent::AssistantDelta(delta)) => {
                        if !mid_response {
                            print!("[Agent] ");
                            mid_response = true;
                        }
                        print!("{delta}");
                        std::io::stdout().flush()?;
                    }
                    None => break,
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if mid_response {
                    println!();
                    mid_response = false;
                }
                if !handle_input(&client, line.trim()) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.reset();
    client.shutdown();
    tracing::info!("session ended");

    Ok(())
}

/// Dispatch one line of terminal input; returns false to quit
fn handle_input(client: &Arc<VoiceClient>, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" | "/exit" => return false,
        "/mute" => client.set_muted(true),
        "/unmute" => client.set_muted(false),
        "/reset" => {
            client.reset();
            println!("(conversation reset)");
        }
        _ => {
            if let Some(lang) = line.strip_prefix("/lang ") {
                client.set_language(lang.trim());
                println!("(language set to {})", lang.trim());
            } else {
                // submit off the loop so deltas keep printing while the
                // response streams
                let client = Arc::clone(client);
                let text = line.to_string();
                tokio::spawn(async move {
                    client.submit_text(&text).await;
                });
            }
        }
    }
    true
}
