use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use avatar_session::console::{CONSOLE_HELP, ConsoleCommand, DEFAULT_AUDIO_FILE};
use avatar_session::{
    ClientConfig, Session, SessionController, SessionError, ShutdownReason, WireDialect,
};

/// Avatar session client - drive an interactive avatar over WebSocket
#[derive(Parser, Debug)]
#[command(name = "avatar-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `interactive`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a session through the REST API and control it from the console
    Interactive,

    /// Stream one WAV file straight to a WebSocket receiver
    Send {
        /// WAV file to stream
        #[arg(default_value = DEFAULT_AUDIO_FILE)]
        file: PathBuf,

        /// WebSocket address (overrides WEBSOCKET_ADDRESS)
        #[arg(short = 'a', long = "address")]
        address: Option<String>,

        /// Session id sent in `init` (overrides SESSION_ID)
        #[arg(short = 's', long = "session-id")]
        session_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Interactive => run_interactive(config).await,
        Commands::Send {
            file,
            address,
            session_id,
        } => run_send(config, file, address, session_id).await,
    }
}

/// Handshake, then drive the session from stdin until quit, Ctrl-C or
/// connection loss.
async fn run_interactive(config: ClientConfig) -> anyhow::Result<()> {
    let api = Arc::new(config.api_client()?);
    let session = api
        .open_session(&config.session_token_request())
        .await
        .map_err(|e| anyhow!("Handshake failed against {}: {}", config.base_url, e))?;

    let controller = Arc::new(
        SessionController::new(session, config.session_options(WireDialect::Engine))
            .with_teardown(api.clone()),
    );
    controller.start().await?;

    println!("{CONSOLE_HELP}");
    let mut lines = spawn_stdin_reader();
    let lost = controller.connection_lost();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut streams = JoinSet::new();

    let reason = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break ShutdownReason::ExternalStop;
            }
            () = lost.cancelled() => {
                warn!("Connection to the avatar service was lost");
                break ShutdownReason::ChannelError;
            }
            Some(_) = streams.join_next(), if !streams.is_empty() => {}
            line = lines.recv() => {
                let Some(line) = line else {
                    break ShutdownReason::Quit;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => break ShutdownReason::Quit,
                    Ok(Some(ConsoleCommand::SendFile(path))) => {
                        let controller = controller.clone();
                        streams.spawn(async move {
                            match controller.send_audio_file(&path).await {
                                Ok(chunks) => info!("Finished {} ({} chunks)", path.display(), chunks),
                                Err(e) => error!("Failed to send {}: {}", path.display(), e),
                            }
                        });
                    }
                    Ok(Some(ConsoleCommand::Interrupt)) => {
                        if let Err(e) = controller.interrupt().await {
                            error!("Failed to interrupt: {}", e);
                        }
                    }
                    Ok(Some(ConsoleCommand::Custom { command, data })) => {
                        if let Err(e) = controller.send_custom(command, data).await {
                            error!("Failed to send custom command: {}", e);
                        }
                    }
                    Err(e) => println!("{e}\n{CONSOLE_HELP}"),
                }
            }
        }
    };

    streams.abort_all();
    if let Some(report) = controller.stop(reason).await {
        info!(
            "Session ended ({}): {} heartbeats, {} messages received, {} malformed",
            report.reason,
            report.heartbeat.sent(),
            report.listener.handled,
            report.listener.malformed
        );
    }
    Ok(())
}

/// Standalone streamer: init, one file, `voice_end`, one heartbeat, close.
async fn run_send(
    config: ClientConfig,
    file: PathBuf,
    address: Option<String>,
    session_id: Option<String>,
) -> anyhow::Result<()> {
    if !file.exists() {
        bail!("Audio file {} not found", file.display());
    }

    let session = Session::new(
        session_id.unwrap_or_else(|| config.session_id.clone()),
        address.unwrap_or_else(|| config.websocket_address.clone()),
    );
    let controller = SessionController::new(session, config.session_options(WireDialect::Receiver));
    if let Err(e) = controller.start().await {
        if matches!(e, SessionError::ConnectionFailed(_)) {
            error!("Make sure the WebSocket receiver is running first.");
        }
        return Err(e.into());
    }

    let streamed = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.send_audio_file(&file).await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.send_heartbeat().await?;
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok::<_, SessionError>(())
    }
    .await;

    controller.quit().await;
    streamed?;
    Ok(())
}

/// Read stdin lines on a dedicated thread so the runtime never blocks on it.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
