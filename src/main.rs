use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use aipia::config::Settings;
use aipia::constants;
use aipia::llm_interaction::CompletionClient;
use aipia::{chat, web_server};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// API key for the chat-completion service.
    #[arg(long, global = true, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat-completion endpoint.
    #[arg(long, global = true, default_value_t = constants::GROQ_API_URL.clone())]
    api_url: String,

    /// Model identifier sent with every request.
    #[arg(long, global = true, default_value_t = constants::AIPIA_CHAT_MODEL.clone())]
    model: String,

    /// Replace the built-in concierge instruction with the contents of this file.
    #[arg(long, global = true, env = "AIPIA_SYSTEM_PROMPT_FILE")]
    system_prompt_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the chat web UI.
    Serve {
        #[arg(long, default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
    },
    /// Chat with the concierge in this terminal.
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GROQ_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,aipia=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Credentials are checked before anything starts.
    let settings = Settings::resolve(
        cli.api_key,
        cli.api_url,
        cli.model,
        cli.system_prompt_file.as_deref(),
    )
    .context("Invalid configuration")?;
    info!(?settings, "Aipia starting with command: {:?}", cli.command);

    let completion = CompletionClient::new(&settings.api_url, &settings.api_key)
        .context("Failed to initialize completion client")?;

    match cli.command {
        Commands::Serve { port } => {
            let state =
                web_server::AppState::new(completion, &settings.model, &settings.system_prompt);
            let server = web_server::start_web_server(port, state);
            tokio::pin!(server);

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut server => {
                    if let Err(e) = res {
                        error!("Web server failed: {:?}", e);
                        return Err(e);
                    }
                    info!("Web server task completed unexpectedly.");
                }
            }
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            chat::run_terminal_chat(&completion, &settings.model, &settings.system_prompt)
                .await
                .context("Chat session failed")?;
        }
    }

    Ok(())
}
