//! FleetChat terminal client
//!
//! Opens one service order's support conversation and drives it from the
//! terminal, standing in for the mobile ticket screen.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleetchat_client::attachments::NoRecorder;
use fleetchat_client::auth::{FileTokenStore, TokenStore};
use fleetchat_client::badges::InMemoryBadgeStore;
use fleetchat_client::realtime::PusherTransport;
use fleetchat_client::{mount, ApiClient, Config, SessionDeps};
use fleetchat_shared::{ConversationId, UserSession};

mod chat;
mod platform;

use chat::ChatView;
use platform::{NoAudioOutput, PathPicker};

#[derive(Parser)]
#[command(name = "fleetchat")]
#[command(about = "Faucon Bleu service order support chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the support conversation of a service order
    Chat {
        /// Service order id
        service_order: String,
    },

    /// Manage the stored auth token
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Store the token issued at login
    Set { token: String },

    /// Forget the stored token (sign out)
    Clear,

    /// Report whether a token is stored
    Status,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Token { command } => {
            let tokens = FileTokenStore::new(Config::auth_token_path());
            run_token(command, &tokens).await
        }
        Commands::Chat { service_order } => {
            let config = Config::from_env().context("Failed to load configuration")?;
            let tokens = Arc::new(FileTokenStore::new(config.auth_token_path.clone()));
            run_chat(config, tokens, ConversationId::from(service_order)).await
        }
    }
}

async fn run_token(command: TokenCommand, tokens: &dyn TokenStore) -> anyhow::Result<()> {
    match command {
        TokenCommand::Set { token } => {
            tokens.store_token(token.trim()).await?;
            println!("Token stored");
        }
        TokenCommand::Clear => {
            tokens.clear_token().await?;
            println!("Signed out");
        }
        TokenCommand::Status => match tokens.load_token().await {
            Some(_) => println!("Signed in"),
            None => println!("Signed out"),
        },
    }
    Ok(())
}

async fn run_chat(
    config: Config,
    tokens: Arc<FileTokenStore>,
    conversation: ConversationId,
) -> anyhow::Result<()> {
    let api = ApiClient::new(&config, tokens.clone()).context("Failed to build HTTP client")?;
    let transport = PusherTransport::new(config.realtime_url(), Arc::new(api.clone()));
    let picker = Arc::new(PathPicker::default());
    let user = UserSession::new(config.user_type);

    tracing::info!(
        conversation_id = %conversation,
        api = %config.api_base_url,
        realtime_host = %config.pusher_host,
        "Opening conversation"
    );

    let deps = SessionDeps {
        api: Arc::new(api.clone()),
        transport: Arc::new(transport),
        tokens,
        badges: Arc::new(InMemoryBadgeStore::new()),
        user: user.clone(),
        picker: picker.clone(),
        recorder: Arc::new(NoRecorder),
        audio: Arc::new(NoAudioOutput),
        download_dir: config.download_dir.clone(),
    };
    let (handle, events) = mount(conversation, deps);

    let view = ChatView {
        handle,
        api,
        picker,
        user,
        mapbox_token: config.mapbox_token.clone(),
    };
    view.run(events).await
}
