//! Dreamlog CLI client (test build).
//!
//! Non-interactive: signs in with the given account, connects and logs
//! whatever the inbox, the open thread and the version watcher report.

use anyhow::Result;
use clap::Parser;
use dreamlog_sdk_core::dream::conversation::ConversationListener;
use dreamlog_sdk_core::dream::feed::{FeedFilter, FeedSort};
use dreamlog_sdk_core::dream::message::MessageListener;
use dreamlog_sdk_core::dream::version::VersionEvent;
use dreamlog_sdk_core::{sign_in_async, ClientConfig, ConversationSummary, DreamClient, FeedQuery, Message};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Dreamlog CLI client
#[derive(Parser, Debug)]
#[command(name = "dream-cli")]
#[command(about = "Dreamlog CLI client for exercising the SDK", long_about = None)]
struct Args {
    #[arg(short, long, env = "DREAMLOG_EMAIL")]
    email: String,

    #[arg(short, long, env = "DREAMLOG_PASSWORD")]
    password: String,

    #[arg(long, env = "DREAMLOG_API_URL", default_value = "http://localhost:54321")]
    api_url: String,

    #[arg(long, env = "DREAMLOG_ANON_KEY")]
    anon_key: String,

    /// Change feed URL; defaults to the API URL with a ws scheme
    #[arg(long, env = "DREAMLOG_REALTIME_URL")]
    realtime_url: Option<String>,

    #[arg(long, env = "DREAMLOG_VERSION_URL")]
    version_url: Option<String>,

    #[arg(long, env = "DREAMLOG_DB_URL", default_value = "sqlite://dreamlog.db?mode=rwc")]
    db_url: String,

    /// Run time in seconds, 0 runs until interrupted
    #[arg(short, long, default_value = "0")]
    duration: u64,

    #[arg(long, default_value = "info,dreamlog_sdk_core=debug")]
    log_level: String,
}

/// Log to stdout and to `debug.log`.
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins over --log-level.
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("cannot create debug.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 logging to stdout and debug.log");
}

fn preview(text: &str) -> String {
    if text.chars().count() > 30 {
        format!("{}…", text.chars().take(30).collect::<String>())
    } else {
        text.to_string()
    }
}

fn setup_listeners(client: &mut DreamClient) {
    struct CliConversationListener;
    #[async_trait::async_trait]
    impl ConversationListener for CliConversationListener {
        async fn on_sync_server_start(&self) {
            info!("[CLI/Conversation] 🔄 sync started");
        }

        async fn on_sync_server_finish(&self) {
            info!("[CLI/Conversation] ✅ sync finished");
        }

        async fn on_sync_server_failed(&self) {
            error!("[CLI/Conversation] ❌ sync failed");
        }

        async fn on_conversation_changed(&self, conversations: Vec<ConversationSummary>) {
            info!("[CLI/Conversation] 🔄 {} conversations", conversations.len());
            for conv in conversations.iter().take(5) {
                info!(
                    "[CLI]   - {} | unread: {} | latest: {}",
                    conv.counterpart.label(),
                    conv.unread_count,
                    preview(&conv.last_message)
                );
            }
        }

        async fn on_total_unread_message_count_changed(&self, total_unread_count: u32) {
            info!("[CLI/Conversation] 📬 total unread: {}", total_unread_count);
        }
    }
    client.set_conversation_listener(Arc::new(CliConversationListener));

    struct CliMessageListener;
    #[async_trait::async_trait]
    impl MessageListener for CliMessageListener {
        async fn on_recv_new_message(&self, message: Message) {
            info!(
                "[CLI/Message] 📨 {} -> {}: {}",
                message.sender_id,
                message.receiver_id,
                preview(&message.body)
            );
        }

        async fn on_message_updated(&self, message: Message) {
            info!(
                "[CLI/Message] 📖 {} read={:?} seen={:?}",
                message.id, message.read_at, message.seen_at
            );
        }

        async fn on_thread_refreshed(&self, counterpart_id: String, messages: Vec<Message>) {
            info!("[CLI/Message] 🔄 {} messages with {}", messages.len(), counterpart_id);
        }

        async fn on_connection_status_changed(&self, connected: bool, message: String) {
            if connected {
                info!("[CLI/Message] 🔗 connected: {}", message);
            } else {
                error!("[CLI/Message] 🔗 disconnected: {}", message);
            }
        }
    }
    client.set_message_listener(Arc::new(CliMessageListener));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] 🚀 Dreamlog CLI client (test mode)");
    info!("[CLI] ⏱️  duration: {} s (0 = until interrupted)", args.duration);

    info!("[CLI] 🔐 signing in as {}...", args.email);
    let session = sign_in_async(&args.api_url, &args.anon_key, &args.email, &args.password)
        .await
        .map_err(|e| anyhow::anyhow!("sign-in failed: {:#}", e))?;
    info!("[CLI] ✅ signed in, user id: {}", session.user.id);

    let mut config = ClientConfig::new(session.user.id.clone(), session.access_token, args.anon_key);
    config.realtime_url = args
        .realtime_url
        .unwrap_or_else(|| args.api_url.replacen("http", "ws", 1));
    config.api_base_url = args.api_url;
    config.version_url = args.version_url;
    config.local_db_url = args.db_url;

    let mut client = DreamClient::new(config)?;
    setup_listeners(&mut client);

    info!("[CLI] 🔗 connecting...");
    client
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("connect failed: {:#}", e))?;
    info!("[CLI] ✅ connected");

    match client
        .feed(FeedQuery {
            filter: FeedFilter::All,
            search: String::new(),
            sort: FeedSort::Trending,
        })
        .await
    {
        Ok(entries) => {
            info!("[CLI] 📰 trending feed ({} entries)", entries.len());
            for entry in entries.iter().take(5) {
                info!(
                    "[CLI]   - {} | ❤️ {} | 💬 {} | {}",
                    entry.id,
                    entry.like_count,
                    entry.comment_count,
                    preview(&entry.text.primary)
                );
            }
        }
        Err(e) => warn!("[CLI] feed unavailable: {:#}", e),
    }

    if let Some(mut events) = client.take_version_events() {
        tokio::spawn(async move {
            while let Some(VersionEvent::ReloadRequired { from, to }) = events.recv().await {
                warn!("[CLI/Version] 🔄 {} -> {}, reload required", from.version, to.version);
            }
        });
    }

    info!("[CLI] 📥 listening...");
    if args.duration > 0 {
        info!("[CLI] ⏰ exiting in {} s", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ running, Ctrl+C to exit");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[CLI] cannot wait for Ctrl+C: {}", e);
        }
    }

    client.shutdown().await;
    info!("[CLI] 👋 bye");
    Ok(())
}
