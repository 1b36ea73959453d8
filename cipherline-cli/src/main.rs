use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use cipherline_core::config::{Config, LogBackend};
use cipherline_core::core_client::{ChatClient, ProfileStorage};
use cipherline_core::core_conversation::{
    ConversationOptions, Direction, EntryContent, RedactionReason, ViewEntry,
};
use cipherline_core::core_crypto::CryptoEngine;
use cipherline_core::core_directory::{FileDirectory, MemoryDirectory};
use cipherline_core::core_identity::{Timestamp, UserId};
use cipherline_core::core_log::{FileMessageLog, MemoryMessageLog};
use cipherline_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use cipherline_core::metrics::init_metrics;
use tracing::{debug, info, warn};

const DIRECTORY_FILE: &str = "directory.json";
const CURRENT_USER_FILE: &str = "current_user";

#[derive(Parser, Debug)]
#[command(name = "cipherline")]
#[command(author, version, about = "End-to-end encrypted contact messaging", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Act as this registered user instead of the default one
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new identity; the first one becomes the default user
    Init {
        #[arg(long)]
        email: String,
    },
    /// Show the current identity
    Whoami,
    /// Manage contacts
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },
    /// Send an encrypted message to a contact
    Send {
        /// Contact email
        #[arg(long)]
        to: String,
        message: String,
    },
    /// Print the decrypted conversation with a contact
    History {
        /// Contact email
        #[arg(long)]
        with: String,
        #[arg(long)]
        json: bool,
    },
    /// Run two users against an in-memory log and print both views
    Demo,
    /// Write the effective configuration to a file
    WriteConfig { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum ContactsAction {
    Add { email: String },
    List,
    Remove { email: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(dir) = &args.data_dir {
        config.identity.data_dir = PathBuf::from(shellexpand::tilde(dir).into_owned());
    }

    init_logging_from(&config, &args)?;
    init_metrics();
    debug!(data_dir = %config.identity.data_dir.display(), "Configuration loaded");

    match args.command {
        Command::Init { email } => init(&config, &email).await,
        Command::Whoami => whoami(&config, args.user.as_deref()).await,
        Command::Contacts { action } => contacts(&config, args.user.as_deref(), action).await,
        Command::Send { to, message } => send(&config, args.user.as_deref(), &to, &message).await,
        Command::History { with, json } => {
            history(&config, args.user.as_deref(), &with, json).await
        }
        Command::Demo => demo(&config).await,
        Command::WriteConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn init_logging_from(config: &Config, args: &Args) -> Result<()> {
    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse().unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    Ok(())
}

/// Client over the configured directory, log backend and profile storage
fn build_client(config: &Config) -> Result<ChatClient> {
    let data_dir = &config.identity.data_dir;
    let directory = Arc::new(FileDirectory::new(data_dir.join(DIRECTORY_FILE))?);
    let profiles = ProfileStorage::disk(data_dir, config.passphrase());
    if config.passphrase().is_none() {
        warn!(
            env = %config.identity.passphrase_env,
            "No keystore passphrase set; keys are stored unencrypted"
        );
    }

    let client = match config.log.backend {
        LogBackend::File => {
            let path = config.log_path();
            let log = FileMessageLog::open(&path)
                .with_context(|| format!("opening message log {}", path.display()))?;
            let log = Arc::new(log);
            ChatClient::new(directory, log, profiles)
        }
        LogBackend::Memory => {
            warn!("Memory log backend selected; messages will not outlive this process");
            ChatClient::new(directory, Arc::new(MemoryMessageLog::new()), profiles)
        }
    };

    Ok(client
        .with_engine(CryptoEngine::with_max_plaintext_len(
            config.conversation.max_plaintext_len,
        ))
        .with_options(ConversationOptions::from(&config.conversation)))
}

fn current_user_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CURRENT_USER_FILE)
}

fn read_current_user(data_dir: &Path) -> Result<UserId> {
    let path = current_user_path(data_dir);
    let raw = fs::read_to_string(&path)
        .map_err(|_| anyhow!("no identity in {}; run `cipherline init` first", data_dir.display()))?;
    let id = raw.trim();
    if id.is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(UserId::new(id))
}

fn write_current_user(data_dir: &Path, user_id: &UserId) -> Result<()> {
    fs::create_dir_all(data_dir)?;
    fs::write(current_user_path(data_dir), user_id.as_str())?;
    Ok(())
}

async fn signed_in(config: &Config, user: Option<&str>) -> Result<ChatClient> {
    let client = build_client(config)?;
    match user {
        Some(email) => client.sign_in_by_email(email).await?,
        None => {
            let user_id = read_current_user(&config.identity.data_dir)?;
            client.sign_in(&user_id).await?
        }
    };
    Ok(client)
}

async fn init(config: &Config, email: &str) -> Result<()> {
    let data_dir = &config.identity.data_dir;
    let client = build_client(config)?;
    let identity = client.register(email).await?;
    info!(user_id = %identity.user_id, "Identity created");

    if !current_user_path(data_dir).exists() {
        write_current_user(data_dir, &identity.user_id)?;
        println!("{} is now the default user", identity.email);
    }

    println!("Registered {} as {}", identity.email, identity.user_id);
    println!("Key fingerprint: {}", identity.public_key.fingerprint());
    Ok(())
}

async fn whoami(config: &Config, user: Option<&str>) -> Result<()> {
    let client = signed_in(config, user).await?;
    let identity = client
        .identity()
        .await
        .ok_or_else(|| anyhow!("sign-in did not start a session"))?;
    println!("{} <{}>", identity.user_id, identity.email);
    println!("Key fingerprint: {}", identity.public_key.fingerprint());
    Ok(())
}

async fn contacts(config: &Config, user: Option<&str>, action: ContactsAction) -> Result<()> {
    let client = signed_in(config, user).await?;
    match action {
        ContactsAction::Add { email } => {
            let contact = client.add_contact(&email).await?;
            println!("Added {} ({})", contact.email, contact.contact_id);
        }
        ContactsAction::List => {
            let contacts = client.contacts().await?;
            if contacts.is_empty() {
                println!("No contacts yet");
            }
            for contact in contacts {
                println!(
                    "{}  {}  added {}",
                    contact.contact_id,
                    contact.email,
                    format_timestamp(contact.added_at)
                );
            }
        }
        ContactsAction::Remove { email } => {
            let contact = client
                .find_contact(&email)
                .await?
                .ok_or_else(|| anyhow!("{} is not a contact", email))?;
            client.remove_contact(&contact.contact_id).await?;
            println!("Removed {}", contact.email);
        }
    }
    Ok(())
}

async fn send(config: &Config, user: Option<&str>, to: &str, message: &str) -> Result<()> {
    let client = signed_in(config, user).await?;
    let contact = client
        .find_contact(to)
        .await?
        .ok_or_else(|| anyhow!("{} is not a contact; add them first", to))?;

    let conversation = client.open_conversation(&contact.contact_id).await?;
    let entry = conversation.send(message).await?;
    println!("Sent message {} to {}", entry.message_id, contact.email);

    client.sign_out().await;
    Ok(())
}

async fn history(config: &Config, user: Option<&str>, with: &str, json: bool) -> Result<()> {
    let client = signed_in(config, user).await?;
    let contact = client
        .find_contact(with)
        .await?
        .ok_or_else(|| anyhow!("{} is not a contact", with))?;

    let conversation = client.open_conversation(&contact.contact_id).await?;
    let entries = conversation.entries().await;
    client.sign_out().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No messages with {}", contact.email);
    } else {
        for entry in &entries {
            println!("{}", render_entry(entry, &contact.email));
        }
    }
    Ok(())
}

async fn demo(config: &Config) -> Result<()> {
    let directory = Arc::new(MemoryDirectory::new());
    let log = Arc::new(MemoryMessageLog::new());
    let options = ConversationOptions::from(&config.conversation);

    let alice = ChatClient::new(directory.clone(), log.clone(), ProfileStorage::memory())
        .with_options(options.clone());
    let bob =
        ChatClient::new(directory, log.clone(), ProfileStorage::memory()).with_options(options);

    alice.register("alice@example.com").await?;
    bob.register("bob@example.com").await?;
    let to_bob = alice.add_contact("bob@example.com").await?;
    let to_alice = bob.add_contact("alice@example.com").await?;

    let alice_view = alice.open_conversation(&to_bob.contact_id).await?;
    let bob_view = bob.open_conversation(&to_alice.contact_id).await?;

    alice_view.send("Hi Bob, this one is sealed for you").await?;
    tokio::time::timeout(Duration::from_secs(2), bob_view.next_push())
        .await
        .context("bob never received the push")??;

    bob_view.send("Got it, Alice").await?;
    tokio::time::timeout(Duration::from_secs(2), alice_view.next_push())
        .await
        .context("alice never received the push")??;

    println!("Stored in the log:");
    let stored = log.messages().await;
    for message in &stored {
        println!(
            "  #{} {} -> {}: {}...",
            message.id,
            message.sender_id,
            message.receiver_id,
            message.ciphertext.chars().take(32).collect::<String>()
        );
    }

    println!("\nAlice sees:");
    for entry in alice_view.entries().await {
        println!("  {}", render_entry(&entry, "bob"));
    }
    println!("\nBob sees:");
    for entry in bob_view.entries().await {
        println!("  {}", render_entry(&entry, "alice"));
    }

    alice.sign_out().await;
    bob.sign_out().await;
    Ok(())
}

fn render_entry(entry: &ViewEntry, peer: &str) -> String {
    let who = match entry.direction {
        Direction::Outgoing => "me",
        Direction::Incoming => peer,
    };
    let text = match &entry.content {
        EntryContent::Plaintext(text) => text.as_str(),
        EntryContent::Redacted(RedactionReason::SealedForPeer) => "[sent from another session]",
        EntryContent::Redacted(RedactionReason::Undecryptable) => "[could not decrypt]",
    };
    format!("{} {:>5} {}: {}", format_timestamp(entry.timestamp), entry.message_id, who, text)
}

fn format_timestamp(timestamp: Timestamp) -> String {
    let time = UNIX_EPOCH + Duration::from_millis(timestamp.as_millis());
    humantime::format_rfc3339_seconds(time).to_string()
}
