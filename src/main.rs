use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use redweb_messaging::api::client::ApiClient;
use redweb_messaging::api::events::{event_channel, StoreEvent};
use redweb_messaging::api::models::profile_image;
use redweb_messaging::app::AppConfig;
use redweb_messaging::search::roster_contact;
use redweb_messaging::storage::KeyValueStore;
use redweb_messaging::utils::{display_time, normalize_url, RUNTIME};
use redweb_messaging::{
    ContactDirectory, ContactSource, ConversationStore, Error, Message, ReplyScheduler, Result, Role, User,
};

#[derive(Parser)]
#[command(name = "redweb-chat", version, about = "RedWeb donor and patient messaging")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store the session used by every other command
    Login {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "DONOR")]
        role: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        api_url: Option<String>,
    },
    /// Forget the session, optionally wiping its conversations
    Logout {
        #[arg(long)]
        purge: bool,
    },
    /// List conversations
    Conversations,
    /// Show a conversation's messages and make it the active one
    Messages { conversation_id: String },
    /// Look up contacts
    Search { query: Option<String> },
    /// Start (or reopen) a conversation with a contact id
    Open { contact_id: String },
    /// Send a message
    Send {
        conversation_id: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Exit right away; any pending reply is dropped
        #[arg(long)]
        no_wait: bool,
    },
    /// Reset a conversation's unread counter
    Read { conversation_id: String },
    /// Show, set or clear the active conversation
    Active {
        conversation_id: Option<String>,
        #[arg(long, conflicts_with = "conversation_id")]
        clear: bool,
    },
    /// Check whether the backend answers
    Ping,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match RUNTIME.block_on(run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn open_store(config: &AppConfig) -> Result<ConversationStore> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(config.open_store()?);
    Ok(ConversationStore::new(kv))
}

fn directory(config: &AppConfig) -> Result<ContactDirectory> {
    let client = ApiClient::with_timeout(Duration::from_secs(10))?;
    Ok(ContactDirectory::new(client, config.api_url.clone(), config.token.clone()))
}

fn print_message(m: &Message) {
    let who = if m.is_own { "you" } else { m.sender.as_str() };
    println!("[{}] {}: {}", display_time(&m.timestamp), who, m.content);
}

fn print_user(u: &User) {
    let role = match u.role {
        Role::Donor => "donor",
        Role::Patient => "patient",
    };
    println!(
        "{:>6}  {:<20} {:<24} {:<8} {}",
        u.id,
        u.name,
        u.email,
        role,
        profile_image(&u.id, u.profile_picture.as_deref())
    );
}

async fn run(command: Command) -> Result<()> {
    let mut config = AppConfig::load();

    match command {
        Command::Login { id, name, email, role, token, api_url } => {
            let user = User { id, name, email, role: Role::from_api(&role), profile_picture: None };
            println!("logged in as {} ({})", user.display_name(), user.id);
            config.user = Some(user);
            config.token = token;
            if let Some(url) = api_url {
                config.api_url = normalize_url(&url);
            }
            config.save()?;
        }
        Command::Logout { purge } => {
            if purge {
                let user = config.current_user()?;
                open_store(&config)?.clear(user)?;
            }
            config.user = None;
            config.token = None;
            config.save()?;
            println!("logged out");
        }
        Command::Conversations => {
            let user = config.current_user()?;
            let store = open_store(&config)?;
            let active = store.active_conversation(user)?;
            for c in store.list_conversations(user)? {
                let marker = if active.as_deref() == Some(c.conversation_id.as_str()) { '*' } else { ' ' };
                let unread = if c.unread_count > 0 { format!(" ({} unread)", c.unread_count) } else { String::new() };
                println!("{} {:<14} {}{}", marker, c.conversation_id, c.contact_name, unread);
                println!("    {} · {}", display_time(&c.last_message_time), c.last_message);
            }
        }
        Command::Messages { conversation_id } => {
            let user = config.current_user()?;
            let store = open_store(&config)?;
            for m in store.get_messages(user, &conversation_id)? {
                print_message(&m);
            }
            store.set_active_conversation(user, &conversation_id)?;
        }
        Command::Search { query } => {
            let user = config.current_user()?;
            let results = directory(&config)?.search(user, query.as_deref().unwrap_or_default()).await;
            if results.source == ContactSource::Fallback {
                println!("(directory unavailable, showing offline roster)");
            }
            for u in &results.users {
                print_user(u);
            }
        }
        Command::Open { contact_id } => {
            let user = config.current_user()?;
            let results = directory(&config)?.search(user, &contact_id).await;
            let contact = results
                .users
                .into_iter()
                .find(|u| u.id == contact_id)
                .or_else(|| roster_contact(&contact_id).filter(|u| u.id != user.id).cloned())
                .ok_or_else(|| Error::ContactNotFound(contact_id.clone()))?;
            let store = open_store(&config)?;
            let conversation = store.create_conversation(user, &contact)?;
            store.set_active_conversation(user, &conversation.conversation_id)?;
            println!("{} with {}", conversation.conversation_id, conversation.contact_name);
        }
        Command::Send { conversation_id, text, no_wait } => {
            let user = config.current_user()?;
            let store = open_store(&config)?;
            let sent = store.send_message(user, &conversation_id, &text.join(" "))?;
            print_message(&sent);

            let conversation = store
                .list_conversations(user)?
                .into_iter()
                .find(|c| c.conversation_id == conversation_id);
            let Some(conversation) = conversation else {
                return Ok(());
            };
            if no_wait {
                return Ok(());
            }

            let (tx, mut rx) = event_channel();
            let replies = ReplyScheduler::new(store.clone(), config.reply_delay()).with_events(tx);
            if replies.schedule(user, &conversation) {
                let wait = config.reply_delay().1 + Duration::from_secs(1);
                if let Ok(Some(StoreEvent::MessageReceived { message, .. })) = tokio::time::timeout(wait, rx.recv()).await {
                    print_message(&message);
                }
            }
        }
        Command::Read { conversation_id } => {
            let user = config.current_user()?;
            open_store(&config)?.mark_read(user, &conversation_id)?;
        }
        Command::Active { conversation_id, clear } => {
            let user = config.current_user()?;
            let store = open_store(&config)?;
            match conversation_id {
                _ if clear => store.clear_active_conversation(user)?,
                Some(id) => store.set_active_conversation(user, &id)?,
                None => match store.active_conversation(user)? {
                    Some(id) => println!("{id}"),
                    None => println!("no active conversation"),
                },
            }
        }
        Command::Ping => {
            let client = ApiClient::new();
            match client.ping(&config.api_url).await {
                Ok(status) => println!("{} answered HTTP {}", config.api_url, status),
                Err(e) => println!("{} unreachable: {}", config.api_url, e),
            }
        }
    }
    Ok(())
}
