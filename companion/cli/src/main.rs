//! Companion CLI - Terminal Driver for the Family Chat Core
//!
//! Logs in against the companion backend and drives the family group chat or
//! the assistant conversations from a line-based prompt. The interactive
//! modes print the reconciled view every time it changes.
//!
//! # Usage
//!
//! ```bash
//! # Log in (the session is saved and resumed on the next start)
//! companion login --email ana@example.com
//!
//! # Family group chat
//! companion family
//!
//! # Assistant conversations
//! companion assistant
//!
//! # Against a local backend, verbose
//! companion --api-url http://localhost:3000 --realtime-url ws://localhost:3000/ws \
//!     --log-level debug family
//! ```
//!
//! # Environment Variables
//!
//! - `COMPANION_CONFIG`: config file path
//! - `COMPANION_LOG_LEVEL`: log level (overridden by `RUST_LOG`)
//! - `COMPANION_PASSWORD`: password for `login` and `register`
//! - `COMPANION_API_URL`, `COMPANION_REALTIME_URL`, `COMPANION_SESSION_FILE`,
//!   `COMPANION_TYPING_TIMEOUT_MS`, `COMPANION_COMMAND_CAPACITY`: see the config file
//!
//! # Files
//!
//! - `~/.config/family-companion/companion.toml`: configuration
//! - `~/.config/family-companion/session.json`: saved session

mod input;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use companion_core::api::Registration;
use companion_core::transport::WebSocketFactory;
use companion_core::{
    resolve_config, AssistantChat, AssistantChatHandle, AuthApi, ChatError, ClientConfig,
    ConfigOverrides, ConnectionManager, ConversationId, GroupChat, GroupChatHandle,
    HttpApiClient, MessageId, SessionStore, TempId,
};

use input::Input;

/// Companion - family health chat from the terminal
#[derive(Parser, Debug)]
#[command(name = "companion")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "COMPANION_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// REST base URL
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// Realtime endpoint
    #[arg(long, value_name = "URL")]
    realtime_url: Option<String>,

    /// Where the session is saved
    #[arg(long, value_name = "PATH")]
    session_file: Option<PathBuf>,

    /// Typing indicator timeout in milliseconds
    #[arg(long, value_name = "MS")]
    typing_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "COMPANION_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and save the session
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,
        /// Account password
        #[arg(short, long, env = "COMPANION_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not log in)
    Register {
        /// Account email
        #[arg(short, long)]
        email: String,
        /// Account password
        #[arg(short, long, env = "COMPANION_PASSWORD", hide_env_values = true)]
        password: String,
        /// Password confirmation (defaults to the password)
        #[arg(long)]
        confirm: Option<String>,
    },
    /// End the session and forget the saved copy
    Logout,
    /// Show the logged-in identity
    Whoami,
    /// Chat with the family group
    Family,
    /// Chat with the assistant
    Assistant,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.api_url {
            overrides = overrides.with_api_url(url.clone());
        }
        if let Some(ref url) = self.realtime_url {
            overrides = overrides.with_realtime_url(url.clone());
        }
        if let Some(ms) = self.typing_timeout_ms {
            overrides = overrides.with_typing_timeout_ms(ms);
        }
        if let Some(ref path) = self.session_file {
            overrides = overrides.with_session_file(path.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "companion_cli={level},companion_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = resolve_config(args.config.clone(), &args.overrides())
        .context("Failed to load configuration")?;
    info!(
        api_url = %config.api_url,
        realtime_url = %config.realtime_url,
        source = %config.source(),
        "Configuration resolved"
    );

    let session = match config.session_file {
        Some(ref path) => SessionStore::restore(path.clone()).await,
        None => SessionStore::new(),
    };
    let api = Arc::new(
        HttpApiClient::new(config.api_url.clone(), session.clone())
            .context("Failed to build HTTP client")?,
    );

    match args.command {
        Command::Login { email, password } => {
            let identity = session
                .login(api.as_ref(), &email, &password)
                .await
                .context("Login failed")?;
            println!("logged in as {} ({})", identity.display_name, identity.user_id);
        }
        Command::Register {
            email,
            password,
            confirm,
        } => {
            let registration = Registration {
                email,
                confirm_password: confirm.unwrap_or_else(|| password.clone()),
                password,
            };
            api.register(&registration)
                .await
                .context("Registration failed")?;
            println!("account created; log in with `companion login`");
        }
        Command::Logout => {
            session.logout().await;
            println!("logged out");
        }
        Command::Whoami => match session.current() {
            Some(identity) => {
                println!("{} ({})", identity.display_name, identity.user_id);
                if let Some(email) = identity.email {
                    println!("{email}");
                }
            }
            None => println!("not logged in"),
        },
        Command::Family => run_family(&config, api, session).await?,
        Command::Assistant => run_assistant(&config, api, session).await?,
    }

    Ok(())
}

fn require_session(session: &SessionStore) -> Result<()> {
    if session.current().is_none() {
        anyhow::bail!("Not logged in. Run `companion login` first.");
    }
    Ok(())
}

fn prompt_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}

/// Report an intent failure; `true` when the prompt should end
fn report(error: &ChatError) -> bool {
    eprintln!("! {error}");
    matches!(error, ChatError::SessionInvalid | ChatError::Stopped)
}

async fn run_family(
    config: &ClientConfig,
    api: Arc<HttpApiClient>,
    session: SessionStore,
) -> Result<()> {
    require_session(&session)?;

    let connection = ConnectionManager::new(Arc::new(WebSocketFactory::new(
        config.realtime_url.clone(),
    )));
    let follower = connection.follow_session(&session);

    let chat = GroupChat::new(api, connection.clone(), session.clone())
        .with_config(config.chat.clone())
        .open()
        .await
        .context("Failed to open the family chat")?;

    let result = family_loop(&chat).await;

    chat.shutdown().await;
    follower.abort();
    connection.disconnect().await;
    result
}

async fn family_loop(chat: &GroupChatHandle) -> Result<()> {
    let mut view = chat.watch();
    let mut lines = prompt_lines();
    print!("{}", render::group(&view.borrow_and_update()));

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print!("{}", render::group(&view.borrow_and_update()));
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let outcome = match input::parse(&line) {
                    Input::Say(body) => chat.send(body).await.map(drop),
                    Input::Edit { id, body } => chat.edit(MessageId::new(id), body).await.map(drop),
                    Input::Retry(temp_id) => chat.retry(TempId(temp_id)).await,
                    Input::Reload => chat.reload().await,
                    Input::Help => {
                        println!("{}", input::HELP);
                        Ok(())
                    }
                    Input::Quit => break,
                    Input::Empty => Ok(()),
                    Input::Invalid(usage) => {
                        eprintln!("usage: {usage}");
                        Ok(())
                    }
                    other => {
                        warn!(input = ?other, "Not available in the family chat");
                        eprintln!("not available in the family chat");
                        Ok(())
                    }
                };
                if let Err(ref e) = outcome {
                    if report(e) {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn run_assistant(
    config: &ClientConfig,
    api: Arc<HttpApiClient>,
    session: SessionStore,
) -> Result<()> {
    require_session(&session)?;

    let chat = AssistantChat::new(api, session)
        .with_config(config.chat.clone())
        .mount()
        .context("Failed to start the assistant chat")?;

    if let Err(e) = chat.refresh().await {
        report(&e);
    }
    let result = assistant_loop(&chat).await;
    chat.shutdown().await;
    result
}

async fn assistant_loop(chat: &AssistantChatHandle) -> Result<()> {
    let mut view = chat.watch();
    let mut lines = prompt_lines();
    print!("{}", render::assistant(&view.borrow_and_update()));

    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                print!("{}", render::assistant(&view.borrow_and_update()));
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    break;
                };
                let outcome = match input::parse(&line) {
                    Input::Say(body) => chat.send(body, None).await.map(drop),
                    Input::SayAs { speaker, body } => chat.send(body, Some(speaker)).await.map(drop),
                    Input::Retry(temp_id) => chat.retry(TempId(temp_id)).await,
                    Input::List => chat.refresh().await.map(drop),
                    Input::New => chat.create().await.map(drop),
                    Input::Select(id) => chat.select(ConversationId::new(id)).await,
                    Input::Delete(id) => chat.delete(ConversationId::new(id)).await,
                    Input::Rename { id, title } => {
                        chat.rename(ConversationId::new(id), title).await.map(drop)
                    }
                    Input::Help => {
                        println!("{}", input::HELP);
                        Ok(())
                    }
                    Input::Quit => break,
                    Input::Empty => Ok(()),
                    Input::Invalid(usage) => {
                        eprintln!("usage: {usage}");
                        Ok(())
                    }
                    other => {
                        warn!(input = ?other, "Not available in the assistant chat");
                        eprintln!("not available in the assistant chat");
                        Ok(())
                    }
                };
                if let Err(ref e) = outcome {
                    if report(e) {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
