use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use reqwest::{Method, Url};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod app;
mod handler;
mod tui;
mod ui;

use app::{App, ChatView};
use jarvis::chat_api::HttpChatEndpoint;
use jarvis::client::ConversationClient;
use jarvis::config::Config;
use jarvis::connectivity::{reachability_address, spawn_reachability_watch};
use jarvis::logging;
use jarvis::shell::fetcher::{AssetRequest, HttpFetcher};
use jarvis::shell::{CacheStorage, OfflineShell};
use jarvis::speech::{detect_recognizer, detect_synthesizer};
use jarvis::state::{History, Role};
use jarvis::store::{FileStore, KeyValueStore, MemoryStore};

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "jarvis")]
#[command(version, about = "Terminal voice chat client with an offline asset shell")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat (default)
    Chat {
        /// Keep the conversation in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Print the stored conversation
    History,
    /// Manage the offline asset cache
    Shell {
        #[command(subcommand)]
        command: ShellCommand,
    },
}

#[derive(Subcommand)]
enum ShellCommand {
    /// Fetch every manifest asset into the current generation
    Install,
    /// Delete every generation except the current one
    Activate,
    /// Serve one request through the cache and write the body to stdout
    Fetch {
        /// Path relative to the shell origin
        path: String,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
    /// List cache generations
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Chat { ephemeral: false }) {
        Commands::Chat { ephemeral } => run_chat(&config, ephemeral).await,
        Commands::History => {
            logging::init_stderr()?;
            print_history(&config)
        }
        Commands::Shell { command } => {
            logging::init_stderr()?;
            run_shell(&config, command).await
        }
    }
}

async fn run_chat(config: &Config, ephemeral: bool) -> Result<()> {
    let data_dir = config.data_dir()?;
    let _log_guard = logging::init_file(&data_dir.join("logs"))?;

    let store: Arc<dyn KeyValueStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(&data_dir))
    };

    let endpoint_url = config.endpoint();
    let synthesizer = detect_synthesizer(config.synthesizer_command.as_deref());
    let recognizer = detect_recognizer(config.recognizer_command.as_deref());
    info!(
        endpoint = %endpoint_url,
        model = %config.model(),
        speech_output = synthesizer.is_available(),
        speech_input = recognizer.is_available(),
        ephemeral,
        "starting chat"
    );

    let mut client = ConversationClient::new(
        store,
        Arc::new(HttpChatEndpoint::new(&endpoint_url)),
        config.model(),
        ChatView::new(),
    )
    .with_synthesizer(synthesizer)
    .with_recognizer(recognizer)
    .with_speech_settings(config.speech_settings());
    client.load_history();
    client.render_history();

    let mut app = App::new(client, !ephemeral);

    let (mut connectivity, watch) = match reachability_address(&endpoint_url) {
        Some(address) => {
            let (rx, handle) = spawn_reachability_watch(address, CHECK_INTERVAL);
            (Some(rx), Some(handle))
        }
        None => {
            warn!(endpoint = %endpoint_url, "cannot derive a reachability address, connectivity stays offline");
            (None, None)
        }
    };

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new(tui::TICK);

    let result = async {
        loop {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            tokio::select! {
                Some(event) = events.next() => {
                    handler::handle_event(&mut app, event).await?;
                }
                Some(status) = next_status(&mut connectivity) => {
                    app.client.set_connectivity(status);
                }
                else => break,
            }

            if app.should_quit {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    if let Some(watch) = watch {
        watch.abort();
    }
    result
}

/// Next connectivity transition, or `None` once the reachability watch is gone
async fn next_status(
    rx: &mut Option<tokio::sync::watch::Receiver<jarvis::Connectivity>>,
) -> Option<jarvis::Connectivity> {
    let receiver = rx.as_mut()?;
    match receiver.changed().await {
        Ok(()) => Some(*receiver.borrow_and_update()),
        Err(_) => {
            *rx = None;
            None
        }
    }
}

fn print_history(config: &Config) -> Result<()> {
    let store = FileStore::new(config.data_dir()?);
    let history = History::load(&store);

    if history.is_empty() {
        println!("No conversation yet.");
        return Ok(());
    }

    for message in history.messages() {
        let who = match message.role {
            Role::User => "You",
            Role::Assistant => "Jarvis",
        };
        println!("{}: {}\n", who, message.content);
    }
    Ok(())
}

async fn run_shell(config: &Config, command: ShellCommand) -> Result<()> {
    let origin = Url::parse(&config.shell_origin())
        .map_err(|e| anyhow!("Invalid shell origin {}: {}", config.shell_origin(), e))?;
    let storage = CacheStorage::open_dir(config.cache_dir()?).await?;
    let shell = OfflineShell::new(
        config.generation(),
        origin,
        config.manifest(),
        storage.clone(),
        Arc::new(HttpFetcher::new()),
    );

    match command {
        ShellCommand::Install => {
            let count = shell.install().await?;
            println!("Installed {} assets into {}", count, shell.generation());
        }
        ShellCommand::Activate => {
            let deleted = shell.activate().await?;
            if deleted.is_empty() {
                println!("{} is the only generation", shell.generation());
            } else {
                println!("Deleted {}", deleted.join(", "));
            }
        }
        ShellCommand::Fetch { path, method } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|e| anyhow!("Invalid method {}: {}", method, e))?;
            let request = AssetRequest::new(method, shell.resolve(&path)?);
            let served = shell.respond(request).await?;
            info!(
                status = served.response.status,
                source = ?served.source,
                bytes = served.response.body.len(),
                "served"
            );

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&served.response.body)?;
            stdout.flush()?;

            // Let the refresh land before the process exits
            if let Some(revalidation) = served.revalidation {
                match revalidation.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "background refresh failed"),
                    Err(e) => warn!(error = %e, "background refresh task failed"),
                }
            }
        }
        ShellCommand::List => {
            let tags = storage.keys().await;
            if tags.is_empty() {
                println!("No cache generations.");
            }
            for tag in tags {
                let entries = storage.handle(&tag).len().await;
                let marker = if tag == shell.generation() { "*" } else { " " };
                println!("{} {} ({} entries)", marker, tag, entries);
            }
        }
    }
    Ok(())
}
