//! Command-line interface for Lifelog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use lifelog_core::config::Config;
use lifelog_core::context::ContextStore;
use lifelog_core::dedup::MessageDeduplicator;
use lifelog_core::dispatch::MessageDispatcher;
use lifelog_core::extension::ExtensionManager;
use lifelog_core::llm::LlmBackend;
use lifelog_core::message::{Channel, ChannelRequest, ChannelResponse};
use lifelog_core::routing::Router;
use lifelog_core::storage::RecordStore;
use lifelog_extensions::{register_builtins, write_default_manifests};
use lifelog_storage::SqliteStore;

/// Lifelog - track your life with natural language.
#[derive(Parser, Debug)]
#[command(name = "lifelog")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Database path override.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Extension directory override.
    #[arg(long, global = true)]
    extensions: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the database and default extension manifests.
    Init,
    /// Route one natural-language request and print the response.
    Chat {
        /// The request text, e.g. "today I spent 50 on lunch".
        text: String,
    },
    /// Interactive chat session.
    Serve,
    /// Extension management commands.
    Extension {
        #[command(subcommand)]
        extension_cmd: ExtensionCommand,
    },
}

/// Extension subcommands.
#[derive(Subcommand, Debug)]
enum ExtensionCommand {
    /// List extensions with their lifecycle state.
    List,
    /// Hot-reload an extension definition.
    Reload {
        /// Extension name.
        name: String,
    },
}

/// Wired-up runtime collaborators.
struct Runtime {
    manager: Arc<ExtensionManager>,
    router: Arc<Router>,
}

async fn build_runtime(config: &Config) -> Result<Runtime> {
    let store = Arc::new(
        SqliteStore::open(&config.database_path).with_context(|| {
            format!("cannot open database {}", config.database_path.display())
        })?,
    );
    let records: Arc<dyn RecordStore> = store.clone();
    let contexts: Arc<dyn ContextStore> = store;

    let llm: Arc<dyn LlmBackend> =
        lifelog_llm::create_backend(config).context("cannot build llm backend")?;

    let manager = Arc::new(ExtensionManager::new(
        config.extension_dir.clone(),
        records,
        llm.clone(),
    ));
    register_builtins(&manager).await;
    let loaded = manager.discover_and_load_all().await;
    info!(loaded, "extensions loaded");

    let mut router = Router::new(manager.clone(), contexts, llm);
    if config.decision_timeout_secs > 0 {
        router = router.with_decision_timeout(Duration::from_secs(config.decision_timeout_secs));
    }

    Ok(Runtime {
        manager,
        router: Arc::new(router),
    })
}

fn print_response(response: &ChannelResponse) {
    if !response.success {
        eprintln!(
            "error: {}",
            response.error.as_deref().unwrap_or("request failed")
        );
        return;
    }

    if !response.message.is_empty() {
        println!("{}", response.message);
    }
    if let Some(markdown) = response.metadata.get("markdown").and_then(|v| v.as_str()) {
        println!("\n{}", markdown);
    }
}

async fn run_init(config: &Config) -> Result<()> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("cannot open database {}", config.database_path.display()))?;
    write_default_manifests(&config.extension_dir).with_context(|| {
        format!(
            "cannot write manifests under {}",
            config.extension_dir.display()
        )
    })?;

    println!("Database ready at {}", config.database_path.display());
    println!("Extensions ready at {}", config.extension_dir.display());
    Ok(())
}

async fn run_chat(config: &Config, text: String) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let request = ChannelRequest::new("1", text, Channel::Cli);
    let response = runtime.router.route(&request).await;
    let failed = !response.success;
    print_response(&response);
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_serve(config: &Config) -> Result<()> {
    let runtime = build_runtime(config).await?;
    let dedup = Arc::new(MessageDeduplicator::new(
        config.dedup_window_secs,
        config.dedup_max_size,
    ));
    let dispatcher = MessageDispatcher::new(runtime.router.clone(), dedup, config.workers);

    println!("Lifelog chat session. Type a message, or 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "exit" || text == "quit" {
            break;
        }

        let receiver = dispatcher.dispatch(ChannelRequest::new("1", text, Channel::Chat));
        match receiver.await {
            Ok(Some(response)) => print_response(&response),
            Ok(None) => println!("(duplicate message ignored)"),
            Err(_) => eprintln!("error: worker dropped the request"),
        }
    }

    println!("Bye.");
    Ok(())
}

async fn run_extension(config: &Config, cmd: ExtensionCommand) -> Result<()> {
    let runtime = build_runtime(config).await?;

    match cmd {
        ExtensionCommand::List => {
            println!("Extensions:");
            for info in runtime.manager.list().await {
                println!(
                    "  - {} ({}) v{} [{}]",
                    info.display_name, info.name, info.version, info.state
                );
                if !info.description.is_empty() {
                    println!("    {}", info.description);
                }
            }
        }
        ExtensionCommand::Reload { name } => {
            if runtime.manager.reload(&name).await {
                println!("Extension '{}' reloaded", name);
            } else {
                eprintln!("Extension '{}' failed to reload", name);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(extensions) = args.extensions {
        config.extension_dir = extensions;
    }

    match args.command {
        Command::Init => run_init(&config).await,
        Command::Chat { text } => run_chat(&config, text).await,
        Command::Serve => run_serve(&config).await,
        Command::Extension { extension_cmd } => run_extension(&config, extension_cmd).await,
    }
}
