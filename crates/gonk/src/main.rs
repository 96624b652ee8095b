//! Gonk console
//!
//! Runs the module host against stdin. Each input line is a chat event,
//! `<target> <from> <text>`; messages the modules send are printed to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gonk::bridge::{IsGdShortener, UrlShortener};
use gonk::config::BotConfig;
use gonk::loader::discover_modules;
use gonk::watcher::ModuleWatcher;
use gonk::{ChatEvent, ConsoleTransport, Dispatcher, ModuleServices};

/// Gonk chat bot module host
#[derive(Parser, Debug)]
#[command(name = "gonk")]
#[command(about = "Run gonk chat modules from the console", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "gonk.toml")]
    config: PathBuf,

    /// Bot nick, overrides the configuration
    #[arg(short, long)]
    nick: Option<String>,

    /// Modules directory, overrides the configuration
    #[arg(short, long)]
    modules: Option<PathBuf>,

    /// Don't reload modules when their files change
    #[arg(long)]
    no_watch: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the bot's messages
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gonk=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = BotConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(nick) = args.nick {
        config.nick = nick;
    }
    if let Some(modules) = args.modules {
        config.modules_dir = modules;
    }
    if args.no_watch {
        config.watch = false;
    }

    info!("Starting gonk v{} as {}", env!("CARGO_PKG_VERSION"), config.nick);

    // The blocking HTTP client must be built and dropped outside the async runtime
    let transport = Arc::new(ConsoleTransport::new(config.nick.clone()));
    let mut services = ModuleServices::new(transport).with_http(config.http_settings());
    if config.shortener.enabled {
        let shortener: Arc<dyn UrlShortener> = Arc::new(
            IsGdShortener::new(config.shortener.endpoint.clone())
                .context("creating URL shortener")?,
        );
        services = services.with_shortener(shortener, config.shorten_options());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = runtime.block_on(run(config, services.clone()));
    drop(runtime);
    drop(services);
    result
}

async fn run(config: BotConfig, services: ModuleServices) -> Result<()> {
    let dispatcher = Dispatcher::new(services);

    let sources = discover_modules(&config.modules_dir).await?;
    let loaded = dispatcher.load_all(sources).await;
    info!("Loaded {} modules: {:?}", loaded, dispatcher.module_names());

    let mut watcher = if config.watch {
        match ModuleWatcher::new(&config.modules_dir) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                error!("Failed to start module watcher: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<ChatEvent>() {
                    Ok(event) => {
                        if !dispatcher.dispatch(&event).await {
                            info!("No module responded");
                        }
                    }
                    Err(e) => warn!("{}", e),
                }
            }
            Some(change) = next_change(&mut watcher) => {
                info!("Module change: {:?}", change);
                if let Err(e) = dispatcher.apply(change).await {
                    error!("Failed to reload module: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    dispatcher.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn next_change(watcher: &mut Option<ModuleWatcher>) -> Option<gonk::watcher::ModuleChange> {
    match watcher {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}
