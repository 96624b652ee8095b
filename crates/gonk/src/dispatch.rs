//! Event Dispatcher
//!
//! Owns the loaded modules and decides, for each incoming chat line, whether
//! modules should `respond` or `hear` it.
//!
//! - A line sent privately to the bot is addressed; replies go to the sender.
//! - A channel line starting with the bot's nick (`gonk: ...`, `gonk, ...`,
//!   `gonk ...`) is addressed with the nick stripped.
//! - Every other channel line is overheard.
//!
//! Private lines are never passed to `hear`.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::loader::{ModuleSource, read_module};
use crate::module::{LoadError, ModuleServices};
use crate::watcher::ModuleChange;
use crate::worker::ModuleHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// An incoming chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Channel, or our own nick for a private message
    pub target: String,
    /// Sender nick
    pub from: String,
    pub text: String,
}

impl ChatEvent {
    pub fn new(target: impl Into<String>, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            from: from.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Expected `<target> <from> <text>`")]
pub struct ParseEventError;

/// Parses `<target> <from> <text>`
impl FromStr for ChatEvent {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, char::is_whitespace);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(target), Some(from), Some(text)) if !target.is_empty() && !from.is_empty() => {
                Ok(Self::new(target, from, text.trim_start()))
            }
            _ => Err(ParseEventError),
        }
    }
}

/// How an event is routed into modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// Sent to the bot directly; respond, replying to the sender
    Private { reply_to: String, line: String },
    /// Channel line addressed to the bot; respond with the nick stripped
    Addressed { line: String },
    /// Channel line not meant for the bot; hear only
    Overheard,
}

/// Classify `event` for a bot currently using `nick`
pub fn classify(nick: &str, event: &ChatEvent) -> Routing {
    let line = strip_address(nick, &event.text);

    if event.target.eq_ignore_ascii_case(nick) {
        return Routing::Private {
            reply_to: event.from.clone(),
            line: line.unwrap_or(&event.text).to_string(),
        };
    }

    match line {
        Some(line) => Routing::Addressed {
            line: line.to_string(),
        },
        None => Routing::Overheard,
    }
}

/// The rest of `text` when it starts by addressing `nick`
fn strip_address<'a>(nick: &str, text: &'a str) -> Option<&'a str> {
    let head = text.get(..nick.len())?;
    if nick.is_empty() || !head.eq_ignore_ascii_case(nick) {
        return None;
    }

    let rest = &text[nick.len()..];
    match rest.chars().next() {
        None => Some(""),
        Some(':' | ',') => Some(rest[1..].trim_start()),
        Some(c) if c.is_whitespace() => Some(rest.trim_start()),
        Some(_) => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// The set of loaded modules
pub struct Dispatcher {
    services: ModuleServices,
    modules: RwLock<BTreeMap<String, Arc<ModuleHandle>>>,
}

impl Dispatcher {
    pub fn new(services: ModuleServices) -> Self {
        Self {
            services,
            modules: RwLock::new(BTreeMap::new()),
        }
    }

    /// Start a module. An already loaded module of the same name is replaced
    /// only once the new one has loaded.
    pub async fn load(&self, source: ModuleSource) -> Result<(), LoadError> {
        let ModuleSource { name, script, .. } = source;
        let services = self.services.clone();

        let spawn_name = name.clone();
        let handle =
            tokio::task::spawn_blocking(move || ModuleHandle::spawn(spawn_name, script, services))
                .await
                .map_err(|_| LoadError::WorkerExited {
                    module: name.clone(),
                })??;

        let previous = self.modules.write().insert(name.clone(), Arc::new(handle));
        if previous.is_some() {
            info!("Reloaded module {}", name);
        }
        Ok(())
    }

    /// Load every module in `sources`, logging the ones that fail
    pub async fn load_all(&self, sources: Vec<ModuleSource>) -> usize {
        let mut loaded = 0;
        for source in sources {
            let path = source.path.clone();
            match self.load(source).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Failed to load {}: {}", path.display(), e),
            }
        }
        loaded
    }

    /// Stop a module. Returns whether it was loaded.
    pub fn unload(&self, name: &str) -> bool {
        match self.modules.write().remove(name) {
            Some(handle) => {
                handle.terminate();
                info!("Unloaded module {}", name);
                true
            }
            None => false,
        }
    }

    /// Apply a change reported by the module watcher
    pub async fn apply(&self, change: ModuleChange) -> Result<(), LoadError> {
        match change {
            ModuleChange::Changed(path) => {
                let source = read_module(&path).await?;
                self.load(source).await
            }
            ModuleChange::Removed(name) => {
                self.unload(&name);
                Ok(())
            }
        }
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Route `event` into every module concurrently. True iff any module
    /// had a matching handler.
    pub async fn dispatch(&self, event: &ChatEvent) -> bool {
        let nick = self.services.transport.current_nickname();
        let routing = classify(&nick, event);
        debug!("Dispatching {:?} from {} as {:?}", event.text, event.from, routing);

        let modules: Vec<_> = self.modules.read().values().cloned().collect();
        let routing = &routing;

        let results = join_all(modules.iter().map(|module| async move {
            let result = match routing {
                Routing::Private { reply_to, line } => {
                    module.respond(reply_to, line, &event.from).await
                }
                Routing::Addressed { line } => module.respond(&event.target, line, &event.from).await,
                Routing::Overheard => module.hear(&event.target, &event.text, &event.from).await,
            };

            result.unwrap_or_else(|e| {
                warn!("Module {} did not handle event: {}", module.name(), e);
                false
            })
        }))
        .await;

        results.into_iter().any(|responded| responded)
    }

    /// Stop every module and wait for their threads
    pub async fn shutdown(&self) {
        let modules = std::mem::take(&mut *self.modules.write());

        for (name, handle) in modules {
            match Arc::try_unwrap(handle) {
                Ok(handle) => {
                    let joined = tokio::task::spawn_blocking(move || handle.join()).await;
                    if !matches!(joined, Ok(Ok(()))) {
                        warn!("Module {} did not shut down cleanly", name);
                    }
                }
                Err(handle) => handle.terminate(),
            }
        }
    }
}
