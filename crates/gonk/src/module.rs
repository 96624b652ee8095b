//! Modules
//!
//! A module is one loaded script: its own script environment, its own pair of
//! pattern registries and a shared handle to the chat transport. Dispatch
//! into a module projects the event as `response`, then runs every matching
//! handler of the consulted registry in registration order.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::bridge::{
    Bridge, BridgeError, HttpBridge, HttpSettings, NoShortening, ShortenOptions, UrlShortener,
};
use crate::context::{MessageContext, RESPONSE_GLOBAL};
use crate::registry::{Audience, Registries};
use crate::script::{QuickJsEnvironment, ScriptArg, ScriptEnvironment, ScriptError};
use crate::transport::ChatTransport;

/// Host-side JavaScript evaluated before every module script
pub const PRELUDE_JS: &str = include_str!("prelude.js");

/// Name of the robot object handed to `module.exports`
const ROBOT_GLOBAL: &str = "gonk";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A module could not be brought up. The module is never dispatched to.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to prepare script environment: {0}")]
    Environment(#[source] ScriptError),

    #[error("Failed to set up bridge for {module}: {source}")]
    Bridge {
        module: String,
        #[source]
        source: BridgeError,
    },

    #[error("Module {module} failed to evaluate: {source}")]
    Script {
        module: String,
        script: String,
        #[source]
        source: ScriptError,
    },

    #[error("Module {module} failed in module.exports: {source}")]
    EntryPoint {
        module: String,
        script: String,
        #[source]
        source: ScriptError,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start worker for {module}: {source}")]
    Spawn {
        module: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for {module} exited before loading")]
    WorkerExited { module: String },
}

impl LoadError {
    /// Name of the module that failed, when known
    pub fn module(&self) -> Option<&str> {
        match self {
            LoadError::Bridge { module, .. }
            | LoadError::Script { module, .. }
            | LoadError::EntryPoint { module, .. }
            | LoadError::Spawn { module, .. }
            | LoadError::WorkerExited { module } => Some(module),
            LoadError::Environment(_) | LoadError::Read { .. } => None,
        }
    }

    /// Raw text of the script that failed
    pub fn script(&self) -> Option<&str> {
        match self {
            LoadError::Script { script, .. } | LoadError::EntryPoint { script, .. } => {
                Some(script)
            }
            _ => None,
        }
    }
}

/// A matched handler threw
#[derive(Debug, thiserror::Error)]
#[error("Handler {pattern} in module {module} failed: {source}")]
pub struct CallbackError {
    pub module: String,
    pub pattern: String,
    #[source]
    pub source: ScriptError,
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators shared by every module of a bot
#[derive(Clone)]
pub struct ModuleServices {
    pub transport: Arc<dyn ChatTransport>,
    pub shortener: Arc<dyn UrlShortener>,
    pub shorten: ShortenOptions,
    pub http: HttpSettings,
}

impl ModuleServices {
    /// Services with no URL shortening and default HTTP settings
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            shortener: Arc::new(NoShortening),
            shorten: ShortenOptions::default(),
            http: HttpSettings::default(),
        }
    }

    pub fn with_shortener(mut self, shortener: Arc<dyn UrlShortener>, options: ShortenOptions) -> Self {
        self.shortener = shortener;
        self.shorten = options;
        self
    }

    pub fn with_http(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module
// ─────────────────────────────────────────────────────────────────────────────

/// One loaded script.
///
/// Not thread-safe; one dispatch at a time. See [`crate::worker`] for running
/// a module on its own thread.
pub struct Module<E: ScriptEnvironment = QuickJsEnvironment> {
    name: String,
    registries: Rc<RefCell<Registries>>,
    transport: Arc<dyn ChatTransport>,
    env: E,
}

impl<E: ScriptEnvironment> Module<E> {
    /// Bind the bridge into `env`, evaluate `script`, then call
    /// `module.exports(gonk)`.
    pub fn load(
        name: impl Into<String>,
        env: E,
        script: impl Into<String>,
        services: &ModuleServices,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        let script = script.into();

        let http = HttpBridge::new(&services.http).map_err(|source| LoadError::Bridge {
            module: name.clone(),
            source,
        })?;

        let registries = Rc::new(RefCell::new(Registries::default()));
        let bridge = Rc::new(Bridge::new(
            name.as_str(),
            registries.clone(),
            services.transport.clone(),
            services.shortener.clone(),
            services.shorten,
            http,
        ));

        bridge.install(&env).map_err(LoadError::Environment)?;
        env.run_source("prelude.js", PRELUDE_JS)
            .map_err(LoadError::Environment)?;

        if let Err(source) = env.run_source(&name, &script) {
            return Err(LoadError::Script {
                module: name,
                script,
                source,
            });
        }

        if let Err(source) = env.call_exported(
            "module.exports",
            vec![ScriptArg::Global(ROBOT_GLOBAL.to_string())],
        ) {
            return Err(LoadError::EntryPoint {
                module: name,
                script,
                source,
            });
        }

        let module = Self {
            name,
            registries,
            transport: services.transport.clone(),
            env,
        };
        info!(
            "Loaded module {} ({} addressed, {} overheard handlers)",
            module.name,
            module.handler_count(Audience::Addressed),
            module.handler_count(Audience::Overheard)
        );
        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_count(&self, audience: Audience) -> usize {
        self.registries.borrow().get(audience).len()
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Run the addressed handlers matching `line`. True iff any matched.
    pub fn respond(&self, target: &str, line: &str, from: &str) -> bool {
        self.dispatch(Audience::Addressed, target, line, from)
    }

    /// Run the overheard handlers matching `line`. True iff any matched.
    ///
    /// Never called for private messages.
    pub fn hear(&self, target: &str, line: &str, from: &str) -> bool {
        self.dispatch(Audience::Overheard, target, line, from)
    }

    fn dispatch(&self, audience: Audience, target: &str, line: &str, from: &str) -> bool {
        let mut context =
            MessageContext::new(target, self.transport.current_nickname(), from, line);
        if let Err(e) = context.project(&self.env) {
            error!("Module {} could not project context: {}", self.name, e);
            return false;
        }

        // Handlers may register more handlers; those apply from the next dispatch
        let entries = self.registries.borrow().get(audience).snapshot();

        let mut matched = false;
        for entry in entries {
            let Some(captures) = entry.pattern.captures(line) else {
                continue;
            };
            matched = true;
            debug!(module = %self.name, %audience, "{} matched {}", entry.pattern.source(), line);

            context.set_matches(captures);
            let result = context.project(&self.env).and_then(|()| {
                self.env.run_callback(
                    &entry.callback,
                    vec![ScriptArg::Global(RESPONSE_GLOBAL.to_string())],
                )
            });

            if let Err(source) = result {
                let err = CallbackError {
                    module: self.name.clone(),
                    pattern: entry.pattern.source().to_string(),
                    source,
                };
                error!("{}", err);
            }
        }

        matched
    }
}

impl Module<QuickJsEnvironment> {
    /// Load `script` into a fresh QuickJS environment
    pub fn from_script(
        name: impl Into<String>,
        script: impl Into<String>,
        services: &ModuleServices,
    ) -> Result<Self, LoadError> {
        let env = QuickJsEnvironment::new().map_err(LoadError::Environment)?;
        Self::load(name, env, script, services)
    }
}
