//! Gonk - Chat Bot Module Host
//!
//! Loads JavaScript modules into isolated QuickJS environments and routes
//! chat lines into the handlers they register:
//! - Script environment abstraction over QuickJS
//! - Native bridge functions for logging, registration, sending and HTTP
//! - Per-module worker threads
//! - Module discovery, hot reload and event dispatch

// Script engine boundary
pub mod script;

// Handler registries and the per-dispatch context
pub mod context;
pub mod registry;

// Host functions exposed to scripts
pub mod bridge;

// Chat network interface
pub mod transport;

// Modules and their workers
pub mod module;
pub mod worker;

// Loading, watching and routing
pub mod dispatch;
pub mod loader;
pub mod watcher;

pub mod config;

#[cfg(test)]
mod testing;

pub use dispatch::{ChatEvent, Dispatcher, Routing, classify};
pub use module::{CallbackError, LoadError, Module, ModuleServices};
pub use transport::{ChatTransport, ConsoleTransport, TransportError};
pub use worker::{ModuleHandle, WorkerError};
