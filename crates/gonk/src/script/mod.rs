//! Script Environment
//!
//! Capability interface over the embedded interpreter. Modules only talk to
//! the engine through [`ScriptEnvironment`], so dispatch and bridge logic
//! never see engine types. Values cross the boundary as [`ScriptValue`].
//!
//! The concrete engine is QuickJS, see [`QuickJsEnvironment`].

mod quickjs;
mod value;

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

pub use quickjs::QuickJsEnvironment;
pub use value::{PatternSource, ScriptValue};

use crate::bridge::BridgeError;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the scripting environment
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Failed to evaluate {name}: {message}")]
    Eval { name: String, message: String },

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Callback {0} is no longer registered")]
    StaleCallback(u64),

    #[error("JavaScript error: {0}")]
    Js(String),
}

pub type ScriptResult<T> = Result<T, ScriptError>;

// ─────────────────────────────────────────────────────────────────────────────
// Environment contract
// ─────────────────────────────────────────────────────────────────────────────

/// A host function callable from scripts.
///
/// Arguments arrive already converted. An `Err` is thrown into the script as
/// an exception.
pub type NativeFn = Box<dyn Fn(Vec<ScriptValue>) -> Result<ScriptValue, BridgeError>>;

/// Argument passed into a script function
#[derive(Debug, Clone)]
pub enum ScriptArg {
    /// A value converted into a fresh script value
    Value(ScriptValue),
    /// The current value of a global, passed by reference
    Global(String),
}

/// An embedded interpreter with one global scope.
///
/// Implementations are single-threaded; callers serialize access.
pub trait ScriptEnvironment {
    /// Evaluate source text in the global scope
    fn eval_source(&self, name: &str, source: &str) -> ScriptResult<ScriptValue>;

    /// Evaluate source text for its effects, discarding the completion value
    fn run_source(&self, name: &str, source: &str) -> ScriptResult<()>;

    /// Bind a host function as a global under a fixed name
    fn register_native(&self, name: &str, function: NativeFn) -> ScriptResult<()>;

    /// Call a global function, `path` may be dotted (`module.exports`)
    fn call_exported(&self, path: &str, args: Vec<ScriptArg>) -> ScriptResult<ScriptValue>;

    /// Replace a global with a freshly built value
    fn set_global(&self, name: &str, value: ScriptValue) -> ScriptResult<()>;

    /// Invoke a callback previously handed to a native function
    fn call_callback(
        &self,
        callback: &CallbackHandle,
        args: Vec<ScriptArg>,
    ) -> ScriptResult<ScriptValue>;

    /// Invoke a callback without converting what it returns
    fn run_callback(&self, callback: &CallbackHandle, args: Vec<ScriptArg>) -> ScriptResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback handles
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque reference to a script function held by the host.
///
/// The engine keeps the function alive while any clone of the handle exists.
#[derive(Clone)]
pub struct CallbackHandle {
    id: u64,
    /// Liveness token, only ever counted through the table's `Weak`
    _alive: Rc<()>,
}

impl CallbackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for CallbackHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackHandle({})", self.id)
    }
}

/// Engine-side storage for functions referenced by [`CallbackHandle`]s.
///
/// Entries whose handles have all been dropped are purged on the next insert.
pub(crate) struct CallbackTable<T> {
    next_id: u64,
    entries: HashMap<u64, (Weak<()>, T)>,
}

impl<T> CallbackTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, function: T) -> CallbackHandle {
        self.entries.retain(|_, (alive, _)| alive.strong_count() > 0);

        let id = self.next_id;
        self.next_id += 1;

        let alive = Rc::new(());
        self.entries.insert(id, (Rc::downgrade(&alive), function));
        CallbackHandle { id, _alive: alive }
    }

    pub(crate) fn get(&self, handle: &CallbackHandle) -> Option<&T> {
        self.entries.get(&handle.id).map(|(_, function)| function)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|(alive, _)| alive.strong_count() > 0)
            .count()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_purges_dropped_handles() {
        let mut table = CallbackTable::new();

        let kept = table.insert("kept");
        let dropped = table.insert("dropped");
        assert_eq!(table.len(), 2);

        drop(dropped);
        assert_eq!(table.len(), 1);

        let third = table.insert("third");
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.get(&kept), Some(&"kept"));
        assert_eq!(table.get(&third), Some(&"third"));
    }

    #[test]
    fn test_cloned_handle_keeps_entry_alive() {
        let mut table = CallbackTable::new();
        let handle = table.insert(1);
        let clone = handle.clone();
        drop(handle);

        table.insert(2);
        assert_eq!(table.get(&clone), Some(&1));
        assert_eq!(clone.id(), 1);
    }
}
