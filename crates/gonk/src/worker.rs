//! Module Workers
//!
//! Each module lives on its own OS thread for its whole life. The thread owns
//! the script environment; the rest of the bot talks to it through a
//! [`ModuleHandle`] with request/response commands.
//!
//! Commands are handled one at a time, which serializes dispatch into a
//! module. Distinct modules run in parallel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::module::{LoadError, Module, ModuleServices};

/// Errors talking to a module worker
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Module worker has terminated")]
    Terminated,
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Module worker thread panicked")]
    ThreadPanic,
}

/// An event routed into a module
struct DispatchRequest {
    target: String,
    line: String,
    from: String,
    response_tx: oneshot::Sender<bool>,
}

/// Messages sent to the worker thread
enum WorkerCommand {
    Respond(DispatchRequest),
    Hear(DispatchRequest),
    Shutdown,
}

/// Handle to a module running on its own thread.
///
/// Dropping the handle shuts the worker down.
pub struct ModuleHandle {
    name: String,
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    terminated: Arc<AtomicBool>,
    thread_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ModuleHandle {
    /// Start a worker thread and load `script` on it.
    ///
    /// Blocks until the module has loaded or failed, so call it from a
    /// blocking context.
    pub fn spawn(
        name: impl Into<String>,
        script: impl Into<String>,
        services: ModuleServices,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        let script = script.into();

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WorkerCommand>();
        let terminated = Arc::new(AtomicBool::new(false));
        let terminated_clone = terminated.clone();

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), LoadError>>(1);

        let module_name = name.clone();
        let thread_handle = thread::Builder::new()
            .name(format!("module-{}", name))
            .spawn(move || {
                tracing::debug!("[worker:{}] Thread started", module_name);

                let module = match Module::from_script(module_name.as_str(), script, &services) {
                    Ok(module) => {
                        let _ = ready_tx.send(Ok(()));
                        module
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while let Some(cmd) = cmd_rx.blocking_recv() {
                    match cmd {
                        WorkerCommand::Respond(req) => {
                            let responded = module.respond(&req.target, &req.line, &req.from);
                            let _ = req.response_tx.send(responded);
                        }
                        WorkerCommand::Hear(req) => {
                            let responded = module.hear(&req.target, &req.line, &req.from);
                            let _ = req.response_tx.send(responded);
                        }
                        WorkerCommand::Shutdown => break,
                    }

                    if terminated_clone.load(Ordering::SeqCst) {
                        break;
                    }
                }

                tracing::debug!("[worker:{}] Command loop exited", module_name);
            })
            .map_err(|source| LoadError::Spawn {
                module: name.clone(),
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread_handle.join();
                return Err(LoadError::WorkerExited { module: name });
            }
        }

        Ok(Self {
            name,
            cmd_tx,
            terminated,
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the module's addressed handlers against `line`
    pub async fn respond(&self, target: &str, line: &str, from: &str) -> Result<bool, WorkerError> {
        self.request(target, line, from, WorkerCommand::Respond).await
    }

    /// Run the module's overheard handlers against `line`
    pub async fn hear(&self, target: &str, line: &str, from: &str) -> Result<bool, WorkerError> {
        self.request(target, line, from, WorkerCommand::Hear).await
    }

    async fn request(
        &self,
        target: &str,
        line: &str,
        from: &str,
        command: fn(DispatchRequest) -> WorkerCommand,
    ) -> Result<bool, WorkerError> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(WorkerError::Terminated);
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.cmd_tx
            .send(command(DispatchRequest {
                target: target.to_string(),
                line: line.to_string(),
                from: from.to_string(),
                response_tx,
            }))
            .map_err(|_| WorkerError::ChannelClosed)?;

        response_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Ask the worker to stop after the command in flight
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Terminate and wait for the worker thread to finish
    pub fn join(self) -> Result<(), WorkerError> {
        self.terminate();
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| WorkerError::ThreadPanic)?;
        }
        Ok(())
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTransport;

    const ECHO: &str = r#"
        module.exports = function (robot) {
            robot.respond(/^echo (.*)$/, function (msg) { msg.send(msg.match[1]); });
            robot.hear(/gonk/, function (msg) { msg.send('you rang?'); });
        };
    "#;

    #[tokio::test]
    async fn test_worker_dispatches_on_its_thread() {
        let transport = Arc::new(MemoryTransport::new("gonk"));
        let services = ModuleServices::new(transport.clone());

        let handle = tokio::task::spawn_blocking(move || ModuleHandle::spawn("echo", ECHO, services))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.name(), "echo");

        assert!(handle.respond("#chan", "echo hi", "alice").await.unwrap());
        assert!(!handle.respond("#chan", "nope", "alice").await.unwrap());
        assert!(handle.hear("#chan", "where is gonk", "bob").await.unwrap());

        assert_eq!(
            transport.sent(),
            vec![
                ("#chan".to_string(), "hi".to_string()),
                ("#chan".to_string(), "you rang?".to_string()),
            ]
        );

        handle.terminate();
        assert!(handle.is_terminated());
        assert!(matches!(
            handle.respond("#chan", "echo hi", "alice").await,
            Err(WorkerError::Terminated)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_spawn_reports_load_error() {
        let transport = Arc::new(MemoryTransport::new("gonk"));
        let services = ModuleServices::new(transport);

        let err = ModuleHandle::spawn("broken", "module.exports = ", services)
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Script { .. }));
        assert_eq!(err.module(), Some("broken"));
    }
}
