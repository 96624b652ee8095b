//! Chat Transport
//!
//! The network side of the bot is not part of this crate. Modules only need
//! to send a line to a target and know the bot's current nick.

use std::io::Write;

use parking_lot::{Mutex, RwLock};

/// Errors reported by a chat transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    Disconnected,

    #[error("Failed to send to {target}: {message}")]
    Send { target: String, message: String },
}

/// Outbound side of a chat connection.
///
/// Shared by every module of a bot; implementations serialize their own writes.
pub trait ChatTransport: Send + Sync + 'static {
    /// Send one line to a channel or user
    fn send_private_message(&self, target: &str, text: &str) -> Result<(), TransportError>;

    /// The nick the bot is currently using
    fn current_nickname(&self) -> String;
}

/// Transport that prints outbound messages, for running modules locally
pub struct ConsoleTransport {
    nick: RwLock<String>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleTransport {
    /// Print to stdout
    pub fn new(nick: impl Into<String>) -> Self {
        Self::with_writer(nick, Box::new(std::io::stdout()))
    }

    pub fn with_writer(nick: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            nick: RwLock::new(nick.into()),
            out: Mutex::new(out),
        }
    }

    pub fn set_nick(&self, nick: impl Into<String>) {
        *self.nick.write() = nick.into();
    }
}

impl ChatTransport for ConsoleTransport {
    fn send_private_message(&self, target: &str, text: &str) -> Result<(), TransportError> {
        let nick = self.nick.read().clone();
        let mut out = self.out.lock();

        writeln!(out, "[{}] <{}> {}", target, nick, text)
            .and_then(|()| out.flush())
            .map_err(|e| TransportError::Send {
                target: target.to_string(),
                message: e.to_string(),
            })
    }

    fn current_nickname(&self) -> String {
        self.nick.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_console_transport_formats_lines() {
        let buffer = SharedBuffer::default();
        let transport = ConsoleTransport::with_writer("gonk", Box::new(buffer.clone()));

        transport.send_private_message("#chan", "hello").unwrap();
        transport.set_nick("gonk_");
        transport.send_private_message("alice", "psst").unwrap();

        let written = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert_eq!(written, "[#chan] <gonk> hello\n[alice] <gonk_> psst\n");
        assert_eq!(transport.current_nickname(), "gonk_");
    }
}
