//! Test fixtures shared across modules

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::bridge::UrlShortener;
use crate::transport::{ChatTransport, TransportError};

/// Records every outbound message instead of sending it
pub struct MemoryTransport {
    nick: Mutex<String>,
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl MemoryTransport {
    pub fn new(nick: &str) -> Self {
        Self {
            nick: Mutex::new(nick.to_string()),
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
        }
    }

    /// (target, text) pairs in send order
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn set_nick(&self, nick: &str) {
        *self.nick.lock() = nick.to_string();
    }
}

impl ChatTransport for MemoryTransport {
    fn send_private_message(&self, target: &str, text: &str) -> Result<(), TransportError> {
        if *self.failing.lock() {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().push((target.to_string(), text.to_string()));
        Ok(())
    }

    fn current_nickname(&self) -> String {
        self.nick.lock().clone()
    }
}

/// Shortens every URL to the same link and remembers what it was asked
pub struct FakeShortener {
    short: String,
    requests: Mutex<Vec<String>>,
}

impl FakeShortener {
    pub fn new(short: &str) -> Self {
        Self {
            short: short.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl UrlShortener for FakeShortener {
    fn shorten_url(&self, url: &str) -> Option<String> {
        self.requests.lock().push(url.to_string());
        Some(self.short.clone())
    }
}

/// Serve a single HTTP request on a local port with a canned 200 response.
///
/// Returns the base URL and a handle yielding the raw request text: the
/// request line, headers and body as received.
pub fn serve_once(response_body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap();
            }
            request.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }

        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
        request.push_str(&String::from_utf8(body).unwrap());

        write!(
            stream,
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response_body.len(),
            response_body
        )
        .unwrap();
        request
    });

    (url, handle)
}
