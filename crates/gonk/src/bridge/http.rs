//! Blocking HTTP for scripts.
//!
//! Failures never reach the script as exceptions: they are logged and the
//! call yields an empty body. The last failure message is kept so scripts can
//! tell a failed request from an empty response.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;

use super::BridgeError;

/// Client settings for the HTTP bridge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpSettings {
    pub user_agent: Option<String>,
    /// `None` waits for the remote end indefinitely
    pub timeout: Option<Duration>,
}

/// Per-module HTTP client
pub struct HttpBridge {
    client: Client,
    last_error: RefCell<Option<String>>,
}

impl HttpBridge {
    /// Build the client. Must run outside any async runtime.
    pub fn new(settings: &HttpSettings) -> Result<Self, BridgeError> {
        let mut builder = Client::builder().timeout(settings.timeout);
        if let Some(ref agent) = settings.user_agent {
            builder = builder.user_agent(agent.as_str());
        }

        Ok(Self {
            client: builder.build().map_err(BridgeError::RequestBuild)?,
            last_error: RefCell::new(None),
        })
    }

    /// GET `url`, returning the body or `""` on any failure
    pub fn get(&self, url: &str, headers_json: Option<&str>) -> String {
        self.settle(Method::GET, url, self.execute(Method::GET, url, headers_json, None))
    }

    /// POST `body` to `url`, returning the body or `""` on any failure
    pub fn post(&self, url: &str, headers_json: Option<&str>, body: Option<String>) -> String {
        self.settle(
            Method::POST,
            url,
            self.execute(Method::POST, url, headers_json, body),
        )
    }

    /// Message of the last failed request, cleared by a successful one
    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    /// Record an argument error raised before any request was attempted
    pub(crate) fn fail(&self, method: Method, url: &str, error: BridgeError) -> String {
        self.settle(method, url, Err(error))
    }

    fn execute(
        &self,
        method: Method,
        url: &str,
        headers_json: Option<&str>,
        body: Option<String>,
    ) -> Result<String, BridgeError> {
        let headers: HashMap<String, String> = match headers_json {
            Some(json) => serde_json::from_str(json).map_err(BridgeError::HeaderJson)?,
            None => HashMap::new(),
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let request = builder.build().map_err(BridgeError::RequestBuild)?;
        let response = self.client.execute(request).map_err(BridgeError::Request)?;
        response.text().map_err(BridgeError::Body)
    }

    fn settle(&self, method: Method, url: &str, result: Result<String, BridgeError>) -> String {
        match result {
            Ok(body) => {
                self.last_error.borrow_mut().take();
                body
            }
            Err(e) => {
                tracing::error!("HTTP {} {} failed: {}", method, url, e);
                *self.last_error.borrow_mut() = Some(e.to_string());
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve_once;

    fn bridge() -> HttpBridge {
        HttpBridge::new(&HttpSettings {
            user_agent: None,
            timeout: Some(Duration::from_secs(5)),
        })
        .unwrap()
    }

    #[test]
    fn test_failing_connection_returns_empty_body() {
        let http = bridge();

        // Nothing listens on port 1
        let body = http.get("http://127.0.0.1:1/", Some("{}"));
        assert_eq!(body, "");
        assert!(http.last_error().unwrap().contains("request failed"));
    }

    #[test]
    fn test_bad_headers_return_empty_body() {
        let http = bridge();

        let body = http.post("http://127.0.0.1:1/", Some("not json"), Some("x".into()));
        assert_eq!(body, "");
        assert!(http.last_error().unwrap().contains("header JSON"));
    }

    #[test]
    fn test_bad_url_returns_empty_body() {
        let http = bridge();

        assert_eq!(http.get("not a url", None), "");
        assert!(http.last_error().is_some());
    }

    #[test]
    fn test_post_sends_headers_and_body() {
        let http = bridge();
        http.get("http://127.0.0.1:1/", None);
        assert!(http.last_error().is_some());

        let (url, server) = serve_once("generated 42");
        let body = http.post(
            &format!("{}/instance/create", url),
            Some(r#"{"X-Api-Key":"s3cret","Content-Type":"application/x-www-form-urlencoded"}"#),
            Some("generatorID=45&text0=hi".into()),
        );
        assert_eq!(body, "generated 42");
        assert_eq!(http.last_error(), None);

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /instance/create HTTP/1.1\r\n"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("x-api-key: s3cret\r\n"), "request was {}", request);
        assert!(lower.contains("content-type: application/x-www-form-urlencoded\r\n"));
        assert!(request.ends_with("\r\n\r\ngeneratorID=45&text0=hi"));
    }

    #[test]
    fn test_get_returns_full_body() {
        let http = bridge();

        let (url, server) = serve_once("line one\nline two\n");
        assert_eq!(http.get(&format!("{}/?q=1", url), None), "line one\nline two\n");
        assert_eq!(http.last_error(), None);
        assert!(server.join().unwrap().starts_with("GET /?q=1 HTTP/1.1\r\n"));
    }
}
