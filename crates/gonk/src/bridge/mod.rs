//! Native Bridge Functions
//!
//! The fixed set of host functions a module script can call. Every call is
//! synchronous and runs on the module's own thread.
//!
//! - `_console_log(...values)`
//! - `_robot_respond(pattern, callback)` / `_robot_hear(pattern, callback)`
//! - `_msg_send(...texts, target)`
//! - `_httpclient_get(url, headers)` / `_httpclient_post(url, headers, body)`
//! - `_httpclient_last_error()`

mod http;
mod shorten;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};

pub use http::{HttpBridge, HttpSettings};
pub use shorten::{IsGdShortener, NoShortening, ShortenOptions, UrlShortener, shorten_urls};

use crate::registry::{Audience, Pattern, Registries};
use crate::script::{NativeFn, ScriptEnvironment, ScriptResult, ScriptValue};
use crate::transport::{ChatTransport, TransportError};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by bridge functions
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("expected at least {expected} argument(s)")]
    Arity {
        function: &'static str,
        expected: usize,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument {
        function: &'static str,
        message: String,
    },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid header JSON: {0}")]
    HeaderJson(serde_json::Error),

    #[error("could not build request: {0}")]
    RequestBuild(reqwest::Error),

    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("could not read response body: {0}")]
    Body(reqwest::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────────────────────────────────────

/// Host state behind one module's native functions
pub struct Bridge {
    module: String,
    registries: Rc<RefCell<Registries>>,
    transport: Arc<dyn ChatTransport>,
    shortener: Arc<dyn UrlShortener>,
    shorten: ShortenOptions,
    http: HttpBridge,
}

impl Bridge {
    pub fn new(
        module: impl Into<String>,
        registries: Rc<RefCell<Registries>>,
        transport: Arc<dyn ChatTransport>,
        shortener: Arc<dyn UrlShortener>,
        shorten: ShortenOptions,
        http: HttpBridge,
    ) -> Self {
        Self {
            module: module.into(),
            registries,
            transport,
            shortener,
            shorten,
            http,
        }
    }

    /// Bind every native function into `env`
    pub fn install<E: ScriptEnvironment + ?Sized>(self: &Rc<Self>, env: &E) -> ScriptResult<()> {
        let natives: [(&str, NativeFn); 7] = [
            ("_console_log", self.native(|bridge, args| Ok(bridge.console_log(args)))),
            (
                "_robot_respond",
                self.native(|bridge, args| bridge.register(Audience::Addressed, args)),
            ),
            (
                "_robot_hear",
                self.native(|bridge, args| bridge.register(Audience::Overheard, args)),
            ),
            ("_msg_send", self.native(|bridge, args| bridge.msg_send(args))),
            ("_httpclient_get", self.native(|bridge, args| Ok(bridge.http_get(args)))),
            ("_httpclient_post", self.native(|bridge, args| Ok(bridge.http_post(args)))),
            (
                "_httpclient_last_error",
                self.native(|bridge, _| Ok(ScriptValue::from(bridge.http.last_error()))),
            ),
        ];

        for (name, function) in natives {
            env.register_native(name, function)?;
        }
        Ok(())
    }

    fn native<F>(self: &Rc<Self>, f: F) -> NativeFn
    where
        F: Fn(&Bridge, Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> + 'static,
    {
        let bridge = Rc::clone(self);
        Box::new(move |args| f(&bridge, args))
    }

    /// `_console_log`: each value on its own line
    pub fn console_log(&self, args: Vec<ScriptValue>) -> ScriptValue {
        for value in args {
            warn!(target: "gonk.js", module = %self.module, "> {}", value);
        }
        ScriptValue::from("")
    }

    /// `_robot_respond` / `_robot_hear`
    pub fn register(
        &self,
        audience: Audience,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, BridgeError> {
        let function = match audience {
            Audience::Addressed => "_robot_respond",
            Audience::Overheard => "_robot_hear",
        };

        let mut args = args.into_iter();
        let (Some(pattern), Some(callback)) = (args.next(), args.next()) else {
            return Err(BridgeError::Arity {
                function,
                expected: 2,
            });
        };

        let source = match pattern {
            ScriptValue::Pattern(source) => source,
            ScriptValue::String(raw) => crate::script::PatternSource::new(raw, ""),
            other => {
                return Err(BridgeError::InvalidArgument {
                    function,
                    message: format!("pattern must be a RegExp or string, got {}", other),
                });
            }
        };
        let ScriptValue::Callback(callback) = callback else {
            return Err(BridgeError::InvalidArgument {
                function,
                message: "callback must be a function".to_string(),
            });
        };

        let pattern = Pattern::compile(&source)?;
        let replaced = self
            .registries
            .borrow_mut()
            .get_mut(audience)
            .insert(pattern, callback);

        if replaced.is_some() {
            debug!(module = %self.module, %audience, "Replaced handler for {}", source);
        } else {
            debug!(module = %self.module, %audience, "Registered handler for {}", source);
        }
        Ok(ScriptValue::Undefined)
    }

    /// `_msg_send`: the last argument is the target, every other argument is
    /// sent as its own message
    pub fn msg_send(&self, args: Vec<ScriptValue>) -> Result<ScriptValue, BridgeError> {
        let Some((target, texts)) = args.split_last() else {
            return Err(BridgeError::Arity {
                function: "_msg_send",
                expected: 1,
            });
        };

        let target = target.to_string();
        let target = target.trim_matches('"');

        for text in texts {
            let text = text.to_string();
            let (shortened, text) =
                shorten_urls(self.shortener.as_ref(), text.trim_matches('"'), self.shorten);
            if shortened > 0 {
                debug!(module = %self.module, "Shortened {} URL(s)", shortened);
            }

            self.transport.send_private_message(target, &text)?;
        }

        Ok(ScriptValue::from(""))
    }

    /// `_httpclient_get`: never raises, failures yield `""`
    pub fn http_get(&self, args: Vec<ScriptValue>) -> ScriptValue {
        let url = match request_url("_httpclient_get", &args) {
            Ok(url) => url,
            Err(e) => return ScriptValue::from(self.http.fail(Method::GET, "", e)),
        };

        match header_json(args.get(1)) {
            Ok(headers) => ScriptValue::from(self.http.get(&url, headers.as_deref())),
            Err(e) => ScriptValue::from(self.http.fail(Method::GET, &url, e)),
        }
    }

    /// `_httpclient_post`: never raises, failures yield `""`
    pub fn http_post(&self, args: Vec<ScriptValue>) -> ScriptValue {
        let url = match request_url("_httpclient_post", &args) {
            Ok(url) => url,
            Err(e) => return ScriptValue::from(self.http.fail(Method::POST, "", e)),
        };

        let body = args
            .get(2)
            .filter(|body| !body.is_nullish())
            .map(|body| body.to_string());

        match header_json(args.get(1)) {
            Ok(headers) => ScriptValue::from(self.http.post(&url, headers.as_deref(), body)),
            Err(e) => ScriptValue::from(self.http.fail(Method::POST, &url, e)),
        }
    }

    pub fn last_http_error(&self) -> Option<String> {
        self.http.last_error()
    }
}

fn request_url(function: &'static str, args: &[ScriptValue]) -> Result<String, BridgeError> {
    match args.first() {
        Some(ScriptValue::String(url)) => Ok(url.trim_matches('"').to_string()),
        Some(other) => Err(BridgeError::InvalidArgument {
            function,
            message: format!("url must be a string, got {}", other),
        }),
        None => Err(BridgeError::Arity {
            function,
            expected: 1,
        }),
    }
}

/// Headers arrive as a JSON string; plain objects are serialized
fn header_json(value: Option<&ScriptValue>) -> Result<Option<String>, BridgeError> {
    match value {
        None => Ok(None),
        Some(value) if value.is_nullish() => Ok(None),
        Some(ScriptValue::String(json)) => Ok(Some(json.clone())),
        Some(object @ ScriptValue::Object(_)) => Ok(Some(object.to_json().to_string())),
        Some(other) => Err(BridgeError::InvalidArgument {
            function: "headers",
            message: format!("headers must be a JSON string, got {}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{PatternSource, QuickJsEnvironment};
    use crate::testing::{FakeShortener, MemoryTransport, serve_once};

    struct Harness {
        env: QuickJsEnvironment,
        bridge: Rc<Bridge>,
        registries: Rc<RefCell<Registries>>,
        transport: Arc<MemoryTransport>,
    }

    fn harness_with(shortener: Arc<dyn UrlShortener>) -> Harness {
        let env = QuickJsEnvironment::new().unwrap();
        let registries = Rc::new(RefCell::new(Registries::default()));
        let transport = Arc::new(MemoryTransport::new("gonk"));
        let http = HttpBridge::new(&HttpSettings {
            user_agent: None,
            timeout: Some(std::time::Duration::from_secs(5)),
        })
        .unwrap();

        let bridge = Rc::new(Bridge::new(
            "test",
            registries.clone(),
            transport.clone(),
            shortener,
            ShortenOptions::default(),
            http,
        ));
        bridge.install(&env).unwrap();

        Harness {
            env,
            bridge,
            registries,
            transport,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(NoShortening))
    }

    #[test]
    fn test_register_regexp_and_string_patterns() {
        let h = harness();

        h.env
            .eval_source(
                "register",
                r#"
                _robot_respond(/meme (\w+)/i, function () {});
                _robot_hear("^ping$", function () {});
                "#,
            )
            .unwrap();

        let registries = h.registries.borrow();
        let addressed: Vec<_> = registries
            .get(Audience::Addressed)
            .iter()
            .map(|entry| entry.pattern.source().clone())
            .collect();
        assert_eq!(addressed, vec![PatternSource::new(r"meme (\w+)", "i")]);

        let overheard = registries.get(Audience::Overheard);
        assert_eq!(overheard.len(), 1);
        assert!(overheard.iter().next().unwrap().pattern.captures("ping").is_some());
    }

    #[test]
    fn test_register_rejects_bad_arguments() {
        let h = harness();

        for script in [
            "_robot_respond(/ok/)",
            "_robot_respond(/ok/, 'not a function')",
            "_robot_respond(42, function () {})",
            "_robot_hear('(unclosed', function () {})",
        ] {
            let result = h.env.eval_source("bad", script);
            assert!(result.is_err(), "{} should throw", script);
        }

        let registries = h.registries.borrow();
        assert!(registries.get(Audience::Addressed).is_empty());
        assert!(registries.get(Audience::Overheard).is_empty());
    }

    #[test]
    fn test_msg_send_trims_quotes_and_keeps_order() {
        let h = harness();

        h.env
            .eval_source("send", r##"_msg_send('"one"', 'two', '"#chan"')"##)
            .unwrap();

        assert_eq!(
            h.transport.sent(),
            vec![
                ("#chan".to_string(), "one".to_string()),
                ("#chan".to_string(), "two".to_string()),
            ]
        );
    }

    #[test]
    fn test_msg_send_with_only_target_sends_nothing() {
        let h = harness();

        h.env.eval_source("send", "_msg_send('#chan')").unwrap();
        assert!(h.transport.sent().is_empty());
        assert!(h.env.eval_source("send", "_msg_send()").is_err());
    }

    #[test]
    fn test_msg_send_shortens_urls() {
        let shortener = Arc::new(FakeShortener::new("http://is.gd/abc"));
        let h = harness_with(shortener.clone());

        h.env
            .eval_source(
                "send",
                "_msg_send('see http://example.com/a/very/long/path/to/an/image.jpg', '#chan')",
            )
            .unwrap();

        assert_eq!(
            h.transport.sent(),
            vec![("#chan".to_string(), "see http://is.gd/abc".to_string())]
        );
        assert_eq!(shortener.requests().len(), 1);
    }

    #[test]
    fn test_msg_send_transport_failure_throws() {
        let h = harness();
        h.transport.set_failing(true);

        let err = h.env.eval_source("send", "_msg_send('hi', '#chan')").unwrap_err();
        assert!(err.to_string().contains("_msg_send"));
    }

    #[test]
    fn test_http_failures_return_empty_string() {
        let h = harness();

        let body = h
            .env
            .eval_source("get", "_httpclient_get('http://127.0.0.1:1/', '{}')")
            .unwrap();
        assert_eq!(body, ScriptValue::from(""));
        assert!(h.bridge.last_http_error().is_some());

        let result = h
            .env
            .eval_source(
                "post",
                r#"[_httpclient_post('http://127.0.0.1:1/', 'nope', 'x'), _httpclient_last_error()]"#,
            )
            .unwrap();
        let result = result.as_array().unwrap();
        assert_eq!(result[0], ScriptValue::from(""));
        assert!(result[1].as_str().unwrap().contains("header JSON"));

        // Missing URL does not throw either
        assert_eq!(
            h.env.eval_source("get", "_httpclient_get()").unwrap(),
            ScriptValue::from("")
        );
    }

    #[test]
    fn test_http_success_clears_last_error() {
        let h = harness();
        let (url, server) = serve_once("{\"ok\":true}");
        h.env
            .set_global("target", ScriptValue::from(format!("{}/api", url)))
            .unwrap();

        let result = h
            .env
            .eval_source(
                "post",
                r#"
                var before = (_httpclient_get('http://127.0.0.1:1/'), _httpclient_last_error());
                var body = _httpclient_post(target, JSON.stringify({ 'X-Token': 'abc' }), 'a=1');
                [typeof before, body, _httpclient_last_error()]
                "#,
            )
            .unwrap();
        assert_eq!(
            result.to_json(),
            serde_json::json!(["string", "{\"ok\":true}", null])
        );

        let request = server.join().unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /api "));
        assert!(request.contains("x-token: abc\r\n"));
        assert!(request.ends_with("a=1"));
    }

    #[test]
    fn test_console_log_accepts_anything() {
        let h = harness();

        let result = h
            .env
            .eval_source("log", "_console_log('a', 1, { b: 2 }, null)")
            .unwrap();
        assert_eq!(result, ScriptValue::from(""));
    }
}
