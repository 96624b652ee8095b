//! Message Context Projection
//!
//! The script sees the current event through the global `response` object.
//! Every projection installs a brand new object built from structured data,
//! so nothing a previous dispatch or handler left behind is visible.

use serde_json::json;

use crate::script::{ScriptEnvironment, ScriptResult, ScriptValue};

/// Name of the global holding the live message context
pub const RESPONSE_GLOBAL: &str = "response";

/// The event a dispatch is handling.
///
/// Exclusively owned by the current dispatch; the projected script object is
/// replaced before the next callback runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContext {
    /// Channel or user the event occurred in
    pub target: String,
    /// The bot's own nick at dispatch time
    pub nick: String,
    /// Sender of the line
    pub sender: String,
    /// Raw line
    pub text: String,
    /// Captures of the pattern that fired, index 0 is the whole match
    pub matches: Vec<Option<String>>,
}

impl MessageContext {
    pub fn new(
        target: impl Into<String>,
        nick: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            nick: nick.into(),
            sender: sender.into(),
            text: text.into(),
            matches: Vec::new(),
        }
    }

    pub fn set_matches(&mut self, matches: Vec<Option<String>>) {
        self.matches = matches;
    }

    /// The value scripts see as `response`
    pub fn to_value(&self) -> ScriptValue {
        ScriptValue::from(json!({
            "target": self.target,
            "nick": self.nick,
            "message": {
                "nick": self.sender,
                "text": self.text,
            },
            "match": self.matches,
        }))
    }

    /// Install this context as the environment's `response` global
    pub fn project<E: ScriptEnvironment + ?Sized>(&self, env: &E) -> ScriptResult<()> {
        env.set_global(RESPONSE_GLOBAL, self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::QuickJsEnvironment;

    #[test]
    fn test_value_shape() {
        let mut context = MessageContext::new("#chan", "gonk", "alice", "meme help");
        context.set_matches(vec![Some("meme help".to_string()), None]);

        let value = context.to_value();
        assert_eq!(value.get("target").and_then(|v| v.as_str()), Some("#chan"));
        assert_eq!(value.get("nick").and_then(|v| v.as_str()), Some("gonk"));

        let message = value.get("message").unwrap();
        assert_eq!(message.get("nick").and_then(|v| v.as_str()), Some("alice"));
        assert_eq!(message.get("text").and_then(|v| v.as_str()), Some("meme help"));

        assert_eq!(
            value.get("match").and_then(|v| v.as_array()).map(|m| m.to_vec()),
            Some(vec![ScriptValue::from("meme help"), ScriptValue::Null])
        );
    }

    #[test]
    fn test_projection_replaces_previous_object() {
        let env = QuickJsEnvironment::new().unwrap();

        let mut first = MessageContext::new("#one", "gonk", "alice", "a b");
        first.set_matches(vec![Some("a b".to_string()), Some("b".to_string())]);
        first.project(&env).unwrap();
        env.eval_source("mutate", "response.extra = 1; response.message.extra = 2;")
            .unwrap();

        MessageContext::new("#two", "gonk", "bob", "c").project(&env).unwrap();

        let seen = env
            .eval_source("read", "JSON.stringify(response)")
            .unwrap();
        let seen: serde_json::Value = serde_json::from_str(seen.as_str().unwrap()).unwrap();
        assert_eq!(
            seen,
            json!({
                "target": "#two",
                "nick": "gonk",
                "message": { "nick": "bob", "text": "c" },
                "match": []
            })
        );
    }

    #[test]
    fn test_projection_is_not_interpolated() {
        let env = QuickJsEnvironment::new().unwrap();

        let hostile = r#""; globalThis.pwned = true; ""#;
        MessageContext::new("#chan", "gonk", hostile, hostile)
            .project(&env)
            .unwrap();

        assert_eq!(
            env.eval_source("check", "typeof pwned").unwrap(),
            ScriptValue::from("undefined")
        );
        assert_eq!(
            env.eval_source("check", "response.message.text").unwrap(),
            ScriptValue::from(hostile)
        );
    }
}
