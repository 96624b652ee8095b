//! URL Shortening
//!
//! Outbound text is scanned for URLs; long ones are swapped for a short link
//! when that saves enough characters.

use std::sync::LazyLock;

use regex::Regex;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"']+"#).expect("URL pattern is valid")
});

/// A remote link-shortening service
pub trait UrlShortener: Send + Sync + 'static {
    /// Short form of `url`, or `None` when the service could not provide one
    fn shorten_url(&self, url: &str) -> Option<String>;
}

/// How [`shorten_urls`] treats each URL it finds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortenOptions {
    /// Shorten every URL regardless of the savings
    pub force: bool,
    /// Rewrite the text; when false URLs are only counted
    pub replace: bool,
    /// Characters a short link must save to be used
    pub min_savings: usize,
}

impl Default for ShortenOptions {
    fn default() -> Self {
        Self {
            force: false,
            replace: true,
            min_savings: 25,
        }
    }
}

/// Shorten the URLs in `text`.
///
/// Returns how many URLs qualified and the rewritten text.
pub fn shorten_urls(
    shortener: &dyn UrlShortener,
    text: &str,
    options: ShortenOptions,
) -> (usize, String) {
    let mut count = 0;
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for found in URL_PATTERN.find_iter(text) {
        let url = found.as_str();
        if !options.force && url.len() <= options.min_savings {
            continue;
        }

        let Some(short) = shortener.shorten_url(url) else {
            continue;
        };

        let saved = url.len().saturating_sub(short.len());
        if !options.force && saved < options.min_savings {
            continue;
        }

        count += 1;
        if options.replace {
            out.push_str(&text[last..found.start()]);
            out.push_str(&short);
            last = found.end();
        }
    }

    out.push_str(&text[last..]);
    (count, out)
}

/// Leaves every URL alone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShortening;

impl UrlShortener for NoShortening {
    fn shorten_url(&self, _url: &str) -> Option<String> {
        None
    }
}

/// Shortener backed by the is.gd "simple" API
pub struct IsGdShortener {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl IsGdShortener {
    pub const DEFAULT_ENDPOINT: &'static str = "https://is.gd/create.php";

    /// Build a shortener. Must not be called from inside an async context.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("gonk/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl UrlShortener for IsGdShortener {
    fn shorten_url(&self, url: &str) -> Option<String> {
        let result = self
            .client
            .get(&self.endpoint)
            .query(&[("format", "simple"), ("url", url)])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text());

        match result {
            Ok(body) => {
                let short = body.trim();
                if short.starts_with("http") {
                    Some(short.to_string())
                } else {
                    tracing::warn!("Shortener rejected {}: {}", url, short);
                    None
                }
            }
            Err(e) => {
                tracing::warn!("Failed to shorten {}: {}", url, e);
                None
            }
        }
    }
}
