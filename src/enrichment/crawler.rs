//! Page fetcher for enrichment: pulls a URL, strips markup, and caps the
//! text before it is handed to the LLM.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use reqwest::Client;

use crate::types::CrawlerConfig;

use super::EnrichError;

#[derive(Clone)]
pub struct CrawlerClient {
    client: Client,
    max_content_bytes: usize,
}

impl CrawlerClient {
    pub fn new(config: &CrawlerConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds.max(1)))
            .user_agent("givehub-enrichment/0.6")
            .build()
            .map_err(|e| EnrichError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_content_bytes: config.max_content_bytes })
    }

    /// Fetch a page and return its readable text, capped at the configured
    /// byte limit. Non-text content types are refused.
    pub async fn fetch_text(&self, url: &str) -> Result<String, EnrichError> {
        debug!("Crawling {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EnrichError::Http(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Http(format!("{url}: HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") && !content_type.contains("text/plain") {
            return Err(EnrichError::Http(format!(
                "{url}: unsupported content type '{content_type}'"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EnrichError::Http(format!("{url}: {e}")))?;
        Ok(self.clean(&body))
    }

    fn clean(&self, html: &str) -> String {
        let text = strip_markup(html);
        truncate_bytes(&text, self.max_content_bytes)
    }
}

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").expect("script regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Drop script/style blocks and tags, collapse whitespace.
fn strip_markup(html: &str) -> String {
    let without_blocks = script_style_re().replace_all(html, " ");
    let without_tags = tag_re().replace_all(&without_blocks, " ");
    whitespace_re().replace_all(&without_tags, " ").trim().to_string()
}

fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup_drops_scripts_and_tags() {
        let html = "<html><head><style>body{color:red}</style>\
                    <script>alert('x')</script></head>\
                    <body><h1>Ada Lovelace</h1><p>Supports   education.</p></body></html>";
        let text = strip_markup(html);
        assert_eq!(text, "Ada Lovelace Supports education.");
        assert!(!text.contains("alert"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let cut = truncate_bytes(&text, 37);
        assert!(cut.len() <= 37);
        assert!(text.starts_with(&cut));
    }
}
