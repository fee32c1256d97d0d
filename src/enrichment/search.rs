//! Web search client used to find pages about a donor.

use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::types::SearchConfig;

use super::EnrichError;

/// One search hit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

pub struct SearchClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_results: u32,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self, EnrichError> {
        if !config.enabled || config.api_base_url.trim().is_empty() {
            return Err(EnrichError::NotConfigured);
        }
        let api_key = config.api_key().ok_or(EnrichError::NotConfigured)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| EnrichError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
            max_results: config.max_results.max(1),
        })
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, EnrichError> {
        debug!("Web search: {query}");
        let response = self
            .client
            .get(&self.base_url)
            .bearer_auth(&self.api_key)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| EnrichError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Http(format!(
                "search returned HTTP {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Http(format!("failed to parse search response: {e}")))?;
        Ok(parsed.results)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let body = r#"{"results": [
            {"title": "Ada Lovelace Foundation", "url": "https://example.org/ada", "snippet": "Giving history"},
            {"title": "Interview", "url": "https://example.org/talk"}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].url, "https://example.org/ada");
        assert!(parsed.results[1].snippet.is_none());
    }

    #[test]
    fn test_disabled_config_is_not_configured() {
        let config = SearchConfig::default();
        assert!(matches!(
            SearchClient::new(&config).err(),
            Some(EnrichError::NotConfigured)
        ));
    }
}
