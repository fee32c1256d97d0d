//! Shared configuration types.
//!
//! Config lives at `~/.givehub/config.json`, camelCase on disk, with
//! section structs that each default cleanly so a partial file still loads.
//! Secrets never live in the file: API keys come from the environment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Organization this installation serves.
    pub organization_id: String,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            organization_id: String::new(),
            crm: CrmConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            crawler: CrawlerConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Upstream CRM connection. The API key is read from `GIVEHUB_CRM_API_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl CrmConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var("GIVEHUB_CRM_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }
}

/// LLM endpoint. The API key is read from `GIVEHUB_LLM_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub api_base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_llm_url(),
            model: default_llm_model(),
            temperature: default_llm_temperature(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var("GIVEHUB_LLM_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    60
}

/// Web search used by donor enrichment. Key from `GIVEHUB_SEARCH_API_KEY`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default = "default_search_results")]
    pub max_results: u32,
}

impl SearchConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var("GIVEHUB_SEARCH_API_KEY").ok().filter(|k| !k.trim().is_empty())
    }
}

fn default_search_results() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_crawl_timeout")]
    pub timeout_seconds: u64,
    /// Per-page content cap in bytes before the text is handed to the LLM.
    #[serde(default = "default_crawl_max_bytes")]
    pub max_content_bytes: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_crawl_timeout(),
            max_content_bytes: default_crawl_max_bytes(),
        }
    }
}

fn default_crawl_timeout() -> u64 {
    20
}

fn default_crawl_max_bytes() -> usize {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppConfig {
    /// Query engine variant: "structured" or "rawSql".
    #[serde(default = "default_wa_engine")]
    pub engine: String,
    /// Messages allowed per sender within the rate window.
    #[serde(default = "default_wa_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Prior turns included as context for each question.
    #[serde(default = "default_wa_context_turns")]
    pub context_turns: u32,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            engine: default_wa_engine(),
            rate_limit_per_minute: default_wa_rate_limit(),
            context_turns: default_wa_context_turns(),
        }
    }
}

fn default_wa_engine() -> String {
    "structured".to_string()
}

fn default_wa_rate_limit() -> u32 {
    5
}

fn default_wa_context_turns() -> u32 {
    6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Seconds between CRM sync poller wakeups.
    #[serde(default = "default_sync_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_sync_batch")]
    pub batch_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_sync_interval(),
            batch_size: default_sync_batch(),
        }
    }
}

fn default_sync_interval() -> u64 {
    300
}

fn default_sync_batch() -> u32 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"organizationId": "org1", "crm": {"enabled": true, "apiBaseUrl": "https://crm.example"}}"#;
        let config: Config = serde_json::from_str(json).expect("parse");
        assert_eq!(config.organization_id, "org1");
        assert!(config.crm.enabled);
        assert_eq!(config.whatsapp.engine, "structured");
        assert_eq!(config.sync.poll_interval_seconds, 300);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_round_trip_is_camel_case() {
        let config = Config { organization_id: "org1".to_string(), ..Default::default() };
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("organizationId"));
        assert!(json.contains("pollIntervalSeconds"));
        assert!(!json.contains("apiKey"), "secrets never serialize");
    }
}
