//! Donor research enrichment: web search, page crawling, and LLM synthesis
//! of a research profile, written back with per-field provenance.
//!
//! Provenance matters because staff edits must never be clobbered by a
//! research run, and research must never be clobbered by a plain AI guess.
//! Each writable field carries its source in the `enrichment_sources` JSON
//! column, and a write only lands when its source priority is at least the
//! current one.

use std::collections::HashMap;

use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::ai::{parse_json_response, ChatMessage, LlmError, LlmProvider};
use crate::db::{DbDonorResearch, DonorDb};

pub mod crawler;
pub mod search;

pub use crawler::CrawlerClient;
pub use search::{SearchClient, SearchResult};

/// Pages crawled per enrichment run.
const MAX_PAGES: usize = 3;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Enrichment is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Db(String),

    #[error("Donor not found: {0}")]
    DonorNotFound(String),
}

/// Per-field provenance record stored in the `enrichment_sources` JSON column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSource {
    /// Which source wrote this field ("user", "research", or "ai").
    pub source: String,
    /// ISO-8601 timestamp of the last write.
    pub at: String,
}

/// Map of field names to their provenance.
pub type EnrichmentSources = HashMap<String, FieldSource>;

/// Returns the numeric priority for an enrichment source.
/// Higher values win over lower values.
pub fn source_priority(source: &str) -> u8 {
    match source {
        "user" => 3,
        "research" => 2,
        "ai" => 1,
        _ => 0,
    }
}

/// Checks whether a source is allowed to write a field given the current
/// provenance map. Returns `true` when no higher-priority source has
/// already written the field.
pub fn can_write_field(current_sources_json: Option<&str>, field: &str, source: &str) -> bool {
    let new_priority = source_priority(source);
    if new_priority == 0 {
        return false; // unknown source may never write
    }

    let sources: EnrichmentSources = current_sources_json
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    match sources.get(field) {
        Some(existing) => source_priority(&existing.source) <= new_priority,
        None => true,
    }
}

/// Research profile the LLM distills from crawled pages.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DonorResearch {
    /// Short factual profile grounded in the crawled pages.
    pub summary: String,
    #[serde(default)]
    pub interests: Vec<String>,
    /// "low", "medium", or "high" when the pages support an estimate.
    #[serde(default)]
    pub giving_capacity: Option<String>,
}

/// Outcome of an enrichment run for a single donor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentResult {
    pub donor_id: String,
    pub fields_updated: Vec<String>,
    pub fields_skipped: Vec<String>,
    /// URLs the research was built from.
    pub sources: Vec<String>,
}

/// Search query for a donor: name plus country (city when no country is
/// set), anchored with giving terms.
fn research_query(donor: &crate::db::DbDonor) -> String {
    let mut query = donor.name.clone();
    if let Some(place) = donor.country.as_ref().or(donor.city.as_ref()) {
        query.push(' ');
        query.push_str(place);
    }
    query.push_str(" donor philanthropy");
    query
}

/// Research a donor on the web and write the profile back.
pub async fn enrich_donor(
    db: &DonorDb,
    provider: &dyn LlmProvider,
    search: &SearchClient,
    crawler: &CrawlerClient,
    organization_id: &str,
    donor_id: &str,
) -> Result<EnrichmentResult, EnrichError> {
    let donor = db
        .get_donor(organization_id, donor_id)
        .map_err(|e| EnrichError::Db(e.to_string()))?
        .ok_or_else(|| EnrichError::DonorNotFound(donor_id.to_string()))?;

    let query = research_query(&donor);
    let hits = search.search(&query).await?;
    if hits.is_empty() {
        return Err(EnrichError::Http(format!("no search results for '{query}'")));
    }

    // Crawl the top hits concurrently; a failed page is dropped, not fatal.
    let mut set = JoinSet::new();
    for hit in hits.into_iter().take(MAX_PAGES) {
        let crawler = crawler.clone();
        set.spawn(async move {
            let text = crawler.fetch_text(&hit.url).await;
            (hit.url, text)
        });
    }
    let mut pages: Vec<(String, String)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((url, Ok(text))) if !text.is_empty() => pages.push((url, text)),
            Ok((url, Ok(_))) => debug!("Skipping empty page {url}"),
            Ok((url, Err(e))) => warn!("Crawl failed for {url}: {e}"),
            Err(e) => warn!("Crawl task panicked: {e}"),
        }
    }
    if pages.is_empty() {
        return Err(EnrichError::Http("no crawlable search results".to_string()));
    }

    let research = distill(provider, &donor.name, &pages).await?;
    let sources: Vec<String> = pages.into_iter().map(|(url, _)| url).collect();
    let result = apply_research(db, organization_id, &donor, &research, &sources)?;

    info!(
        "Enriched donor {donor_id}: {} field(s) updated, {} skipped",
        result.fields_updated.len(),
        result.fields_skipped.len()
    );
    Ok(result)
}

/// Ask the LLM for a research profile from the crawled pages.
async fn distill(
    provider: &dyn LlmProvider,
    donor_name: &str,
    pages: &[(String, String)],
) -> Result<DonorResearch, EnrichError> {
    let schema = serde_json::to_value(schemars::schema_for!(DonorResearch))
        .map_err(|e| EnrichError::Llm(LlmError::BadOutput(e.to_string())))?;

    let mut sources_block = String::new();
    for (url, text) in pages {
        sources_block.push_str(&format!("--- {url} ---\n{text}\n\n"));
    }

    let messages = vec![
        ChatMessage::system(
            "You research potential donors for a nonprofit. From the pages \
             below, write a short factual profile of the named person or \
             organization. Only state what the pages support; if they are \
             about someone else, say so in the summary and leave the other \
             fields empty. givingCapacity must be low, medium, or high, and \
             only when the pages justify it.",
        ),
        ChatMessage::user(format!("Person or organization: {donor_name}\n\n{sources_block}")),
    ];
    let reply = provider.complete_json(&messages, "donor_research", &schema).await?;
    let mut research: DonorResearch = parse_json_response(&reply)?;
    if let Some(capacity) = &research.giving_capacity {
        if !matches!(capacity.as_str(), "low" | "medium" | "high") {
            research.giving_capacity = None;
        }
    }
    Ok(research)
}

/// Merge the research into the donor row, honoring field provenance.
fn apply_research(
    db: &DonorDb,
    organization_id: &str,
    donor: &crate::db::DbDonor,
    research: &DonorResearch,
    source_urls: &[String],
) -> Result<EnrichmentResult, EnrichError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut provenance: EnrichmentSources = donor
        .enrichment_sources
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    let mut updated = Vec::new();
    let mut skipped = Vec::new();
    let mut record = DbDonorResearch {
        research_summary: donor.research_summary.clone(),
        interests: donor.interests.clone(),
        giving_capacity: donor.giving_capacity.clone(),
        research_sources: donor.research_sources.clone(),
        enrichment_sources: None,
    };

    let mut write = |field: &str, value: Option<String>, slot: &mut Option<String>| {
        let Some(value) = value else { return };
        if can_write_field(donor.enrichment_sources.as_deref(), field, "research") {
            *slot = Some(value);
            provenance.insert(
                field.to_string(),
                FieldSource { source: "research".to_string(), at: now.clone() },
            );
            updated.push(field.to_string());
        } else {
            skipped.push(field.to_string());
        }
    };

    let summary = Some(research.summary.clone()).filter(|s| !s.trim().is_empty());
    write("research_summary", summary, &mut record.research_summary);

    let interests = if research.interests.is_empty() {
        None
    } else {
        serde_json::to_string(&research.interests).ok()
    };
    write("interests", interests, &mut record.interests);
    write(
        "giving_capacity",
        research.giving_capacity.clone(),
        &mut record.giving_capacity,
    );

    if !updated.is_empty() {
        record.research_sources = serde_json::to_string(source_urls).ok();
    }
    record.enrichment_sources = serde_json::to_string(&provenance).ok();
    db.update_donor_research(organization_id, &donor.id, &record)
        .map_err(|e| EnrichError::Db(e.to_string()))?;

    Ok(EnrichmentResult {
        donor_id: donor.id.clone(),
        fields_updated: updated,
        fields_skipped: skipped,
        sources: source_urls.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_donor, test_db};

    #[test]
    fn test_research_query_prefers_country() {
        let mut donor = sample_donor("d1", "org1", "Ada Lovelace");
        donor.city = Some("Ghent".to_string());
        donor.country = Some("Belgium".to_string());
        assert_eq!(research_query(&donor), "Ada Lovelace Belgium donor philanthropy");

        donor.country = None;
        assert_eq!(research_query(&donor), "Ada Lovelace Ghent donor philanthropy");

        donor.city = None;
        assert_eq!(research_query(&donor), "Ada Lovelace donor philanthropy");
    }

    #[test]
    fn test_source_priority_ordering() {
        assert!(source_priority("user") > source_priority("research"));
        assert!(source_priority("research") > source_priority("ai"));
        assert_eq!(source_priority("unknown"), 0);
    }

    #[test]
    fn test_can_write_field_rules() {
        // No provenance — anyone known may write
        assert!(can_write_field(None, "research_summary", "ai"));
        assert!(!can_write_field(None, "research_summary", "mystery"));

        let sources = serde_json::json!({
            "research_summary": {"source": "user", "at": "2025-01-01T00:00:00Z"},
            "interests": {"source": "ai", "at": "2025-01-01T00:00:00Z"}
        })
        .to_string();

        // A user-written field is locked against research
        assert!(!can_write_field(Some(&sources), "research_summary", "research"));
        assert!(can_write_field(Some(&sources), "research_summary", "user"));
        // Research may overwrite an AI guess
        assert!(can_write_field(Some(&sources), "interests", "research"));
        // Garbage provenance falls back to allowing the write
        assert!(can_write_field(Some("not json"), "interests", "ai"));
    }

    #[test]
    fn test_apply_research_respects_user_provenance() {
        let db = test_db();
        let mut donor = sample_donor("d1", "org1", "Ada Lovelace");
        donor.research_summary = Some("Hand-written by staff.".to_string());
        donor.enrichment_sources = Some(
            serde_json::json!({
                "research_summary": {"source": "user", "at": "2025-01-01T00:00:00Z"}
            })
            .to_string(),
        );
        db.upsert_donor(&donor).unwrap();

        let research = DonorResearch {
            summary: "Found on the web.".to_string(),
            interests: vec!["education".to_string()],
            giving_capacity: Some("high".to_string()),
        };
        let sources = vec!["https://example.org/ada".to_string()];
        let result = apply_research(&db, "org1", &donor, &research, &sources).expect("apply");

        assert_eq!(result.fields_skipped, vec!["research_summary"]);
        assert_eq!(result.fields_updated, vec!["interests", "giving_capacity"]);

        let reloaded = db.get_donor("org1", "d1").unwrap().unwrap();
        assert_eq!(reloaded.research_summary.as_deref(), Some("Hand-written by staff."));
        assert_eq!(reloaded.giving_capacity.as_deref(), Some("high"));
        assert!(reloaded.interests.as_deref().unwrap_or("").contains("education"));
        assert!(reloaded.last_enriched_at.is_some());
    }

    #[test]
    fn test_apply_research_skips_empty_values() {
        let db = test_db();
        let donor = sample_donor("d1", "org1", "Ada Lovelace");
        db.upsert_donor(&donor).unwrap();

        let research = DonorResearch {
            summary: "   ".to_string(),
            interests: vec![],
            giving_capacity: None,
        };
        let result = apply_research(&db, "org1", &donor, &research, &[]).expect("apply");
        assert!(result.fields_updated.is_empty());

        let reloaded = db.get_donor("org1", "d1").unwrap().unwrap();
        assert!(reloaded.research_summary.is_none());
        assert!(reloaded.research_sources.is_none());
    }
}
