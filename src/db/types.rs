//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// A row from the `organizations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOrganization {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    pub currency: String,
    pub created_at: String,
}

/// A row from the `staff` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStaff {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `donors` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDonor {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub whatsapp_number: Option<String>,
    /// "individual", "company", or "foundation".
    pub donor_type: String,
    /// "active", "lapsed", or "prospect".
    pub status: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub assigned_staff_id: Option<String>,
    /// Id of the matching record in the external CRM, set once linked.
    pub crm_external_id: Option<String>,
    pub notes: Option<String>,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
    /// Short research-derived profile of the donor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_summary: Option<String>,
    /// JSON array of researched interest keywords.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interests: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub giving_capacity: Option<String>,
    /// JSON array of URLs the research summary was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_sources: Option<String>,
    /// JSON map of field name to provenance (who wrote it, when).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_sources: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_enriched_at: Option<String>,
}

/// A row from the `projects` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProject {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: Option<String>,
    /// "active", "completed", or "paused".
    pub status: String,
    pub goal_amount: Option<f64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `donations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDonation {
    pub id: String,
    pub organization_id: String,
    pub donor_id: String,
    pub project_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    /// Date the donation was made (YYYY-MM-DD).
    pub donation_date: String,
    pub payment_method: Option<String>,
    pub recurring: bool,
    /// "pledged", "received", or "refunded".
    pub status: String,
    pub notes: Option<String>,
    /// Id of the matching record in the external CRM, set after a push.
    pub crm_external_id: Option<String>,
    pub recorded_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `communications` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCommunication {
    pub id: String,
    pub organization_id: String,
    pub donor_id: String,
    /// "email", "whatsapp", "phone", or "letter".
    pub channel: String,
    /// "inbound" or "outbound".
    pub direction: String,
    pub subject: Option<String>,
    pub summary: Option<String>,
    pub occurred_at: String,
    pub created_at: String,
}

/// A row from the `wa_conversations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbWaConversation {
    pub id: String,
    pub organization_id: String,
    pub phone_number: String,
    pub started_at: String,
    pub last_message_at: String,
}

/// A row from the `wa_messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbWaMessage {
    pub id: String,
    pub conversation_id: String,
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// A row from the `crm_sync_state` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCrmSyncState {
    pub id: String,
    /// Currently always "donation"; donors sync inline when they are linked.
    pub record_type: String,
    pub record_id: String,
    /// "pending", "synced", or "failed".
    pub state: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Sort direction for paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Options for the paginated donor listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListOptions {
    /// Case-insensitive substring match on name and email.
    pub search: Option<String>,
    pub status: Option<String>,
    pub donor_type: Option<String>,
    pub assigned_staff_id: Option<String>,
    /// One of "name", "createdAt", "updatedAt", "status". Defaults to "name".
    pub sort_by: Option<String>,
    pub sort_dir: Option<SortDir>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Options for the paginated donation listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationListOptions {
    pub donor_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound (YYYY-MM-DD).
    pub date_from: Option<String>,
    /// Inclusive upper bound (YYYY-MM-DD).
    pub date_to: Option<String>,
    /// One of "donationDate", "amount", "createdAt". Defaults to "donationDate".
    pub sort_by: Option<String>,
    pub sort_dir: Option<SortDir>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One page of a listing plus the total row count for the filter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

/// Aggregate statistics for a single donor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorStats {
    pub total_amount: f64,
    pub donation_count: i64,
    pub average_amount: Option<f64>,
    pub first_donation_at: Option<String>,
    pub last_donation_at: Option<String>,
    pub by_project: Vec<ProjectBreakdown>,
}

/// Per-project slice of an aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBreakdown {
    pub project_id: Option<String>,
    pub project_name: String,
    pub total_amount: f64,
    pub donation_count: i64,
}

/// Research fields written back by donor enrichment, plus the per-field
/// provenance map (`enrichment_sources`, JSON of field name → source).
#[derive(Debug, Clone, Default)]
pub struct DbDonorResearch {
    pub research_summary: Option<String>,
    pub interests: Option<String>,
    pub giving_capacity: Option<String>,
    pub research_sources: Option<String>,
    pub enrichment_sources: Option<String>,
}

/// Pagination bounds shared by every listing query.
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Clamp a requested page size into the allowed range.
pub fn clamp_page_size(requested: Option<u32>) -> u32 {
    match requested {
        Some(0) | None => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(10)), 10);
        assert_eq!(clamp_page_size(Some(10_000)), MAX_PAGE_SIZE);
    }

    #[test]
    fn test_donor_serializes_camel_case() {
        let donor = DbDonor {
            id: "d1".to_string(),
            organization_id: "org1".to_string(),
            name: "Ada Lovelace".to_string(),
            email: None,
            phone: None,
            whatsapp_number: None,
            donor_type: "individual".to_string(),
            status: "active".to_string(),
            city: None,
            country: None,
            assigned_staff_id: None,
            crm_external_id: Some("crm-42".to_string()),
            notes: None,
            archived: false,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
            research_summary: None,
            interests: None,
            giving_capacity: None,
            research_sources: None,
            enrichment_sources: None,
            last_enriched_at: None,
        };
        let json = serde_json::to_value(&donor).expect("serialize");
        assert_eq!(json["organizationId"], "org1");
        assert_eq!(json["crmExternalId"], "crm-42");
        assert!(json.get("research_summary").is_none());
    }
}
