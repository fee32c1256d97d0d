//! HTTP client for the upstream CRM's REST API.
//!
//! Wire types are private; callers hand in database rows and get back
//! external ids. Errors distinguish retryable conditions (transport,
//! throttling, 5xx) from permanent ones so the sync queue can back off or
//! give up accordingly.

use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DbDonation, DbDonor};
use crate::types::CrmConfig;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("CRM request failed: {0}")]
    Transport(String),

    #[error("CRM returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("CRM sync is not configured")]
    NotConfigured,
}

impl CrmError {
    /// Whether a retry might succeed. Client errors other than 429 are
    /// permanent: the payload itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrmError::Transport(_) => true,
            CrmError::Api { status, .. } => *status == 429 || *status >= 500,
            CrmError::NotConfigured => false,
        }
    }
}

pub struct CrmClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CrmClient {
    /// Build a client from config. Fails with `NotConfigured` when sync is
    /// disabled or the API key is missing from the environment.
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        if !config.enabled || config.api_base_url.trim().is_empty() {
            return Err(CrmError::NotConfigured);
        }
        let api_key = config.api_key().ok_or(CrmError::NotConfigured)?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CrmError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Push a new donation; returns the CRM's id for the created record.
    pub async fn create_donation(
        &self,
        donation: &DbDonation,
        donor_external_id: &str,
    ) -> Result<String, CrmError> {
        let url = format!("{}/donations", self.base_url);
        let payload = DonationPayload::from_row(donation, donor_external_id);
        debug!("CRM create donation {} -> {url}", donation.id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CrmError::Transport(e.to_string()))?;
        let response = check_status(response).await?;

        let created: DonationResponse = response
            .json()
            .await
            .map_err(|e| CrmError::Transport(format!("failed to parse response: {e}")))?;
        Ok(created.id)
    }

    /// Push changes to a donation the CRM already knows about.
    pub async fn update_donation(
        &self,
        external_id: &str,
        donation: &DbDonation,
        donor_external_id: &str,
    ) -> Result<(), CrmError> {
        let url = format!("{}/donations/{external_id}", self.base_url);
        let payload = DonationPayload::from_row(donation, donor_external_id);
        debug!("CRM update donation {} -> {url}", donation.id);

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CrmError::Transport(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    /// Fetch a donor by external id; `None` when the CRM has no such record.
    pub async fn get_donor(&self, external_id: &str) -> Result<Option<CrmDonor>, CrmError> {
        let url = format!("{}/donors/{external_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CrmError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let donor: CrmDonor = response
            .json()
            .await
            .map_err(|e| CrmError::Transport(format!("failed to parse response: {e}")))?;
        Ok(Some(donor))
    }
}

/// Donor record as the CRM reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmDonor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl CrmDonor {
    /// Whether the CRM record still matches our local donor closely enough
    /// to push donations against it.
    pub fn matches(&self, donor: &DbDonor) -> bool {
        self.name.eq_ignore_ascii_case(&donor.name)
            || (self.email.is_some() && self.email == donor.email)
    }
}

// ---------------------------------------------------------------------------
// Private wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DonationPayload {
    donor_id: String,
    amount: f64,
    currency: String,
    donation_date: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_method: Option<String>,
    recurring: bool,
    /// Our id, so support staff can trace a CRM record back here.
    external_reference: String,
}

impl DonationPayload {
    fn from_row(donation: &DbDonation, donor_external_id: &str) -> Self {
        Self {
            donor_id: donor_external_id.to_string(),
            amount: donation.amount,
            currency: donation.currency.clone(),
            donation_date: donation.donation_date.clone(),
            status: donation.status.clone(),
            payment_method: donation.payment_method.clone(),
            recurring: donation.recurring,
            external_reference: donation.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DonationResponse {
    id: String,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CrmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    Err(CrmError::Api {
        status: status.as_u16(),
        message: message.chars().take(500).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(CrmError::Transport("timeout".to_string()).is_retryable());
        assert!(CrmError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(CrmError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!CrmError::Api { status: 404, message: String::new() }.is_retryable());
        assert!(!CrmError::Api { status: 422, message: String::new() }.is_retryable());
        assert!(!CrmError::NotConfigured.is_retryable());
    }

    #[test]
    fn test_payload_carries_external_ids() {
        let donation = crate::db::DbDonation {
            id: "dn1".to_string(),
            organization_id: "org1".to_string(),
            donor_id: "d1".to_string(),
            project_id: None,
            amount: 250.0,
            currency: "EUR".to_string(),
            donation_date: "2025-03-15".to_string(),
            payment_method: None,
            recurring: false,
            status: "received".to_string(),
            notes: None,
            crm_external_id: None,
            recorded_by: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let payload = DonationPayload::from_row(&donation, "crm-77");
        let json = serde_json::to_string(&payload).expect("serialize");
        assert!(json.contains(r#""donorId":"crm-77""#));
        assert!(json.contains(r#""externalReference":"dn1""#));
        assert!(!json.contains("paymentMethod"));
    }

    #[test]
    fn test_crm_donor_matching() {
        let local = crate::db::test_utils::sample_donor("d1", "org1", "Ada Lovelace");
        let remote = CrmDonor {
            id: "crm-77".to_string(),
            name: "ada lovelace".to_string(),
            email: None,
        };
        assert!(remote.matches(&local));

        let mismatch = CrmDonor {
            id: "crm-78".to_string(),
            name: "Someone Else".to_string(),
            email: None,
        };
        assert!(!mismatch.matches(&local));
    }
}
