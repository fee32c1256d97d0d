//! Donation service.
//!
//! Creating or updating a donation also queues it for CRM push (when the
//! donor is linked) and wakes the sync poller so the push happens promptly.

use log::debug;
use serde::Deserialize;
use uuid::Uuid;

use crate::crm::sync::enqueue_donation;
use crate::db::{DbDonation, DonationListOptions, Page};
use crate::state::AppState;

/// Fields accepted when recording a donation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationInput {
    pub donor_id: String,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    /// YYYY-MM-DD; defaults to today.
    #[serde(default)]
    pub donation_date: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub recurring: bool,
    /// "pledged", "received", or "refunded". Defaults to received.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub recorded_by: Option<String>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationUpdate {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub donation_date: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub recurring: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn record_donation(state: &AppState, input: DonationInput) -> Result<DbDonation, String> {
    if input.amount <= 0.0 {
        return Err("Donation amount must be positive".to_string());
    }
    if let Some(status) = &input.status {
        validate_status(status)?;
    }

    let config = state.get_config()?;
    let org = config.organization_id.clone();
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    db.get_donor(&org, &input.donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {}", input.donor_id))?;
    if let Some(project_id) = &input.project_id {
        db.get_project(&org, project_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Project not found: {project_id}"))?;
    }

    let now = chrono::Utc::now();
    let donation = DbDonation {
        id: Uuid::new_v4().to_string(),
        organization_id: org.clone(),
        donor_id: input.donor_id,
        project_id: input.project_id,
        amount: input.amount,
        currency: input.currency.unwrap_or_else(|| "EUR".to_string()),
        donation_date: input
            .donation_date
            .unwrap_or_else(|| now.format("%Y-%m-%d").to_string()),
        payment_method: input.payment_method,
        recurring: input.recurring,
        status: input.status.unwrap_or_else(|| "received".to_string()),
        notes: input.notes,
        crm_external_id: None,
        recorded_by: input.recorded_by,
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    };
    db.insert_donation(&donation).map_err(|e| e.to_string())?;

    queue_crm_push(state, db, &org, &donation.id);
    Ok(donation)
}

pub fn update_donation(
    state: &AppState,
    donation_id: &str,
    update: DonationUpdate,
) -> Result<DbDonation, String> {
    if let Some(amount) = update.amount {
        if amount <= 0.0 {
            return Err("Donation amount must be positive".to_string());
        }
    }
    if let Some(status) = &update.status {
        validate_status(status)?;
    }

    let config = state.get_config()?;
    let org = config.organization_id.clone();
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let mut donation = db
        .get_donation(&org, donation_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donation not found: {donation_id}"))?;

    if let Some(amount) = update.amount {
        donation.amount = amount;
    }
    if let Some(date) = update.donation_date {
        donation.donation_date = date;
    }
    if let Some(project_id) = update.project_id {
        db.get_project(&org, &project_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("Project not found: {project_id}"))?;
        donation.project_id = Some(project_id);
    }
    if let Some(method) = update.payment_method {
        donation.payment_method = Some(method);
    }
    if let Some(recurring) = update.recurring {
        donation.recurring = recurring;
    }
    if let Some(status) = update.status {
        donation.status = status;
    }
    if let Some(notes) = update.notes {
        donation.notes = Some(notes);
    }
    donation.updated_at = chrono::Utc::now().to_rfc3339();
    db.update_donation(&donation).map_err(|e| e.to_string())?;

    queue_crm_push(state, db, &org, donation_id);
    Ok(donation)
}

pub fn get_donation(state: &AppState, donation_id: &str) -> Result<DbDonation, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.get_donation(&config.organization_id, donation_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donation not found: {donation_id}"))
}

pub fn list_donations(
    state: &AppState,
    options: DonationListOptions,
) -> Result<Page<DbDonation>, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.list_donations(&config.organization_id, &options)
        .map_err(|e| e.to_string())
}

pub fn delete_donation(state: &AppState, donation_id: &str) -> Result<(), String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    let deleted = db
        .delete_donation(&config.organization_id, donation_id)
        .map_err(|e| e.to_string())?;
    if !deleted {
        return Err(format!("Donation not found: {donation_id}"));
    }
    Ok(())
}

fn validate_status(status: &str) -> Result<(), String> {
    match status {
        "pledged" | "received" | "refunded" => Ok(()),
        other => Err(format!(
            "Invalid donation status '{other}' (expected pledged, received, or refunded)"
        )),
    }
}

/// Queue a CRM push for the donation and wake the poller. Queue failures
/// are logged, not surfaced: the donation itself was saved.
fn queue_crm_push(state: &AppState, db: &crate::db::DonorDb, org: &str, donation_id: &str) {
    match enqueue_donation(db, org, donation_id) {
        Ok(true) => state.sync_wake.notify_one(),
        Ok(false) => {}
        Err(e) => debug!("Could not queue CRM push for {donation_id}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_donor, test_db};
    use crate::types::Config;

    fn test_state() -> AppState {
        let state = AppState::new();
        *state.config.lock().unwrap() = Some(Config {
            organization_id: "org1".to_string(),
            ..Default::default()
        });
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        *state.db.lock().unwrap() = Some(db);
        state
    }

    fn input(amount: f64) -> DonationInput {
        DonationInput {
            donor_id: "d1".to_string(),
            amount,
            currency: None,
            donation_date: None,
            project_id: None,
            payment_method: None,
            recurring: false,
            status: None,
            notes: None,
            recorded_by: None,
        }
    }

    #[test]
    fn test_record_donation_defaults() {
        let state = test_state();
        let donation = record_donation(&state, input(250.0)).expect("record");
        assert_eq!(donation.currency, "EUR");
        assert_eq!(donation.status, "received");
        assert_eq!(donation.donation_date.len(), 10);
    }

    #[test]
    fn test_record_rejects_bad_amount_and_status() {
        let state = test_state();
        assert!(record_donation(&state, input(0.0)).is_err());
        assert!(record_donation(&state, input(-5.0)).is_err());

        let mut bad = input(10.0);
        bad.status = Some("cancelled".to_string());
        assert!(record_donation(&state, bad).is_err());
    }

    #[test]
    fn test_record_requires_known_donor() {
        let state = test_state();
        let mut orphan = input(10.0);
        orphan.donor_id = "nope".to_string();
        assert!(record_donation(&state, orphan).is_err());
    }

    #[test]
    fn test_unlinked_donor_does_not_queue_sync() {
        let state = test_state();
        record_donation(&state, input(100.0)).expect("record");
        let db_guard = state.db.lock().unwrap();
        let db = db_guard.as_ref().unwrap();
        assert!(db.get_due_sync_rows(10).unwrap().is_empty());
    }

    #[test]
    fn test_linked_donor_queues_sync_on_create_and_update() {
        let state = test_state();
        {
            let db_guard = state.db.lock().unwrap();
            db_guard.as_ref().unwrap().set_donor_crm_external_id("org1", "d1", "crm-77").unwrap();
        }
        let donation = record_donation(&state, input(100.0)).expect("record");
        {
            let db_guard = state.db.lock().unwrap();
            let due = db_guard.as_ref().unwrap().get_due_sync_rows(10).unwrap();
            assert_eq!(due.len(), 1);
        }

        let updated = update_donation(
            &state,
            &donation.id,
            DonationUpdate { amount: Some(150.0), ..Default::default() },
        )
        .expect("update");
        assert_eq!(updated.amount, 150.0);
    }

    #[test]
    fn test_delete_donation() {
        let state = test_state();
        let donation = record_donation(&state, input(100.0)).expect("record");
        delete_donation(&state, &donation.id).expect("delete");
        assert!(get_donation(&state, &donation.id).is_err());
        assert!(delete_donation(&state, &donation.id).is_err());
    }
}
