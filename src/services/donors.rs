//! Donor service: create, read, list, update, archive.

use serde::Deserialize;
use uuid::Uuid;

use crate::db::{DbDonor, DonorListOptions, Page};
use crate::state::AppState;

/// Fields accepted when creating a donor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    /// "individual", "organization", or "foundation". Defaults to individual.
    #[serde(default)]
    pub donor_type: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub assigned_staff_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn create_donor(state: &AppState, input: DonorInput) -> Result<DbDonor, String> {
    if input.name.trim().is_empty() {
        return Err("Donor name is required".to_string());
    }
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let now = chrono::Utc::now().to_rfc3339();
    let donor = DbDonor {
        id: Uuid::new_v4().to_string(),
        organization_id: config.organization_id.clone(),
        name: input.name.trim().to_string(),
        email: input.email,
        phone: input.phone,
        whatsapp_number: input.whatsapp_number,
        donor_type: input.donor_type.unwrap_or_else(|| "individual".to_string()),
        status: "active".to_string(),
        city: input.city,
        country: input.country,
        assigned_staff_id: input.assigned_staff_id,
        crm_external_id: None,
        notes: input.notes,
        archived: false,
        created_at: now.clone(),
        updated_at: now,
        research_summary: None,
        interests: None,
        giving_capacity: None,
        research_sources: None,
        enrichment_sources: None,
        last_enriched_at: None,
    };
    db.upsert_donor(&donor).map_err(|e| e.to_string())?;
    Ok(donor)
}

pub fn get_donor(state: &AppState, donor_id: &str) -> Result<DbDonor, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.get_donor(&config.organization_id, donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {donor_id}"))
}

pub fn list_donors(
    state: &AppState,
    options: DonorListOptions,
) -> Result<Page<DbDonor>, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.list_donors(&config.organization_id, &options)
        .map_err(|e| e.to_string())
}

/// Find a donor by name: exact, then substring, then fuzzy.
pub fn find_donor(state: &AppState, name: &str) -> Result<Option<DbDonor>, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.find_donor_by_name(&config.organization_id, name)
        .map_err(|e| e.to_string())
}

pub fn update_donor_field(
    state: &AppState,
    donor_id: &str,
    field: &str,
    value: &str,
) -> Result<(), String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.get_donor(&config.organization_id, donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {donor_id}"))?;
    db.update_donor_field(&config.organization_id, donor_id, field, value)
        .map_err(|e| e.to_string())
}

/// Link a donor to its CRM record so donation sync can attribute pushes.
pub fn link_donor_to_crm(
    state: &AppState,
    donor_id: &str,
    external_id: &str,
) -> Result<(), String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.set_donor_crm_external_id(&config.organization_id, donor_id, external_id)
        .map_err(|e| e.to_string())
}

pub fn archive_donor(state: &AppState, donor_id: &str) -> Result<(), String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    let changed = db
        .archive_donor(&config.organization_id, donor_id)
        .map_err(|e| e.to_string())?;
    if !changed {
        return Err(format!("Donor not found: {donor_id}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::types::Config;

    fn test_state() -> AppState {
        let state = AppState::new();
        *state.config.lock().unwrap() = Some(Config {
            organization_id: "org1".to_string(),
            ..Default::default()
        });
        *state.db.lock().unwrap() = Some(test_db());
        state
    }

    #[test]
    fn test_create_and_get_donor() {
        let state = test_state();
        let donor = create_donor(
            &state,
            DonorInput {
                name: "  Ada Lovelace ".to_string(),
                email: Some("ada@example.org".to_string()),
                ..Default::default()
            },
        )
        .expect("create");
        assert_eq!(donor.name, "Ada Lovelace");
        assert_eq!(donor.status, "active");
        assert_eq!(donor.donor_type, "individual");

        let found = get_donor(&state, &donor.id).expect("get");
        assert_eq!(found.email.as_deref(), Some("ada@example.org"));
    }

    #[test]
    fn test_create_requires_name() {
        let state = test_state();
        assert!(create_donor(&state, DonorInput::default()).is_err());
    }

    #[test]
    fn test_update_field_requires_existing_donor() {
        let state = test_state();
        assert!(update_donor_field(&state, "nope", "status", "lapsed").is_err());
    }

    #[test]
    fn test_archive_hides_from_listing() {
        let state = test_state();
        let donor = create_donor(
            &state,
            DonorInput { name: "Grace Hopper".to_string(), ..Default::default() },
        )
        .expect("create");

        archive_donor(&state, &donor.id).expect("archive");
        let page = list_donors(&state, DonorListOptions::default()).expect("list");
        assert_eq!(page.total, 0);
    }
}
