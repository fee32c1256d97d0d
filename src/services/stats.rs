//! Aggregate statistics, computed through the same plan compiler the
//! WhatsApp structured engine uses.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::db::{DonorDb, DonorStats, ProjectBreakdown};
use crate::query::{
    compile_aggregate, compile_query, execute_compiled, AggregateSpec, Filter, FilterOp,
    FilterValue, GroupBy, QueryKind, QueryRequest, SortDirection, SortSpec,
};
use crate::state::AppState;

/// Organization-level dashboard numbers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgDashboard {
    pub donor_count: i64,
    pub active_donor_count: i64,
    pub total_donated: f64,
    pub donation_count: i64,
    /// Donation totals per month, oldest first.
    pub by_month: Vec<MonthTotal>,
    /// Projects ranked by amount raised.
    pub top_projects: Vec<ProjectBreakdown>,
    /// Donors ranked by lifetime giving.
    pub top_donors: Vec<DonorTotal>,
    /// Most recent donations, newest first.
    pub recent_donations: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorTotal {
    pub donor_id: String,
    pub donor_name: String,
    pub total_amount: f64,
    pub donation_count: i64,
}

const TOP_DONOR_COUNT: usize = 5;
const RECENT_DONATION_COUNT: u32 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthTotal {
    /// YYYY-MM.
    pub month: String,
    pub total_amount: f64,
    pub donation_count: i64,
}

/// Lifetime giving stats for one donor.
pub fn donor_stats(state: &AppState, donor_id: &str) -> Result<DonorStats, String> {
    let config = state.get_config()?;
    let org = config.organization_id.clone();
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    db.get_donor(&org, donor_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Donor not found: {donor_id}"))?;
    donor_stats_for(db, &org, donor_id)
}

/// Same as `donor_stats` but against an already-borrowed database handle,
/// for callers (email context, WhatsApp) that hold one.
pub fn donor_stats_for(
    db: &DonorDb,
    organization_id: &str,
    donor_id: &str,
) -> Result<DonorStats, String> {
    let donor_filter = Filter {
        field: "donorId".to_string(),
        op: FilterOp::Eq,
        value: FilterValue::Text(donor_id.to_string()),
    };

    let totals_spec = AggregateSpec {
        filters: vec![donor_filter.clone()],
        group_by: GroupBy::None,
    };
    let compiled = compile_aggregate(&totals_spec, organization_id).map_err(|e| e.to_string())?;
    let totals = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .unwrap_or_default();

    let by_project_spec = AggregateSpec {
        filters: vec![donor_filter],
        group_by: GroupBy::Project,
    };
    let compiled = compile_aggregate(&by_project_spec, organization_id).map_err(|e| e.to_string())?;
    let by_project = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|row| ProjectBreakdown {
            project_id: row["group_id"].as_str().map(|s| s.to_string()),
            project_name: row["label"].as_str().unwrap_or("Unassigned").to_string(),
            total_amount: row["total_amount"].as_f64().unwrap_or(0.0),
            donation_count: row["donation_count"].as_i64().unwrap_or(0),
        })
        .collect();

    let donation_count = totals["donation_count"].as_i64().unwrap_or(0);
    Ok(DonorStats {
        total_amount: totals["total_amount"].as_f64().unwrap_or(0.0),
        donation_count,
        average_amount: if donation_count > 0 {
            totals["average_amount"].as_f64()
        } else {
            None
        },
        first_donation_at: opt_string(&totals["first_donation_at"]),
        last_donation_at: opt_string(&totals["last_donation_at"]),
        by_project,
    })
}

pub fn org_dashboard(state: &AppState) -> Result<OrgDashboard, String> {
    let config = state.get_config()?;
    let org = config.organization_id.clone();
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let donors = db.get_all_donors(&org).map_err(|e| e.to_string())?;
    let donor_count = donors.len() as i64;
    let active_donor_count = donors.iter().filter(|d| d.status == "active").count() as i64;

    let totals_spec = AggregateSpec { filters: vec![], group_by: GroupBy::None };
    let compiled = compile_aggregate(&totals_spec, &org).map_err(|e| e.to_string())?;
    let totals = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .next()
        .unwrap_or_default();

    let month_spec = AggregateSpec { filters: vec![], group_by: GroupBy::Month };
    let compiled = compile_aggregate(&month_spec, &org).map_err(|e| e.to_string())?;
    let by_month = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|row| MonthTotal {
            month: row["label"].as_str().unwrap_or("").to_string(),
            total_amount: row["total_amount"].as_f64().unwrap_or(0.0),
            donation_count: row["donation_count"].as_i64().unwrap_or(0),
        })
        .collect();

    let project_spec = AggregateSpec { filters: vec![], group_by: GroupBy::Project };
    let compiled = compile_aggregate(&project_spec, &org).map_err(|e| e.to_string())?;
    let top_projects = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .map(|row| ProjectBreakdown {
            project_id: row["group_id"].as_str().map(|s| s.to_string()),
            project_name: row["label"].as_str().unwrap_or("Unassigned").to_string(),
            total_amount: row["total_amount"].as_f64().unwrap_or(0.0),
            donation_count: row["donation_count"].as_i64().unwrap_or(0),
        })
        .collect();

    let donor_spec = AggregateSpec { filters: vec![], group_by: GroupBy::Donor };
    let compiled = compile_aggregate(&donor_spec, &org).map_err(|e| e.to_string())?;
    let top_donors = execute_compiled(db, &compiled)
        .map_err(|e| e.to_string())?
        .into_iter()
        .take(TOP_DONOR_COUNT)
        .map(|row| DonorTotal {
            donor_id: row["group_id"].as_str().unwrap_or("").to_string(),
            donor_name: row["label"].as_str().unwrap_or("").to_string(),
            total_amount: row["total_amount"].as_f64().unwrap_or(0.0),
            donation_count: row["donation_count"].as_i64().unwrap_or(0),
        })
        .collect();

    let recent_request = QueryRequest {
        kind: QueryKind::Donations,
        filters: vec![],
        sort: Some(SortSpec {
            field: "donationDate".to_string(),
            direction: SortDirection::Desc,
        }),
        limit: Some(RECENT_DONATION_COUNT),
        offset: None,
    };
    let compiled = compile_query(&recent_request, &org).map_err(|e| e.to_string())?;
    let recent_donations = execute_compiled(db, &compiled).map_err(|e| e.to_string())?;

    Ok(OrgDashboard {
        donor_count,
        active_donor_count,
        total_donated: totals["total_amount"].as_f64().unwrap_or(0.0),
        donation_count: totals["donation_count"].as_i64().unwrap_or(0),
        by_month,
        top_projects,
        top_donors,
        recent_donations,
    })
}

fn opt_string(value: &JsonValue) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_donation, sample_donor, test_db};
    use crate::db::DbProject;
    use crate::types::Config;

    fn test_state() -> AppState {
        let state = AppState::new();
        *state.config.lock().unwrap() = Some(Config {
            organization_id: "org1".to_string(),
            ..Default::default()
        });
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.upsert_donor(&sample_donor("d2", "org1", "Grace Hopper")).unwrap();

        let now = chrono::Utc::now().to_rfc3339();
        db.upsert_project(&DbProject {
            id: "p1".to_string(),
            organization_id: "org1".to_string(),
            name: "Well Drilling".to_string(),
            description: None,
            status: "active".to_string(),
            goal_amount: Some(10_000.0),
            start_date: None,
            end_date: None,
            archived: false,
            created_at: now.clone(),
            updated_at: now,
        })
        .unwrap();

        let mut dn1 = sample_donation("dn1", "org1", "d1", 500.0);
        dn1.project_id = Some("p1".to_string());
        dn1.donation_date = "2025-01-10".to_string();
        db.insert_donation(&dn1).unwrap();

        let mut dn2 = sample_donation("dn2", "org1", "d1", 300.0);
        dn2.donation_date = "2025-02-05".to_string();
        db.insert_donation(&dn2).unwrap();

        let mut dn3 = sample_donation("dn3", "org1", "d2", 50.0);
        dn3.donation_date = "2025-02-20".to_string();
        db.insert_donation(&dn3).unwrap();

        *state.db.lock().unwrap() = Some(db);
        state
    }

    #[test]
    fn test_donor_stats_totals_and_breakdown() {
        let state = test_state();
        let stats = donor_stats(&state, "d1").expect("stats");
        assert_eq!(stats.total_amount, 800.0);
        assert_eq!(stats.donation_count, 2);
        assert_eq!(stats.average_amount, Some(400.0));
        assert_eq!(stats.first_donation_at.as_deref(), Some("2025-01-10"));
        assert_eq!(stats.last_donation_at.as_deref(), Some("2025-02-05"));

        assert_eq!(stats.by_project.len(), 2);
        assert_eq!(stats.by_project[0].project_name, "Well Drilling");
        assert_eq!(stats.by_project[0].total_amount, 500.0);
        assert_eq!(stats.by_project[1].project_name, "Unassigned");
    }

    #[test]
    fn test_donor_stats_empty_donor() {
        let state = test_state();
        let stats = donor_stats(&state, "d2").expect("stats");
        assert_eq!(stats.donation_count, 1);

        assert!(donor_stats(&state, "nope").is_err());
    }

    #[test]
    fn test_org_dashboard() {
        let state = test_state();
        let dashboard = org_dashboard(&state).expect("dashboard");
        assert_eq!(dashboard.donor_count, 2);
        assert_eq!(dashboard.active_donor_count, 2);
        assert_eq!(dashboard.total_donated, 850.0);
        assert_eq!(dashboard.donation_count, 3);

        assert_eq!(dashboard.by_month.len(), 2);
        assert_eq!(dashboard.by_month[0].month, "2025-01");
        assert_eq!(dashboard.by_month[1].total_amount, 350.0);

        assert_eq!(dashboard.top_projects[0].project_name, "Well Drilling");

        assert_eq!(dashboard.top_donors.len(), 2);
        assert_eq!(dashboard.top_donors[0].donor_name, "Ada Lovelace");
        assert_eq!(dashboard.top_donors[0].total_amount, 800.0);

        assert_eq!(dashboard.recent_donations.len(), 3);
        assert_eq!(dashboard.recent_donations[0]["donation_date"], "2025-02-20");
        assert_eq!(dashboard.recent_donations[0]["donor_name"], "Grace Hopper");
    }
}
