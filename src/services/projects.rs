//! Project service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::DbProject;
use crate::query::{compile_aggregate, execute_compiled, AggregateSpec, Filter, FilterOp, FilterValue, GroupBy};
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub goal_amount: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// A project with its funding progress.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: DbProject,
    pub total_raised: f64,
    pub donation_count: i64,
    /// Fraction of the goal reached, when a goal is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_progress: Option<f64>,
}

pub fn create_project(state: &AppState, input: ProjectInput) -> Result<DbProject, String> {
    if input.name.trim().is_empty() {
        return Err("Project name is required".to_string());
    }
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let now = chrono::Utc::now().to_rfc3339();
    let project = DbProject {
        id: Uuid::new_v4().to_string(),
        organization_id: config.organization_id.clone(),
        name: input.name.trim().to_string(),
        description: input.description,
        status: "active".to_string(),
        goal_amount: input.goal_amount,
        start_date: input.start_date,
        end_date: input.end_date,
        archived: false,
        created_at: now.clone(),
        updated_at: now,
    };
    db.upsert_project(&project).map_err(|e| e.to_string())?;
    Ok(project)
}

/// Project plus raised totals, computed through the aggregate compiler.
pub fn get_project_detail(state: &AppState, project_id: &str) -> Result<ProjectDetail, String> {
    let config = state.get_config()?;
    let org = config.organization_id.clone();
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let project = db
        .get_project(&org, project_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Project not found: {project_id}"))?;

    let spec = AggregateSpec {
        filters: vec![Filter {
            field: "projectId".to_string(),
            op: FilterOp::Eq,
            value: FilterValue::Text(project_id.to_string()),
        }],
        group_by: GroupBy::None,
    };
    let compiled = compile_aggregate(&spec, &org).map_err(|e| e.to_string())?;
    let rows = execute_compiled(db, &compiled).map_err(|e| e.to_string())?;
    let totals = rows.first().cloned().unwrap_or_default();

    let total_raised = totals["total_amount"].as_f64().unwrap_or(0.0);
    let donation_count = totals["donation_count"].as_i64().unwrap_or(0);
    let goal_progress = project
        .goal_amount
        .filter(|goal| *goal > 0.0)
        .map(|goal| total_raised / goal);

    Ok(ProjectDetail { project, total_raised, donation_count, goal_progress })
}

pub fn list_projects(state: &AppState) -> Result<Vec<DbProject>, String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    db.list_projects(&config.organization_id).map_err(|e| e.to_string())
}

pub fn update_project_status(
    state: &AppState,
    project_id: &str,
    status: &str,
) -> Result<(), String> {
    match status {
        "active" | "completed" | "paused" => {}
        other => {
            return Err(format!(
                "Invalid project status '{other}' (expected active, completed, or paused)"
            ))
        }
    }
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;

    let mut project = db
        .get_project(&config.organization_id, project_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Project not found: {project_id}"))?;
    project.status = status.to_string();
    project.updated_at = chrono::Utc::now().to_rfc3339();
    db.upsert_project(&project).map_err(|e| e.to_string())
}

pub fn archive_project(state: &AppState, project_id: &str) -> Result<(), String> {
    let config = state.get_config()?;
    let db_guard = state.db.lock().map_err(|_| "Lock poisoned")?;
    let db = db_guard.as_ref().ok_or("Database not initialized")?;
    let changed = db
        .archive_project(&config.organization_id, project_id)
        .map_err(|e| e.to_string())?;
    if !changed {
        return Err(format!("Project not found: {project_id}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{sample_donation, sample_donor, test_db};
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
    fn test_create_and_detail_with_progress() {
        let state = test_state();
        let project = create_project(
            &state,
            ProjectInput {
                name: "Well Drilling".to_string(),
                goal_amount: Some(10_000.0),
                ..Default::default()
            },
        )
        .expect("create");

        {
            let db_guard = state.db.lock().unwrap();
            let db = db_guard.as_ref().unwrap();
            db.upsert_donor(&sample_donor("d1", "org1", "Ada")).unwrap();
            let mut donation = sample_donation("dn1", "org1", "d1", 2500.0);
            donation.project_id = Some(project.id.clone());
            db.insert_donation(&donation).unwrap();
        }

        let detail = get_project_detail(&state, &project.id).expect("detail");
        assert_eq!(detail.total_raised, 2500.0);
        assert_eq!(detail.donation_count, 1);
        assert_eq!(detail.goal_progress, Some(0.25));
    }

    #[test]
    fn test_status_transitions_validated() {
        let state = test_state();
        let project = create_project(
            &state,
            ProjectInput { name: "School Meals".to_string(), ..Default::default() },
        )
        .expect("create");

        update_project_status(&state, &project.id, "completed").expect("complete");
        assert!(update_project_status(&state, &project.id, "cancelled").is_err());

        let detail = get_project_detail(&state, &project.id).expect("detail");
        assert_eq!(detail.project.status, "completed");
    }

    #[test]
    fn test_archive_hides_from_listing() {
        let state = test_state();
        let project = create_project(
            &state,
            ProjectInput { name: "School Meals".to_string(), ..Default::default() },
        )
        .expect("create");
        archive_project(&state, &project.id).expect("archive");
        assert!(list_projects(&state).expect("list").is_empty());
    }
}
