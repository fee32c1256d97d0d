use super::*;

impl DonorDb {
    // =========================================================================
    // Projects
    // =========================================================================

    pub(crate) fn map_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbProject> {
        Ok(DbProject {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            status: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "active".to_string()),
            goal_amount: row.get(5)?,
            start_date: row.get(6)?,
            end_date: row.get(7)?,
            archived: row.get::<_, i32>(8).unwrap_or(0) != 0,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Insert or update a project.
    pub fn upsert_project(&self, project: &DbProject) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO projects (
                id, organization_id, name, description, status, goal_amount,
                start_date, end_date, archived, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                status = excluded.status,
                goal_amount = excluded.goal_amount,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                archived = excluded.archived,
                updated_at = excluded.updated_at",
            params![
                project.id,
                project.organization_id,
                project.name,
                project.description,
                project.status,
                project.goal_amount,
                project.start_date,
                project.end_date,
                project.archived as i32,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a project by ID within an organization.
    pub fn get_project(
        &self,
        organization_id: &str,
        id: &str,
    ) -> Result<Option<DbProject>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, description, status, goal_amount,
                    start_date, end_date, archived, created_at, updated_at
             FROM projects WHERE organization_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![organization_id, id], Self::map_project_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List non-archived projects for an organization, active first.
    pub fn list_projects(&self, organization_id: &str) -> Result<Vec<DbProject>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, description, status, goal_amount,
                    start_date, end_date, archived, created_at, updated_at
             FROM projects
             WHERE organization_id = ?1 AND archived = 0
             ORDER BY CASE status WHEN 'active' THEN 0 ELSE 1 END, name",
        )?;
        let rows = stmt.query_map(params![organization_id], Self::map_project_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Archive a project (soft delete).
    pub fn archive_project(&self, organization_id: &str, id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE projects SET archived = 1, updated_at = ?1
             WHERE organization_id = ?2 AND id = ?3",
            params![Utc::now().to_rfc3339(), organization_id, id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use chrono::Utc;

    fn sample_project(id: &str, org: &str, name: &str) -> DbProject {
        let now = Utc::now().to_rfc3339();
        DbProject {
            id: id.to_string(),
            organization_id: org.to_string(),
            name: name.to_string(),
            description: None,
            status: "active".to_string(),
            goal_amount: Some(10_000.0),
            start_date: Some("2025-01-01".to_string()),
            end_date: None,
            archived: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn test_upsert_and_get_project() {
        let db = test_db();
        db.upsert_project(&sample_project("p1", "org1", "Clean Water"))
            .expect("upsert");

        let found = db.get_project("org1", "p1").expect("get").expect("row");
        assert_eq!(found.name, "Clean Water");
        assert_eq!(found.goal_amount, Some(10_000.0));
    }

    #[test]
    fn test_list_projects_active_first() {
        let db = test_db();
        let mut done = sample_project("p1", "org1", "Archive School");
        done.status = "completed".to_string();
        db.upsert_project(&done).expect("upsert");
        db.upsert_project(&sample_project("p2", "org1", "Wells"))
            .expect("upsert");

        let all = db.list_projects("org1").expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "p2", "active project sorts before completed");
    }

    #[test]
    fn test_archive_project_hides_from_list() {
        let db = test_db();
        db.upsert_project(&sample_project("p1", "org1", "Wells"))
            .expect("upsert");
        assert!(db.archive_project("org1", "p1").expect("archive"));

        let all = db.list_projects("org1").expect("list");
        assert!(all.is_empty());
        assert!(db.get_project("org1", "p1").expect("get").is_some());
    }
}
