use super::*;

impl DonorDb {
    // =========================================================================
    // Staff
    // =========================================================================

    pub(crate) fn map_staff_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbStaff> {
        Ok(DbStaff {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            role: row.get(4)?,
            active: row.get::<_, i32>(5).unwrap_or(1) != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// Insert or update a staff member.
    pub fn upsert_staff(&self, staff: &DbStaff) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO staff (
                id, organization_id, name, email, role, active, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                active = excluded.active,
                updated_at = excluded.updated_at",
            params![
                staff.id,
                staff.organization_id,
                staff.name,
                staff.email,
                staff.role,
                staff.active as i32,
                staff.created_at,
                staff.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a staff member by ID within an organization.
    pub fn get_staff(&self, organization_id: &str, id: &str) -> Result<Option<DbStaff>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, role, active, created_at, updated_at
             FROM staff WHERE organization_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![organization_id, id], Self::map_staff_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List active staff for an organization, ordered by name.
    pub fn list_staff(&self, organization_id: &str) -> Result<Vec<DbStaff>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, role, active, created_at, updated_at
             FROM staff
             WHERE organization_id = ?1 AND active = 1
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![organization_id], Self::map_staff_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
