use super::*;

impl DonorDb {
    // =========================================================================
    // Organizations
    // =========================================================================

    pub(crate) fn map_organization_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<DbOrganization> {
        Ok(DbOrganization {
            id: row.get(0)?,
            name: row.get(1)?,
            country: row.get(2)?,
            currency: row
                .get::<_, Option<String>>(3)?
                .unwrap_or_else(|| "EUR".to_string()),
            created_at: row.get(4)?,
        })
    }

    /// Insert or update an organization.
    pub fn upsert_organization(&self, org: &DbOrganization) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO organizations (id, name, country, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                currency = excluded.currency",
            params![org.id, org.name, org.country, org.currency, org.created_at],
        )?;
        Ok(())
    }

    /// Get an organization by ID.
    pub fn get_organization(&self, id: &str) -> Result<Option<DbOrganization>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, country, currency, created_at
             FROM organizations WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_organization_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List all organizations, ordered by name.
    pub fn list_organizations(&self) -> Result<Vec<DbOrganization>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, country, currency, created_at
             FROM organizations ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::map_organization_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use chrono::Utc;

    fn sample_org(id: &str, name: &str) -> DbOrganization {
        DbOrganization {
            id: id.to_string(),
            name: name.to_string(),
            country: Some("DE".to_string()),
            currency: "EUR".to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_upsert_and_get_organization() {
        let db = test_db();
        db.upsert_organization(&sample_org("org1", "Wasser für Alle"))
            .expect("upsert");

        let found = db.get_organization("org1").expect("get").expect("row");
        assert_eq!(found.name, "Wasser für Alle");
        assert_eq!(found.currency, "EUR");
    }

    #[test]
    fn test_list_organizations_sorted() {
        let db = test_db();
        db.upsert_organization(&sample_org("org2", "Zukunft")).expect("upsert");
        db.upsert_organization(&sample_org("org1", "Aufbruch")).expect("upsert");

        let all = db.list_organizations().expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Aufbruch");
    }
}
