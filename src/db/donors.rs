use super::*;

/// Candidates below this Jaro-Winkler score are not considered name matches.
const FUZZY_MATCH_THRESHOLD: f64 = 0.82;

impl DonorDb {
    // =========================================================================
    // Donors
    // =========================================================================

    /// Helper: map a row to `DbDonor`.
    pub(crate) fn map_donor_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbDonor> {
        Ok(DbDonor {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            whatsapp_number: row.get(5)?,
            donor_type: row
                .get::<_, Option<String>>(6)?
                .unwrap_or_else(|| "individual".to_string()),
            status: row
                .get::<_, Option<String>>(7)?
                .unwrap_or_else(|| "active".to_string()),
            city: row.get(8)?,
            country: row.get(9)?,
            assigned_staff_id: row.get(10)?,
            crm_external_id: row.get(11)?,
            notes: row.get(12)?,
            archived: row.get::<_, i32>(13).unwrap_or(0) != 0,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
            research_summary: row.get(16).unwrap_or(None),
            interests: row.get(17).unwrap_or(None),
            giving_capacity: row.get(18).unwrap_or(None),
            research_sources: row.get(19).unwrap_or(None),
            enrichment_sources: row.get(20).unwrap_or(None),
            last_enriched_at: row.get(21).unwrap_or(None),
        })
    }

    /// Insert or update a donor.
    pub fn upsert_donor(&self, donor: &DbDonor) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO donors (
                id, organization_id, name, email, phone, whatsapp_number,
                donor_type, status, city, country, assigned_staff_id,
                crm_external_id, notes, archived, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone,
                whatsapp_number = excluded.whatsapp_number,
                donor_type = excluded.donor_type,
                status = excluded.status,
                city = excluded.city,
                country = excluded.country,
                assigned_staff_id = excluded.assigned_staff_id,
                crm_external_id = COALESCE(excluded.crm_external_id, donors.crm_external_id),
                notes = excluded.notes,
                archived = excluded.archived,
                updated_at = excluded.updated_at",
            params![
                donor.id,
                donor.organization_id,
                donor.name,
                donor.email,
                donor.phone,
                donor.whatsapp_number,
                donor.donor_type,
                donor.status,
                donor.city,
                donor.country,
                donor.assigned_staff_id,
                donor.crm_external_id,
                donor.notes,
                donor.archived as i32,
                donor.created_at,
                donor.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get a donor by ID within an organization.
    pub fn get_donor(&self, organization_id: &str, id: &str) -> Result<Option<DbDonor>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, phone, whatsapp_number,
                    donor_type, status, city, country, assigned_staff_id,
                    crm_external_id, notes, archived, created_at, updated_at,
                    research_summary, interests, giving_capacity,
                    research_sources, enrichment_sources, last_enriched_at
             FROM donors WHERE organization_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![organization_id, id], Self::map_donor_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Find a donor by name: exact (case-insensitive) first, then substring,
    /// then Jaro-Winkler ranking over the organization's donors. Archived
    /// donors never match.
    pub fn find_donor_by_name(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<DbDonor>, DbError> {
        let needle = name.trim();
        if needle.is_empty() {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, phone, whatsapp_number,
                    donor_type, status, city, country, assigned_staff_id,
                    crm_external_id, notes, archived, created_at, updated_at,
                    research_summary, interests, giving_capacity,
                    research_sources, enrichment_sources, last_enriched_at
             FROM donors
             WHERE organization_id = ?1 AND archived = 0 AND LOWER(name) = LOWER(?2)",
        )?;
        let mut rows = stmt.query_map(params![organization_id, needle], Self::map_donor_row)?;
        if let Some(row) = rows.next() {
            return Ok(Some(row?));
        }

        let pattern = format!("%{}%", Self::escape_like(needle));
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, phone, whatsapp_number,
                    donor_type, status, city, country, assigned_staff_id,
                    crm_external_id, notes, archived, created_at, updated_at,
                    research_summary, interests, giving_capacity,
                    research_sources, enrichment_sources, last_enriched_at
             FROM donors
             WHERE organization_id = ?1 AND archived = 0
               AND name LIKE ?2 ESCAPE '\\'
             ORDER BY name LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![organization_id, pattern], Self::map_donor_row)?;
        if let Some(row) = rows.next() {
            return Ok(Some(row?));
        }

        // Fuzzy pass over candidate names
        let candidates = self.get_all_donors(organization_id)?;
        let mut best: Option<(f64, DbDonor)> = None;
        for donor in candidates {
            let score = strsim::jaro_winkler(
                &donor.name.to_lowercase(),
                &needle.to_lowercase(),
            );
            if score >= FUZZY_MATCH_THRESHOLD
                && best.as_ref().map(|(s, _)| score > *s).unwrap_or(true)
            {
                best = Some((score, donor));
            }
        }
        Ok(best.map(|(_, donor)| donor))
    }

    /// Get all non-archived donors for an organization, ordered by name.
    pub fn get_all_donors(&self, organization_id: &str) -> Result<Vec<DbDonor>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, name, email, phone, whatsapp_number,
                    donor_type, status, city, country, assigned_staff_id,
                    crm_external_id, notes, archived, created_at, updated_at,
                    research_summary, interests, giving_capacity,
                    research_sources, enrichment_sources, last_enriched_at
             FROM donors
             WHERE organization_id = ?1 AND archived = 0
             ORDER BY name",
        )?;
        let rows = stmt.query_map(params![organization_id], Self::map_donor_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Paginated donor listing with search/filter/sort. Returns the page items
    /// and the total row count for the same filter.
    pub fn list_donors(
        &self,
        organization_id: &str,
        opts: &DonorListOptions,
    ) -> Result<Page<DbDonor>, DbError> {
        let mut where_sql = String::from("organization_id = ?1 AND archived = 0");
        let mut args: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(organization_id.to_string())];

        if let Some(search) = opts.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = format!("%{}%", Self::escape_like(search.trim()));
            args.push(rusqlite::types::Value::Text(pattern.clone()));
            args.push(rusqlite::types::Value::Text(pattern));
            where_sql.push_str(&format!(
                " AND (name LIKE ?{} ESCAPE '\\' OR email LIKE ?{} ESCAPE '\\')",
                args.len() - 1,
                args.len()
            ));
        }
        if let Some(status) = opts.status.as_deref() {
            args.push(rusqlite::types::Value::Text(status.to_string()));
            where_sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(donor_type) = opts.donor_type.as_deref() {
            args.push(rusqlite::types::Value::Text(donor_type.to_string()));
            where_sql.push_str(&format!(" AND donor_type = ?{}", args.len()));
        }
        if let Some(staff_id) = opts.assigned_staff_id.as_deref() {
            args.push(rusqlite::types::Value::Text(staff_id.to_string()));
            where_sql.push_str(&format!(" AND assigned_staff_id = ?{}", args.len()));
        }

        // Sort column resolves through a whitelist; anything else is an error.
        let sort_col = match opts.sort_by.as_deref().unwrap_or("name") {
            "name" => "name",
            "createdAt" => "created_at",
            "updatedAt" => "updated_at",
            "status" => "status",
            other => {
                return Err(DbError::Sqlite(rusqlite::Error::InvalidParameterName(
                    format!("Sort field '{}' is not supported", other),
                )))
            }
        };
        let sort_dir = opts.sort_dir.unwrap_or(SortDir::Asc).as_sql();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM donors WHERE {}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let page = opts.page.unwrap_or(1).max(1);
        let page_size = clamp_page_size(opts.page_size);
        let offset = (page - 1) as i64 * page_size as i64;

        let sql = format!(
            "SELECT id, organization_id, name, email, phone, whatsapp_number,
                    donor_type, status, city, country, assigned_staff_id,
                    crm_external_id, notes, archived, created_at, updated_at,
                    research_summary, interests, giving_capacity,
                    research_sources, enrichment_sources, last_enriched_at
             FROM donors WHERE {}
             ORDER BY {} {}
             LIMIT {} OFFSET {}",
            where_sql, sort_col, sort_dir, page_size, offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::map_donor_row)?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Update a single whitelisted field on a donor.
    pub fn update_donor_field(
        &self,
        organization_id: &str,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        let sql = match field {
            "name" => "UPDATE donors SET name = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "email" => "UPDATE donors SET email = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "phone" => "UPDATE donors SET phone = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "whatsapp_number" => "UPDATE donors SET whatsapp_number = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "status" => "UPDATE donors SET status = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "donor_type" => "UPDATE donors SET donor_type = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "city" => "UPDATE donors SET city = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "country" => "UPDATE donors SET country = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "notes" => "UPDATE donors SET notes = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            "assigned_staff_id" => "UPDATE donors SET assigned_staff_id = ?1, updated_at = ?4 WHERE organization_id = ?2 AND id = ?3",
            _ => {
                return Err(DbError::Sqlite(rusqlite::Error::InvalidParameterName(
                    format!("Field '{}' is not updatable", field),
                )))
            }
        };
        self.conn
            .execute(sql, params![value, organization_id, id, now])?;
        Ok(())
    }

    /// Record the external CRM id for a donor after linking.
    pub fn set_donor_crm_external_id(
        &self,
        organization_id: &str,
        id: &str,
        external_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE donors SET crm_external_id = ?1, updated_at = ?2
             WHERE organization_id = ?3 AND id = ?4",
            params![external_id, Utc::now().to_rfc3339(), organization_id, id],
        )?;
        Ok(())
    }

    /// Persist enrichment output. Values are written verbatim; the caller
    /// resolves source priority against the current row first.
    pub fn update_donor_research(
        &self,
        organization_id: &str,
        id: &str,
        research: &DbDonorResearch,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE donors SET
                research_summary = ?1,
                interests = ?2,
                giving_capacity = ?3,
                research_sources = ?4,
                enrichment_sources = ?5,
                last_enriched_at = ?6,
                updated_at = ?6
             WHERE organization_id = ?7 AND id = ?8",
            params![
                research.research_summary,
                research.interests,
                research.giving_capacity,
                research.research_sources,
                research.enrichment_sources,
                now,
                organization_id,
                id,
            ],
        )?;
        Ok(())
    }

    /// Archive a donor (soft delete).
    pub fn archive_donor(&self, organization_id: &str, id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE donors SET archived = 1, updated_at = ?1
             WHERE organization_id = ?2 AND id = ?3",
            params![Utc::now().to_rfc3339(), organization_id, id],
        )?;
        Ok(changed > 0)
    }

    /// Escape `%` and `_` so user text can be embedded in a LIKE pattern.
    pub(crate) fn escape_like(input: &str) -> String {
        input
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_")
    }
}
