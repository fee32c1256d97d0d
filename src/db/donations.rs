use super::*;

impl DonorDb {
    // =========================================================================
    // Donations
    // =========================================================================

    /// Helper: map a row to `DbDonation`.
    pub(crate) fn map_donation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbDonation> {
        Ok(DbDonation {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            donor_id: row.get(2)?,
            project_id: row.get(3)?,
            amount: row.get(4)?,
            currency: row
                .get::<_, Option<String>>(5)?
                .unwrap_or_else(|| "EUR".to_string()),
            donation_date: row.get(6)?,
            payment_method: row.get(7)?,
            recurring: row.get::<_, i32>(8).unwrap_or(0) != 0,
            status: row
                .get::<_, Option<String>>(9)?
                .unwrap_or_else(|| "received".to_string()),
            notes: row.get(10)?,
            crm_external_id: row.get(11)?,
            recorded_by: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    /// Insert a new donation. Fails if the id already exists.
    pub fn insert_donation(&self, donation: &DbDonation) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO donations (
                id, organization_id, donor_id, project_id, amount, currency,
                donation_date, payment_method, recurring, status, notes,
                crm_external_id, recorded_by, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                donation.id,
                donation.organization_id,
                donation.donor_id,
                donation.project_id,
                donation.amount,
                donation.currency,
                donation.donation_date,
                donation.payment_method,
                donation.recurring as i32,
                donation.status,
                donation.notes,
                donation.crm_external_id,
                donation.recorded_by,
                donation.created_at,
                donation.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Update the mutable fields of a donation. The CRM external id is
    /// managed separately via `set_donation_crm_external_id`.
    pub fn update_donation(&self, donation: &DbDonation) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE donations SET
                donor_id = ?1,
                project_id = ?2,
                amount = ?3,
                currency = ?4,
                donation_date = ?5,
                payment_method = ?6,
                recurring = ?7,
                status = ?8,
                notes = ?9,
                recorded_by = ?10,
                updated_at = ?11
             WHERE organization_id = ?12 AND id = ?13",
            params![
                donation.donor_id,
                donation.project_id,
                donation.amount,
                donation.currency,
                donation.donation_date,
                donation.payment_method,
                donation.recurring as i32,
                donation.status,
                donation.notes,
                donation.recorded_by,
                Utc::now().to_rfc3339(),
                donation.organization_id,
                donation.id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Get a donation by ID within an organization.
    pub fn get_donation(
        &self,
        organization_id: &str,
        id: &str,
    ) -> Result<Option<DbDonation>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, donor_id, project_id, amount, currency,
                    donation_date, payment_method, recurring, status, notes,
                    crm_external_id, recorded_by, created_at, updated_at
             FROM donations WHERE organization_id = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query_map(params![organization_id, id], Self::map_donation_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Most recent donations for a donor, newest first.
    pub fn get_donations_for_donor(
        &self,
        organization_id: &str,
        donor_id: &str,
        limit: u32,
    ) -> Result<Vec<DbDonation>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, donor_id, project_id, amount, currency,
                    donation_date, payment_method, recurring, status, notes,
                    crm_external_id, recorded_by, created_at, updated_at
             FROM donations
             WHERE organization_id = ?1 AND donor_id = ?2
             ORDER BY donation_date DESC, created_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![organization_id, donor_id, limit],
            Self::map_donation_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Paginated org-wide donation listing with filters.
    pub fn list_donations(
        &self,
        organization_id: &str,
        opts: &DonationListOptions,
    ) -> Result<Page<DbDonation>, DbError> {
        let mut where_sql = String::from("organization_id = ?1");
        let mut args: Vec<rusqlite::types::Value> =
            vec![rusqlite::types::Value::Text(organization_id.to_string())];

        if let Some(donor_id) = opts.donor_id.as_deref() {
            args.push(rusqlite::types::Value::Text(donor_id.to_string()));
            where_sql.push_str(&format!(" AND donor_id = ?{}", args.len()));
        }
        if let Some(project_id) = opts.project_id.as_deref() {
            args.push(rusqlite::types::Value::Text(project_id.to_string()));
            where_sql.push_str(&format!(" AND project_id = ?{}", args.len()));
        }
        if let Some(status) = opts.status.as_deref() {
            args.push(rusqlite::types::Value::Text(status.to_string()));
            where_sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(from) = opts.date_from.as_deref() {
            args.push(rusqlite::types::Value::Text(from.to_string()));
            where_sql.push_str(&format!(" AND donation_date >= ?{}", args.len()));
        }
        if let Some(to) = opts.date_to.as_deref() {
            args.push(rusqlite::types::Value::Text(to.to_string()));
            where_sql.push_str(&format!(" AND donation_date <= ?{}", args.len()));
        }

        let sort_col = match opts.sort_by.as_deref().unwrap_or("donationDate") {
            "donationDate" => "donation_date",
            "amount" => "amount",
            "createdAt" => "created_at",
            other => {
                return Err(DbError::Sqlite(rusqlite::Error::InvalidParameterName(
                    format!("Sort field '{}' is not supported", other),
                )))
            }
        };
        let sort_dir = opts.sort_dir.unwrap_or(SortDir::Desc).as_sql();

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM donations WHERE {}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let page = opts.page.unwrap_or(1).max(1);
        let page_size = clamp_page_size(opts.page_size);
        let offset = (page - 1) as i64 * page_size as i64;

        let sql = format!(
            "SELECT id, organization_id, donor_id, project_id, amount, currency,
                    donation_date, payment_method, recurring, status, notes,
                    crm_external_id, recorded_by, created_at, updated_at
             FROM donations WHERE {}
             ORDER BY {} {}
             LIMIT {} OFFSET {}",
            where_sql, sort_col, sort_dir, page_size, offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter()),
            Self::map_donation_row,
        )?;
        let items = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Record the external CRM id for a donation after a successful push.
    pub fn set_donation_crm_external_id(
        &self,
        organization_id: &str,
        id: &str,
        external_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE donations SET crm_external_id = ?1, updated_at = ?2
             WHERE organization_id = ?3 AND id = ?4",
            params![external_id, Utc::now().to_rfc3339(), organization_id, id],
        )?;
        Ok(())
    }

    /// Hard-delete a donation and its pending sync row, if any.
    pub fn delete_donation(&self, organization_id: &str, id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "DELETE FROM donations WHERE organization_id = ?1 AND id = ?2",
            params![organization_id, id],
        )?;
        if changed > 0 {
            self.conn.execute(
                "DELETE FROM crm_sync_state WHERE record_type = 'donation' AND record_id = ?1",
                params![id],
            )?;
        }
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{sample_donation, sample_donor, test_db};
    use super::*;

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let db = test_db();
        let donation = sample_donation("dn1", "org1", "d1", 100.0);
        db.insert_donation(&donation).expect("first insert");
        assert!(db.insert_donation(&donation).is_err());
    }

    #[test]
    fn test_update_donation() {
        let db = test_db();
        let mut donation = sample_donation("dn1", "org1", "d1", 100.0);
        db.insert_donation(&donation).expect("insert");

        donation.amount = 180.0;
        donation.status = "refunded".to_string();
        let changed = db.update_donation(&donation).expect("update");
        assert!(changed);

        let found = db.get_donation("org1", "dn1").expect("get").expect("row");
        assert_eq!(found.amount, 180.0);
        assert_eq!(found.status, "refunded");
    }

    #[test]
    fn test_update_missing_returns_false() {
        let db = test_db();
        let donation = sample_donation("ghost", "org1", "d1", 100.0);
        let changed = db.update_donation(&donation).expect("update");
        assert!(!changed);
    }

    #[test]
    fn test_donations_for_donor_ordering_and_limit() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada"))
            .expect("donor");

        for (i, date) in ["2025-01-10", "2025-03-05", "2025-02-20"].iter().enumerate() {
            let mut donation = sample_donation(&format!("dn{}", i), "org1", "d1", 50.0);
            donation.donation_date = date.to_string();
            db.insert_donation(&donation).expect("insert");
        }

        let rows = db
            .get_donations_for_donor("org1", "d1", 2)
            .expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].donation_date, "2025-03-05");
        assert_eq!(rows[1].donation_date, "2025-02-20");
    }

    #[test]
    fn test_list_donations_date_window() {
        let db = test_db();
        for (i, date) in ["2025-01-10", "2025-02-20", "2025-03-05"].iter().enumerate() {
            let mut donation = sample_donation(&format!("dn{}", i), "org1", "d1", 50.0);
            donation.donation_date = date.to_string();
            db.insert_donation(&donation).expect("insert");
        }

        let opts = DonationListOptions {
            date_from: Some("2025-02-01".to_string()),
            date_to: Some("2025-02-28".to_string()),
            ..Default::default()
        };
        let page = db.list_donations("org1", &opts).expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].donation_date, "2025-02-20");
    }

    #[test]
    fn test_list_donations_sort_by_amount() {
        let db = test_db();
        for (i, amount) in [250.0, 50.0, 900.0].iter().enumerate() {
            db.insert_donation(&sample_donation(
                &format!("dn{}", i),
                "org1",
                "d1",
                *amount,
            ))
            .expect("insert");
        }

        let opts = DonationListOptions {
            sort_by: Some("amount".to_string()),
            sort_dir: Some(SortDir::Desc),
            ..Default::default()
        };
        let page = db.list_donations("org1", &opts).expect("list");
        assert_eq!(page.items[0].amount, 900.0);
        assert_eq!(page.items[2].amount, 50.0);
    }

    #[test]
    fn test_set_donation_crm_external_id() {
        let db = test_db();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 75.0))
            .expect("insert");
        db.set_donation_crm_external_id("org1", "dn1", "crm-dn-9")
            .expect("set");

        let found = db.get_donation("org1", "dn1").expect("get").expect("row");
        assert_eq!(found.crm_external_id, Some("crm-dn-9".to_string()));
    }

    #[test]
    fn test_delete_donation_clears_sync_row() {
        let db = test_db();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 75.0))
            .expect("insert");
        db.enqueue_sync("donation", "dn1").expect("enqueue");

        assert!(db.delete_donation("org1", "dn1").expect("delete"));
        assert!(db.get_donation("org1", "dn1").expect("get").is_none());

        let pending = db.get_due_sync_rows(10).expect("pending");
        assert!(pending.is_empty());
    }
}
