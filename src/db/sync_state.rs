use uuid::Uuid;

use super::*;

impl DonorDb {
    // =========================================================================
    // CRM sync queue
    // =========================================================================

    pub(crate) fn map_sync_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbCrmSyncState> {
        Ok(DbCrmSyncState {
            id: row.get(0)?,
            record_type: row.get(1)?,
            record_id: row.get(2)?,
            state: row.get(3)?,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            next_attempt_at: row.get(6)?,
            last_attempt_at: row.get(7)?,
            last_error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Enqueue a record for CRM push. Re-enqueuing an already-pending record
    /// collapses into the existing row (unique on record_type + record_id);
    /// a previously synced or failed record is reset to pending.
    pub fn enqueue_sync(&self, record_type: &str, record_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crm_sync_state (
                id, record_type, record_id, state, attempts, next_attempt_at,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4, ?4)
             ON CONFLICT(record_type, record_id) DO UPDATE SET
                state = 'pending',
                attempts = 0,
                next_attempt_at = excluded.next_attempt_at,
                last_error = NULL,
                updated_at = excluded.updated_at",
            params![Uuid::new_v4().to_string(), record_type, record_id, now],
        )?;
        Ok(())
    }

    /// Pending rows whose `next_attempt_at` has passed, oldest first.
    pub fn get_due_sync_rows(&self, limit: u32) -> Result<Vec<DbCrmSyncState>, DbError> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self.conn.prepare(
            "SELECT id, record_type, record_id, state, attempts, max_attempts,
                    next_attempt_at, last_attempt_at, last_error, created_at, updated_at
             FROM crm_sync_state
             WHERE state = 'pending'
               AND attempts < max_attempts
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
             ORDER BY created_at ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now, limit], Self::map_sync_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark a queue row as synced.
    pub fn mark_sync_synced(&self, id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE crm_sync_state
             SET state = 'synced', last_attempt_at = ?1, last_error = NULL, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    /// Record a failed attempt. With `next_attempt_at` set the row stays
    /// pending for retry; without it (or once attempts run out) the row is
    /// marked failed.
    pub fn mark_sync_failed(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE crm_sync_state
             SET attempts = attempts + 1,
                 state = CASE
                     WHEN ?1 IS NULL OR attempts + 1 >= max_attempts THEN 'failed'
                     ELSE 'pending'
                 END,
                 next_attempt_at = ?1,
                 last_attempt_at = ?2,
                 last_error = ?3,
                 updated_at = ?2
             WHERE id = ?4",
            params![next_attempt_at, now, error, id],
        )?;
        Ok(())
    }

    /// Queue counts by state, for the CLI status view.
    pub fn sync_queue_counts(&self) -> Result<Vec<(String, i64)>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT state, COUNT(*) FROM crm_sync_state GROUP BY state ORDER BY state",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use chrono::{Duration, Utc};

    #[test]
    fn test_enqueue_is_deduplicated() {
        let db = test_db();
        db.enqueue_sync("donation", "dn1").expect("enqueue");
        db.enqueue_sync("donation", "dn1").expect("re-enqueue");

        let due = db.get_due_sync_rows(10).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].record_id, "dn1");
        assert_eq!(due[0].attempts, 0);
    }

    #[test]
    fn test_failed_with_backoff_stays_pending_until_due() {
        let db = test_db();
        db.enqueue_sync("donation", "dn1").expect("enqueue");
        let row = &db.get_due_sync_rows(10).expect("due")[0];

        let later = (Utc::now() + Duration::minutes(5)).to_rfc3339();
        db.mark_sync_failed(&row.id, "CRM 503", Some(&later))
            .expect("fail");

        // Not due yet
        assert!(db.get_due_sync_rows(10).expect("due").is_empty());

        let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
        db.mark_sync_failed(&row.id, "CRM 503", Some(&past))
            .expect("fail again");
        let due = db.get_due_sync_rows(10).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempts, 2);
    }

    #[test]
    fn test_permanent_failure_leaves_queue() {
        let db = test_db();
        db.enqueue_sync("donation", "dn1").expect("enqueue");
        let row = &db.get_due_sync_rows(10).expect("due")[0];

        db.mark_sync_failed(&row.id, "CRM 404: unknown donor", None)
            .expect("fail");
        assert!(db.get_due_sync_rows(10).expect("due").is_empty());

        let counts = db.sync_queue_counts().expect("counts");
        assert_eq!(counts, vec![("failed".to_string(), 1)]);
    }

    #[test]
    fn test_attempts_cap_marks_failed() {
        let db = test_db();
        db.enqueue_sync("donation", "dn1").expect("enqueue");
        let id = db.get_due_sync_rows(10).expect("due")[0].id.clone();

        let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
        for _ in 0..5 {
            db.mark_sync_failed(&id, "CRM 503", Some(&past)).expect("fail");
        }
        // attempts reached max_attempts (5) — no longer due
        assert!(db.get_due_sync_rows(10).expect("due").is_empty());
        let counts = db.sync_queue_counts().expect("counts");
        assert_eq!(counts, vec![("failed".to_string(), 1)]);
    }

    #[test]
    fn test_mark_synced() {
        let db = test_db();
        db.enqueue_sync("donation", "dn1").expect("enqueue");
        let id = db.get_due_sync_rows(10).expect("due")[0].id.clone();

        db.mark_sync_synced(&id).expect("synced");
        assert!(db.get_due_sync_rows(10).expect("due").is_empty());

        // Re-enqueue after an update resets the row
        db.enqueue_sync("donation", "dn1").expect("re-enqueue");
        assert_eq!(db.get_due_sync_rows(10).expect("due").len(), 1);
    }
}
