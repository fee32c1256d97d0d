//! SQLite-based persistence for donors, donations, projects, and the
//! WhatsApp assistant's conversation and audit state.
//!
//! The database lives at `~/.givehub/givehub.db` and is the system of
//! record for one or more organizations. Every query that leaves this
//! module is scoped by `organization_id`; the query-translation layer in
//! `crate::query` builds its SQL against the same schema.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};

pub mod types;
pub use types::*;

pub struct DonorDb {
    conn: Connection,
}

impl DonorDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Self) -> Result<T, String>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| format!("Failed to begin transaction: {e}"))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| format!("Failed to commit transaction: {e}"))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.givehub/givehub.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Run schema migrations
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Enable FK constraint enforcement. Set after migrations so future
        // table-recreation migrations can run with foreign_keys = OFF.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Open the database in read-only mode. Used for safe concurrent reads
    /// while another process owns writes.
    pub fn open_readonly() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_readonly_at(&path)
    }

    /// Open a database at an explicit path in read-only mode.
    pub fn open_readonly_at(path: &std::path::Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.givehub/givehub.db`.
    ///
    /// `GIVEHUB_DB` overrides the location entirely, which keeps scripted
    /// runs and scratch databases away from the live file.
    fn db_path() -> Result<PathBuf, DbError> {
        if let Ok(custom) = std::env::var("GIVEHUB_DB") {
            if !custom.trim().is_empty() {
                return Ok(PathBuf::from(custom));
            }
        }
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".givehub").join("givehub.db"))
    }
}

pub mod audit;
pub mod communications;
pub mod conversations;
pub mod donations;
pub mod donors;
pub mod organizations;
pub mod projects;
pub mod staff;
pub mod sync_state;

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::{DbDonation, DbDonor, DonorDb};
    use chrono::Utc;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// Test temp dirs are cleaned up by the OS. FK enforcement is disabled so that
    /// unit tests can insert rows without satisfying every foreign key constraint.
    pub fn test_db() -> DonorDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        let db = DonorDb::open_at(path).expect("Failed to open test database");
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("disable FK for tests");
        db
    }

    /// Minimal donor row for tests; callers override fields as needed.
    pub fn sample_donor(id: &str, org: &str, name: &str) -> DbDonor {
        let now = Utc::now().to_rfc3339();
        DbDonor {
            id: id.to_string(),
            organization_id: org.to_string(),
            name: name.to_string(),
            email: None,
            phone: None,
            whatsapp_number: None,
            donor_type: "individual".to_string(),
            status: "active".to_string(),
            city: None,
            country: None,
            assigned_staff_id: None,
            crm_external_id: None,
            notes: None,
            archived: false,
            created_at: now.clone(),
            updated_at: now,
            research_summary: None,
            interests: None,
            giving_capacity: None,
            research_sources: None,
            enrichment_sources: None,
            last_enriched_at: None,
        }
    }

    /// Minimal received donation for tests.
    pub fn sample_donation(id: &str, org: &str, donor_id: &str, amount: f64) -> DbDonation {
        let now = Utc::now().to_rfc3339();
        DbDonation {
            id: id.to_string(),
            organization_id: org.to_string(),
            donor_id: donor_id.to_string(),
            project_id: None,
            amount,
            currency: "EUR".to_string(),
            donation_date: "2025-03-15".to_string(),
            payment_method: Some("sepa".to_string()),
            recurring: false,
            status: "received".to_string(),
            notes: None,
            crm_external_id: None,
            recorded_by: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::test_utils::{sample_donation, sample_donor, test_db};
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        // Verify tables exist by querying them (should not error)
        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM donors", [], |row| row.get(0))
            .expect("donors table should exist");
        assert_eq!(count, 0);

        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM donations", [], |row| row.get(0))
            .expect("donations table should exist");
        assert_eq!(count, 0);

        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM wa_conversations", [], |row| {
                row.get(0)
            })
            .expect("wa_conversations table should exist");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_transaction_commits() {
        let db = test_db();
        let donor = sample_donor("d1", "org1", "Ada Lovelace");

        db.with_transaction(|tx| {
            tx.upsert_donor(&donor).map_err(|e| e.to_string())?;
            Ok(())
        })
        .expect("transaction should commit");

        let found = db.get_donor("org1", "d1").expect("query");
        assert!(found.is_some());
    }

    #[test]
    fn test_with_transaction_rolls_back() {
        let db = test_db();
        let donor = sample_donor("d1", "org1", "Ada Lovelace");

        let result: Result<(), String> = db.with_transaction(|tx| {
            tx.upsert_donor(&donor).map_err(|e| e.to_string())?;
            Err("forced failure".to_string())
        });
        assert!(result.is_err());

        let found = db.get_donor("org1", "d1").expect("query");
        assert!(found.is_none(), "rollback should discard the insert");
    }

    #[test]
    fn test_donation_insert_visible_through_get() {
        let db = test_db();
        let donor = sample_donor("d1", "org1", "Ada Lovelace");
        db.upsert_donor(&donor).expect("upsert donor");

        let donation = sample_donation("dn1", "org1", "d1", 250.0);
        db.insert_donation(&donation).expect("insert donation");

        let found = db.get_donation("org1", "dn1").expect("query").expect("row");
        assert_eq!(found.amount, 250.0);
        assert_eq!(found.donor_id, "d1");
    }

    #[test]
    fn test_idempotent_schema_application() {
        // Opening the same DB twice should not error (IF NOT EXISTS)
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("idempotent.db");

        let _db1 = DonorDb::open_at(path.clone()).expect("first open");
        let _db2 = DonorDb::open_at(path).expect("second open should not fail");
    }

    #[test]
    fn test_org_scoping_hides_other_orgs() {
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada"))
            .expect("upsert org1 donor");
        db.upsert_donor(&sample_donor("d2", "org2", "Grace"))
            .expect("upsert org2 donor");

        assert!(db.get_donor("org1", "d2").expect("query").is_none());
        assert!(db.get_donor("org2", "d2").expect("query").is_some());
    }
}
