use uuid::Uuid;

use super::*;

/// One row of the query audit trail. Every structured or raw query execution,
/// successful or rejected, lands here.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub organization_id: String,
    /// Where the query came from: "whatsapp" or "cli".
    pub channel: String,
    /// Engine variant: "structured" or "rawSql".
    pub engine: String,
    /// SHA-256 hex of the original input (plan JSON or raw SQL).
    pub query_hash: String,
    /// The final SQL, when compilation got that far.
    pub sql: Option<String>,
    pub row_count: Option<i64>,
    pub duration_ms: Option<i64>,
    /// "ok", "rejected", or "error".
    pub outcome: String,
}

impl DonorDb {
    // =========================================================================
    // Query audit log
    // =========================================================================

    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO query_audit_log (
                id, organization_id, channel, engine, query_hash, sql,
                row_count, duration_ms, outcome, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                Uuid::new_v4().to_string(),
                entry.organization_id,
                entry.channel,
                entry.engine,
                entry.query_hash,
                entry.sql,
                entry.row_count,
                entry.duration_ms,
                entry.outcome,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Recent audit rows for an organization, newest first.
    pub fn recent_audit_entries(
        &self,
        organization_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT organization_id, channel, engine, query_hash, sql,
                    row_count, duration_ms, outcome
             FROM query_audit_log
             WHERE organization_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![organization_id, limit], |row| {
            Ok(AuditEntry {
                organization_id: row.get(0)?,
                channel: row.get(1)?,
                engine: row.get(2)?,
                query_hash: row.get(3)?,
                sql: row.get(4)?,
                row_count: row.get(5)?,
                duration_ms: row.get(6)?,
                outcome: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn sample_entry(outcome: &str) -> AuditEntry {
        AuditEntry {
            organization_id: "org1".to_string(),
            channel: "whatsapp".to_string(),
            engine: "structured".to_string(),
            query_hash: "deadbeef".to_string(),
            sql: Some("SELECT 1".to_string()),
            row_count: Some(1),
            duration_ms: Some(4),
            outcome: outcome.to_string(),
        }
    }

    #[test]
    fn test_insert_and_list_audit_entries() {
        let db = test_db();
        db.insert_audit_entry(&sample_entry("ok")).expect("insert");
        db.insert_audit_entry(&sample_entry("rejected")).expect("insert");

        let rows = db.recent_audit_entries("org1", 10).expect("list");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.outcome == "rejected"));
        assert!(db.recent_audit_entries("org2", 10).expect("list").is_empty());
    }
}
