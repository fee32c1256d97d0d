use super::*;

impl DonorDb {
    // =========================================================================
    // Communications
    // =========================================================================

    pub(crate) fn map_communication_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<DbCommunication> {
        Ok(DbCommunication {
            id: row.get(0)?,
            organization_id: row.get(1)?,
            donor_id: row.get(2)?,
            channel: row.get(3)?,
            direction: row.get(4)?,
            subject: row.get(5)?,
            summary: row.get(6)?,
            occurred_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// Record a communication with a donor.
    pub fn insert_communication(&self, comm: &DbCommunication) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO communications (
                id, organization_id, donor_id, channel, direction,
                subject, summary, occurred_at, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                comm.id,
                comm.organization_id,
                comm.donor_id,
                comm.channel,
                comm.direction,
                comm.subject,
                comm.summary,
                comm.occurred_at,
                comm.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent communications for a donor, newest first.
    pub fn get_communications_for_donor(
        &self,
        organization_id: &str,
        donor_id: &str,
        limit: u32,
    ) -> Result<Vec<DbCommunication>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, donor_id, channel, direction,
                    subject, summary, occurred_at, created_at
             FROM communications
             WHERE organization_id = ?1 AND donor_id = ?2
             ORDER BY occurred_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![organization_id, donor_id, limit],
            Self::map_communication_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
