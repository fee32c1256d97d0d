use uuid::Uuid;

use super::*;

impl DonorDb {
    // =========================================================================
    // WhatsApp conversations
    // =========================================================================

    /// Find the conversation for a phone number, creating it on first contact.
    pub fn get_or_create_conversation(
        &self,
        organization_id: &str,
        phone_number: &str,
    ) -> Result<DbWaConversation, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO wa_conversations (id, organization_id, phone_number, started_at, last_message_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(organization_id, phone_number) DO NOTHING",
            params![
                Uuid::new_v4().to_string(),
                organization_id,
                phone_number,
                now
            ],
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT id, organization_id, phone_number, started_at, last_message_at
             FROM wa_conversations
             WHERE organization_id = ?1 AND phone_number = ?2",
        )?;
        let conv = stmt.query_row(params![organization_id, phone_number], |row| {
            Ok(DbWaConversation {
                id: row.get(0)?,
                organization_id: row.get(1)?,
                phone_number: row.get(2)?,
                started_at: row.get(3)?,
                last_message_at: row.get(4)?,
            })
        })?;
        Ok(conv)
    }

    /// Append a turn to a conversation and bump its `last_message_at`.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
    ) -> Result<DbWaMessage, DbError> {
        let now = Utc::now().to_rfc3339();
        let message = DbWaMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: now.clone(),
        };
        self.conn.execute(
            "INSERT INTO wa_messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                message.conversation_id,
                message.role,
                message.content,
                message.created_at
            ],
        )?;
        self.conn.execute(
            "UPDATE wa_conversations SET last_message_at = ?1 WHERE id = ?2",
            params![now, conversation_id],
        )?;
        Ok(message)
    }

    /// The most recent `limit` turns of a conversation, oldest first so they
    /// can feed straight into a prompt.
    pub fn get_recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
    ) -> Result<Vec<DbWaMessage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM (SELECT rowid AS rid, id, conversation_id, role, content, created_at
                   FROM wa_messages
                   WHERE conversation_id = ?1
                   ORDER BY rid DESC
                   LIMIT ?2)
             ORDER BY rid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit], |row| {
            Ok(DbWaMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
