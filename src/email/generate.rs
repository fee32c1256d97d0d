//! Draft, refine, and polish passes for donor emails.

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ai::{parse_json_response, ChatMessage, LlmError, LlmProvider};
use crate::db::{DbCommunication, DonorDb};

use super::context::EmailContext;

/// Polish rounds before the text is returned as-is.
const MAX_POLISH_ROUNDS: usize = 3;

/// What kind of email the staff member wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum EmailPurpose {
    ThankYou,
    Update,
    Appeal,
    Custom,
}

impl EmailPurpose {
    /// Map a CLI word onto a purpose; anything unrecognized is custom.
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_lowercase().replace('-', "").as_str() {
            "thankyou" | "thanks" => Some(EmailPurpose::ThankYou),
            "update" => Some(EmailPurpose::Update),
            "appeal" => Some(EmailPurpose::Appeal),
            "custom" => Some(EmailPurpose::Custom),
            _ => None,
        }
    }

    fn prompt_line(&self) -> &'static str {
        match self {
            EmailPurpose::ThankYou => {
                "Write a thank-you email for the donor's recent support."
            }
            EmailPurpose::Update => {
                "Write an update email on the work their giving has funded."
            }
            EmailPurpose::Appeal => {
                "Write an appeal email inviting a further gift, without pressure."
            }
            EmailPurpose::Custom => "Write the email described in the instructions.",
        }
    }
}

/// One drafting request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub donor_id: String,
    pub purpose: EmailPurpose,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// A drafted email. The LLM answers with exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailDraft {
    pub subject: String,
    pub greeting: String,
    pub body: String,
    pub closing: String,
    /// One or two words, e.g. "warm", "formal".
    #[serde(default)]
    pub tone: Option<String>,
}

impl EmailDraft {
    /// Plain-text rendering for preview or clipboard.
    pub fn render_plain_text(&self) -> String {
        let mut out = format!("Subject: {}\n", self.subject);
        for part in [&self.greeting, &self.body, &self.closing] {
            if !part.trim().is_empty() {
                out.push('\n');
                out.push_str(part.trim_end());
                out.push('\n');
            }
        }
        out
    }

    /// Fallback when the reply is not valid JSON: the whole reply becomes
    /// the body.
    fn from_plain_text(reply: &str, subject: &str) -> Self {
        Self {
            subject: subject.to_string(),
            greeting: String::new(),
            body: reply.trim().to_string(),
            closing: String::new(),
            tone: None,
        }
    }
}

fn draft_system_prompt() -> String {
    "You draft emails from a nonprofit to its donors. Write warmly and \
     concretely, grounded only in the facts provided; never invent donation \
     amounts, projects, or history. Keep the body under 250 words. Reply \
     with a JSON object: subject, greeting, body, closing, tone."
        .to_string()
}

fn parse_draft(reply: &str, fallback_subject: &str) -> EmailDraft {
    parse_json_response(reply)
        .unwrap_or_else(|_| EmailDraft::from_plain_text(reply, fallback_subject))
}

pub async fn generate_email(
    provider: &dyn LlmProvider,
    context: &EmailContext,
    request: &EmailRequest,
) -> Result<EmailDraft, LlmError> {
    let schema = serde_json::to_value(schemars::schema_for!(EmailDraft))
        .map_err(|e| LlmError::BadOutput(e.to_string()))?;
    let mut task = request.purpose.prompt_line().to_string();
    if let Some(instructions) = &request.instructions {
        task.push_str(&format!("\nInstructions: {instructions}"));
    }
    let messages = vec![
        ChatMessage::system(draft_system_prompt()),
        ChatMessage::user(format!(
            "Donor context:\n{}\n\n{task}",
            context.prompt_block
        )),
    ];
    let reply = provider.complete_json(&messages, "email_draft", &schema).await?;
    Ok(parse_draft(&reply, &format!("A note from {}", sender_name(context))))
}

/// Revise an existing draft according to staff feedback.
pub async fn refine_email(
    provider: &dyn LlmProvider,
    context: &EmailContext,
    draft: &EmailDraft,
    feedback: &str,
) -> Result<EmailDraft, LlmError> {
    let schema = serde_json::to_value(schemars::schema_for!(EmailDraft))
        .map_err(|e| LlmError::BadOutput(e.to_string()))?;
    let messages = vec![
        ChatMessage::system(draft_system_prompt()),
        ChatMessage::user(format!(
            "Donor context:\n{}\n\nCurrent draft:\n{}\n\nRevise it per this \
             feedback, keeping everything factual: {feedback}",
            context.prompt_block,
            draft.render_plain_text()
        )),
    ];
    let reply = provider.complete_json(&messages, "email_draft", &schema).await?;
    Ok(parse_draft(&reply, &draft.subject))
}

/// Iteratively tighten a draft's body. Each round asks for a correction;
/// a reply of "OK" stops early. Bounded at `MAX_POLISH_ROUNDS`.
pub async fn polish_email(
    provider: &dyn LlmProvider,
    draft: &EmailDraft,
) -> Result<EmailDraft, LlmError> {
    let mut body = draft.body.clone();
    for round in 0..MAX_POLISH_ROUNDS {
        let messages = vec![
            ChatMessage::system(
                "You are a copy editor. If the email below reads naturally and \
                 has no grammar or tone problems, reply with exactly OK. \
                 Otherwise reply with the corrected email body only.",
            ),
            ChatMessage::user(body.clone()),
        ];
        let reply = provider.complete(&messages).await?;
        let trimmed = reply.trim();
        if trimmed.eq_ignore_ascii_case("ok") {
            debug!("Polish converged after {round} round(s)");
            break;
        }
        body = trimmed.to_string();
    }
    Ok(EmailDraft { body, ..draft.clone() })
}

fn sender_name(context: &EmailContext) -> String {
    context
        .organization
        .as_ref()
        .map(|org| org.name.clone())
        .unwrap_or_else(|| "our team".to_string())
}

/// Log an accepted draft as an outbound communication so future context
/// assembly sees it.
pub fn record_sent_email(
    db: &DonorDb,
    organization_id: &str,
    donor_id: &str,
    draft: &EmailDraft,
) -> Result<(), String> {
    let now = chrono::Utc::now().to_rfc3339();
    let summary: String = draft.body.chars().take(300).collect();
    db.insert_communication(&DbCommunication {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.to_string(),
        donor_id: donor_id.to_string(),
        channel: "email".to_string(),
        direction: "outbound".to_string(),
        subject: Some(draft.subject.clone()),
        summary: Some(summary),
        occurred_at: now.clone(),
        created_at: now,
    })
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatMessage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted provider: pops canned replies in order.
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Self {
            let mut list: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            list.reverse();
            Self { replies: Mutex::new(list) }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::Request("script exhausted".to_string()))
        }

        async fn complete_json(
            &self,
            messages: &[ChatMessage],
            _schema_name: &str,
            _schema: &serde_json::Value,
        ) -> Result<String, LlmError> {
            self.complete(messages).await
        }
    }

    fn context_fixture() -> EmailContext {
        use crate::db::test_utils::{sample_donation, sample_donor, test_db};
        use crate::email::context::build_email_context;
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        db.insert_donation(&sample_donation("dn1", "org1", "d1", 500.0)).unwrap();
        build_email_context(&db, "org1", "d1").expect("context")
    }

    fn thank_you_request() -> EmailRequest {
        EmailRequest {
            donor_id: "d1".to_string(),
            purpose: EmailPurpose::ThankYou,
            instructions: None,
        }
    }

    #[test]
    fn test_purpose_from_word() {
        assert_eq!(EmailPurpose::from_word("thank-you"), Some(EmailPurpose::ThankYou));
        assert_eq!(EmailPurpose::from_word("thankYou"), Some(EmailPurpose::ThankYou));
        assert_eq!(EmailPurpose::from_word("update"), Some(EmailPurpose::Update));
        assert_eq!(EmailPurpose::from_word("appeal"), Some(EmailPurpose::Appeal));
        assert_eq!(EmailPurpose::from_word("newsletter"), None);
    }

    #[tokio::test]
    async fn test_generate_parses_draft() {
        let provider = ScriptedProvider::new(&[
            r#"{"subject": "Thank you, Ada", "greeting": "Dear Ada,", "body": "Your gift of 500.00 matters.", "closing": "Warm regards", "tone": "warm"}"#,
        ]);
        let ctx = context_fixture();
        let draft = generate_email(&provider, &ctx, &thank_you_request())
            .await
            .expect("draft");
        assert_eq!(draft.subject, "Thank you, Ada");
        assert_eq!(draft.greeting, "Dear Ada,");
        assert_eq!(draft.closing, "Warm regards");
        assert_eq!(draft.tone.as_deref(), Some("warm"));
        let rendered = draft.render_plain_text();
        assert!(rendered.starts_with("Subject: Thank you, Ada"));
        assert!(rendered.contains("Dear Ada,"));
        assert!(rendered.contains("Warm regards"));
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_plain_text() {
        let provider =
            ScriptedProvider::new(&["Dear Ada, thank you for your generous gift this spring."]);
        let ctx = context_fixture();
        let draft = generate_email(&provider, &ctx, &thank_you_request())
            .await
            .expect("draft");
        assert!(draft.body.starts_with("Dear Ada, thank you"));
        assert!(draft.greeting.is_empty());
        assert!(!draft.subject.is_empty());
    }

    #[tokio::test]
    async fn test_refine_applies_feedback() {
        let provider = ScriptedProvider::new(&[
            r#"{"subject": "Thank you, Ada", "greeting": "Dear Ada,", "body": "Shorter body.", "closing": "Best", "tone": "warm"}"#,
        ]);
        let ctx = context_fixture();
        let draft = EmailDraft {
            subject: "Thank you, Ada".to_string(),
            greeting: "Dear Ada,".to_string(),
            body: "A much longer original body.".to_string(),
            closing: "Best".to_string(),
            tone: None,
        };
        let revised = refine_email(&provider, &ctx, &draft, "make it shorter")
            .await
            .expect("refine");
        assert_eq!(revised.body, "Shorter body.");
    }

    #[tokio::test]
    async fn test_polish_stops_on_ok() {
        let provider = ScriptedProvider::new(&["A better body.", "OK", "never reached"]);
        let draft = EmailDraft {
            subject: "Hi".to_string(),
            greeting: "Dear Ada,".to_string(),
            body: "Original body.".to_string(),
            closing: "Best".to_string(),
            tone: None,
        };
        let polished = polish_email(&provider, &draft).await.expect("polish");
        assert_eq!(polished.body, "A better body.");
        // Greeting and closing pass through untouched.
        assert_eq!(polished.greeting, "Dear Ada,");
        assert_eq!(polished.closing, "Best");
        // The third scripted reply was never consumed.
        assert_eq!(provider.replies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_polish_is_bounded() {
        let provider = ScriptedProvider::new(&["v1", "v2", "v3", "v4"]);
        let draft = EmailDraft {
            subject: "Hi".to_string(),
            greeting: String::new(),
            body: "Original".to_string(),
            closing: String::new(),
            tone: None,
        };
        let polished = polish_email(&provider, &draft).await.expect("polish");
        assert_eq!(polished.body, "v3", "stops after three rounds");
    }

    #[test]
    fn test_record_sent_email_logs_communication() {
        use crate::db::test_utils::{sample_donor, test_db};
        let db = test_db();
        db.upsert_donor(&sample_donor("d1", "org1", "Ada Lovelace")).unwrap();
        let draft = EmailDraft {
            subject: "Thanks".to_string(),
            greeting: "Dear Ada,".to_string(),
            body: "Body text".to_string(),
            closing: "Best".to_string(),
            tone: None,
        };
        record_sent_email(&db, "org1", "d1", &draft).expect("record");

        let history = db.get_communications_for_donor("org1", "d1", 5).expect("list");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].channel, "email");
        assert_eq!(history[0].direction, "outbound");
        assert_eq!(history[0].subject.as_deref(), Some("Thanks"));
    }
}
