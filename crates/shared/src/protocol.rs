use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DeliveryStatus, DocumentId, DocumentStatus, MessageId, MessageRole, ObligationStatus,
    RiskLevel, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Session {
    /// Merges the fields present in `update`; absent fields keep their value.
    pub fn apply(mut self, update: &ProfileUpdate) -> Self {
        if let Some(display_name) = &update.display_name {
            self.display_name = Some(display_name.clone());
        }
        self
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub document_id: DocumentId,
    pub risk_level: RiskLevel,
    pub analysis: Analysis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: DocumentState,
}

/// Lifecycle of an uploaded document. The analysis only exists on the
/// `Completed` variant, so a document can never carry one without the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentState {
    Processing,
    Completed {
        risk_level: RiskLevel,
        analysis: Analysis,
    },
    Error {
        reason: String,
    },
}

impl Document {
    pub fn processing(
        id: DocumentId,
        name: impl Into<String>,
        kind: impl Into<String>,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            uploaded_at,
            state: DocumentState::Processing,
        }
    }

    pub fn status(&self) -> DocumentStatus {
        match self.state {
            DocumentState::Processing => DocumentStatus::Processing,
            DocumentState::Completed { .. } => DocumentStatus::Completed,
            DocumentState::Error { .. } => DocumentStatus::Error,
        }
    }

    pub fn risk_level(&self) -> Option<RiskLevel> {
        match &self.state {
            DocumentState::Completed { risk_level, .. } => Some(*risk_level),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match &self.state {
            DocumentState::Completed { analysis, .. } => Some(analysis),
            _ => None,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.state, DocumentState::Processing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default)]
    pub important_dates: Vec<ImportantDate>,
    #[serde(default)]
    pub key_terms: Vec<KeyTerm>,
    #[serde(default)]
    pub financial_terms: Vec<FinancialTerm>,
    #[serde(default)]
    pub parties: Vec<Party>,
}

impl Analysis {
    /// Worst severity among the listed risks; `Low` when none are listed.
    pub fn overall_risk(&self) -> RiskLevel {
        self.risks
            .iter()
            .map(|risk| risk.severity)
            .max()
            .unwrap_or(RiskLevel::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: RiskLevel,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obligation {
    pub party: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    pub status: ObligationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportantDate {
    pub date: NaiveDate,
    pub description: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTerm {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialTerm {
    pub description: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryStatus>,
}

impl ChatMessage {
    fn new(role: MessageRole, content: String, delivery_status: Option<DeliveryStatus>) -> Self {
        Self {
            id: MessageId::new(uuid::Uuid::new_v4().to_string()),
            role,
            content,
            timestamp: Utc::now(),
            delivery_status,
        }
    }

    /// Outgoing user message, starting in `Sending`.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(
            MessageRole::User,
            content.into(),
            Some(DeliveryStatus::Sending),
        )
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content.into(), None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub document_id: DocumentId,
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn seeded(document: &Document) -> Self {
        Self {
            document_id: document.id.clone(),
            messages: vec![ChatMessage::assistant(welcome_message(&document.name))],
        }
    }

    pub fn message(&self, message_id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| &message.id == message_id)
    }
}

pub fn welcome_message(document_name: &str) -> String {
    format!(
        "Hello! I've analyzed \"{document_name}\". Ask me anything about its risks, obligations or key dates."
    )
}
