//! Offline stand-ins for the authentication and document-analysis backends.
//!
//! The canned analyses and replies are placeholders; nothing here reads the
//! uploaded bytes.

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use shared::{
    domain::{DocumentId, ObligationStatus, RiskLevel, UserId},
    error::{CoreError, CoreResult},
    protocol::{
        Analysis, Document, DocumentState, FinancialTerm, ImportantDate, KeyTerm, Obligation,
        Party, ProfileUpdate, Risk, Session, UploadFile, UploadOutcome,
    },
};
use tokio::{sync::RwLock, time::sleep};
use tracing::info;

use crate::{AnalysisFetch, AuthProvider, HistoryFetch, ReplyGenerator, UploadTransport};

pub const DEFAULT_TEST_EMAIL: &str = "demo@lexdesk.dev";
pub const DEFAULT_TEST_PASSWORD: &str = "demo1234";

/// Accepts exactly one credential pair for sign-in. Sign-up accepts anything.
pub struct TestAccountAuthProvider {
    email: String,
    password: String,
    latency: Duration,
}

impl TestAccountAuthProvider {
    pub fn new(email: impl Into<String>, password: impl Into<String>, latency: Duration) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            latency,
        }
    }

    fn session_for(email: &str) -> Session {
        let email = email.trim().to_ascii_lowercase();
        let local_part = email.split('@').next().unwrap_or_default().to_string();
        Session {
            id: UserId::new(format!("user-{email}")),
            email,
            display_name: (!local_part.is_empty()).then_some(local_part),
        }
    }
}

impl Default for TestAccountAuthProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD, Duration::ZERO)
    }
}

#[async_trait]
impl AuthProvider for TestAccountAuthProvider {
    async fn sign_in(&self, email: &str, password: &str) -> CoreResult<Session> {
        sleep(self.latency).await;
        if !email.trim().eq_ignore_ascii_case(&self.email) || password != self.password {
            return Err(CoreError::InvalidCredentials);
        }
        Ok(Self::session_for(email))
    }

    async fn sign_up(&self, email: &str, _password: &str) -> CoreResult<Session> {
        sleep(self.latency).await;
        if email.trim().is_empty() {
            return Err(CoreError::Validation("email is required".to_string()));
        }
        Ok(Self::session_for(email))
    }

    async fn sign_out(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn update_profile(&self, _session: &Session, _update: &ProfileUpdate) -> CoreResult<()> {
        sleep(self.latency).await;
        Ok(())
    }
}

/// In-process backend that "analyzes" uploads after a delay, serves the
/// stored analyses back, and answers chat questions from them.
pub struct SimulatedBackend {
    latency: Duration,
    analyses: RwLock<HashMap<DocumentId, Analysis>>,
    history: RwLock<Vec<Document>>,
}

impl SimulatedBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            analyses: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Backend preloaded with a couple of previously analyzed documents.
    pub fn with_seeded_history(latency: Duration) -> Self {
        let now = Utc::now();
        let seeded = [
            ("seed-nda-2024", "mutual-nda.pdf", ChronoDuration::days(14)),
            ("seed-lease-2024", "office-lease.docx", ChronoDuration::days(3)),
        ];

        let mut analyses = HashMap::new();
        let mut history = Vec::new();
        for (id, name, age) in seeded {
            let analysis = canned_analysis(name);
            analyses.insert(DocumentId::from(id), analysis.clone());
            history.push(Document {
                id: DocumentId::from(id),
                name: name.to_string(),
                kind: content_type_for(name),
                uploaded_at: now - age,
                state: DocumentState::Completed {
                    risk_level: analysis.overall_risk(),
                    analysis,
                },
            });
        }

        Self {
            latency,
            analyses: RwLock::new(analyses),
            history: RwLock::new(history),
        }
    }
}

#[async_trait]
impl UploadTransport for SimulatedBackend {
    async fn submit(&self, document_id: &DocumentId, file: &UploadFile) -> Result<UploadOutcome> {
        sleep(self.latency).await;
        if file.name.to_ascii_lowercase().contains("corrupt") {
            return Err(anyhow!("could not extract text from {}", file.name));
        }

        let analysis = canned_analysis(&file.name);
        let risk_level = analysis.overall_risk();
        self.analyses
            .write()
            .await
            .insert(document_id.clone(), analysis.clone());
        self.history.write().await.push(Document {
            id: document_id.clone(),
            name: file.name.clone(),
            kind: file.content_type.clone(),
            uploaded_at: Utc::now(),
            state: DocumentState::Completed {
                risk_level,
                analysis: analysis.clone(),
            },
        });
        info!("simulated: analyzed document={document_id} risk={risk_level}");

        Ok(UploadOutcome {
            document_id: document_id.clone(),
            risk_level,
            analysis,
        })
    }
}

#[async_trait]
impl AnalysisFetch for SimulatedBackend {
    async fn fetch(&self, document_id: &DocumentId) -> Result<Option<Analysis>> {
        sleep(self.latency).await;
        Ok(self.analyses.read().await.get(document_id).cloned())
    }
}

#[async_trait]
impl HistoryFetch for SimulatedBackend {
    async fn fetch_history(&self) -> Result<Vec<Document>> {
        sleep(self.latency).await;
        Ok(self.history.read().await.clone())
    }
}

#[async_trait]
impl ReplyGenerator for SimulatedBackend {
    async fn reply(&self, document_id: &DocumentId, user_text: &str) -> Result<String> {
        sleep(self.latency).await;
        let analyses = self.analyses.read().await;
        let analysis = analyses.get(document_id);
        Ok(canned_reply(analysis, user_text))
    }
}

fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn in_days(days: i64) -> NaiveDate {
    Utc::now().date_naive() + ChronoDuration::days(days)
}

/// Builds a plausible analysis whose severity follows keywords in the name.
pub fn canned_analysis(file_name: &str) -> Analysis {
    let lower = file_name.to_ascii_lowercase();
    let headline = if lower.contains("lease") || lower.contains("loan") {
        RiskLevel::High
    } else if lower.contains("nda") || lower.contains("confidential") {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    };

    let mut risks = vec![Risk {
        kind: "Termination".to_string(),
        description: "Either party may terminate on short notice without cause.".to_string(),
        severity: headline,
        recommendation: "Negotiate a longer notice period or a termination fee.".to_string(),
    }];
    if headline != RiskLevel::Low {
        risks.push(Risk {
            kind: "Liability".to_string(),
            description: "Indemnification obligations are not capped.".to_string(),
            severity: RiskLevel::Low,
            recommendation: "Cap indemnity at the fees paid in the prior twelve months."
                .to_string(),
        });
    }

    Analysis {
        summary: format!(
            "{file_name} sets out a commercial relationship between two parties, with payment, confidentiality and termination provisions."
        ),
        risks,
        obligations: vec![
            Obligation {
                party: "Client".to_string(),
                description: "Pay invoices within 30 days of receipt.".to_string(),
                deadline: Some(in_days(30)),
                status: ObligationStatus::Pending,
            },
            Obligation {
                party: "Provider".to_string(),
                description: "Deliver monthly status reports.".to_string(),
                deadline: None,
                status: ObligationStatus::Pending,
            },
        ],
        important_dates: vec![
            ImportantDate {
                date: in_days(0),
                description: "Effective date".to_string(),
                category: "start".to_string(),
            },
            ImportantDate {
                date: in_days(365),
                description: "Initial term ends".to_string(),
                category: "renewal".to_string(),
            },
        ],
        key_terms: vec![
            KeyTerm {
                term: "Confidential Information".to_string(),
                definition: "Non-public information disclosed by either party.".to_string(),
            },
            KeyTerm {
                term: "Term".to_string(),
                definition: "Twelve months, renewing automatically.".to_string(),
            },
        ],
        financial_terms: vec![FinancialTerm {
            description: "Monthly fee".to_string(),
            amount: "$5,000".to_string(),
        }],
        parties: vec![
            Party {
                name: "Client".to_string(),
                role: "Buyer".to_string(),
                responsibilities: vec!["Timely payment".to_string()],
            },
            Party {
                name: "Provider".to_string(),
                role: "Seller".to_string(),
                responsibilities: vec![
                    "Service delivery".to_string(),
                    "Status reporting".to_string(),
                ],
            },
        ],
    }
}

fn canned_reply(analysis: Option<&Analysis>, user_text: &str) -> String {
    let Some(analysis) = analysis else {
        return "I don't have an analysis for this document yet. Try again once processing finishes.".to_string();
    };

    let question = user_text.to_ascii_lowercase();
    if question.contains("risk") {
        let listed: Vec<String> = analysis
            .risks
            .iter()
            .map(|risk| format!("{} ({})", risk.kind, risk.severity))
            .collect();
        format!(
            "I found {} risk(s): {}. Overall risk is {}.",
            analysis.risks.len(),
            listed.join(", "),
            analysis.overall_risk()
        )
    } else if question.contains("obligation") || question.contains("must") {
        let listed: Vec<String> = analysis
            .obligations
            .iter()
            .map(|obligation| format!("{}: {}", obligation.party, obligation.description))
            .collect();
        format!("Key obligations: {}", listed.join(" "))
    } else if question.contains("date") || question.contains("deadline") || question.contains("when") {
        let listed: Vec<String> = analysis
            .important_dates
            .iter()
            .map(|date| format!("{} on {}", date.description, date.date))
            .collect();
        format!("Important dates: {}.", listed.join("; "))
    } else if question.contains("pay") || question.contains("fee") || question.contains("cost") {
        let listed: Vec<String> = analysis
            .financial_terms
            .iter()
            .map(|term| format!("{} of {}", term.description, term.amount))
            .collect();
        format!("Financial terms: {}.", listed.join("; "))
    } else if question.contains("terminat") {
        "The termination clause allows either party to exit on short notice; see the Termination risk for a suggested change.".to_string()
    } else if question.contains("part") {
        let listed: Vec<String> = analysis
            .parties
            .iter()
            .map(|party| format!("{} ({})", party.name, party.role))
            .collect();
        format!("The parties are {}.", listed.join(" and "))
    } else {
        format!(
            "{} Ask about risks, obligations, dates or payments for specifics.",
            analysis.summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_account_accepts_only_its_credentials() {
        let auth = TestAccountAuthProvider::default();
        let session = auth
            .sign_in("Demo@LexDesk.dev", DEFAULT_TEST_PASSWORD)
            .await
            .expect("sign in");
        assert_eq!(session.email, DEFAULT_TEST_EMAIL);
        assert_eq!(session.display_name.as_deref(), Some("demo"));

        let err = auth
            .sign_in(DEFAULT_TEST_EMAIL, "wrong")
            .await
            .expect_err("bad password");
        assert_eq!(err, CoreError::InvalidCredentials);
    }

    #[tokio::test]
    async fn sign_up_accepts_any_email() {
        let auth = TestAccountAuthProvider::default();
        let session = auth
            .sign_up("new.user@example.com", "anything")
            .await
            .expect("sign up");
        assert_eq!(session.id, UserId::from("user-new.user@example.com"));
    }

    #[tokio::test]
    async fn uploads_become_fetchable_and_listed() {
        let backend = SimulatedBackend::new(Duration::ZERO);
        let id = DocumentId::from("lease-1");
        let file = UploadFile {
            name: "lease.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF".to_vec(),
        };

        assert!(backend.fetch(&id).await.expect("fetch").is_none());
        let outcome = backend.submit(&id, &file).await.expect("submit");
        assert_eq!(outcome.risk_level, RiskLevel::High);
        assert_eq!(
            backend.fetch(&id).await.expect("fetch"),
            Some(outcome.analysis)
        );
        assert_eq!(backend.fetch_history().await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn corrupt_files_are_rejected() {
        let backend = SimulatedBackend::new(Duration::ZERO);
        let file = UploadFile {
            name: "corrupt-scan.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: Vec::new(),
        };
        assert!(backend
            .submit(&DocumentId::from("c"), &file)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn replies_draw_on_the_stored_analysis() {
        let backend = SimulatedBackend::with_seeded_history(Duration::ZERO);
        let id = DocumentId::from("seed-lease-2024");
        let reply = backend
            .reply(&id, "What are the main risks?")
            .await
            .expect("reply");
        assert!(reply.contains("Termination (high)"), "{reply}");

        let unknown = backend
            .reply(&DocumentId::from("nope"), "risks?")
            .await
            .expect("reply");
        assert!(unknown.contains("don't have an analysis"));
    }

    #[test]
    fn seeded_history_is_completed_with_matching_risk() {
        let backend = SimulatedBackend::with_seeded_history(Duration::ZERO);
        let history = backend.history.try_read().expect("unlocked").clone();
        assert_eq!(history.len(), 2);
        let kinds: Vec<&str> = history.iter().map(|document| document.kind.as_str()).collect();
        assert_eq!(
            kinds,
            [
                "application/pdf",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ]
        );
        for document in history {
            let analysis = document.analysis().expect("completed");
            assert_eq!(document.risk_level(), Some(analysis.overall_risk()));
        }
    }
}
