//! Demo-mode fixtures: canned responses served by signature match.
//!
//! The fixture files are plain JSON on disk and are created with seeded
//! OHS content on first run, so a fresh checkout answers demo questions
//! without any provider configured. Requests match a fixture by a
//! normalized signature: lowercase, punctuation stripped, first 20
//! characters.
//!
//! Served fixtures are recorded to a trace file so demo sessions stay
//! inspectable.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::{sha256_hex, Citation};

/// Signature length after normalization.
const SIGNATURE_CHARS: usize = 20;

#[derive(Debug, Error, Diagnostic)]
pub enum FixtureError {
    #[error(transparent)]
    #[diagnostic(code(safetydesk::fixtures::io))]
    Io(#[from] std::io::Error),

    #[error("fixture file {path} is not valid JSON: {source}")]
    #[diagnostic(code(safetydesk::fixtures::parse))]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A canned ask response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AskFixture {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub prompt_sha: String,
}

/// A canned letter response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LetterFixture {
    pub purpose: String,
    pub subject: String,
    pub body: String,
    pub placeholders: Vec<String>,
    pub prompt_sha: String,
}

#[derive(Serialize)]
struct TraceRecord<'a> {
    kind: &'static str,
    signature: &'a str,
    correlation_id: &'a str,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Signature-indexed fixture cache.
pub struct FixtureService {
    asks: FxHashMap<String, AskFixture>,
    letters: FxHashMap<String, LetterFixture>,
    trace_path: PathBuf,
    trace_lock: tokio::sync::Mutex<()>,
}

impl FixtureService {
    /// Normalize a question/purpose into its match signature: lowercase,
    /// punctuation stripped, first 20 characters.
    pub fn signature(text: &str) -> String {
        text.to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .take(SIGNATURE_CHARS)
            .collect()
    }

    /// Load fixtures from `fixtures_path`, creating the default files on
    /// first run.
    pub async fn load(
        fixtures_path: impl AsRef<Path>,
        trace_path: impl AsRef<Path>,
    ) -> Result<Self, FixtureError> {
        let fixtures_dir = fixtures_path.as_ref();
        tokio::fs::create_dir_all(fixtures_dir).await?;
        let trace_dir = trace_path.as_ref();
        tokio::fs::create_dir_all(trace_dir).await?;

        let ask_path = fixtures_dir.join("ask-fixtures.json");
        let letter_path = fixtures_dir.join("letter-fixtures.json");

        let ask_fixtures: Vec<AskFixture> =
            Self::load_or_seed(&ask_path, Self::default_ask_fixtures).await?;
        let letter_fixtures: Vec<LetterFixture> =
            Self::load_or_seed(&letter_path, Self::default_letter_fixtures).await?;

        let mut asks = FxHashMap::default();
        for fixture in ask_fixtures {
            asks.insert(Self::signature(&fixture.question), fixture);
        }
        let mut letters = FxHashMap::default();
        for fixture in letter_fixtures {
            letters.insert(Self::signature(&fixture.purpose), fixture);
        }

        info!(
            asks = asks.len(),
            letters = letters.len(),
            "loaded demo fixtures"
        );
        Ok(Self {
            asks,
            letters,
            trace_path: trace_dir.join("demo-traces.json"),
            trace_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn load_or_seed<T: Serialize + serde::de::DeserializeOwned>(
        path: &Path,
        seed: fn() -> Vec<T>,
    ) -> Result<Vec<T>, FixtureError> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let raw = tokio::fs::read(path).await?;
            serde_json::from_slice(&raw).map_err(|source| FixtureError::Parse {
                path: path.display().to_string(),
                source,
            })
        } else {
            let fixtures = seed();
            let serialized = serde_json::to_vec_pretty(&fixtures).map_err(|source| {
                FixtureError::Parse {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            tokio::fs::write(path, serialized).await?;
            Ok(fixtures)
        }
    }

    pub fn match_ask(&self, question: &str) -> Option<&AskFixture> {
        self.asks.get(&Self::signature(question))
    }

    pub fn match_letter(&self, purpose: &str) -> Option<&LetterFixture> {
        self.letters.get(&Self::signature(purpose))
    }

    /// Append a short-circuit record to the demo trace file.
    pub async fn record_trace(
        &self,
        kind: &'static str,
        signature: &str,
        correlation_id: &str,
    ) -> Result<(), FixtureError> {
        let record = TraceRecord {
            kind,
            signature,
            correlation_id,
            timestamp: chrono::Utc::now(),
        };
        let line = serde_json::to_string(&record).map_err(|source| FixtureError::Parse {
            path: self.trace_path.display().to_string(),
            source,
        })?;
        let _guard = self.trace_lock.lock().await;
        let mut existing = match tokio::fs::read_to_string(&self.trace_path).await {
            Ok(content) => content,
            Err(_) => String::new(),
        };
        existing.push_str(&line);
        existing.push('\n');
        tokio::fs::write(&self.trace_path, existing).await?;
        Ok(())
    }

    fn demo_sha(seed: &str) -> String {
        let digest = sha256_hex(seed);
        format!("DEMO_{}", &digest[..16])
    }

    fn default_ask_fixtures() -> Vec<AskFixture> {
        vec![
            AskFixture {
                question: "What PPE is required for construction work?".to_string(),
                answer: "Construction work requires hard hats wherever overhead hazards exist \
                         [#1]. Eye protection with safety glasses is mandatory during cutting, \
                         grinding, and drilling operations [#2]. Workers must also wear \
                         steel-toed boots rated for impact protection on all active sites [#3]."
                    .to_string(),
                citations: vec![
                    Citation {
                        id: "c1".to_string(),
                        score: 0.95,
                        title: "Head Protection Requirements".to_string(),
                        excerpt: "Hard hats are mandatory on all active construction sites with \
                                  overhead work."
                            .to_string(),
                        url: None,
                    },
                    Citation {
                        id: "c2".to_string(),
                        score: 0.91,
                        title: "Eye and Face Protection".to_string(),
                        excerpt: "Safety glasses with side shields are required for cutting and \
                                  grinding."
                            .to_string(),
                        url: None,
                    },
                    Citation {
                        id: "c3".to_string(),
                        score: 0.88,
                        title: "Foot Protection Standard".to_string(),
                        excerpt: "Steel-toed boots meeting impact ratings are required on site."
                            .to_string(),
                        url: None,
                    },
                ],
                prompt_sha: Self::demo_sha("ask:ppe-construction"),
            },
            AskFixture {
                question: "How do I report a workplace incident?".to_string(),
                answer: "Report every workplace incident to your supervisor within 24 hours \
                         [#1]. Complete Form WS-101 with the incident details and submit it to \
                         the safety office [#1]."
                    .to_string(),
                citations: vec![Citation {
                    id: "c1".to_string(),
                    score: 0.93,
                    title: "Incident Reporting Procedures".to_string(),
                    excerpt: "Incidents must be reported within 24 hours using Form WS-101."
                        .to_string(),
                    url: None,
                }],
                prompt_sha: Self::demo_sha("ask:incident-reporting"),
            },
        ]
    }

    fn default_letter_fixtures() -> Vec<LetterFixture> {
        vec![LetterFixture {
            purpose: "incident notification".to_string(),
            subject: "Notification of Workplace Incident and Next Steps".to_string(),
            body: "Dear {{recipient_name}},\n\n\
                   This letter is to notify you of a workplace incident recorded on \
                   {{incident_date}}. Investigation scheduled for the coming week; the \
                   assigned investigator will contact you directly. Documentation required \
                   to complete the file includes witness statements and the signed incident \
                   report.\n\n\
                   Please direct any questions to the safety office.\n\n\
                   Sincerely,\n{{sender_name}}"
                .to_string(),
            placeholders: vec![
                "recipient_name".to_string(),
                "incident_date".to_string(),
                "sender_name".to_string(),
            ],
            prompt_sha: Self::demo_sha("letter:incident-notification"),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_normalizes_and_truncates() {
        assert_eq!(
            FixtureService::signature("What PPE is required for construction work?"),
            "what ppe is required"
        );
        assert_eq!(
            FixtureService::signature("What, PPE! is? required..."),
            FixtureService::signature("What PPE is required")
        );
    }

    #[tokio::test]
    async fn first_run_creates_default_files_and_matches() {
        let dir = tempfile::tempdir().unwrap();
        let service = FixtureService::load(dir.path(), dir.path()).await.unwrap();

        assert!(dir.path().join("ask-fixtures.json").exists());
        assert!(dir.path().join("letter-fixtures.json").exists());

        let fixture = service
            .match_ask("What PPE is required for construction work?")
            .unwrap();
        assert!(fixture.answer.contains("hard hats"));
        assert!(fixture.prompt_sha.starts_with("DEMO_"));

        let letter = service.match_letter("incident notification").unwrap();
        assert!(letter.body.contains("{{recipient_name}}"));
    }

    #[tokio::test]
    async fn matching_ignores_punctuation_and_case() {
        let dir = tempfile::tempdir().unwrap();
        let service = FixtureService::load(dir.path(), dir.path()).await.unwrap();
        assert!(service
            .match_ask("what ppe is required, please?")
            .is_some());
        assert!(service.match_ask("completely unrelated question").is_none());
    }

    #[tokio::test]
    async fn traces_append_jsonl_records() {
        let dir = tempfile::tempdir().unwrap();
        let service = FixtureService::load(dir.path(), dir.path()).await.unwrap();
        service.record_trace("ask", "sig-a", "corr-1").await.unwrap();
        service.record_trace("draft", "sig-b", "corr-2").await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("demo-traces.json"))
            .await
            .unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("corr-1"));
        assert!(content.contains("sig-b"));
    }
}
