//! Content moderation.
//!
//! Two moderators implement the same [`Moderator`] capability: a
//! deterministic keyword-scored local variant used in demo mode and tests,
//! and an Azure Content Safety HTTP adapter. Both produce a
//! [`ModerationResult`] with per-category severities in `[0, 6]` and an
//! action derived from the overall severity level: `High` blocks,
//! `Medium`/`Low` allow with a warning, `Safe` allows silently.
//!
//! Provider failures are not handled here; the orchestrator degrades them
//! to `Allow` with a logged warning so availability does not hinge on the
//! moderation provider, with the redaction layer as the second line of
//! defense.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ModerationError {
    #[error("moderation provider error ({provider}): {message}")]
    #[diagnostic(code(safetydesk::moderation::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("moderation response could not be parsed: {0}")]
    #[diagnostic(code(safetydesk::moderation::parse))]
    Parse(String),
}

/// Disposition for a piece of content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModerationAction {
    Allow,
    AllowWithWarning,
    Block,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Allow => "Allow",
            ModerationAction::AllowWithWarning => "AllowWithWarning",
            ModerationAction::Block => "Block",
        }
    }
}

/// Coarse severity level derived from a numeric severity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeverityLevel {
    #[default]
    Safe,
    Low,
    Medium,
    High,
}

impl SeverityLevel {
    /// Map a numeric severity in `[0, 6]` to its level band.
    pub fn from_severity(severity: u8) -> Self {
        match severity {
            0 => SeverityLevel::Safe,
            1..=2 => SeverityLevel::Low,
            3..=4 => SeverityLevel::Medium,
            _ => SeverityLevel::High,
        }
    }
}

/// One scored moderation category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationCategory {
    pub name: String,
    /// Severity in `[0, 6]`.
    pub severity: u8,
    pub level: SeverityLevel,
}

impl ModerationCategory {
    pub fn new(name: impl Into<String>, severity: u8) -> Self {
        let severity = severity.min(6);
        Self {
            name: name.into(),
            severity,
            level: SeverityLevel::from_severity(severity),
        }
    }
}

/// Outcome of moderating one piece of content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,
    pub action: ModerationAction,
    pub categories: Vec<ModerationCategory>,
    pub overall_severity: u8,
}

impl ModerationResult {
    /// Derive the result from scored categories and the configured
    /// flagging threshold.
    pub fn from_categories(categories: Vec<ModerationCategory>, threshold: SeverityLevel) -> Self {
        let overall_severity = categories.iter().map(|c| c.severity).max().unwrap_or(0);
        let overall_level = SeverityLevel::from_severity(overall_severity);
        let action = match overall_level {
            SeverityLevel::High => ModerationAction::Block,
            SeverityLevel::Medium | SeverityLevel::Low => ModerationAction::AllowWithWarning,
            SeverityLevel::Safe => ModerationAction::Allow,
        };
        Self {
            flagged: overall_level >= threshold && overall_level != SeverityLevel::Safe,
            action,
            categories,
            overall_severity,
        }
    }

    /// A clean pass, used when moderation degrades on provider failure.
    pub fn allow() -> Self {
        Self {
            flagged: false,
            action: ModerationAction::Allow,
            categories: Vec::new(),
            overall_severity: 0,
        }
    }
}

/// Construct the configured moderator: Azure Content Safety when
/// coordinates are present, the local keyword moderator otherwise.
pub fn create_moderator(settings: &crate::config::Settings) -> std::sync::Arc<dyn Moderator> {
    match &settings.content_safety {
        Some(cs) => std::sync::Arc::new(ContentSafetyModerator::new(
            cs.endpoint.clone(),
            cs.api_key.clone(),
            settings.moderation_threshold,
        )),
        None => std::sync::Arc::new(KeywordModerator::new(settings.moderation_threshold)),
    }
}

/// Capability every moderation backend implements.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationResult, ModerationError>;

    /// Whether the backing provider is reachable. Must not error.
    async fn health_check(&self) -> bool {
        true
    }
}

// ============================================================================
// Local keyword moderator
// ============================================================================

/// Deterministic keyword-scored moderator.
///
/// Severity is assigned by a fixed keyword table, which keeps demo-mode and
/// test behavior reproducible. Matching is case-insensitive on word
/// substrings.
pub struct KeywordModerator {
    threshold: SeverityLevel,
    table: Vec<(&'static str, &'static str, u8)>,
}

impl KeywordModerator {
    pub fn new(threshold: SeverityLevel) -> Self {
        Self {
            threshold,
            table: vec![
                ("dangerous", "violence", 6),
                ("weapon", "violence", 6),
                ("explosive", "violence", 6),
                ("kill", "violence", 5),
                ("attack", "violence", 4),
                ("injury", "violence", 2),
                ("accident", "violence", 1),
                ("harass", "hate", 4),
                ("discriminat", "hate", 3),
                ("suicide", "self_harm", 6),
                ("self-harm", "self_harm", 5),
            ],
        }
    }
}

#[async_trait]
impl Moderator for KeywordModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationResult, ModerationError> {
        let lowered = text.to_lowercase();
        let mut categories: Vec<ModerationCategory> = Vec::new();
        for (needle, category, severity) in &self.table {
            if lowered.contains(needle) {
                match categories.iter_mut().find(|c| c.name == *category) {
                    Some(existing) if existing.severity < *severity => {
                        *existing = ModerationCategory::new(*category, *severity);
                    }
                    Some(_) => {}
                    None => categories.push(ModerationCategory::new(*category, *severity)),
                }
            }
        }
        Ok(ModerationResult::from_categories(categories, self.threshold))
    }
}

// ============================================================================
// Azure Content Safety adapter
// ============================================================================

#[derive(Serialize)]
struct AnalyzeTextRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AnalyzeTextResponse {
    #[serde(rename = "categoriesAnalysis", default)]
    categories_analysis: Vec<CategoryAnalysis>,
}

#[derive(Deserialize)]
struct CategoryAnalysis {
    category: String,
    #[serde(default)]
    severity: u8,
}

/// Azure Content Safety `text:analyze` adapter.
pub struct ContentSafetyModerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    threshold: SeverityLevel,
}

impl ContentSafetyModerator {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, threshold: SeverityLevel) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: "2023-10-01".to_string(),
            threshold,
        }
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/contentsafety/text:analyze?api-version={}",
            self.endpoint, self.api_version
        )
    }
}

#[async_trait]
impl Moderator for ContentSafetyModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationResult, ModerationError> {
        let response = self
            .http
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&AnalyzeTextRequest { text })
            .send()
            .await
            .map_err(|err| ModerationError::Provider {
                provider: "content-safety",
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ModerationError::Provider {
                provider: "content-safety",
                message: format!("analyze returned {}", response.status()),
            });
        }

        let parsed: AnalyzeTextResponse = response
            .json()
            .await
            .map_err(|err| ModerationError::Parse(err.to_string()))?;

        let categories = parsed
            .categories_analysis
            .into_iter()
            .map(|c| ModerationCategory::new(c.category, c.severity))
            .collect();
        Ok(ModerationResult::from_categories(categories, self.threshold))
    }

    async fn health_check(&self) -> bool {
        self.moderate("health probe").await.is_ok()
    }
}
