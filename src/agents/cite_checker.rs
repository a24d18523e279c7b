//! Cite checker agent: citation validation and deterministic repair.
//!
//! For asks: `[#n]` markers are parsed out of the answer, every marker
//! must be in range, and at least 80% of non-empty paragraphs must carry
//! one. Invalid answers are repaired by appending markers sentence by
//! sentence. For drafts: policy/form/section-like references are
//! extracted into a validation result without modifying the letter.
//!
//! This stage is soft: the orchestrator never fails the pipeline on its
//! account.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::types::{PolicyValidationResult, RequestKind};

use super::{Agent, AgentContext, AgentError};

/// Minimum fraction of non-empty paragraphs that must carry a marker.
const COVERAGE_THRESHOLD: f64 = 0.8;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[#(\d+)\]").expect("static marker pattern"));

static REFERENCE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bPolicy\s+\d+(?:\.\d+)?\b").expect("static policy pattern"),
        Regex::new(r"(?i)\bSection\s+\d+(?:\.\d+)?\b").expect("static section pattern"),
        Regex::new(r"(?i)\bRegulation\s+\d+(?:\.\d+)?\b").expect("static regulation pattern"),
        Regex::new(r"(?i)\bForm\s+[A-Z0-9][A-Z0-9-]*\b").expect("static form pattern"),
        Regex::new(r"(?i)\bProcedure\s+[A-Z0-9][A-Z0-9-]*\b").expect("static procedure pattern"),
    ]
});

#[derive(Default)]
pub struct CiteCheckerAgent;

impl CiteCheckerAgent {
    pub fn new() -> Self {
        Self
    }

    /// Distinct marker numbers present in the content.
    fn markers(content: &str) -> BTreeSet<usize> {
        MARKER_RE
            .captures_iter(content)
            .filter_map(|caps| caps[1].parse().ok())
            .collect()
    }

    /// Fraction of non-empty paragraphs containing at least one marker.
    fn paragraph_coverage(content: &str) -> f64 {
        let paragraphs: Vec<&str> = content
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            return 0.0;
        }
        let covered = paragraphs
            .iter()
            .filter(|p| MARKER_RE.is_match(p))
            .count();
        covered as f64 / paragraphs.len() as f64
    }

    /// An answer is valid when at least one marker exists, every marker is
    /// in range, and paragraph coverage meets the threshold.
    fn has_valid_citations(content: &str, citation_count: usize) -> bool {
        let markers = Self::markers(content);
        if markers.is_empty() {
            return false;
        }
        if markers.iter().any(|&n| n == 0 || n > citation_count) {
            return false;
        }
        Self::paragraph_coverage(content) >= COVERAGE_THRESHOLD
    }

    /// Deterministic repair: each unmarked sentence receives `[#i]` with
    /// `i` its 1-based index, while citations remain.
    fn repair(content: &str, citation_count: usize) -> String {
        let trimmed = content.trim_end().trim_end_matches('.');
        let sentences: Vec<&str> = trimmed.split(". ").collect();
        let mut repaired: Vec<String> = Vec::with_capacity(sentences.len());
        for (i, sentence) in sentences.iter().enumerate() {
            let mut sentence = sentence.to_string();
            if !MARKER_RE.is_match(&sentence) && i < citation_count {
                sentence.push_str(&format!(" [#{}]", i + 1));
            }
            repaired.push(sentence);
        }
        let mut joined = repaired.join(". ");
        joined.push('.');
        joined
    }

    /// Pull policy/form/section-like references out of a letter body.
    fn extract_references(text: &str) -> Vec<String> {
        let mut references = Vec::new();
        for pattern in REFERENCE_RES.iter() {
            for found in pattern.find_iter(text) {
                let reference = found.as_str().to_string();
                if !references.contains(&reference) {
                    references.push(reference);
                }
            }
        }
        references
    }
}

#[async_trait]
impl Agent for CiteCheckerAgent {
    fn name(&self) -> &'static str {
        "cite_checker"
    }

    async fn run(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        match ctx.request_type {
            RequestKind::Draft => {
                let draft = ctx
                    .letter_draft
                    .as_ref()
                    .ok_or(AgentError::MissingInput { what: "letter_draft" })?;
                let mut references = Self::extract_references(&draft.body);
                let subject_references: Vec<String> = Self::extract_references(&draft.subject)
                    .into_iter()
                    .filter(|r| !references.contains(r))
                    .collect();
                references.extend(subject_references);
                ctx.policy_validation = Some(PolicyValidationResult { references });
            }
            _ => {
                let answer = ctx
                    .answer
                    .as_mut()
                    .ok_or(AgentError::MissingInput { what: "answer" })?;
                let citation_count = answer.citations.len();
                if citation_count == 0 {
                    return Ok(());
                }
                if !Self::has_valid_citations(&answer.content, citation_count) {
                    debug!("answer citations invalid, applying deterministic repair");
                    answer.content = Self::repair(&answer.content, citation_count);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Answer, Chunk, Citation, LetterDraft};

    fn citations(n: usize) -> Vec<Citation> {
        (1..=n)
            .map(|i| {
                let chunk = Chunk::new(format!("id{i}"), "text", "Title", "S", "p.md");
                Citation::from_chunk(i, &chunk, 0.8)
            })
            .collect()
    }

    #[test]
    fn marker_parsing_collects_distinct_numbers() {
        let markers = CiteCheckerAgent::markers("a [#1] b [#2] c [#1]");
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn validity_requires_range_and_coverage() {
        assert!(CiteCheckerAgent::has_valid_citations("All good [#1].", 2));
        // Out of range.
        assert!(!CiteCheckerAgent::has_valid_citations("Bad [#3].", 2));
        // No markers at all.
        assert!(!CiteCheckerAgent::has_valid_citations("No markers here.", 2));
        // Half the paragraphs uncovered.
        assert!(!CiteCheckerAgent::has_valid_citations(
            "Covered [#1].\n\nUncovered paragraph.",
            2
        ));
    }

    #[tokio::test]
    async fn repairs_invalid_answers() {
        let agent = CiteCheckerAgent::new();
        let mut ctx = AgentContext::new("corr");
        ctx.request_type = RequestKind::Ask;
        ctx.answer = Some(Answer {
            content: "Hard hats are required. Safety glasses are required.".to_string(),
            citations: citations(2),
        });

        agent.run(&mut ctx).await.unwrap();
        let content = &ctx.answer.unwrap().content;
        assert!(content.contains("[#1]"));
        assert!(content.contains("[#2]"));
        // Every marker in range.
        for n in CiteCheckerAgent::markers(content) {
            assert!(n >= 1 && n <= 2);
        }
    }

    #[tokio::test]
    async fn leaves_valid_answers_untouched() {
        let agent = CiteCheckerAgent::new();
        let content = "Hard hats are required on site [#1].";
        let mut ctx = AgentContext::new("corr");
        ctx.request_type = RequestKind::Ask;
        ctx.answer = Some(Answer {
            content: content.to_string(),
            citations: citations(1),
        });

        agent.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.answer.unwrap().content, content);
    }

    #[tokio::test]
    async fn extracts_draft_references() {
        let agent = CiteCheckerAgent::new();
        let mut ctx = AgentContext::new("corr");
        ctx.request_type = RequestKind::Draft;
        ctx.letter_draft = Some(LetterDraft {
            subject: "Re: Policy 12.3".to_string(),
            body: "Per Section 4.1 and Regulation 9, submit Form WS-101 and follow Procedure LOTO-2. See Policy 12.3 again."
                .to_string(),
            placeholders: vec![],
        });

        agent.run(&mut ctx).await.unwrap();
        let references = ctx.policy_validation.unwrap().references;
        assert!(references.iter().any(|r| r == "Section 4.1"));
        assert!(references.iter().any(|r| r == "Regulation 9"));
        assert!(references.iter().any(|r| r == "Form WS-101"));
        assert!(references.iter().any(|r| r == "Procedure LOTO-2"));
        // Deduplicated.
        assert_eq!(
            references.iter().filter(|r| r.as_str() == "Policy 12.3").count(),
            1
        );
        // Draft itself untouched.
        assert!(ctx.letter_draft.unwrap().body.contains("Form WS-101"));
    }
}
