//! Drafter agent: prompt assembly, LLM call, artifact shaping.
//!
//! For asks the agent assembles the full grounded-answer prompt, records
//! it in the prompt registry (the returned hash is the request's
//! `prompt_sha`), calls the LLM, and backfills citation markers the model
//! omitted. For drafts it requests strict JSON and parses defensively,
//! falling back to a raw-body letter when the model returns prose.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::clients::LlmClient;
use crate::prompts::PromptRegistry;
use crate::types::{Answer, LetterDraft, RequestKind};

use super::{Agent, AgentContext, AgentError};

/// Prompt registry names for the two templates.
pub const ASK_PROMPT_NAME: &str = "ask_answer";
pub const LETTER_PROMPT_NAME: &str = "letter_draft";

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[#\d+\]").expect("static marker pattern"));

pub struct DrafterAgent {
    llm: Arc<dyn LlmClient>,
    registry: Arc<PromptRegistry>,
}

impl DrafterAgent {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<PromptRegistry>) -> Self {
        Self { llm, registry }
    }

    fn build_ask_prompt(ctx: &AgentContext, question: &str) -> String {
        let mut prompt = String::from(
            "You are a safety assistant for occupational health and safety questions.\n",
        );

        prompt.push_str("\nContext:\n");
        if ctx.context_chunks.is_empty() {
            prompt.push_str("(no relevant context was found)\n");
        } else {
            prompt.push_str(&ctx.context_chunks.join("\n\n"));
            prompt.push('\n');
        }

        if let Some(conversation) = &ctx.conversation {
            if !conversation.turns.is_empty() {
                prompt.push_str("\nRecent conversation:\n");
                prompt.push_str(&conversation.recent_context(2));
                prompt.push('\n');
            }
        }

        if let Some(persona) = &ctx.persona {
            prompt.push('\n');
            prompt.push_str(&persona.prompt_line());
            prompt.push('\n');
        }

        prompt.push_str(&format!("\nQuestion: {question}\n"));
        prompt.push_str(
            "\nInstructions:\n\
             - Answer using only the provided context.\n\
             - Mark every factual claim with a citation marker such as [#1].\n\
             - If the context does not contain the answer, reply exactly: \
             I do not have sufficient information to answer this question.\n\
             - Keep the response under 300 words.\n\
             - Use a neutral, professional tone.\n",
        );
        prompt
    }

    fn build_letter_prompt(ctx: &AgentContext, purpose: &str) -> String {
        let recipient = ctx.parameter("recipient").unwrap_or("the recipient");
        let tone = ctx.parameter("tone").unwrap_or("formal");
        let points = ctx.parameter("points").unwrap_or("");

        let mut prompt = String::from(
            "You are drafting a formal occupational health and safety letter.\n",
        );
        prompt.push_str(&format!(
            "\nPurpose: {purpose}\nRecipient: {recipient}\nTone: {tone}\n"
        ));
        if !points.is_empty() {
            prompt.push_str("\nKey points that must appear verbatim in the body:\n");
            for point in points.lines() {
                prompt.push_str(&format!("- {point}\n"));
            }
        }
        if !ctx.context_chunks.is_empty() {
            prompt.push_str("\nRelevant policy context:\n");
            prompt.push_str(&ctx.context_chunks.join("\n\n"));
            prompt.push('\n');
        }
        prompt.push_str(
            "\nRespond with a single JSON object with exactly these keys:\n\
             \"subject\": the letter subject line,\n\
             \"body\": the letter body, using double-brace placeholders such as \
             {{recipient_name}} (always include {{recipient_name}} and {{sender_name}}),\n\
             \"placeholders\": the list of placeholder names used in the body.\n\
             Return only the JSON object.\n",
        );
        prompt
    }

    /// Make sure every marker `[#1]..[#N]` eventually appears.
    ///
    /// Sentences that carry no marker receive the missing markers in order;
    /// anything still left over is appended at the end.
    fn backfill_markers(content: &str, citation_count: usize) -> String {
        if citation_count == 0 {
            return content.to_string();
        }
        let mut missing: Vec<usize> = (1..=citation_count)
            .filter(|k| !content.contains(&format!("[#{k}]")))
            .collect();
        if missing.is_empty() {
            return content.to_string();
        }

        let trimmed = content.trim_end().trim_end_matches('.');
        let mut sentences: Vec<String> =
            trimmed.split(". ").map(|s| s.to_string()).collect();
        let mut pending = missing.drain(..);
        let mut leftover: Vec<usize> = Vec::new();
        for sentence in sentences.iter_mut() {
            if !MARKER_RE.is_match(sentence) {
                match pending.next() {
                    Some(k) => sentence.push_str(&format!(" [#{k}]")),
                    None => break,
                }
            }
        }
        leftover.extend(pending);

        let mut repaired = sentences.join(". ");
        repaired.push('.');
        for k in leftover {
            repaired.push_str(&format!(" [#{k}]"));
        }
        repaired
    }

    /// Strip optional Markdown code fences around a JSON reply.
    fn strip_code_fences(raw: &str) -> &str {
        let trimmed = raw.trim();
        let Some(unfenced) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let unfenced = unfenced.strip_prefix("json").unwrap_or(unfenced);
        let unfenced = unfenced.strip_suffix("```").unwrap_or(unfenced);
        unfenced.trim()
    }

    fn parse_letter(raw: &str, purpose: &str) -> LetterDraft {
        let candidate = Self::strip_code_fences(raw);
        match serde_json::from_str::<LetterDraft>(candidate) {
            Ok(draft) => draft,
            Err(err) => {
                debug!(error = %err, "letter reply was not valid JSON, using raw body");
                LetterDraft {
                    subject: format!("Regarding: {purpose}"),
                    body: raw.trim().to_string(),
                    placeholders: LetterDraft::default_placeholders(),
                }
            }
        }
    }

    async fn draft_answer(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        let question = ctx
            .parameter("question")
            .ok_or(AgentError::MissingInput { what: "question" })?
            .to_string();
        let prompt = Self::build_ask_prompt(ctx, &question);
        let prompt_hash = self.registry.store(&prompt, ASK_PROMPT_NAME);
        let reply = self.llm.complete(&prompt).await?;
        let content = Self::backfill_markers(&reply, ctx.citations.len());
        ctx.answer = Some(Answer {
            content,
            citations: ctx.citations.clone(),
        });
        ctx.prompt_hash = Some(prompt_hash);
        Ok(())
    }

    async fn draft_letter(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        let purpose = ctx
            .parameter("purpose")
            .ok_or(AgentError::MissingInput { what: "purpose" })?
            .to_string();
        let prompt = Self::build_letter_prompt(ctx, &purpose);
        let prompt_hash = self.registry.store(&prompt, LETTER_PROMPT_NAME);
        let reply = self.llm.complete(&prompt).await?;
        ctx.letter_draft = Some(Self::parse_letter(&reply, &purpose));
        ctx.prompt_hash = Some(prompt_hash);
        Ok(())
    }
}

#[async_trait]
impl Agent for DrafterAgent {
    fn name(&self) -> &'static str {
        "drafter"
    }

    async fn run(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        match ctx.request_type {
            RequestKind::Draft => self.draft_letter(ctx).await,
            _ => self.draft_answer(ctx).await,
        }
    }
}
