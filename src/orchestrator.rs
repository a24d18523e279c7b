//! Request orchestration: the per-request state machine.
//!
//! ```text
//! Start → DemoShortCircuit? → AuditOpen → ModerateInput
//!       → Router → Retriever → Drafter → CiteChecker
//!       → ModerateOutput → Redact → AuditClose → MemoryUpdate → Reply
//! ```
//!
//! Router, retriever, and drafter are hard stages: a failure closes the
//! audit entry and fails the request. The cite checker, audit writes, and
//! memory updates are soft: once the artifact exists, nothing on those
//! paths may block the reply. Moderation provider failures degrade to
//! allow (the redaction layer is the second line of defense); moderation
//! *decisions* to block are hard.

use std::sync::Arc;
use std::time::Instant;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::agents::{
    Agent, AgentContext, AgentError, AgentRequest, CiteCheckerAgent, DrafterAgent, RetrieverAgent,
    RouterAgent,
};
use crate::audit::{AuditEntry, AuditOperation, AuditStore};
use crate::budget::estimate_tokens;
use crate::clients::{EmbeddingClient, LlmClient};
use crate::config::Settings;
use crate::fixtures::FixtureService;
use crate::memory::{MemoryStore, Turn};
use crate::moderation::{ModerationAction, ModerationResult, Moderator};
use crate::prompts::PromptRegistry;
use crate::redaction::Redactor;
use crate::types::{
    AgentTrace, Answer, AskRequest, AskResponse, DraftRequest, DraftResponse, ResponseMetadata,
};
use crate::vector::VectorStore;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    #[diagnostic(code(safetydesk::pipeline::validation))]
    Validation(String),

    #[error("no query parameter present on the request")]
    #[diagnostic(code(safetydesk::pipeline::no_query))]
    NoQuery,

    #[error("content blocked by {stage} moderation")]
    #[diagnostic(
        code(safetydesk::pipeline::moderation_blocked),
        help("The request or response content violated the configured content policy.")
    )]
    ModerationBlocked { stage: &'static str },

    #[error("{stage} stage failed: {source}")]
    #[diagnostic(code(safetydesk::pipeline::stage_failed))]
    StageFailed {
        stage: &'static str,
        #[source]
        source: AgentError,
    },

    #[error("{stage} stage timed out")]
    #[diagnostic(code(safetydesk::pipeline::timeout))]
    Timeout { stage: &'static str },

    #[error("pipeline produced no {what}")]
    #[diagnostic(code(safetydesk::pipeline::missing_artifact))]
    MissingArtifact { what: &'static str },

    #[error("pipeline bootstrap failed: {0}")]
    #[diagnostic(
        code(safetydesk::pipeline::bootstrap),
        help("Check backend configuration and connectivity before serving traffic.")
    )]
    Bootstrap(String),
}

/// The assembled pipeline and its collaborators.
pub struct Orchestrator {
    settings: Settings,
    llm: Arc<dyn LlmClient>,
    moderator: Arc<dyn Moderator>,
    redactor: Redactor,
    memory: Arc<dyn MemoryStore>,
    audit: Arc<dyn AuditStore>,
    registry: Arc<PromptRegistry>,
    fixtures: Option<Arc<FixtureService>>,
    router: RouterAgent,
    retriever: RetrieverAgent,
    drafter: DrafterAgent,
    cite_checker: CiteCheckerAgent,
}

/// Fluent constructor for [`Orchestrator`].
pub struct OrchestratorBuilder {
    settings: Settings,
    vector_store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    llm: Option<Arc<dyn LlmClient>>,
    moderator: Option<Arc<dyn Moderator>>,
    redactor: Option<Redactor>,
    memory: Option<Arc<dyn MemoryStore>>,
    audit: Option<Arc<dyn AuditStore>>,
    registry: Option<Arc<PromptRegistry>>,
    fixtures: Option<Arc<FixtureService>>,
}

impl OrchestratorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            vector_store: None,
            embedder: None,
            llm: None,
            moderator: None,
            redactor: None,
            memory: None,
            audit: None,
            registry: None,
            fixtures: None,
        }
    }

    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn moderator(mut self, moderator: Arc<dyn Moderator>) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn prompt_registry(mut self, registry: Arc<PromptRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn fixtures(mut self, fixtures: Arc<FixtureService>) -> Self {
        self.fixtures = Some(fixtures);
        self
    }

    /// Assemble the orchestrator. Missing collaborators are a programming
    /// error surfaced as `Validation`.
    pub fn build(self) -> Result<Orchestrator, PipelineError> {
        let missing =
            |what: &str| PipelineError::Validation(format!("orchestrator is missing {what}"));
        let vector_store = self.vector_store.ok_or_else(|| missing("a vector store"))?;
        let embedder = self.embedder.ok_or_else(|| missing("an embedding client"))?;
        let llm = self.llm.ok_or_else(|| missing("an LLM client"))?;
        let moderator = self.moderator.ok_or_else(|| missing("a moderator"))?;
        let memory = self.memory.ok_or_else(|| missing("a memory store"))?;
        let audit = self.audit.ok_or_else(|| missing("an audit store"))?;
        let registry = self.registry.unwrap_or_default();

        let router = RouterAgent::new(memory.clone());
        let retriever = RetrieverAgent::new(
            vector_store,
            embedder,
            self.settings.vector_search_top_k,
            self.settings.max_tokens_per_request,
        );
        let drafter = DrafterAgent::new(llm.clone(), registry.clone());

        Ok(Orchestrator {
            settings: self.settings,
            llm,
            moderator,
            redactor: self.redactor.unwrap_or_default(),
            memory,
            audit,
            registry,
            fixtures: self.fixtures,
            router,
            retriever,
            drafter,
            cite_checker: CiteCheckerAgent::new(),
        })
    }
}

impl Orchestrator {
    pub fn builder(settings: Settings) -> OrchestratorBuilder {
        OrchestratorBuilder::new(settings)
    }

    /// Assemble the whole pipeline from configuration: construct and
    /// initialize the configured backends, pick clients and moderator, and
    /// load demo fixtures when demo mode is on.
    pub async fn from_settings(settings: Settings) -> Result<Orchestrator, PipelineError> {
        let bootstrap = |err: &dyn std::fmt::Display| PipelineError::Bootstrap(err.to_string());

        let vector_store =
            crate::vector::create_vector_store(&settings).map_err(|e| bootstrap(&e))?;
        vector_store.initialize().await.map_err(|e| bootstrap(&e))?;

        let memory = crate::memory::create_memory_store(&settings).map_err(|e| bootstrap(&e))?;
        memory.initialize().await.map_err(|e| bootstrap(&e))?;

        let embedder =
            crate::clients::create_embedding_client(&settings).map_err(|e| bootstrap(&e))?;
        let llm = crate::clients::create_llm_client(&settings).map_err(|e| bootstrap(&e))?;
        let moderator = crate::moderation::create_moderator(&settings);

        let fixtures = if settings.demo_mode {
            Some(Arc::new(
                FixtureService::load(&settings.fixtures_path, &settings.trace_path)
                    .await
                    .map_err(|e| bootstrap(&e))?,
            ))
        } else {
            None
        };

        let mut builder = Orchestrator::builder(settings)
            .vector_store(vector_store)
            .embedder(embedder)
            .llm(llm)
            .moderator(moderator)
            .memory(memory)
            .audit(Arc::new(crate::audit::InMemoryAuditStore::new()));
        if let Some(fixtures) = fixtures {
            builder = builder.fixtures(fixtures);
        }
        builder.build()
    }

    /// Answer a question through the full pipeline.
    #[instrument(skip(self, request), fields(question_len = request.question.len()))]
    pub async fn process_ask(&self, request: AskRequest) -> Result<AskResponse, PipelineError> {
        let started = Instant::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if request.question.trim().is_empty() {
            return Err(PipelineError::Validation(
                "question must not be empty".to_string(),
            ));
        }

        if self.settings.demo_mode {
            if let Some(response) = self.try_ask_fixture(&request, &correlation_id).await {
                return Ok(response);
            }
        }

        let mut inputs = FxHashMap::default();
        inputs.insert("question".to_string(), json!(request.question));
        if let Some(conversation_id) = &request.conversation_id {
            inputs.insert("conversation_id".to_string(), json!(conversation_id));
        }
        let audit_id = self
            .open_audit(
                AuditOperation::Ask,
                request.user_id.clone(),
                &correlation_id,
                inputs,
            )
            .await;

        let outcome = match timeout(
            self.settings.request_timeout,
            self.run_ask(&request, &correlation_id, audit_id, started),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::Timeout { stage: "request" }),
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                self.close_audit_error(audit_id, &err, started).await;
                Err(err)
            }
        }
    }

    /// Draft a letter through the full pipeline.
    #[instrument(skip(self, request), fields(purpose_len = request.purpose.len()))]
    pub async fn process_draft(
        &self,
        request: DraftRequest,
    ) -> Result<DraftResponse, PipelineError> {
        let started = Instant::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if request.purpose.trim().is_empty() {
            return Err(PipelineError::Validation(
                "purpose must not be empty".to_string(),
            ));
        }

        if self.settings.demo_mode {
            if let Some(response) = self.try_letter_fixture(&request, &correlation_id).await {
                return Ok(response);
            }
        }

        let mut inputs = FxHashMap::default();
        inputs.insert("purpose".to_string(), json!(request.purpose));
        inputs.insert("points".to_string(), json!(request.points));
        let audit_id = self
            .open_audit(
                AuditOperation::Draft,
                request.user_id.clone(),
                &correlation_id,
                inputs,
            )
            .await;

        let outcome = match timeout(
            self.settings.request_timeout,
            self.run_draft(&request, &correlation_id, audit_id, started),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::Timeout { stage: "request" }),
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(err) => {
                self.close_audit_error(audit_id, &err, started).await;
                Err(err)
            }
        }
    }

    /// Run the retention sweeps: audit entries older than the configured
    /// retention and conversations idle past the TTL. Returns how many of
    /// each were removed. Intended to be scheduled by the host process.
    pub async fn run_maintenance(&self) -> (usize, usize) {
        let audit_removed = match self
            .audit
            .cleanup_older_than(chrono::Duration::days(self.settings.audit_retention_days))
            .await
        {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "audit retention sweep failed");
                0
            }
        };
        let conversations_removed = match self
            .memory
            .cleanup_expired(chrono::Duration::hours(self.settings.conversation_ttl_hours))
            .await
        {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "conversation TTL sweep failed");
                0
            }
        };
        (audit_removed, conversations_removed)
    }

    // -- pipeline bodies -----------------------------------------------------

    async fn run_ask(
        &self,
        request: &AskRequest,
        correlation_id: &str,
        audit_id: Option<Uuid>,
        started: Instant,
    ) -> Result<AskResponse, PipelineError> {
        let mut warnings = Vec::new();

        let input_moderation = self.moderate_or_allow(&request.question).await;
        self.record_moderation(audit_id, "input_moderation", &input_moderation)
            .await;
        match input_moderation.action {
            ModerationAction::Block => {
                return Err(PipelineError::ModerationBlocked { stage: "input" });
            }
            ModerationAction::AllowWithWarning => {
                warnings.push("input content flagged by moderation".to_string());
            }
            ModerationAction::Allow => {}
        }

        let mut ctx = AgentContext::new(correlation_id);
        ctx.request = Some(AgentRequest::Ask(request.clone()));
        ctx.audit_id = audit_id;

        let mut traces = Vec::new();
        self.run_hard_stage(&self.router, &mut ctx, &mut traces).await?;
        self.run_hard_stage(&self.retriever, &mut ctx, &mut traces).await?;
        self.run_hard_stage(&self.drafter, &mut ctx, &mut traces).await?;
        self.run_soft_stage(&self.cite_checker, &mut ctx, &mut traces).await;

        let answer = ctx
            .answer
            .take()
            .ok_or(PipelineError::MissingArtifact { what: "answer" })?;

        let answer = self
            .finish_output(audit_id, answer.content, &mut warnings)
            .await
            .map(|content| Answer {
                content,
                citations: answer.citations,
            })?;

        self.finalize_audit_ask(audit_id, &ctx, &answer, started).await;

        if let Some(conversation_id) = &ctx.conversation_id {
            let citation_ids = answer.citations.iter().map(|c| c.id.clone()).collect();
            if let Err(err) = self
                .memory
                .append_turn(
                    conversation_id,
                    ctx.user_id.as_deref(),
                    Turn::new(&request.question, &answer.content, citation_ids),
                )
                .await
            {
                warn!(error = %err, "conversation memory update failed");
            }
        }

        let metadata = self.metadata(
            correlation_id,
            ctx.prompt_hash.as_deref(),
            traces,
            warnings,
            request.include_metadata,
        );
        Ok(AskResponse {
            answer: answer.content,
            citations: answer.citations,
            metadata,
        })
    }

    async fn run_draft(
        &self,
        request: &DraftRequest,
        correlation_id: &str,
        audit_id: Option<Uuid>,
        started: Instant,
    ) -> Result<DraftResponse, PipelineError> {
        let mut warnings = Vec::new();

        let input_moderation = self.moderate_or_allow(&request.purpose).await;
        self.record_moderation(audit_id, "input_moderation", &input_moderation)
            .await;
        match input_moderation.action {
            ModerationAction::Block => {
                return Err(PipelineError::ModerationBlocked { stage: "input" });
            }
            ModerationAction::AllowWithWarning => {
                warnings.push("input content flagged by moderation".to_string());
            }
            ModerationAction::Allow => {}
        }

        let mut ctx = AgentContext::new(correlation_id);
        ctx.request = Some(AgentRequest::Draft(request.clone()));
        ctx.audit_id = audit_id;

        let mut traces = Vec::new();
        self.run_hard_stage(&self.router, &mut ctx, &mut traces).await?;
        self.run_hard_stage(&self.retriever, &mut ctx, &mut traces).await?;
        self.run_hard_stage(&self.drafter, &mut ctx, &mut traces).await?;
        self.run_soft_stage(&self.cite_checker, &mut ctx, &mut traces).await;

        let mut draft = ctx
            .letter_draft
            .take()
            .ok_or(PipelineError::MissingArtifact { what: "letter draft" })?;

        draft.body = self
            .finish_output(audit_id, draft.body, &mut warnings)
            .await?;

        if let Some(id) = audit_id {
            if let Some(hash) = ctx.prompt_hash.as_deref() {
                if let Err(err) = self.audit.set_prompt_hash(id, hash).await {
                    warn!(error = %err, "audit prompt hash write failed");
                }
            }
            let mut outputs = FxHashMap::default();
            outputs.insert(
                "response".to_string(),
                json!({
                    "subject": draft.subject,
                    "body": draft.body,
                    "placeholders": draft.placeholders,
                    "references": ctx
                        .policy_validation
                        .as_ref()
                        .map(|v| v.references.clone())
                        .unwrap_or_default(),
                }),
            );
            let cited = ctx
                .search_results
                .iter()
                .map(|hit| hit.chunk.id.clone())
                .collect();
            if let Err(err) = self
                .audit
                .append_outputs(id, outputs, cited, started.elapsed().as_millis() as u64)
                .await
            {
                warn!(error = %err, "audit close failed after draft was produced");
            }
        }

        if let Some(conversation_id) = &ctx.conversation_id {
            let note = format!("Generated letter: {}", draft.subject);
            if let Err(err) = self
                .memory
                .append_turn(
                    conversation_id,
                    ctx.user_id.as_deref(),
                    Turn::new(&request.purpose, note, vec![]),
                )
                .await
            {
                warn!(error = %err, "conversation memory update failed");
            }
        }

        let metadata = self.metadata(
            correlation_id,
            ctx.prompt_hash.as_deref(),
            traces,
            warnings,
            request.include_metadata,
        );
        Ok(DraftResponse {
            subject: draft.subject,
            body: draft.body,
            placeholders: draft.placeholders,
            metadata,
        })
    }

    // -- stage execution -----------------------------------------------------

    async fn run_hard_stage(
        &self,
        agent: &dyn Agent,
        ctx: &mut AgentContext,
        traces: &mut Vec<AgentTrace>,
    ) -> Result<(), PipelineError> {
        let stage = agent.name();
        let stage_started = Instant::now();
        let outcome = timeout(self.settings.stage_timeout, agent.run(ctx)).await;
        let duration_ms = stage_started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                let trace =
                    AgentTrace::new(stage, "run", Self::stage_detail(stage, ctx), duration_ms);
                self.record_trace(ctx.audit_id, &trace).await;
                traces.push(trace);
                Ok(())
            }
            Ok(Err(err)) => {
                let trace = AgentTrace::new(
                    stage,
                    "run",
                    json!({ "error": err.to_string() }),
                    duration_ms,
                );
                self.record_trace(ctx.audit_id, &trace).await;
                traces.push(trace);
                if matches!(err, AgentError::NoQuery) {
                    Err(PipelineError::NoQuery)
                } else {
                    Err(PipelineError::StageFailed { stage, source: err })
                }
            }
            Err(_) => Err(PipelineError::Timeout { stage }),
        }
    }

    /// Soft stage: failures and timeouts are logged and traced, never
    /// propagated. The unchecked artifact proceeds.
    async fn run_soft_stage(
        &self,
        agent: &dyn Agent,
        ctx: &mut AgentContext,
        traces: &mut Vec<AgentTrace>,
    ) {
        let stage = agent.name();
        let stage_started = Instant::now();
        let outcome = timeout(self.settings.stage_timeout, agent.run(ctx)).await;
        let duration_ms = stage_started.elapsed().as_millis() as u64;

        let detail = match &outcome {
            Ok(Ok(())) => Self::stage_detail(stage, ctx),
            Ok(Err(err)) => {
                warn!(stage, error = %err, "soft stage failed, continuing with unchecked artifact");
                json!({ "error": err.to_string() })
            }
            Err(_) => {
                warn!(stage, "soft stage timed out, continuing with unchecked artifact");
                json!({ "error": "timed out" })
            }
        };
        let trace = AgentTrace::new(stage, "run", detail, duration_ms);
        self.record_trace(ctx.audit_id, &trace).await;
        traces.push(trace);
    }

    fn stage_detail(stage: &str, ctx: &AgentContext) -> serde_json::Value {
        match stage {
            "router" => json!({
                "request_type": ctx.request_type.as_str(),
                "conversation_loaded": ctx.conversation.is_some(),
                "persona_loaded": ctx.persona.is_some(),
            }),
            "retriever" => json!({
                "candidates": ctx.search_results.len(),
                "accepted": ctx.context_chunks.len(),
            }),
            "drafter" => json!({ "prompt_hash": ctx.prompt_hash }),
            "cite_checker" => json!({
                "citations": ctx.citations.len(),
                "references": ctx
                    .policy_validation
                    .as_ref()
                    .map(|v| v.references.len()),
            }),
            _ => json!({}),
        }
    }

    // -- governance helpers --------------------------------------------------

    /// Moderate, degrading provider errors to allow with a logged warning.
    async fn moderate_or_allow(&self, text: &str) -> ModerationResult {
        match self.moderator.moderate(text).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "moderation provider failed, degrading to allow");
                ModerationResult::allow()
            }
        }
    }

    /// Output moderation plus redaction; returns the final body text.
    async fn finish_output(
        &self,
        audit_id: Option<Uuid>,
        content: String,
        warnings: &mut Vec<String>,
    ) -> Result<String, PipelineError> {
        let output_moderation = self.moderate_or_allow(&content).await;
        self.record_moderation(audit_id, "output_moderation", &output_moderation)
            .await;
        match output_moderation.action {
            ModerationAction::Block => {
                return Err(PipelineError::ModerationBlocked { stage: "output" });
            }
            ModerationAction::AllowWithWarning => {
                warnings.push("output content flagged by moderation".to_string());
            }
            ModerationAction::Allow => {}
        }

        if !self.settings.redaction_enabled {
            return Ok(content);
        }
        let result = self.redactor.redact(&content);
        Ok(result.redacted)
    }

    async fn record_moderation(
        &self,
        audit_id: Option<Uuid>,
        stage: &str,
        result: &ModerationResult,
    ) {
        if let Some(id) = audit_id {
            if let Err(err) = self.audit.set_moderation(id, stage, result.clone()).await {
                warn!(error = %err, stage, "audit moderation write failed");
            }
        }
    }

    async fn record_trace(&self, audit_id: Option<Uuid>, trace: &AgentTrace) {
        if let Some(id) = audit_id {
            if let Err(err) = self.audit.append_trace(id, trace.clone()).await {
                warn!(error = %err, "audit trace write failed");
            }
        }
    }

    // -- audit lifecycle -----------------------------------------------------

    async fn open_audit(
        &self,
        operation: AuditOperation,
        user_id: Option<String>,
        correlation_id: &str,
        inputs: FxHashMap<String, serde_json::Value>,
    ) -> Option<Uuid> {
        let entry = AuditEntry::open(
            operation,
            user_id,
            correlation_id,
            self.llm.model_id(),
            inputs,
        );
        match self.audit.open(entry).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(error = %err, "audit open failed, continuing without audit id");
                None
            }
        }
    }

    async fn finalize_audit_ask(
        &self,
        audit_id: Option<Uuid>,
        ctx: &AgentContext,
        answer: &Answer,
        started: Instant,
    ) {
        let Some(id) = audit_id else { return };
        if let Some(hash) = ctx.prompt_hash.as_deref() {
            if let Err(err) = self.audit.set_prompt_hash(id, hash).await {
                warn!(error = %err, "audit prompt hash write failed");
            }
            if let Some(version) = self.registry.get_by_hash(hash) {
                let input_tokens = estimate_tokens(&version.content);
                let output_tokens = estimate_tokens(&answer.content);
                if let Err(err) = self
                    .audit
                    .set_token_usage(id, input_tokens, output_tokens)
                    .await
                {
                    warn!(error = %err, "audit token usage write failed");
                }
            }
        }
        let mut outputs = FxHashMap::default();
        outputs.insert(
            "response".to_string(),
            json!({
                "answer": answer.content,
                "citations": answer.citations,
            }),
        );
        let cited = ctx
            .search_results
            .iter()
            .map(|hit| hit.chunk.id.clone())
            .collect();
        if let Err(err) = self
            .audit
            .append_outputs(id, outputs, cited, started.elapsed().as_millis() as u64)
            .await
        {
            warn!(error = %err, "audit close failed after answer was produced");
        }
    }

    /// Close the audit entry on a failed request without leaking content.
    async fn close_audit_error(
        &self,
        audit_id: Option<Uuid>,
        error: &PipelineError,
        started: Instant,
    ) {
        let Some(id) = audit_id else { return };
        let mut outputs = FxHashMap::default();
        outputs.insert("error".to_string(), json!(error.to_string()));
        if let Err(err) = self
            .audit
            .append_outputs(id, outputs, vec![], started.elapsed().as_millis() as u64)
            .await
        {
            warn!(error = %err, "audit error close failed");
        }
    }

    // -- demo fixtures -------------------------------------------------------

    async fn try_ask_fixture(
        &self,
        request: &AskRequest,
        correlation_id: &str,
    ) -> Option<AskResponse> {
        let fixtures = self.fixtures.as_ref()?;
        let fixture = fixtures.match_ask(&request.question)?.clone();
        let signature = FixtureService::signature(&request.question);
        if let Err(err) = fixtures.record_trace("ask", &signature, correlation_id).await {
            warn!(error = %err, "demo trace write failed");
        }

        // Auditing still records the short-circuit.
        let mut inputs = FxHashMap::default();
        inputs.insert("question".to_string(), json!(request.question));
        inputs.insert("demo_short_circuit".to_string(), json!(true));
        if let Some(id) = self
            .open_audit(
                AuditOperation::Ask,
                request.user_id.clone(),
                correlation_id,
                inputs,
            )
            .await
        {
            let _ = self.audit.set_prompt_hash(id, &fixture.prompt_sha).await;
            let mut outputs = FxHashMap::default();
            outputs.insert(
                "response".to_string(),
                json!({ "answer": fixture.answer, "citations": fixture.citations }),
            );
            if let Err(err) = self.audit.append_outputs(id, outputs, vec![], 0).await {
                warn!(error = %err, "audit close failed for demo short-circuit");
            }
        }

        Some(AskResponse {
            answer: fixture.answer.clone(),
            citations: fixture.citations.clone(),
            metadata: ResponseMetadata {
                processing_time_ms: 0,
                prompt_sha: fixture.prompt_sha.clone(),
                correlation_id: correlation_id.to_string(),
                timestamp: chrono::Utc::now(),
                agent_traces: Vec::new(),
                warnings: Vec::new(),
            },
        })
    }

    async fn try_letter_fixture(
        &self,
        request: &DraftRequest,
        correlation_id: &str,
    ) -> Option<DraftResponse> {
        let fixtures = self.fixtures.as_ref()?;
        let fixture = fixtures.match_letter(&request.purpose)?.clone();
        let signature = FixtureService::signature(&request.purpose);
        if let Err(err) = fixtures
            .record_trace("draft", &signature, correlation_id)
            .await
        {
            warn!(error = %err, "demo trace write failed");
        }

        let mut inputs = FxHashMap::default();
        inputs.insert("purpose".to_string(), json!(request.purpose));
        inputs.insert("demo_short_circuit".to_string(), json!(true));
        if let Some(id) = self
            .open_audit(
                AuditOperation::Draft,
                request.user_id.clone(),
                correlation_id,
                inputs,
            )
            .await
        {
            let _ = self.audit.set_prompt_hash(id, &fixture.prompt_sha).await;
            let mut outputs = FxHashMap::default();
            outputs.insert(
                "response".to_string(),
                json!({ "subject": fixture.subject, "body": fixture.body }),
            );
            if let Err(err) = self.audit.append_outputs(id, outputs, vec![], 0).await {
                warn!(error = %err, "audit close failed for demo short-circuit");
            }
        }

        Some(DraftResponse {
            subject: fixture.subject.clone(),
            body: fixture.body.clone(),
            placeholders: fixture.placeholders.clone(),
            metadata: ResponseMetadata {
                processing_time_ms: 0,
                prompt_sha: fixture.prompt_sha.clone(),
                correlation_id: correlation_id.to_string(),
                timestamp: chrono::Utc::now(),
                agent_traces: Vec::new(),
                warnings: Vec::new(),
            },
        })
    }

    // -- response assembly ---------------------------------------------------

    fn metadata(
        &self,
        correlation_id: &str,
        prompt_hash: Option<&str>,
        traces: Vec<AgentTrace>,
        warnings: Vec<String>,
        include_traces: bool,
    ) -> ResponseMetadata {
        let processing_time_ms = traces.iter().map(|t| t.duration_ms).sum();
        ResponseMetadata {
            processing_time_ms,
            prompt_sha: prompt_hash.unwrap_or("PENDING").to_string(),
            correlation_id: correlation_id.to_string(),
            timestamp: chrono::Utc::now(),
            agent_traces: if include_traces { traces } else { Vec::new() },
            warnings,
        }
    }
}
