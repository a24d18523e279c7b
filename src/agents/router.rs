//! Router agent: request classification and memory loading.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::memory::MemoryStore;
use crate::types::RequestKind;

use super::{Agent, AgentContext, AgentError, AgentRequest};

/// First stage: inspects the request placed on the context, classifies it,
/// extracts its public fields into the parameter map, and loads
/// conversation/persona memory when ids are present.
pub struct RouterAgent {
    memory: Arc<dyn MemoryStore>,
}

impl RouterAgent {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Agent for RouterAgent {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn run(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        let request = ctx
            .request
            .as_ref()
            .ok_or(AgentError::MissingInput { what: "request" })?;

        match request {
            AgentRequest::Ask(ask) => {
                ctx.request_type = RequestKind::Ask;
                ctx.parameters
                    .insert("question".to_string(), ask.question.clone());
                if let Some(top_k) = ask.top_k {
                    ctx.parameters.insert("top_k".to_string(), top_k.to_string());
                }
                if let Some(max_tokens) = ask.max_tokens {
                    ctx.parameters
                        .insert("max_tokens".to_string(), max_tokens.to_string());
                }
                ctx.conversation_id = ask.conversation_id.clone();
                ctx.user_id = ask.user_id.clone();
            }
            AgentRequest::Draft(draft) => {
                ctx.request_type = RequestKind::Draft;
                ctx.parameters
                    .insert("purpose".to_string(), draft.purpose.clone());
                ctx.parameters
                    .insert("points".to_string(), draft.points.join("\n"));
                if let Some(recipient) = &draft.recipient {
                    ctx.parameters
                        .insert("recipient".to_string(), recipient.clone());
                }
                if let Some(tone) = &draft.tone {
                    ctx.parameters.insert("tone".to_string(), tone.clone());
                }
                if let Some(max_tokens) = draft.max_tokens {
                    ctx.parameters
                        .insert("max_tokens".to_string(), max_tokens.to_string());
                }
                ctx.conversation_id = draft.conversation_id.clone();
                ctx.user_id = draft.user_id.clone();
            }
        }

        if let Some(conversation_id) = ctx.conversation_id.clone() {
            ctx.conversation = self.memory.get_conversation(&conversation_id).await?;
            debug!(
                conversation_id,
                loaded = ctx.conversation.is_some(),
                "router loaded conversation memory"
            );
        }
        if let Some(user_id) = ctx.user_id.clone() {
            ctx.persona = self.memory.get_persona(&user_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryMemoryStore, PersonaKind, PersonaMemory, Turn};
    use crate::types::{AskRequest, DraftRequest};

    fn router_with_memory() -> (RouterAgent, Arc<InMemoryMemoryStore>) {
        let memory = Arc::new(InMemoryMemoryStore::default());
        (RouterAgent::new(memory.clone()), memory)
    }

    #[tokio::test]
    async fn classifies_ask_and_extracts_parameters() {
        let (router, _) = router_with_memory();
        let mut ctx = AgentContext::new("corr");
        let mut request = AskRequest::new("How do I report an incident?");
        request.top_k = Some(5);
        ctx.request = Some(AgentRequest::Ask(request));

        router.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.request_type, RequestKind::Ask);
        assert_eq!(ctx.parameter("Question"), Some("How do I report an incident?"));
        assert_eq!(ctx.parameter("top_k"), Some("5"));
    }

    #[tokio::test]
    async fn classifies_draft() {
        let (router, _) = router_with_memory();
        let mut ctx = AgentContext::new("corr");
        let mut request = DraftRequest::new("incident notification");
        request.points = vec!["Investigation scheduled".to_string()];
        ctx.request = Some(AgentRequest::Draft(request));

        router.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.request_type, RequestKind::Draft);
        assert_eq!(ctx.parameter("purpose"), Some("incident notification"));
        assert!(ctx.parameter("points").unwrap().contains("Investigation"));
    }

    #[tokio::test]
    async fn loads_memory_when_ids_present() {
        let (router, memory) = router_with_memory();
        memory
            .append_turn("c1", Some("u1"), Turn::new("earlier q", "earlier a", vec![]))
            .await
            .unwrap();
        memory
            .upsert_persona(PersonaMemory::seeded("u1", PersonaKind::Inspector))
            .await
            .unwrap();

        let mut ctx = AgentContext::new("corr");
        let mut request = AskRequest::new("follow-up question");
        request.conversation_id = Some("c1".to_string());
        request.user_id = Some("u1".to_string());
        ctx.request = Some(AgentRequest::Ask(request));

        router.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.conversation.as_ref().unwrap().turns.len(), 1);
        assert_eq!(ctx.persona.as_ref().unwrap().kind, PersonaKind::Inspector);
    }

    #[tokio::test]
    async fn fails_only_on_missing_request() {
        let (router, _) = router_with_memory();
        let mut ctx = AgentContext::new("corr");
        assert!(matches!(
            router.run(&mut ctx).await.unwrap_err(),
            AgentError::MissingInput { what: "request" }
        ));
    }
}
